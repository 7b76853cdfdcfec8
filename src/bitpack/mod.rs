use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, quote};
use syn::{Item, ItemMod};

mod args;
mod attrs;
mod codegen;
mod decl;
mod descriptor;
mod dump;
mod item;
mod options;
mod sectors;

use args::{DataObject, GlobalOptions};
use codegen::Generator;
use decl::Registry;
use descriptor::{DeclModel, DescId};
use sectors::Packer;

// ── driver ────────────────────────────────────────────────────────────────
fn emit_with_compile_errors(tokens: impl ToTokens, errors: Vec<syn::Error>) -> TokenStream2 {
  let es = errors.into_iter().map(|e| e.to_compile_error());
  quote! { #tokens #( #es )* }
}

pub(super) fn expand(args: TokenStream2, mut module: ItemMod) -> TokenStream2 {
  let mut errors = Vec::new();
  let opts = GlobalOptions::parse(args, &mut errors);
  let Some((_, items)) = &mut module.content else {
    errors.push(syn::Error::new_spanned(&module.ident, "#[bitpack] must be applied to an inline module `mod name { ... }`"));
    return emit_with_compile_errors(quote! {}, errors);
  };

  let registry = Registry::collect(items, &mut errors);
  attrs::strip_bitpack_attrs(items);
  let Some(opts) = opts else {
    return emit_with_compile_errors(&module, errors);
  };

  match generate(&opts, &registry) {
    Ok(tokens) if errors.is_empty() => items.push(Item::Verbatim(tokens)),
    Ok(_) => {}
    Err(errs) => errors.extend(errs),
  }
  emit_with_compile_errors(&module, errors)
}

// Resolve, pack and emit. Declaration errors are gathered before packing so
// that one run reports them together with packing problems.
fn generate(opts: &GlobalOptions, registry: &Registry) -> Result<TokenStream2, Vec<syn::Error>> {
  let mut model = DeclModel::new(registry, opts);
  let roots: Vec<(DataObject, DescId)> = opts.objects().map(|o| (o.clone(), model.build_root(o))).collect();
  let mut errors = model.take_errors();

  let mut ids = roots.iter().map(|(_, id)| *id);
  let groups: Vec<Vec<DescId>> = opts.groups.iter().map(|g| ids.by_ref().take(g.len()).collect()).collect();
  match Packer::new(&model, opts.capacity_bits()).pack(&groups, opts.sector_count) {
    Ok(sectors) if errors.is_empty() => Ok(Generator::new(&model, opts).generate(&sectors, &roots)),
    Ok(_) => Err(errors),
    Err(err) => {
      errors.push(err);
      Err(errors)
    }
  }
}
