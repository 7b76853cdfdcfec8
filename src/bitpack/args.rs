use std::collections::BTreeMap;

use proc_macro2::{Span, TokenStream as TokenStream2};
use syn::meta::ParseNestedMeta;
use syn::parse::{ParseStream, Parser};
use syn::{Ident, LitBool, LitInt, LitStr, Path, Result as SynResult, Token, Type};

use super::attrs;
use super::options::Requested;

// One top-level object handed to the generated functions, e.g. `save: SaveBlock`.
#[derive(Clone, Debug)]
pub(super) struct DataObject {
  pub ident: Ident,
  pub ty: Type,
}

// Paths of the bitstream primitives used for one direction (read or write).
#[derive(Clone, Debug)]
pub(super) struct IoFunctions {
  pub bool_: Path,
  pub u8_: Path,
  pub u16_: Path,
  pub u32_: Path,
  pub u64_: Path,
  pub string: Path,
  pub string_terminated: Path,
  pub buffer: Path,
}

impl IoFunctions {
  fn with_prefix(prefix: &str) -> Self {
    let path = |suffix: &str| Path::from(Ident::new(&format!("{prefix}_{suffix}"), Span::call_site()));
    Self {
      bool_: path("bool"),
      u8_: path("u8"),
      u16_: path("u16"),
      u32_: path("u32"),
      u64_: path("u64"),
      string: path("string"),
      string_terminated: path("string_terminated"),
      buffer: path("buffer"),
    }
  }

  fn slot(&mut self, kind: &str) -> Option<&mut Path> {
    match kind {
      "bool" => Some(&mut self.bool_),
      "u8" => Some(&mut self.u8_),
      "u16" => Some(&mut self.u16_),
      "u32" => Some(&mut self.u32_),
      "u64" => Some(&mut self.u64_),
      "string" => Some(&mut self.string),
      "string_terminated" => Some(&mut self.string_terminated),
      "buffer" => Some(&mut self.buffer),
      _ => None,
    }
  }

  // Smallest unsigned primitive able to carry `bits` bits.
  pub(super) fn unsigned(&self, bits: usize) -> &Path {
    match bits {
      0..=8 => &self.u8_,
      9..=16 => &self.u16_,
      17..=32 => &self.u32_,
      _ => &self.u64_,
    }
  }
}

// Resolved `#[bitpack(...)]` arguments: the read-only context of one expansion.
pub(super) struct GlobalOptions {
  pub sector_count: usize,
  pub sector_size: usize,
  pub read_ident: Ident,
  pub save_ident: Ident,
  pub state_ty: Type,
  pub groups: Vec<Vec<DataObject>>,
  pub bool_types: Vec<Ident>,
  pub read_fns: IoFunctions,
  pub write_fns: IoFunctions,
  pub presets: BTreeMap<String, Requested>,
  pub whole_struct_functions: bool,
  // Only shapes the `debug_dump` listing.
  pub inline_threshold: usize,
  pub debug_dump: Vec<Ident>,
}

impl GlobalOptions {
  pub(super) fn capacity_bits(&self) -> usize {
    self.sector_size * 8
  }

  pub(super) fn objects(&self) -> impl Iterator<Item = &DataObject> {
    self.groups.iter().flatten()
  }

  // Parse the macro arguments. Configuration errors are fatal: on any of them
  // the errors are recorded and `None` is returned.
  pub(super) fn parse(tokens: TokenStream2, errors: &mut Vec<syn::Error>) -> Option<GlobalOptions> {
    let mut raw = RawArgs::default();
    let parser = syn::meta::parser(|meta| raw.apply(&meta));
    if let Err(err) = parser.parse2(tokens) {
      errors.push(err);
      return None;
    }
    raw.finish(errors)
  }
}

#[derive(Default)]
struct RawArgs {
  sector_count: Option<usize>,
  sector_size: Option<usize>,
  read: Option<Ident>,
  save: Option<Ident>,
  state: Option<Type>,
  groups: Vec<Vec<DataObject>>,
  bool_types: Vec<Ident>,
  read_overrides: Vec<(String, Path)>,
  write_overrides: Vec<(String, Path)>,
  presets: BTreeMap<String, Requested>,
  whole_struct_functions: Option<bool>,
  inline_threshold: Option<usize>,
  debug_dump: Vec<Ident>,
}

impl RawArgs {
  fn apply(&mut self, meta: &ParseNestedMeta) -> SynResult<()> {
    let Some(key) = meta.path.get_ident().map(Ident::to_string) else {
      return Err(meta.error("expected a bitpack option name"));
    };
    match key.as_str() {
      "sector_count" => self.sector_count = Some(positive(meta, "sector_count")?),
      "sector_size" => self.sector_size = Some(positive(meta, "sector_size")?),
      "read" => self.read = Some(meta.value()?.parse()?),
      "save" => self.save = Some(meta.value()?.parse()?),
      "state" => self.state = Some(meta.value()?.parse()?),
      "data" => {
        let content;
        syn::parenthesized!(content in meta.input);
        self.groups = parse_groups(&content)?;
      }
      "bool_type" => self.bool_types.push(meta.value()?.parse()?),
      "heritable" => {
        let content;
        syn::parenthesized!(content in meta.input);
        let name: LitStr = content.parse()?;
        if name.value().is_empty() {
          return Err(syn::Error::new(name.span(), "a heritable preset cannot have a blank name"));
        }
        let mut preset = Requested::default();
        if content.parse::<Option<Token![,]>>()?.is_some() {
          let rest: TokenStream2 = content.parse()?;
          syn::meta::parser(|inner| attrs::apply_meta(&mut preset, &inner)).parse2(rest)?;
        }
        if self.presets.insert(name.value(), preset).is_some() {
          return Err(syn::Error::new(name.span(), format!("heritable preset {:?} is defined twice", name.value())));
        }
      }
      "whole_struct_functions" => self.whole_struct_functions = Some(meta.value()?.parse::<LitBool>()?.value),
      "inline_threshold" => {
        let lit: LitInt = meta.value()?.parse()?;
        self.inline_threshold = Some(lit.base10_parse()?);
      }
      "debug_dump" => self.debug_dump.push(meta.value()?.parse()?),
      other => {
        if let Some(kind) = other.strip_prefix("func_read_") {
          self.read_overrides.push((kind.to_owned(), meta.value()?.parse()?));
        } else if let Some(kind) = other.strip_prefix("func_write_") {
          self.write_overrides.push((kind.to_owned(), meta.value()?.parse()?));
        } else {
          return Err(meta.error(format!(
            "unknown bitpack option `{other}`; expected `sector_count`, `sector_size`, `read`, `save`, `state`, \
             `data(...)`, `bool_type`, `heritable(...)`, `func_read_*`, `func_write_*`, `whole_struct_functions`, \
             `inline_threshold` or `debug_dump`"
          )));
        }
      }
    }
    Ok(())
  }

  fn finish(self, errors: &mut Vec<syn::Error>) -> Option<GlobalOptions> {
    let before = errors.len();
    let missing = |what: &str| syn::Error::new(Span::call_site(), format!("bitpack: missing `{what}`"));

    let mut read_fns = IoFunctions::with_prefix("read");
    let mut write_fns = IoFunctions::with_prefix("write");
    for (fns, overrides) in [(&mut read_fns, &self.read_overrides), (&mut write_fns, &self.write_overrides)] {
      for (kind, path) in overrides {
        match fns.slot(kind) {
          Some(slot) => *slot = path.clone(),
          None => errors.push(syn::Error::new_spanned(
            path,
            format!("unknown bitstream function kind `{kind}`; expected bool, u8, u16, u32, u64, string, string_terminated or buffer"),
          )),
        }
      }
    }

    let mut seen: Vec<&Ident> = Vec::new();
    for obj in self.groups.iter().flatten() {
      if seen.contains(&&obj.ident) {
        errors.push(syn::Error::new(obj.ident.span(), format!("data object `{}` is listed twice", obj.ident)));
      }
      seen.push(&obj.ident);
    }
    for dump in &self.debug_dump {
      if !seen.contains(&dump) {
        errors.push(syn::Error::new(dump.span(), format!("`debug_dump` names `{dump}`, which is not a data object")));
      }
    }

    let sector_size = self.sector_size.or_else(|| {
      errors.push(missing("sector_size = N"));
      None
    });
    let read_ident = self.read.or_else(|| {
      errors.push(missing("read = function_name"));
      None
    });
    let save_ident = self.save.or_else(|| {
      errors.push(missing("save = function_name"));
      None
    });
    if errors.len() != before {
      return None;
    }

    Some(GlobalOptions {
      sector_count: self.sector_count.unwrap_or(1),
      sector_size: sector_size?,
      read_ident: read_ident?,
      save_ident: save_ident?,
      state_ty: self.state.unwrap_or_else(|| syn::parse_quote!(BitstreamState)),
      groups: self.groups,
      bool_types: self.bool_types,
      read_fns,
      write_fns,
      presets: self.presets,
      whole_struct_functions: self.whole_struct_functions.unwrap_or(true),
      inline_threshold: self.inline_threshold.unwrap_or(4),
      debug_dump: self.debug_dump,
    })
  }
}

fn positive(meta: &ParseNestedMeta, key: &str) -> SynResult<usize> {
  let lit: LitInt = meta.value()?.parse()?;
  let value = lit.base10_parse::<usize>()?;
  if value == 0 {
    return Err(syn::Error::new(lit.span(), format!("`{key}` must be positive")));
  }
  Ok(value)
}

// `a: A, b: B; c: C` -> [[a, b], [c]]
fn parse_groups(input: ParseStream) -> SynResult<Vec<Vec<DataObject>>> {
  let mut groups = vec![Vec::new()];
  while !input.is_empty() {
    let ident: Ident = input.parse()?;
    input.parse::<Token![:]>()?;
    let ty: Type = input.parse()?;
    if let Some(group) = groups.last_mut() {
      group.push(DataObject { ident, ty });
    }
    if input.peek(Token![;]) {
      input.parse::<Token![;]>()?;
      groups.push(Vec::new());
    } else if !input.is_empty() {
      input.parse::<Token![,]>()?;
    }
  }
  groups.retain(|g| !g.is_empty());
  Ok(groups)
}
