// Read-only view of the declarations inside the annotated module.
//
// Types are resolved into a small sum type over {bool, integer, float,
// array, struct, union}; type aliases are followed and remembered so their
// attributes can take part in option resolution.

use std::collections::HashMap;

use proc_macro2::Span;
use syn::spanned::Spanned;
use syn::{Attribute, Expr, Fields, Ident, Item, Lit, Result as SynResult, Type};

use super::attrs::parse_bitpack_attrs;
use super::options::Requested;

const MAX_TYPE_DEPTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum RecordKind {
  Struct,
  Union,
}

pub(super) struct FieldDecl {
  pub ident: Ident,
  pub ty: Type,
  pub requested: Requested,
  pub span: Span,
}

pub(super) struct RecordDecl {
  pub ident: Ident,
  pub kind: RecordKind,
  pub fields: Vec<FieldDecl>,
  pub requested: Requested,
  pub repr_c: bool,
}

pub(super) struct AliasDecl {
  pub target: Type,
  pub requested: Requested,
}

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Shape {
  Bool,
  Int { signed: bool, bits: u32 },
  Float { bits: u32 },
  Array { elem: Box<TypeRef>, extent: usize },
  Record { name: String, kind: RecordKind },
}

// A resolved type. `ty` is the type as written; `aliases` lists the aliases
// passed through on the way to `shape`, nearest first.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct TypeRef {
  pub ty: Type,
  pub aliases: Vec<String>,
  pub shape: Shape,
}

impl TypeRef {
  // Peel array ranks: outer extents first, then the element type.
  pub(super) fn split_arrays(&self) -> (Vec<usize>, &TypeRef) {
    let mut extents = Vec::new();
    let mut cur = self;
    while let Shape::Array { elem, extent } = &cur.shape {
      extents.push(*extent);
      cur = elem;
    }
    (extents, cur)
  }
}

#[derive(Default)]
pub(super) struct Registry {
  records: HashMap<String, RecordDecl>,
  aliases: HashMap<String, AliasDecl>,
}

impl Registry {
  pub(super) fn collect(items: &[Item], errors: &mut Vec<syn::Error>) -> Registry {
    let mut registry = Registry::default();
    for item in items {
      match item {
        Item::Struct(s) => {
          if !s.generics.params.is_empty() {
            errors.push(syn::Error::new(s.generics.span(), "bitpack: generic structs are not supported"));
            continue;
          }
          let fields = match &s.fields {
            Fields::Named(named) => named.named.iter().map(|f| field_decl(f, errors)).collect(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
              errors.push(syn::Error::new(s.ident.span(), "bitpack: tuple structs are not supported"));
              continue;
            }
          };
          registry.insert_record(RecordDecl {
            ident: s.ident.clone(),
            kind: RecordKind::Struct,
            fields,
            requested: parse_bitpack_attrs(&s.attrs, errors),
            repr_c: has_repr_c(&s.attrs),
          });
        }
        Item::Union(u) => {
          if !u.generics.params.is_empty() {
            errors.push(syn::Error::new(u.generics.span(), "bitpack: generic unions are not supported"));
            continue;
          }
          registry.insert_record(RecordDecl {
            ident: u.ident.clone(),
            kind: RecordKind::Union,
            fields: u.fields.named.iter().map(|f| field_decl(f, errors)).collect(),
            requested: parse_bitpack_attrs(&u.attrs, errors),
            repr_c: has_repr_c(&u.attrs),
          });
        }
        Item::Type(t) => {
          if !t.generics.params.is_empty() {
            errors.push(syn::Error::new(t.generics.span(), "bitpack: generic type aliases are not supported"));
            continue;
          }
          registry.aliases.insert(
            t.ident.to_string(),
            AliasDecl { target: (*t.ty).clone(), requested: parse_bitpack_attrs(&t.attrs, errors) },
          );
        }
        _ => {}
      }
    }
    registry
  }

  fn insert_record(&mut self, record: RecordDecl) {
    self.records.insert(record.ident.to_string(), record);
  }

  pub(super) fn record(&self, name: &str) -> Option<&RecordDecl> {
    self.records.get(name)
  }

  pub(super) fn alias(&self, name: &str) -> Option<&AliasDecl> {
    self.aliases.get(name)
  }

  pub(super) fn resolve_type(&self, ty: &Type) -> SynResult<TypeRef> {
    self.resolve_at(ty, 0)
  }

  // Array ranks of a type, outermost first. Falls back to the written array
  // syntax when the element type is not known here.
  pub(super) fn extents_of(&self, ty: &Type) -> Vec<usize> {
    if let Ok(tref) = self.resolve_type(ty) {
      return tref.split_arrays().0;
    }
    let mut extents = Vec::new();
    let mut cur = ty;
    while let Type::Array(a) = cur {
      match array_extent(&a.len) {
        Ok(n) => extents.push(n),
        Err(_) => return Vec::new(),
      }
      cur = &a.elem;
    }
    extents
  }

  fn resolve_at(&self, ty: &Type, depth: usize) -> SynResult<TypeRef> {
    if depth > MAX_TYPE_DEPTH {
      return Err(syn::Error::new(ty.span(), "type alias chain is too deep or cyclic"));
    }
    match ty {
      Type::Paren(p) => self.resolve_at(&p.elem, depth),
      Type::Group(g) => self.resolve_at(&g.elem, depth),
      Type::Array(a) => {
        let extent = array_extent(&a.len)?;
        let elem = self.resolve_at(&a.elem, depth + 1)?;
        Ok(TypeRef { ty: ty.clone(), aliases: Vec::new(), shape: Shape::Array { elem: Box::new(elem), extent } })
      }
      Type::Path(p) if p.qself.is_none() => {
        let Some(ident) = p.path.get_ident() else {
          return Err(unsupported(ty));
        };
        let name = ident.to_string();
        if let Some(shape) = primitive(&name) {
          return Ok(TypeRef { ty: ty.clone(), aliases: Vec::new(), shape });
        }
        if let Some(record) = self.records.get(&name) {
          let shape = Shape::Record { name, kind: record.kind };
          return Ok(TypeRef { ty: ty.clone(), aliases: Vec::new(), shape });
        }
        if let Some(alias) = self.aliases.get(&name) {
          let mut inner = self.resolve_at(&alias.target, depth + 1)?;
          inner.aliases.insert(0, name);
          inner.ty = ty.clone();
          return Ok(inner);
        }
        Err(syn::Error::new(
          ty.span(),
          format!("`{name}` is neither a supported primitive nor a type declared in this module"),
        ))
      }
      _ => Err(unsupported(ty)),
    }
  }
}

fn field_decl(f: &syn::Field, errors: &mut Vec<syn::Error>) -> FieldDecl {
  FieldDecl {
    // Named fields always carry an ident; the fallback only keeps the span.
    ident: f.ident.clone().unwrap_or_else(|| Ident::new("_", f.span())),
    ty: f.ty.clone(),
    requested: parse_bitpack_attrs(&f.attrs, errors),
    span: f.span(),
  }
}

fn has_repr_c(attrs: &[Attribute]) -> bool {
  attrs.iter().filter(|a| a.path().is_ident("repr")).any(|a| {
    let mut found = false;
    let _ = a.parse_nested_meta(|meta| {
      found |= meta.path.is_ident("C");
      Ok(())
    });
    found
  })
}

fn primitive(name: &str) -> Option<Shape> {
  let int = |signed, bits| Some(Shape::Int { signed, bits });
  match name {
    "bool" => Some(Shape::Bool),
    "u8" => int(false, 8),
    "u16" => int(false, 16),
    "u32" => int(false, 32),
    "u64" => int(false, 64),
    "i8" => int(true, 8),
    "i16" => int(true, 16),
    "i32" => int(true, 32),
    "i64" => int(true, 64),
    "f32" => Some(Shape::Float { bits: 32 }),
    "f64" => Some(Shape::Float { bits: 64 }),
    _ => None,
  }
}

fn array_extent(len: &Expr) -> SynResult<usize> {
  match len {
    Expr::Lit(lit) => match &lit.lit {
      Lit::Int(n) => n.base10_parse(),
      other => Err(syn::Error::new(other.span(), "array length must be an integer literal")),
    },
    Expr::Group(g) => array_extent(&g.expr),
    other => Err(syn::Error::new(other.span(), "array length must be an integer literal")),
  }
}

fn unsupported(ty: &Type) -> syn::Error {
  syn::Error::new(ty.span(), "bitpack: unsupported type; expected a primitive, an array, or a type declared in this module")
}

#[cfg(test)]
mod tests {
  use super::*;
  use syn::parse_quote;

  fn registry(items: Vec<Item>) -> Registry {
    let mut errors = Vec::new();
    let reg = Registry::collect(&items, &mut errors);
    assert!(errors.is_empty(), "{errors:?}");
    reg
  }

  #[test]
  fn follows_alias_chain_nearest_first() {
    let reg = registry(vec![parse_quote!(type Money = Wide;), parse_quote!(type Wide = u32;)]);
    let t = reg.resolve_type(&parse_quote!(Money)).unwrap();
    assert_eq!(t.aliases, vec!["Money".to_string(), "Wide".to_string()]);
    assert_eq!(t.shape, Shape::Int { signed: false, bits: 32 });
  }

  #[test]
  fn splits_nested_arrays() {
    let reg = registry(vec![parse_quote!(type Row = [i16; 3];)]);
    let t = reg.resolve_type(&parse_quote!([Row; 2])).unwrap();
    let (extents, elem) = t.split_arrays();
    assert_eq!(extents, vec![2, 3]);
    assert_eq!(elem.shape, Shape::Int { signed: true, bits: 16 });
  }

  #[test]
  fn records_know_their_kind_and_repr() {
    let reg = registry(vec![
      parse_quote!(#[repr(C)] union U { a: A, b: B }),
      parse_quote!(struct A { x: u8 }),
      parse_quote!(struct B { x: u8 }),
    ]);
    let t = reg.resolve_type(&parse_quote!(U)).unwrap();
    assert_eq!(t.shape, Shape::Record { name: "U".into(), kind: RecordKind::Union });
    assert!(reg.record("U").unwrap().repr_c);
    assert!(!reg.record("A").unwrap().repr_c);
  }

  #[test]
  fn cyclic_aliases_are_rejected() {
    let reg = registry(vec![parse_quote!(type A = B;), parse_quote!(type B = A;)]);
    let err = reg.resolve_type(&parse_quote!(A)).unwrap_err();
    assert!(err.to_string().contains("cyclic"));
  }

  #[test]
  fn unknown_types_are_rejected() {
    let reg = registry(vec![]);
    assert!(reg.resolve_type(&parse_quote!(usize)).is_err());
    assert!(reg.resolve_type(&parse_quote!(Vec<u8>)).is_err());
    assert!(reg.resolve_type(&parse_quote!([u8; N])).is_err());
  }
}
