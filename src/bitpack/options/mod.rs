// Option resolution: the layered `#[bitpack]` requests of one declaration
// are folded together and baked into validated [`Computed`] options.

use proc_macro2::Span;
use syn::{Result as SynResult, Type};

use super::args::GlobalOptions;
use super::decl::{RecordKind, Registry, Shape, TypeRef};

mod computed;
mod requested;

pub(crate) use computed::{Buffer, Computed, Integral, Kind, StringOptions, Tagged, Transform};
pub(crate) use requested::{Requested, RequestedX};

// Outcome of resolving one declaration: its options, the array extents that
// remain to be walked, and the element type those options apply to.
#[derive(Debug)]
pub(super) struct Resolution {
  pub computed: Computed,
  pub extents: Vec<usize>,
  pub elem: Option<TypeRef>,
}

pub(super) struct Resolver<'a> {
  registry: &'a Registry,
  opts: &'a GlobalOptions,
}

impl<'a> Resolver<'a> {
  pub(super) fn new(registry: &'a Registry, opts: &'a GlobalOptions) -> Self {
    Self { registry, opts }
  }

  pub(super) fn resolve(&self, own: Option<&Requested>, ty: &Type, span: Span) -> SynResult<Resolution> {
    if let Some(own) = own.filter(|r| r.omit) {
      let computed = Computed {
        kind: Kind::Omit,
        default_value: own.default_value.clone(),
        union_member_id: own.union_member_id,
      };
      return Ok(Resolution { computed, extents: self.registry.extents_of(ty), elem: None });
    }

    let tref = match (self.registry.resolve_type(ty), own.and_then(|r| r.x.as_ref())) {
      (Ok(tref), _) => tref,
      // Types declared outside the module still travel through their own transform.
      (Err(_), Some(RequestedX::Transform(t))) => {
        let computed = Computed {
          kind: Kind::Transformed(t.clone()),
          default_value: own.and_then(|r| r.default_value.clone()),
          union_member_id: own.and_then(|r| r.union_member_id),
        };
        return Ok(Resolution { computed, extents: Vec::new(), elem: None });
      }
      (Err(err), _) => return Err(err),
    };
    let mut merged = Requested::default();
    for layer in self.layers(&tref) {
      merged.coalesce(layer);
    }
    if let Some(own) = own {
      merged.coalesce(own);
    }
    let merged = self.apply_preset(merged)?;
    let span = merged.span.unwrap_or(span);

    let (mut extents, elem) = tref.split_arrays();
    let kind = if merged.omit { Kind::Omit } else { self.bake(&merged, elem, &mut extents, span)? };
    let computed = Computed { kind, default_value: merged.default_value, union_member_id: merged.union_member_id };
    Ok(Resolution { computed, extents, elem: Some(elem.clone()) })
  }

  // Requests attached to a type, lowest precedence first.
  fn layers<'t>(&'t self, tref: &'t TypeRef) -> Vec<&'t Requested> {
    let mut out = match &tref.shape {
      Shape::Array { elem, .. } => self.layers(elem),
      Shape::Record { name, .. } => self.registry.record(name).map(|r| &r.requested).into_iter().collect(),
      _ => Vec::new(),
    };
    out.extend(tref.aliases.iter().rev().filter_map(|a| self.registry.alias(a)).map(|a| &a.requested));
    out
  }

  fn apply_preset(&self, merged: Requested) -> SynResult<Requested> {
    let Some(name) = &merged.inherit else { return Ok(merged) };
    let Some(preset) = self.opts.presets.get(&name.value()) else {
      return Err(syn::Error::new(name.span(), format!("unknown heritable preset {:?}", name.value())));
    };
    let mut out = preset.clone();
    out.coalesce(&merged);
    Ok(out)
  }

  fn bake(&self, req: &Requested, elem: &TypeRef, extents: &mut Vec<usize>, span: Span) -> SynResult<Kind> {
    let err = |msg: String| syn::Error::new(span, msg);
    match &req.x {
      None => self.default_kind(elem, span),
      Some(RequestedX::Integral { bitcount, range }) => {
        let Shape::Int { signed, bits } = elem.shape else {
          return Err(err("integer options can only be applied to integer types".into()));
        };
        integral(signed, bits, *bitcount, *range).map(Kind::Integral).map_err(err)
      }
      Some(RequestedX::String { unterminated }) => {
        if !matches!(elem.shape, Shape::Int { signed: false, bits: 8 }) || extents.is_empty() {
          return Err(err("string options can only be applied to `[u8; N]` arrays".into()));
        }
        let length = extents.pop().unwrap_or_default();
        let terminated = !unterminated;
        if terminated && length == 0 {
          return Err(err("a terminated string needs room for its terminator".into()));
        }
        Ok(Kind::String(StringOptions { length, terminated }))
      }
      Some(RequestedX::Buffer) => match elem.shape {
        Shape::Int { signed: false, bits: 8 } if !extents.is_empty() => {
          let bytecount = extents.pop().unwrap_or_default();
          Ok(Kind::Buffer(Buffer { bytecount, byte_row: true }))
        }
        Shape::Int { bits, .. } | Shape::Float { bits } => {
          Ok(Kind::Buffer(Buffer { bytecount: bits as usize / 8, byte_row: false }))
        }
        _ => Err(err("opaque buffers hold integers, floats or byte arrays".into())),
      },
      Some(RequestedX::Transform(t)) => Ok(Kind::Transformed(t.clone())),
      Some(RequestedX::Tagged { tag, internal }) => match elem.shape {
        Shape::Record { kind: RecordKind::Union, .. } => {
          Ok(Kind::TaggedUnion(Tagged { tag: tag.clone(), internal: *internal }))
        }
        _ => Err(err("tagged-union options can only be applied to unions".into())),
      },
    }
  }

  fn default_kind(&self, elem: &TypeRef, span: Span) -> SynResult<Kind> {
    Ok(match &elem.shape {
      Shape::Bool => Kind::Boolean,
      Shape::Int { .. } if self.is_bool_alias(elem) => Kind::Boolean,
      Shape::Int { signed, bits } => Kind::Integral(Integral::natural(*signed, *bits)),
      Shape::Float { bits } => Kind::Buffer(Buffer { bytecount: *bits as usize / 8, byte_row: false }),
      Shape::Record { kind: RecordKind::Struct, .. } => Kind::Structure,
      Shape::Record { name, kind: RecordKind::Union } => {
        return Err(syn::Error::new(
          span,
          format!("union `{name}` is missing tag; add `#[bitpack(tag = field)]` or `#[bitpack(internal_tag = field)]`"),
        ));
      }
      Shape::Array { .. } => return Err(syn::Error::new(span, "nested array left after splitting ranks")),
    })
  }

  fn is_bool_alias(&self, elem: &TypeRef) -> bool {
    elem.aliases.iter().any(|a| self.opts.bool_types.iter().any(|b| b == a))
  }
}

fn bits_for(span: u128) -> u32 {
  128 - span.leading_zeros()
}

fn integral(signed: bool, bits: u32, bitcount: Option<u32>, range: Option<(i128, i128)>) -> Result<Integral, String> {
  if let Some(b) = bitcount.filter(|&b| b == 0 || b > bits) {
    return Err(format!("bitcount {b} is out of range for a {bits}-bit integer"));
  }
  let Some((min, max)) = range else {
    return Ok(Integral::representable(signed, bitcount.unwrap_or(bits)));
  };
  if min > max {
    return Err(format!("range min {min} is greater than max {max}"));
  }
  let natural = Integral::natural(signed, bits);
  if min < natural.min || max > natural.max {
    return Err(format!("range ({min}, {max}) does not fit the type's range ({}, {})", natural.min, natural.max));
  }
  let needed = bits_for((max - min) as u128).max(1);
  match bitcount {
    Some(b) if b < needed => Err(format!("bitcount {b} is too small for range ({min}, {max}); it needs {needed} bits")),
    Some(b) => Ok(Integral { bitcount: b, min, max }),
    None => Ok(Integral { bitcount: needed, min, max }),
  }
}
