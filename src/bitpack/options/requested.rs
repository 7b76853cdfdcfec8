use proc_macro2::Span;
use syn::{Expr, Ident, LitStr, Path, Type};

// Options exactly as written in one `#[bitpack(...)]` attribute set (or preset).
#[derive(Clone, Debug, Default)]
pub(crate) struct Requested {
  pub omit: bool,
  pub default_value: Option<Expr>,
  pub union_member_id: Option<i64>,
  pub inherit: Option<LitStr>,
  pub x: Option<RequestedX>,
  pub span: Option<Span>,
}

// The kind-specific part of a request. At most one per attribute set.
#[derive(Clone, Debug)]
pub(crate) enum RequestedX {
  Buffer,
  Integral { bitcount: Option<u32>, range: Option<(i128, i128)> },
  String { unterminated: bool },
  Transform(Transform),
  Tagged { tag: Ident, internal: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Transform {
  pub wire: Type,
  pub pre_pack: Path,
  pub post_unpack: Path,
}

impl RequestedX {
  pub(crate) fn describe(&self) -> &'static str {
    match self {
      RequestedX::Buffer => "opaque buffer",
      RequestedX::Integral { .. } => "integer",
      RequestedX::String { .. } => "string",
      RequestedX::Transform(_) => "transform",
      RequestedX::Tagged { .. } => "tagged union",
    }
  }
}

impl Requested {
  // Overlay `upper` onto `self`. Whatever `upper` states wins; integer keys
  // merge individually, any other kind replaces the lower one wholesale.
  pub(crate) fn coalesce(&mut self, upper: &Requested) {
    self.omit |= upper.omit;
    if upper.default_value.is_some() {
      self.default_value.clone_from(&upper.default_value);
    }
    if upper.union_member_id.is_some() {
      self.union_member_id = upper.union_member_id;
    }
    if upper.inherit.is_some() {
      self.inherit.clone_from(&upper.inherit);
    }
    if upper.span.is_some() {
      self.span = upper.span;
    }
    let Some(x) = &upper.x else { return };
    match (&mut self.x, x) {
      (
        Some(RequestedX::Integral { bitcount, range }),
        RequestedX::Integral { bitcount: upper_bitcount, range: upper_range },
      ) => {
        if upper_bitcount.is_some() {
          *bitcount = *upper_bitcount;
        }
        if upper_range.is_some() {
          *range = *upper_range;
        }
      }
      (slot, x) => *slot = Some(x.clone()),
    }
  }
}
