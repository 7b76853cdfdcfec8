use syn::{Expr, Ident};

pub(crate) use super::requested::Transform;

// Final, validated options of one declaration.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Computed {
  pub kind: Kind,
  pub default_value: Option<Expr>,
  pub union_member_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Kind {
  Omit,
  Boolean,
  Integral(Integral),
  String(StringOptions),
  Buffer(Buffer),
  Transformed(Transform),
  TaggedUnion(Tagged),
  Structure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Integral {
  pub bitcount: u32,
  pub min: i128,
  pub max: i128,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StringOptions {
  /// In-memory length of the byte array.
  pub length: usize,
  /// The last byte is always a terminator and never hits the wire.
  pub terminated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Buffer {
  pub bytecount: usize,
  /// The buffer is a whole `[u8; N]` row rather than one primitive's bytes.
  pub byte_row: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Tagged {
  pub tag: Ident,
  pub internal: bool,
}

impl Integral {
  pub(crate) fn natural(signed: bool, bits: u32) -> Self {
    Self::representable(signed, bits)
  }

  // Full range of a `bitcount`-bit value of the given signedness.
  pub(crate) fn representable(signed: bool, bitcount: u32) -> Self {
    if signed {
      let half = 1i128 << (bitcount - 1);
      Self { bitcount, min: -half, max: half - 1 }
    } else {
      Self { bitcount, min: 0, max: (1i128 << bitcount) - 1 }
    }
  }
}

impl StringOptions {
  pub(crate) fn wire_len(&self) -> usize {
    if self.terminated { self.length - 1 } else { self.length }
  }
}

impl Computed {
  pub(crate) fn omitted() -> Self {
    Self { kind: Kind::Omit, default_value: None, union_member_id: None }
  }

  pub(crate) fn is_omitted(&self) -> bool {
    matches!(self.kind, Kind::Omit)
  }

  // Kinds the item model never splits.
  pub(crate) fn is_leaf(&self) -> bool {
    matches!(
      self.kind,
      Kind::Omit | Kind::Boolean | Kind::Integral(_) | Kind::String(_) | Kind::Buffer(_) | Kind::Transformed(_)
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn representable_ranges() {
    assert_eq!(Integral::representable(false, 6), Integral { bitcount: 6, min: 0, max: 63 });
    assert_eq!(Integral::representable(true, 8), Integral { bitcount: 8, min: -128, max: 127 });
    assert_eq!(Integral::natural(false, 64).max, u64::MAX as i128);
    assert_eq!(Integral::natural(true, 64).min, i64::MIN as i128);
  }

  #[test]
  fn terminated_strings_keep_their_last_byte_off_the_wire() {
    assert_eq!(StringOptions { length: 8, terminated: true }.wire_len(), 7);
    assert_eq!(StringOptions { length: 8, terminated: false }.wire_len(), 8);
  }
}
