// Plain-text layout listings for generated docs and `debug_dump` constants.

use core::fmt::Write;

use super::descriptor::{DeclModel, DescId};
use super::item::{Condition, Item, Segment};
use super::sectors::Sector;

// Markdown code fence used to wrap listings in rustdoc.
const CODE_FENCE: &str = "```text";

pub(super) fn path(model: &DeclModel, segments: &[Segment]) -> String {
  let mut out = String::new();
  for (i, seg) in segments.iter().enumerate() {
    if i > 0 {
      out.push('.');
    }
    let _ = write!(out, "{}", model.get(seg.desc).ident);
    for a in &seg.accesses {
      if a.is_slice() {
        let _ = write!(out, "[{}..{}]", a.start, a.end());
      } else {
        let _ = write!(out, "[{}]", a.start);
      }
    }
  }
  out
}

fn condition(model: &DeclModel, c: &Condition) -> String {
  format!("{} == {}", path(model, &c.tag), c.value)
}

pub(super) fn describe(model: &DeclModel, item: &Item) -> String {
  let mut out = String::new();
  if !item.conditions.is_empty() {
    let conds: Vec<String> = item.conditions.iter().map(|c| condition(model, c)).collect();
    let _ = write!(out, "if {}: ", conds.join(" && "));
  }
  match item.padding {
    Some(p) if p.trailing => out.push_str("(unused)"),
    Some(_) => out.push_str("(padding)"),
    None => {
      out.push_str(&path(model, &item.segments));
      if item.flags.omitted {
        out.push_str(" (omitted, defaulted)");
      }
    }
  }
  out
}

pub(super) fn sector_table(model: &DeclModel, sectors: &[Sector], capacity: usize) -> String {
  let mut out = String::from(CODE_FENCE);
  out.push('\n');
  for (n, sector) in sectors.iter().enumerate() {
    let _ = writeln!(out, "sector {n}: {} of {capacity} bits", sector.bit_length(model));
    for (item, &(offset, size)) in sector.items.iter().zip(sector.item_layout(model)) {
      let _ = writeln!(out, "  @{offset:<5} {size:>5}  {}", describe(model, item));
    }
  }
  out.push_str("```");
  out
}

pub(super) fn object_listing(model: &DeclModel, root: DescId, threshold: usize) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{}: {} bits", model.get(root).ident, model.total_bits(root));
  for item in Item::root(model, root).flatten(model, threshold) {
    let _ = writeln!(out, "  {:>5}  {}", item.size_in_bits(model), describe(model, &item));
  }
  out
}
