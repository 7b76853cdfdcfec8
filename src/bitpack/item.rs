// Serialization items: addressable pieces of the data objects, possibly
// conditioned on union tags, and the one-level expansion the packer uses to
// split them.

use super::descriptor::{DeclModel, DescId};
use super::options::Kind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct ArrayAccess {
  pub start: usize,
  pub count: usize,
}

impl ArrayAccess {
  pub(super) fn single(index: usize) -> Self {
    Self { start: index, count: 1 }
  }

  pub(super) fn is_slice(&self) -> bool {
    self.count != 1
  }

  pub(super) fn end(&self) -> usize {
    self.start + self.count
  }
}

// One step of an item's path: a declaration and the indices applied to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct Segment {
  pub desc: DescId,
  pub accesses: Vec<ArrayAccess>,
}

impl Segment {
  pub(super) fn whole(desc: DescId) -> Self {
    Self { desc, accesses: Vec::new() }
  }
}

// `tag == value`, where `tag` selects a variant of the union at `union`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct Condition {
  pub union: Vec<Segment>,
  pub tag: Vec<Segment>,
  pub value: i64,
}

impl Condition {
  // Both conditions test the tag of the same union instance.
  pub(super) fn same_switch(&self, other: &Condition) -> bool {
    self.union == other.union
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) struct Flags {
  pub defaulted: bool,
  pub omitted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct Padding {
  pub bits: usize,
  /// Nothing of the same branch follows it in its sector.
  pub trailing: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct Item {
  pub conditions: Vec<Condition>,
  pub segments: Vec<Segment>,
  pub flags: Flags,
  pub padding: Option<Padding>,
}

// `list` is `prefix` with at least one more entry appended.
pub(super) fn conditions_are_a_narrowing_of<T: PartialEq>(list: &[T], prefix: &[T]) -> bool {
  list.len() > prefix.len() && list[..prefix.len()] == *prefix
}

impl Item {
  pub(super) fn root(model: &DeclModel, desc: DescId) -> Self {
    Self::member(model, Vec::new(), vec![Segment::whole(desc)])
  }

  pub(super) fn padding(conditions: Vec<Condition>, bits: usize, trailing: bool) -> Self {
    Self { conditions, segments: Vec::new(), flags: Flags::default(), padding: Some(Padding { bits, trailing }) }
  }

  fn member(model: &DeclModel, conditions: Vec<Condition>, segments: Vec<Segment>) -> Self {
    let flags = segments.last().map_or_else(Flags::default, |s| {
      let options = &model.get(s.desc).options;
      Flags { omitted: options.is_omitted(), defaulted: options.default_value.is_some() }
    });
    Self { conditions, segments, flags, padding: None }
  }

  pub(super) fn is_padding(&self) -> bool {
    self.padding.is_some()
  }

  pub(super) fn last(&self) -> Option<&Segment> {
    self.segments.last()
  }

  // Array ranks of the last declaration not yet indexed.
  pub(super) fn remaining_extents<'m>(&self, model: &'m DeclModel) -> &'m [usize] {
    match self.last() {
      Some(seg) => {
        let extents = &model.get(seg.desc).extents;
        &extents[seg.accesses.len().min(extents.len())..]
      }
      None => &[],
    }
  }

  fn trailing_slice(&self) -> Option<ArrayAccess> {
    self.last().and_then(|s| s.accesses.last()).copied().filter(ArrayAccess::is_slice)
  }

  pub(super) fn element_count(&self, model: &DeclModel) -> usize {
    let slice = self.trailing_slice().map_or(1, |a| a.count);
    slice * self.remaining_extents(model).iter().product::<usize>()
  }

  pub(super) fn size_in_bits(&self, model: &DeclModel) -> usize {
    if let Some(p) = self.padding {
      return p.bits;
    }
    if self.flags.omitted {
      return 0;
    }
    match self.last() {
      Some(seg) => model.elem_bits(seg.desc) * self.element_count(model),
      None => 0,
    }
  }

  // A whole union instance that is not an array.
  pub(super) fn is_whole_union(&self, model: &DeclModel) -> bool {
    self.trailing_slice().is_none()
      && self.remaining_extents(model).is_empty()
      && self.last().is_some_and(|s| matches!(model.get(s.desc).options.kind, Kind::TaggedUnion(_)))
  }

  pub(super) fn can_expand(&self, model: &DeclModel) -> bool {
    if self.is_padding() || self.flags.omitted {
      return false;
    }
    if self.trailing_slice().is_some() || !self.remaining_extents(model).is_empty() {
      return true;
    }
    self.last().is_some_and(|s| matches!(model.get(s.desc).options.kind, Kind::Structure | Kind::TaggedUnion(_)))
  }

  pub(super) fn expand(&self, model: &DeclModel) -> Vec<Item> {
    if !self.can_expand(model) {
      return vec![self.clone()];
    }
    let Some(last) = self.last() else { return vec![self.clone()] };

    if let Some(slice) = self.trailing_slice() {
      return (slice.start..slice.end())
        .map(|i| {
          let mut item = self.clone();
          if let Some(a) = item.segments.last_mut().and_then(|s| s.accesses.last_mut()) {
            *a = ArrayAccess::single(i);
          }
          item
        })
        .collect();
    }
    if let Some(&extent) = self.remaining_extents(model).first() {
      return (0..extent)
        .map(|i| {
          let mut item = self.clone();
          if let Some(s) = item.segments.last_mut() {
            s.accesses.push(ArrayAccess::single(i));
          }
          item
        })
        .collect();
    }

    let desc = model.get(last.desc);
    match &desc.options.kind {
      Kind::Structure => desc.members.iter().map(|&m| self.child(model, &[m], self.conditions.clone())).collect(),
      Kind::TaggedUnion(t) if t.internal => self.expand_internal(model),
      Kind::TaggedUnion(t) => self.expand_external(model, &t.tag.to_string()),
      _ => vec![self.clone()],
    }
  }

  fn child(&self, model: &DeclModel, path: &[DescId], conditions: Vec<Condition>) -> Item {
    let mut segments = self.segments.clone();
    segments.extend(path.iter().map(|&d| Segment::whole(d)));
    Item::member(model, conditions, segments)
  }

  fn branch_condition(&self, tag: Vec<Segment>, value: i64) -> Vec<Condition> {
    let mut conditions = self.conditions.clone();
    conditions.push(Condition { union: self.segments.clone(), tag, value });
    conditions
  }

  fn expand_external(&self, model: &DeclModel, tag: &str) -> Vec<Item> {
    let parent = &self.segments[..self.segments.len() - 1];
    let Some(tag_desc) = parent.last().and_then(|p| model.member_named(p.desc, tag)) else {
      return vec![self.clone()];
    };
    let mut tag_path = parent.to_vec();
    tag_path.push(Segment::whole(tag_desc));

    let union_bits = self.size_in_bits(model);
    let variants = self.last().map(|s| model.get(s.desc).members.as_slice()).unwrap_or_default();
    let mut out = Vec::new();
    for &v in variants {
      let Some(id) = model.get(v).options.union_member_id else { continue };
      let conditions = self.branch_condition(tag_path.clone(), id);
      let item = self.child(model, &[v], conditions.clone());
      let used = item.size_in_bits(model);
      if !item.flags.omitted || item.flags.defaulted {
        out.push(item);
      }
      if union_bits > used {
        out.push(Item::padding(conditions, union_bits - used, false));
      }
    }
    out
  }

  fn expand_internal(&self, model: &DeclModel) -> Vec<Item> {
    let Some(last) = self.last() else { return Vec::new() };
    let desc = model.get(last.desc);
    let prefix = desc.tag_prefix;
    let Some(first) = model.prefix_variant(last.desc) else { return Vec::new() };

    let mut out: Vec<Item> = model.get(first).members[..prefix]
      .iter()
      .map(|&m| self.child(model, &[first, m], self.conditions.clone()))
      .collect();
    let prefix_bits: usize = out.iter().map(|i| i.size_in_bits(model)).sum();
    let union_bits = self.size_in_bits(model);

    for &v in &desc.members {
      let variant = model.get(v);
      let Some(id) = variant.options.union_member_id else { continue };
      // Omitted variants test the tag through the prefix variant.
      let owner = if variant.options.is_omitted() { first } else { v };
      let mut tag_path = self.segments.clone();
      tag_path.push(Segment::whole(owner));
      tag_path.push(Segment::whole(model.get(owner).members[prefix - 1]));
      let conditions = self.branch_condition(tag_path, id);
      let mut used = prefix_bits;
      for &m in variant.members.get(prefix..).unwrap_or_default() {
        let item = self.child(model, &[v, m], conditions.clone());
        used += item.size_in_bits(model);
        out.push(item);
      }
      if union_bits > used {
        out.push(Item::padding(conditions, union_bits - used, false));
      }
    }
    out
  }

  // Recursively expand, stopping at leaves and at arrays that are small or
  // hold leaf elements.
  pub(super) fn flatten(&self, model: &DeclModel, threshold: usize) -> Vec<Item> {
    if !self.can_expand(model) {
      return vec![self.clone()];
    }
    let is_array = self.trailing_slice().is_some() || !self.remaining_extents(model).is_empty();
    if is_array {
      let leaf = self.last().is_some_and(|s| model.get(s.desc).options.is_leaf());
      if leaf || self.element_count(model) <= threshold {
        return vec![self.clone()];
      }
    }
    self.expand(model).iter().flat_map(|i| i.flatten(model, threshold)).collect()
  }
}
