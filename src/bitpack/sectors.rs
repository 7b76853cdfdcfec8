// Greedy sector packer.
//
// Items are placed in order; whatever does not fit is split one level and
// retried, or pushed to the next sector. A union that has to be split is
// placed branch by branch from a common start, and every branch is then
// padded to the furthest branch end so the stream stays aligned.

use std::cell::OnceCell;
use std::collections::{BTreeMap, VecDeque};

use proc_macro2::Span;

use super::descriptor::{DeclModel, DescId};
use super::item::{ArrayAccess, Condition, Item};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct Cursor {
  pub sector: usize,
  pub used: usize,
}

pub(super) struct Sector {
  pub items: Vec<Item>,
  layout: OnceCell<Vec<(usize, usize)>>,
}

impl Sector {
  pub(super) fn new(items: Vec<Item>) -> Self {
    Self { items, layout: OnceCell::new() }
  }

  // (offset, size) of every item. Sibling union branches start at the same
  // offset; the switch as a whole ends at its longest branch.
  pub(super) fn offsets_and_sizes(&self, model: &DeclModel) -> &[(usize, usize)] {
    self.layout.get_or_init(|| {
      struct Frame<'c> {
        cond: &'c Condition,
        start: usize,
        alt_end: usize,
      }
      let mut frames: Vec<Frame> = Vec::new();
      let mut pos = 0;
      let mut out = Vec::with_capacity(self.items.len());
      for item in &self.items {
        let conds = &item.conditions;
        let keep = frames.iter().zip(conds).take_while(|(f, c)| f.cond == *c).count();
        while frames.len() > keep {
          let Some(top) = frames.pop() else { break };
          let end = top.alt_end.max(pos);
          if frames.len() == keep && conds.get(keep).is_some_and(|c| c.same_switch(top.cond)) {
            pos = top.start;
            frames.push(Frame { cond: &conds[keep], start: top.start, alt_end: end });
            break;
          }
          pos = end;
        }
        for c in &conds[frames.len()..] {
          frames.push(Frame { cond: c, start: pos, alt_end: pos });
        }
        let size = item.size_in_bits(model);
        out.push((pos, size));
        pos += size;
      }
      if let Some(end) = frames.iter().map(|f| f.alt_end).max() {
        pos = pos.max(end);
      }
      out.push((pos, 0));
      out
    })
  }

  // Offsets of the items, without the closing total.
  pub(super) fn item_layout(&self, model: &DeclModel) -> &[(usize, usize)] {
    let all = self.offsets_and_sizes(model);
    &all[..all.len() - 1]
  }

  pub(super) fn bit_length(&self, model: &DeclModel) -> usize {
    self.offsets_and_sizes(model).last().map_or(0, |&(end, _)| end)
  }
}

type Buckets = BTreeMap<usize, Vec<Item>>;

pub(super) struct Packer<'m> {
  model: &'m DeclModel<'m>,
  capacity: usize,
}

impl<'m> Packer<'m> {
  pub(super) fn new(model: &'m DeclModel<'m>, capacity_bits: usize) -> Self {
    Self { model, capacity: capacity_bits }
  }

  // Pack every data group, each group starting on a fresh sector.
  pub(super) fn pack(&self, groups: &[Vec<DescId>], sector_count: usize) -> syn::Result<Vec<Sector>> {
    let mut buckets = Buckets::new();
    let mut cursor = Cursor { sector: 0, used: 0 };
    for (g, roots) in groups.iter().enumerate() {
      if g > 0 && (cursor.used > 0 || buckets.get(&cursor.sector).is_some_and(|b| !b.is_empty())) {
        self.close_sector(&mut buckets, &mut cursor, &[]);
      }
      let items = roots.iter().map(|&r| Item::root(self.model, r)).collect();
      self.place_all(items, &mut cursor, &[], &mut buckets)?;
    }

    let needed = buckets.keys().next_back().map_or(0, |&s| s + 1);
    if needed > sector_count {
      return Err(syn::Error::new(
        Span::call_site(),
        format!("insufficient sector count: the data needs {needed} sectors of {} bits, but sector_count is {sector_count}", self.capacity),
      ));
    }
    Ok((0..needed).map(|s| Sector::new(coalesce(self.model, buckets.remove(&s).unwrap_or_default()))).collect())
  }

  fn place_all(
    &self,
    items: VecDeque<Item>,
    cursor: &mut Cursor,
    ctx: &[Condition],
    out: &mut Buckets,
  ) -> syn::Result<()> {
    let mut queue = items;
    while let Some(item) = queue.pop_front() {
      if item.flags.omitted {
        if item.flags.defaulted {
          out.entry(cursor.sector).or_default().push(item);
        }
        continue;
      }
      let size = item.size_in_bits(self.model);
      if cursor.used + size <= self.capacity {
        out.entry(cursor.sector).or_default().push(item);
        cursor.used += size;
      } else if item.is_whole_union(self.model) {
        self.place_union(&item, cursor, out)?;
      } else if item.can_expand(self.model) {
        for part in item.expand(self.model).into_iter().rev() {
          queue.push_front(part);
        }
      } else if size > self.capacity {
        let span = item.last().map_or_else(Span::call_site, |s| self.model.get(s.desc).span);
        return Err(syn::Error::new(
          span,
          format!("item too large for sector size: it needs {size} bits, but a sector holds {}", self.capacity),
        ));
      } else {
        self.close_sector(out, cursor, ctx);
        queue.push_front(item);
      }
    }
    Ok(())
  }

  fn close_sector(&self, out: &mut Buckets, cursor: &mut Cursor, ctx: &[Condition]) {
    if cursor.used < self.capacity {
      out.entry(cursor.sector).or_default().push(Item::padding(ctx.to_vec(), self.capacity - cursor.used, true));
    }
    *cursor = Cursor { sector: cursor.sector + 1, used: 0 };
  }

  fn place_union(&self, item: &Item, cursor: &mut Cursor, out: &mut Buckets) -> syn::Result<()> {
    let depth = item.conditions.len();
    let mut prefix = VecDeque::new();
    let mut branches: Vec<(Vec<Condition>, VecDeque<Item>)> = Vec::new();
    for part in item.expand(self.model) {
      let Some(cond) = part.conditions.get(depth) else {
        prefix.push_back(part);
        continue;
      };
      let branch_ctx = part.conditions[..=depth].to_vec();
      let slot = match branches.iter().position(|(c, _)| c[depth] == *cond) {
        Some(i) => i,
        None => {
          branches.push((branch_ctx, VecDeque::new()));
          branches.len() - 1
        }
      };
      if !part.is_padding() {
        branches[slot].1.push_back(part);
      }
    }

    self.place_all(prefix, cursor, &item.conditions, out)?;
    let start = *cursor;
    let mut placed = Vec::with_capacity(branches.len());
    for (ctx, parts) in branches {
      let mut end = start;
      let mut local = Buckets::new();
      self.place_all(parts, &mut end, &ctx, &mut local)?;
      placed.push((ctx, end, local));
    }

    let finish = placed.iter().map(|(_, end, _)| *end).max().unwrap_or(start);
    for (ctx, end, mut local) in placed {
      self.pad_between(&mut local, &ctx, end, finish);
      for (sector, items) in local {
        out.entry(sector).or_default().extend(items);
      }
    }
    *cursor = finish;
    Ok(())
  }

  // Fill a branch from where it ended up to where the longest branch ended.
  fn pad_between(&self, out: &mut Buckets, ctx: &[Condition], end: Cursor, finish: Cursor) {
    if end.sector == finish.sector {
      if finish.used > end.used {
        out.entry(end.sector).or_default().push(Item::padding(ctx.to_vec(), finish.used - end.used, false));
      }
      return;
    }
    if end.used < self.capacity {
      out.entry(end.sector).or_default().push(Item::padding(ctx.to_vec(), self.capacity - end.used, true));
    }
    for sector in end.sector + 1..finish.sector {
      out.entry(sector).or_default().push(Item::padding(ctx.to_vec(), self.capacity, true));
    }
    if finish.used > 0 {
      out.entry(finish.sector).or_default().push(Item::padding(ctx.to_vec(), finish.used, false));
    }
  }
}

// Merge runs of neighbouring indices into slices, and drop slices that cover
// a whole array rank. Repeats until nothing changes.
pub(super) fn coalesce(model: &DeclModel, items: Vec<Item>) -> Vec<Item> {
  let mut items = items;
  loop {
    let mut changed = false;
    let mut out: Vec<Item> = Vec::with_capacity(items.len());
    for mut item in items {
      changed |= drop_full_extent(model, &mut item);
      if let Some(prev) = out.last_mut() {
        if let Some(merged) = merge_adjacent(prev, &item) {
          *prev = merged;
          changed = true;
          continue;
        }
      }
      out.push(item);
    }
    items = out;
    if !changed {
      return items;
    }
  }
}

fn drop_full_extent(model: &DeclModel, item: &mut Item) -> bool {
  let Some(seg) = item.segments.last_mut() else { return false };
  let Some(&last) = seg.accesses.last() else { return false };
  let extents = &model.get(seg.desc).extents;
  if last.start == 0 && extents.get(seg.accesses.len() - 1) == Some(&last.count) {
    seg.accesses.pop();
    return true;
  }
  false
}

fn merge_adjacent(a: &Item, b: &Item) -> Option<Item> {
  if a.is_padding() || b.is_padding() || a.flags != b.flags || a.conditions != b.conditions {
    return None;
  }
  let (sa, sb) = (a.segments.last()?, b.segments.last()?);
  let n = a.segments.len();
  if n != b.segments.len() || a.segments[..n - 1] != b.segments[..n - 1] || sa.desc != sb.desc {
    return None;
  }
  let k = sa.accesses.len();
  if k == 0 || k != sb.accesses.len() || sa.accesses[..k - 1] != sb.accesses[..k - 1] {
    return None;
  }
  let (x, y) = (sa.accesses[k - 1], sb.accesses[k - 1]);
  if x.end() != y.start {
    return None;
  }
  let mut merged = a.clone();
  if let Some(acc) = merged.segments.last_mut().and_then(|s| s.accesses.last_mut()) {
    *acc = ArrayAccess { start: x.start, count: x.count + y.count };
  }
  Some(merged)
}
