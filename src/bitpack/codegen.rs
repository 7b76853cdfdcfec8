use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use proc_macro2::{Ident, Literal, Span, TokenStream};
use quote::{ToTokens, format_ident, quote};

use super::args::{DataObject, GlobalOptions};
use super::descriptor::{DeclModel, DescId, ElemShape};
use super::dump;
use super::item::{Item, Segment, conditions_are_a_narrowing_of};
use super::options::Kind;
use super::sectors::Sector;

// Read and save halves of the same piece of generated code.
#[derive(Default)]
pub(super) struct Pair {
  pub read: TokenStream,
  pub save: TokenStream,
}

impl Pair {
  fn extend(&mut self, other: Pair) {
    self.read.extend(other.read);
    self.save.extend(other.save);
  }
}

// An lvalue in generated code. Anything reached through a union field has to
// be touched inside `unsafe`.
#[derive(Clone)]
struct Place {
  tokens: TokenStream,
  in_union: bool,
}

impl Place {
  fn root(ident: &Ident) -> Self {
    Self { tokens: quote!((*#ident)), in_union: false }
  }

  fn local(ident: &Ident) -> Self {
    Self { tokens: quote!(#ident), in_union: false }
  }

  fn field(&self, ident: &Ident, through_union: bool) -> Self {
    let t = &self.tokens;
    Self { tokens: quote!(#t.#ident), in_union: self.in_union || through_union }
  }

  fn index(&self, index: impl ToTokens) -> Self {
    let t = &self.tokens;
    Self { tokens: quote!(#t[#index]), in_union: self.in_union }
  }

  fn guard(&self, expr: TokenStream) -> TokenStream {
    if self.in_union { quote!(unsafe { #expr }) } else { expr }
  }

  fn value(&self) -> TokenStream {
    let t = &self.tokens;
    self.guard(quote!(#t))
  }

  fn shared(&self) -> TokenStream {
    let t = &self.tokens;
    self.guard(quote!(&#t))
  }

  fn exclusive(&self) -> TokenStream {
    let t = &self.tokens;
    self.guard(quote!(&mut #t))
  }

  fn shared_slice(&self) -> TokenStream {
    let t = &self.tokens;
    self.guard(quote!(&#t[..]))
  }

  fn exclusive_slice(&self) -> TokenStream {
    let t = &self.tokens;
    self.guard(quote!(&mut #t[..]))
  }

  fn assign(&self, expr: TokenStream) -> TokenStream {
    let t = &self.tokens;
    let stmt = self.guard(quote!(#t = #expr));
    quote!(#stmt;)
  }
}

type Loops = Vec<(Ident, usize, usize)>;

fn wrap_loops(mut body: Pair, loops: Loops) -> Pair {
  for (var, start, end) in loops.into_iter().rev() {
    let wrap = |inner: TokenStream| {
      if inner.is_empty() { inner } else { quote! { for #var in #start..#end { #inner } } }
    };
    body = Pair { read: wrap(body.read), save: wrap(body.save) };
  }
  body
}

fn loop_var(depth: usize) -> Ident {
  format_ident!("__i{}", depth)
}

pub(super) struct Generator<'g> {
  model: &'g DeclModel<'g>,
  opts: &'g GlobalOptions,
  helpers: RefCell<BTreeSet<String>>,
}

impl<'g> Generator<'g> {
  pub(super) fn new(model: &'g DeclModel<'g>, opts: &'g GlobalOptions) -> Self {
    Self { model, opts, helpers: RefCell::new(BTreeSet::new()) }
  }

  // ── places ──────────────────────────────────────────────────────────────
  // Walk an item path. Returns the place, the place of its enclosing record
  // element, and the loops opened for slice accesses.
  fn item_place(&self, segments: &[Segment]) -> (Place, Option<Place>, Loops) {
    let mut place = match segments.first() {
      Some(seg) => Place::root(&self.model.get(seg.desc).ident),
      None => Place::local(&format_ident!("__none")),
    };
    let mut parent = None;
    let mut loops = Loops::new();
    for (i, seg) in segments.iter().enumerate() {
      if i > 0 {
        let through_union = self.model.get(segments[i - 1].desc).elem_shape == ElemShape::Union;
        parent = Some(place.clone());
        place = place.field(&self.model.get(seg.desc).ident, through_union);
      }
      for a in &seg.accesses {
        if a.is_slice() {
          let var = loop_var(loops.len());
          place = place.index(&var);
          loops.push((var, a.start, a.end()));
        } else {
          place = place.index(Literal::usize_unsuffixed(a.start));
        }
      }
    }
    (place, parent, loops)
  }

  // ── values ──────────────────────────────────────────────────────────────
  fn emit_value(&self, id: DescId, place: &Place, parent: Option<&Place>, depth: usize) -> Pair {
    let d = self.model.get(id);
    let mut place = place.clone();
    let mut loops = Loops::new();
    for (k, &extent) in d.extents.iter().enumerate() {
      let var = loop_var(depth + k);
      place = place.index(&var);
      loops.push((var, 0, extent));
    }
    let body = self.emit_elem(id, &place, parent, depth + d.extents.len());
    wrap_loops(body, loops)
  }

  fn emit_elem(&self, id: DescId, place: &Place, parent: Option<&Place>, depth: usize) -> Pair {
    let d = self.model.get(id);
    let (rd, wr) = (&self.opts.read_fns, &self.opts.write_fns);
    let ty = &d.elem_ty;
    match &d.options.kind {
      Kind::Omit => {
        let read = d.options.default_value.as_ref().map(|v| place.assign(quote!(#v))).unwrap_or_default();
        Pair { read, save: TokenStream::new() }
      }
      Kind::Boolean => {
        let (r, w, v) = (&rd.bool_, &wr.bool_, place.value());
        if d.elem_shape == ElemShape::Bool {
          Pair { read: place.assign(quote!(#r(state))), save: quote!(#w(state, #v);) }
        } else {
          Pair { read: place.assign(quote!(#r(state) as #ty)), save: quote!(#w(state, (#v) != 0);) }
        }
      }
      Kind::Integral(i) => {
        let n = i.bitcount as usize;
        let (r, w, carrier) = (rd.unsigned(n), wr.unsigned(n), carrier(n));
        let bits = Literal::u32_unsuffixed(i.bitcount);
        let (min, max) = (Literal::i128_suffixed(i.min), Literal::i128_suffixed(i.max));
        let v = place.value();
        Pair {
          read: place.assign(quote!(((#r(state, #bits) as i128) + #min) as #ty)),
          save: quote!(#w(state, (((#v) as i128).clamp(#min, #max) - #min) as #carrier, #bits);),
        }
      }
      Kind::String(s) => {
        let len = Literal::usize_unsuffixed(s.wire_len());
        let (r, w) = if s.terminated { (&rd.string_terminated, &wr.string_terminated) } else { (&rd.string, &wr.string) };
        let (src, dst) = (place.shared_slice(), place.exclusive_slice());
        Pair { read: quote!(#r(state, #dst, #len);), save: quote!(#w(state, #src, #len);) }
      }
      Kind::Buffer(b) => {
        let n = Literal::usize_unsuffixed(b.bytecount);
        let (r, w) = (&rd.buffer, &wr.buffer);
        if b.byte_row {
          let (src, dst) = (place.shared_slice(), place.exclusive_slice());
          Pair { read: quote!(#r(state, #dst, #n);), save: quote!(#w(state, #src, #n);) }
        } else {
          let v = place.value();
          let set = place.assign(quote!(<#ty>::from_le_bytes(__bytes)));
          Pair {
            read: quote!({ let mut __bytes = [0u8; #n]; #r(state, &mut __bytes, #n); #set }),
            save: quote!({ let __bytes = (#v).to_le_bytes(); #w(state, &__bytes, #n); }),
          }
        }
      }
      Kind::Transformed(t) => {
        let Some(wire) = d.wire else { return Pair::default() };
        let local = format_ident!("__w{}", depth);
        let inner = self.emit_value(wire, &Place::local(&local), None, depth + 1);
        let (wire_ty, pre, post) = (&t.wire, &t.pre_pack, &t.post_unpack);
        let (src, inner_read, inner_save) = (place.shared(), inner.read, inner.save);
        let set = place.assign(quote!(#post(&#local)));
        Pair {
          read: quote!({ let mut #local: #wire_ty = ::core::default::Default::default(); #inner_read #set }),
          save: quote!({ let #local: #wire_ty = #pre(#src); #inner_save }),
        }
      }
      Kind::Structure => match &d.record {
        Some(name) if self.opts.whole_struct_functions => {
          self.helpers.borrow_mut().insert(name.clone());
          let (read_fn, save_fn) = helper_names(name);
          let (src, dst) = (place.shared(), place.exclusive());
          Pair { read: quote!(#read_fn(state, #dst);), save: quote!(#save_fn(state, #src);) }
        }
        _ => {
          let mut out = Pair::default();
          for &m in &d.members {
            out.extend(self.emit_value(m, &place.field(&self.model.get(m).ident, false), Some(place), depth));
          }
          out
        }
      },
      Kind::TaggedUnion(t) => {
        if t.internal {
          self.emit_internal_union(id, place, depth)
        } else {
          match parent {
            Some(parent) => self.emit_external_union(id, place, &parent.field(&t.tag, false), depth),
            None => Pair::default(),
          }
        }
      }
    }
  }

  fn emit_external_union(&self, id: DescId, place: &Place, tag: &Place, depth: usize) -> Pair {
    let d = self.model.get(id);
    let union_bits = self.model.elem_bits(id);
    let mut arms = BTreeMap::new();
    for &v in &d.members {
      let variant = self.model.get(v);
      let Some(value) = variant.options.union_member_id else { continue };
      let vp = place.field(&variant.ident, true);
      let mut body = self.emit_value(v, &vp, Some(place), depth);
      body.extend(self.padding(union_bits - self.model.total_bits(v)));
      arms.insert(value, (tag.value(), body));
    }
    switch(arms)
  }

  fn emit_internal_union(&self, id: DescId, place: &Place, depth: usize) -> Pair {
    let d = self.model.get(id);
    let prefix = d.tag_prefix;
    let Some(first) = self.model.prefix_variant(id) else { return Pair::default() };
    let first_place = place.field(&self.model.get(first).ident, true);
    let shared = &self.model.get(first).members[..prefix];

    let mut out = Pair::default();
    for &m in shared {
      out.extend(self.emit_value(m, &first_place.field(&self.model.get(m).ident, false), Some(&first_place), depth));
    }
    let prefix_bits: usize = shared.iter().map(|&m| self.model.total_bits(m)).sum();
    let union_bits = self.model.elem_bits(id);

    let mut arms = BTreeMap::new();
    for &v in &d.members {
      let variant = self.model.get(v);
      let Some(value) = variant.options.union_member_id else { continue };
      let owner = if variant.options.is_omitted() { first } else { v };
      let owner_place = place.field(&self.model.get(owner).ident, true);
      let tag_ident = &self.model.get(self.model.get(owner).members[prefix - 1]).ident;
      let vp = place.field(&variant.ident, true);
      let mut body = Pair::default();
      let mut used = prefix_bits;
      for &m in variant.members.get(prefix..).unwrap_or_default() {
        body.extend(self.emit_value(m, &vp.field(&self.model.get(m).ident, false), Some(&vp), depth));
        used += self.model.total_bits(m);
      }
      body.extend(self.padding(union_bits.saturating_sub(used)));
      arms.insert(value, (owner_place.field(tag_ident, false).value(), body));
    }
    out.extend(switch(arms));
    out
  }

  fn padding(&self, bits: usize) -> Pair {
    let mut out = Pair::default();
    let mut left = bits;
    while left > 0 {
      let n = left.min(32);
      let (r, w) = (self.opts.read_fns.unsigned(n), self.opts.write_fns.unsigned(n));
      let lit = Literal::u32_unsuffixed(n as u32);
      out.read.extend(quote!(let _ = #r(state, #lit);));
      out.save.extend(quote!(#w(state, 0, #lit);));
      left -= n;
    }
    out
  }

  // ── items ───────────────────────────────────────────────────────────────
  fn emit_item(&self, item: &Item) -> Pair {
    if let Some(p) = item.padding {
      return if p.trailing { Pair::default() } else { self.padding(p.bits) };
    }
    let Some(last) = item.last() else { return Pair::default() };
    let (mut place, parent, mut loops) = self.item_place(&item.segments);
    for &extent in item.remaining_extents(self.model) {
      let var = loop_var(loops.len());
      place = place.index(&var);
      loops.push((var, 0, extent));
    }
    let body = self.emit_elem(last.desc, &place, parent.as_ref(), loops.len());
    wrap_loops(body, loops)
  }

  // Items sharing the first `level` conditions. Runs that test the same union
  // become one `if ... else if ...` chain, arms ordered by tag value.
  pub(super) fn emit_items(&self, items: &[Item], level: usize) -> Pair {
    let mut out = Pair::default();
    let mut i = 0;
    while i < items.len() {
      let head = &items[i];
      let Some(cond) = head.conditions.get(level) else {
        out.extend(self.emit_item(head));
        i += 1;
        continue;
      };
      let scope = &head.conditions[..level];
      let mut arms: BTreeMap<i64, (TokenStream, Vec<Item>)> = BTreeMap::new();
      let mut j = i;
      while j < items.len()
        && conditions_are_a_narrowing_of(&items[j].conditions, scope)
        && items[j].conditions[level].same_switch(cond)
      {
        let c = &items[j].conditions[level];
        let tag = self.item_place(&c.tag).0.value();
        arms.entry(c.value).or_insert_with(|| (tag, Vec::new())).1.push(items[j].clone());
        j += 1;
      }
      let arms = arms.into_iter().map(|(v, (tag, arm))| (v, (tag, self.emit_items(&arm, level + 1)))).collect();
      out.extend(switch(arms));
      i = j;
    }
    out
  }

  // ── output ──────────────────────────────────────────────────────────────
  pub(super) fn generate(&self, sectors: &[Sector], roots: &[(DataObject, DescId)]) -> TokenStream {
    let opts = self.opts;
    let state_ty = &opts.state_ty;
    let (read_ident, save_ident) = (&opts.read_ident, &opts.save_ident);
    let names: Vec<&Ident> = roots.iter().map(|(o, _)| &o.ident).collect();
    let types: Vec<&syn::Type> = roots.iter().map(|(o, _)| &o.ty).collect();
    let allow = quote!(#[allow(non_snake_case, unused_variables, unused_unsafe, unused_mut, unused_parens, unused_braces)]);

    let bodies: Vec<Pair> = sectors.iter().map(|s| self.emit_items(&s.items, 0)).collect();
    let (read_body, save_body, per_sector) = if bodies.len() <= 1 {
      let body = bodies.into_iter().next().unwrap_or_default();
      let (r, s) = (body.read, body.save);
      (quote!(if sector_id != 0 { return; } #r), quote!(if sector_id != 0 { return; } #s), TokenStream::new())
    } else {
      let mut fns = TokenStream::new();
      let mut read_arms = Vec::new();
      let mut save_arms = Vec::new();
      for (n, body) in bodies.into_iter().enumerate() {
        let (rf, sf) = (format_ident!("__bitpack_read_sector_{}", n), format_ident!("__bitpack_save_sector_{}", n));
        let (r, s, id) = (body.read, body.save, Literal::u32_unsuffixed(n as u32));
        fns.extend(quote! {
          #allow
          fn #rf(state: &mut #state_ty, #( #names: &mut #types ),*) { #r }
          #allow
          fn #sf(state: &mut #state_ty, #( #names: &#types ),*) { #s }
        });
        read_arms.push(quote!(#id => #rf(state, #( #names ),*),));
        save_arms.push(quote!(#id => #sf(state, #( #names ),*),));
      }
      (
        quote!(match sector_id { #( #read_arms )* _ => {} }),
        quote!(match sector_id { #( #save_arms )* _ => {} }),
        fns,
      )
    };

    let helpers = self.struct_helpers();
    let checks = self.transform_checks();
    let dumps = self.layout_consts(roots);
    let doc = dump::sector_table(self.model, sectors, opts.capacity_bits());
    let doc_lines = doc.lines();
    let sector_count = sectors.len();
    let read_doc = format!("Reads sector `sector_id` (0..{sector_count}) of the packed data from `state`.");
    let save_doc = format!("Writes sector `sector_id` (0..{sector_count}) of the packed data to `state`.");

    quote! {
      #[doc = #read_doc]
      #allow
      pub fn #read_ident(state: &mut #state_ty, sector_id: u32, #( #names: &mut #types ),*) { #read_body }

      #[doc = #save_doc]
      #[doc = ""]
      #[doc = "_Sector layout_"]
      #( #[doc = #doc_lines] )*
      #allow
      pub fn #save_ident(state: &mut #state_ty, sector_id: u32, #( #names: &#types ),*) { #save_body }

      #per_sector
      #helpers
      #checks
      #dumps
    }
  }

  // One read/save pair per struct serialized whole, including structs only
  // reached from other helpers.
  fn struct_helpers(&self) -> TokenStream {
    let state_ty = &self.opts.state_ty;
    let mut done = BTreeSet::new();
    let mut out = TokenStream::new();
    loop {
      let next = self.helpers.borrow().iter().find(|n| !done.contains(*n)).cloned();
      let Some(name) = next else { break };
      let root = format_ident!("value");
      let place = Place::root(&root);
      let mut body = Pair::default();
      for &m in self.model.record_members(&name) {
        body.extend(self.emit_value(m, &place.field(&self.model.get(m).ident, false), Some(&place), 0));
      }
      let ty = Ident::new(&name, Span::call_site());
      let (read_fn, save_fn) = helper_names(&name);
      let (r, s) = (body.read, body.save);
      out.extend(quote! {
        #[allow(non_snake_case, unused_variables, unused_unsafe, unused_mut, unused_parens, unused_braces)]
        fn #read_fn(state: &mut #state_ty, #root: &mut #ty) { #r }
        #[allow(non_snake_case, unused_variables, unused_unsafe, unused_mut, unused_parens, unused_braces)]
        fn #save_fn(state: &mut #state_ty, #root: &#ty) { #s }
      });
      done.insert(name);
    }
    out
  }

  // rustc checks the transform functions against the expected pairing.
  fn transform_checks(&self) -> TokenStream {
    let mut seen = BTreeMap::new();
    for d in self.model.descriptors() {
      let Kind::Transformed(t) = &d.options.kind else { continue };
      let (ty, wire, pre, post) = (&d.elem_ty, &t.wire, &t.pre_pack, &t.post_unpack);
      let check = quote! {
        const _: fn(&#ty) -> #wire = #pre;
        const _: fn(&#wire) -> #ty = #post;
      };
      seen.entry(check.to_string()).or_insert(check);
    }
    seen.into_values().collect()
  }

  fn layout_consts(&self, roots: &[(DataObject, DescId)]) -> TokenStream {
    let mut out = TokenStream::new();
    for wanted in &self.opts.debug_dump {
      let Some((obj, id)) = roots.iter().find(|(o, _)| o.ident == *wanted) else { continue };
      let name = format_ident!("{}_LAYOUT", obj.ident.to_string().to_uppercase());
      let text = dump::object_listing(self.model, *id, self.opts.inline_threshold);
      out.extend(quote! {
        /// Flattened serialization items of this data object.
        pub const #name: &str = #text;
      });
    }
    out
  }
}

fn carrier(bits: usize) -> TokenStream {
  match bits {
    0..=8 => quote!(u8),
    9..=16 => quote!(u16),
    17..=32 => quote!(u32),
    _ => quote!(u64),
  }
}

fn helper_names(record: &str) -> (Ident, Ident) {
  (format_ident!("__bitpack_read_{}", record), format_ident!("__bitpack_save_{}", record))
}

fn switch(arms: BTreeMap<i64, (TokenStream, Pair)>) -> Pair {
  let mut out = Pair::default();
  for (n, (value, (tag, body))) in arms.into_iter().enumerate() {
    let keyword = if n == 0 { quote!(if) } else { quote!(else if) };
    let id = Literal::i64_suffixed(value);
    let cond = quote!(((#tag) as i64) == #id);
    let (r, s) = (body.read, body.save);
    out.read.extend(quote!(#keyword #cond { #r }));
    out.save.extend(quote!(#keyword #cond { #s }));
  }
  out
}
