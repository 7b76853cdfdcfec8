// Declaration descriptors: one per serializable declaration, stored in an
// arena owned by the run and addressed by [`DescId`].

use std::collections::HashMap;

use proc_macro2::Span;
use quote::ToTokens;
use syn::{Ident, Type};

use super::args::{DataObject, GlobalOptions};
use super::decl::{RecordKind, Registry, Shape, TypeRef};
use super::options::{Computed, Kind, Requested, Resolver};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct DescId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ElemShape {
  Bool,
  Int { signed: bool, bits: u32 },
  Float { bits: u32 },
  Struct,
  Union,
  Opaque,
}

pub(super) struct Descriptor {
  pub ident: Ident,
  pub span: Span,
  /// Element type as written, after array ranks are peeled.
  pub elem_ty: Type,
  pub elem_shape: ElemShape,
  pub record: Option<String>,
  pub extents: Vec<usize>,
  pub options: Computed,
  pub members: Vec<DescId>,
  /// Wire value of a transformed declaration.
  pub wire: Option<DescId>,
  /// Internally tagged unions: leading members, through the tag, that every
  /// variant shares.
  pub tag_prefix: usize,
}

impl Descriptor {
  pub(super) fn is_struct(&self) -> bool {
    matches!(self.options.kind, Kind::Structure)
  }

  pub(super) fn element_count(&self) -> usize {
    self.extents.iter().product()
  }
}

pub(super) struct DeclModel<'a> {
  registry: &'a Registry,
  opts: &'a GlobalOptions,
  descs: Vec<Descriptor>,
  record_members: HashMap<String, Vec<DescId>>,
  in_progress: Vec<String>,
  unions: HashMap<(String, String, bool), Option<usize>>,
  errors: Vec<syn::Error>,
}

impl<'a> DeclModel<'a> {
  pub(super) fn new(registry: &'a Registry, opts: &'a GlobalOptions) -> Self {
    Self {
      registry,
      opts,
      descs: Vec::new(),
      record_members: HashMap::new(),
      in_progress: Vec::new(),
      unions: HashMap::new(),
      errors: Vec::new(),
    }
  }

  pub(super) fn build_root(&mut self, obj: &DataObject) -> DescId {
    let id = self.build(&obj.ident, &obj.ty, None, obj.ident.span());
    if matches!(&self.descs[id.0].options.kind, Kind::TaggedUnion(t) if !t.internal) {
      let err = syn::Error::new(obj.ident.span(), "an externally tagged union must be a struct field");
      self.fail(id, err);
    }
    id
  }

  pub(super) fn get(&self, id: DescId) -> &Descriptor {
    &self.descs[id.0]
  }

  pub(super) fn member_named(&self, id: DescId, name: &str) -> Option<DescId> {
    self.get(id).members.iter().copied().find(|m| self.get(*m).ident == name)
  }

  // The variant whose copy of an internal union's shared fields is read and
  // written. Omitted variants have no fields of their own.
  pub(super) fn prefix_variant(&self, id: DescId) -> Option<DescId> {
    self.get(id).members.iter().copied().find(|&v| !self.get(v).options.is_omitted())
  }

  pub(super) fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
    self.descs.iter()
  }

  pub(super) fn record_members(&self, name: &str) -> &[DescId] {
    self.record_members.get(name).map_or(&[], Vec::as_slice)
  }

  pub(super) fn take_errors(&mut self) -> Vec<syn::Error> {
    std::mem::take(&mut self.errors)
  }

  // Bits of one element, ignoring extents.
  pub(super) fn elem_bits(&self, id: DescId) -> usize {
    let d = self.get(id);
    match &d.options.kind {
      Kind::Omit => 0,
      Kind::Boolean => 1,
      Kind::Integral(i) => i.bitcount as usize,
      Kind::String(s) => s.wire_len() * 8,
      Kind::Buffer(b) => b.bytecount * 8,
      Kind::Transformed(_) => d.wire.map_or(0, |w| self.total_bits(w)),
      Kind::Structure => d.members.iter().map(|m| self.total_bits(*m)).sum(),
      Kind::TaggedUnion(_) => d.members.iter().map(|m| self.total_bits(*m)).max().unwrap_or(0),
    }
  }

  pub(super) fn total_bits(&self, id: DescId) -> usize {
    self.elem_bits(id) * self.get(id).element_count()
  }

  fn fail(&mut self, id: DescId, err: syn::Error) {
    self.errors.push(err);
    let d = &mut self.descs[id.0];
    d.options = Computed::omitted();
    d.extents.clear();
  }

  fn build(&mut self, ident: &Ident, ty: &Type, requested: Option<&Requested>, span: Span) -> DescId {
    let resolved = Resolver::new(self.registry, self.opts).resolve(requested, ty, span);
    let (options, extents, elem) = match resolved {
      Ok(r) => (r.computed, r.extents, r.elem),
      Err(err) => {
        self.errors.push(err);
        (Computed::omitted(), Vec::new(), None)
      }
    };
    let (elem_ty, elem_shape, record) = match &elem {
      Some(TypeRef { ty, shape, .. }) => (ty.clone(), elem_shape(shape), record_name(shape)),
      None => (ty.clone(), ElemShape::Opaque, None),
    };

    let members = match (&options.kind, &record) {
      (Kind::Structure | Kind::TaggedUnion(_), Some(name)) => self.members_of(name, span),
      _ => Vec::new(),
    };
    let wire = match &options.kind {
      Kind::Transformed(t) => Some(self.build(ident, &t.wire, None, span)),
      _ => None,
    };

    let id = DescId(self.descs.len());
    self.descs.push(Descriptor {
      ident: ident.clone(),
      span,
      elem_ty,
      elem_shape,
      record,
      extents,
      options,
      members,
      wire,
      tag_prefix: 0,
    });
    self.check_wire(id);
    if matches!(self.get(id).options.kind, Kind::TaggedUnion(_)) {
      self.verify_union(id);
    }
    id
  }

  fn check_wire(&mut self, id: DescId) {
    let Some(wire) = self.get(id).wire else { return };
    let w = self.get(wire);
    let problem = match &w.options.kind {
      Kind::Omit => Some("a transform's wire type cannot be omitted"),
      Kind::TaggedUnion(t) if !t.internal => Some("a transform's wire type cannot be an externally tagged union"),
      _ if !w.extents.is_empty() => Some("a transform's wire type cannot be an array"),
      _ => None,
    };
    if let Some(problem) = problem {
      let err = syn::Error::new(w.span, problem);
      self.fail(id, err);
    }
  }

  fn members_of(&mut self, name: &str, span: Span) -> Vec<DescId> {
    if let Some(members) = self.record_members.get(name) {
      return members.clone();
    }
    if self.in_progress.iter().any(|n| n == name) {
      self.errors.push(syn::Error::new(span, format!("recursive type `{name}` cannot be serialized")));
      return Vec::new();
    }
    let registry = self.registry;
    let Some(record) = registry.record(name) else { return Vec::new() };
    self.in_progress.push(name.to_owned());
    let mut members = Vec::with_capacity(record.fields.len());
    for f in &record.fields {
      members.push(self.build(&f.ident, &f.ty, Some(&f.requested), f.span));
    }
    self.in_progress.pop();

    self.check_external_tags(&members, record.kind);
    self.record_members.insert(name.to_owned(), members.clone());
    members
  }

  fn check_external_tags(&mut self, members: &[DescId], parent: RecordKind) {
    for (i, &m) in members.iter().enumerate() {
      let Kind::TaggedUnion(t) = &self.get(m).options.kind else { continue };
      if t.internal {
        continue;
      }
      let tag = t.tag.clone();
      let span = self.get(m).span;
      let problem = if parent == RecordKind::Union {
        Some("an externally tagged union must be a struct field".to_owned())
      } else {
        match members.iter().position(|&s| self.get(s).ident == tag) {
          None => Some(format!("tag `{tag}` not found among the struct's fields")),
          Some(j) if j > i => Some(format!("tag `{tag}` is declared after the union it selects")),
          Some(j) => {
            let d = self.get(members[j]);
            let scalar = matches!(d.options.kind, Kind::Integral(_) | Kind::Boolean) && d.extents.is_empty();
            (!scalar).then(|| format!("tag `{tag}` must be integer or bool"))
          }
        }
      };
      if let Some(problem) = problem {
        self.fail(m, syn::Error::new(span, problem));
      }
    }
  }

  fn verify_union(&mut self, id: DescId) {
    let d = self.get(id);
    let Kind::TaggedUnion(t) = &d.options.kind else { return };
    let (Some(record), tag, internal) = (d.record.clone(), t.tag.to_string(), t.internal) else { return };
    let key = (record.clone(), tag.clone(), internal);
    let outcome = match self.unions.get(&key).copied() {
      Some(cached) => cached,
      None => {
        let outcome = match self.check_union(id, &record, &tag, internal) {
          Ok(prefix) => Some(prefix),
          Err(err) => {
            self.errors.push(err);
            None
          }
        };
        self.unions.insert(key, outcome);
        outcome
      }
    };
    match outcome {
      Some(prefix) => self.descs[id.0].tag_prefix = prefix,
      None => {
        let d = &mut self.descs[id.0];
        d.options = Computed::omitted();
        d.extents.clear();
      }
    }
  }

  // Returns the shared prefix length for internal tags, 0 otherwise.
  fn check_union(&self, id: DescId, record: &str, tag: &str, internal: bool) -> syn::Result<usize> {
    let d = self.get(id);
    let err = |msg: String| syn::Error::new(d.span, msg);

    let mut ids: Vec<(i64, &Ident)> = Vec::new();
    for &v in &d.members {
      let v = self.get(v);
      match v.options.union_member_id {
        Some(n) => {
          if let Some((_, prev)) = ids.iter().find(|(m, _)| *m == n) {
            return Err(err(format!("union `{record}`: variants `{prev}` and `{}` share id {n}", v.ident)));
          }
          ids.push((n, &v.ident));
        }
        None if v.options.is_omitted() => {}
        None => return Err(err(format!("union `{record}`: variant `{}` is missing `#[bitpack(id = n)]`", v.ident))),
      }
    }
    if !internal {
      return Ok(0);
    }

    if !self.registry.record(record).is_some_and(|r| r.repr_c) {
      return Err(err(format!("internally tagged union `{record}` must be `#[repr(C)]`")));
    }
    let variants: Vec<&Descriptor> =
      d.members.iter().map(|&v| self.get(v)).filter(|v| !v.options.is_omitted()).collect();
    let Some(&first) = variants.first() else {
      return Err(err(format!("internally tagged union `{record}` has no serialized variants")));
    };
    for &v in &variants {
      let is_repr_c_struct = v.is_struct()
        && v.extents.is_empty()
        && v.record.as_deref().and_then(|r| self.registry.record(r)).is_some_and(|r| r.repr_c);
      if !is_repr_c_struct {
        return Err(err(format!(
          "variant `{}` of internally tagged union `{record}` must be a `#[repr(C)]` struct",
          v.ident
        )));
      }
    }

    let shared = variants[1..].iter().fold(first.members.len(), |n, v| n.min(self.common_prefix(first, v)));
    let Some(tag_index) = first.members.iter().position(|&m| self.get(m).ident == tag) else {
      return Err(err(format!("internal tag `{tag}` not found in variant `{}`", first.ident)));
    };
    if tag_index >= shared {
      return Err(err(format!("internal tag `{tag}` must be within the leading fields shared by every variant")));
    }
    let tag_desc = self.get(first.members[tag_index]);
    if !matches!(tag_desc.options.kind, Kind::Integral(_) | Kind::Boolean) || !tag_desc.extents.is_empty() {
      return Err(err(format!("internal tag `{tag}` must be integer or bool")));
    }

    let place = |v: &Descriptor| {
      let offset: usize = v.members[..tag_index].iter().map(|&m| self.total_bits(m)).sum();
      let t = self.get(v.members[tag_index]);
      (offset, self.total_bits(v.members[tag_index]), t.elem_shape)
    };
    let expected = place(first);
    for &v in &variants[1..] {
      if place(v) != expected {
        return Err(err(format!("internal tag `{tag}` differs in offset, width or type in variant `{}`", v.ident)));
      }
    }
    Ok(tag_index + 1)
  }

  fn common_prefix(&self, a: &Descriptor, b: &Descriptor) -> usize {
    a.members
      .iter()
      .zip(&b.members)
      .take_while(|&(&x, &y)| {
        let (x, y) = (self.get(x), self.get(y));
        x.ident == y.ident
          && x.elem_ty.to_token_stream().to_string() == y.elem_ty.to_token_stream().to_string()
          && x.extents == y.extents
          && x.options == y.options
      })
      .count()
  }
}

fn elem_shape(shape: &Shape) -> ElemShape {
  match shape {
    Shape::Bool => ElemShape::Bool,
    Shape::Int { signed, bits } => ElemShape::Int { signed: *signed, bits: *bits },
    Shape::Float { bits } => ElemShape::Float { bits: *bits },
    Shape::Record { kind: RecordKind::Struct, .. } => ElemShape::Struct,
    Shape::Record { kind: RecordKind::Union, .. } => ElemShape::Union,
    Shape::Array { .. } => ElemShape::Opaque,
  }
}

fn record_name(shape: &Shape) -> Option<String> {
  match shape {
    Shape::Record { name, .. } => Some(name.clone()),
    _ => None,
  }
}
