use syn::meta::ParseNestedMeta;
use syn::parse::ParseStream;
use syn::spanned::Spanned;
use syn::{Attribute, Expr, Ident, Item, LitInt, LitStr, Path, Result as SynResult, Token, Type};

use super::options::{Requested, RequestedX, Transform};

const ATTR: &str = "bitpack";

pub(super) fn is_bitpack_attr(a: &Attribute) -> bool {
  a.path().is_ident(ATTR)
}

// Collect every `#[bitpack(...)]` on a declaration into one request. A
// malformed attribute is reported and the declaration is omitted.
pub(super) fn parse_bitpack_attrs(attrs: &[Attribute], errors: &mut Vec<syn::Error>) -> Requested {
  let mut requested = Requested::default();
  for a in attrs.iter().filter(|a| is_bitpack_attr(a)) {
    requested.span.get_or_insert(a.span());
    if let Err(err) = a.parse_nested_meta(|meta| apply_meta(&mut requested, &meta)) {
      errors.push(err);
      requested.omit = true;
    }
  }
  requested
}

pub(super) fn apply_meta(req: &mut Requested, meta: &ParseNestedMeta) -> SynResult<()> {
  let Some(key) = meta.path.get_ident().map(Ident::to_string) else {
    return Err(meta.error("expected a bitpack option name"));
  };
  match key.as_str() {
    "omit" => req.omit = true,
    "default" => req.default_value = Some(meta.value()?.parse::<Expr>()?),
    "id" => {
      let input = meta.value()?;
      let span = input.span();
      let id = parse_signed(input)?;
      req.union_member_id =
        Some(i64::try_from(id).map_err(|_| syn::Error::new(span, "union member id does not fit in an i64"))?);
    }
    "inherit" => {
      let name: LitStr = meta.value()?.parse()?;
      if name.value().is_empty() {
        return Err(syn::Error::new(name.span(), "a heritable preset name cannot be blank"));
      }
      req.inherit = Some(name);
    }
    "bitcount" => {
      let lit: LitInt = meta.value()?.parse()?;
      let bits = lit.base10_parse::<u32>()?;
      *integral_slot(req, meta)?.0 = Some(bits);
    }
    "range" => {
      let content;
      syn::parenthesized!(content in meta.input);
      let min = parse_signed(&content)?;
      content.parse::<Token![,]>()?;
      let max = parse_signed(&content)?;
      content.parse::<Option<Token![,]>>()?;
      *integral_slot(req, meta)?.1 = Some((min, max));
    }
    "string" => {
      let mut unterminated = false;
      if meta.input.peek(syn::token::Paren) {
        meta.parse_nested_meta(|inner| {
          if inner.path.is_ident("unterminated") {
            unterminated = true;
            Ok(())
          } else {
            Err(inner.error("expected `unterminated`"))
          }
        })?;
      }
      set_x(req, meta, RequestedX::String { unterminated })?;
    }
    "opaque_buffer" => set_x(req, meta, RequestedX::Buffer)?,
    "transform" => {
      let mut wire: Option<Type> = None;
      let mut pre_pack: Option<Path> = None;
      let mut post_unpack: Option<Path> = None;
      meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("wire") {
          wire = Some(inner.value()?.parse()?);
        } else if inner.path.is_ident("pre_pack") {
          pre_pack = Some(inner.value()?.parse()?);
        } else if inner.path.is_ident("post_unpack") {
          post_unpack = Some(inner.value()?.parse()?);
        } else {
          return Err(inner.error("expected `wire`, `pre_pack` or `post_unpack`"));
        }
        Ok(())
      })?;
      let (Some(wire), Some(pre_pack), Some(post_unpack)) = (wire, pre_pack, post_unpack) else {
        return Err(meta.error("`transform` needs `wire = Type`, `pre_pack = path` and `post_unpack = path`"));
      };
      set_x(req, meta, RequestedX::Transform(Transform { wire, pre_pack, post_unpack }))?;
    }
    "tag" => {
      let tag: Ident = meta.value()?.parse()?;
      set_x(req, meta, RequestedX::Tagged { tag, internal: false })?;
    }
    "internal_tag" => {
      let tag: Ident = meta.value()?.parse()?;
      set_x(req, meta, RequestedX::Tagged { tag, internal: true })?;
    }
    other => {
      return Err(meta.error(format!(
        "unknown bitpack option `{other}`; expected `omit`, `default`, `bitcount`, `range`, `string`, \
         `opaque_buffer`, `transform`, `tag`, `internal_tag`, `id` or `inherit`"
      )));
    }
  }
  Ok(())
}

fn set_x(req: &mut Requested, meta: &ParseNestedMeta, x: RequestedX) -> SynResult<()> {
  match (&req.x, &x) {
    (None, _) => {}
    (Some(RequestedX::Tagged { internal: a, .. }), RequestedX::Tagged { internal: b, .. }) if a != b => {
      return Err(meta.error("a union cannot have both an external `tag` and an `internal_tag`"));
    }
    (Some(prev), _) if std::mem::discriminant(prev) != std::mem::discriminant(&x) => {
      return Err(meta.error(format!("{} options cannot be combined with {} options", x.describe(), prev.describe())));
    }
    _ => {}
  }
  req.x = Some(x);
  Ok(())
}

fn integral_slot<'r>(
  req: &'r mut Requested,
  meta: &ParseNestedMeta,
) -> SynResult<(&'r mut Option<u32>, &'r mut Option<(i128, i128)>)> {
  match req.x.get_or_insert(RequestedX::Integral { bitcount: None, range: None }) {
    RequestedX::Integral { bitcount, range } => Ok((bitcount, range)),
    other => Err(meta.error(format!("integer options cannot be combined with {} options", other.describe()))),
  }
}

fn parse_signed(input: ParseStream) -> SynResult<i128> {
  let negative = input.parse::<Option<Token![-]>>()?.is_some();
  let lit: LitInt = input.parse()?;
  let value = lit.base10_parse::<i128>()?;
  Ok(if negative { -value } else { value })
}

// Remove helper attributes so the re-emitted module compiles on its own.
pub(super) fn strip_bitpack_attrs(items: &mut [Item]) {
  for item in items {
    match item {
      Item::Struct(s) => {
        s.attrs.retain(|a| !is_bitpack_attr(a));
        for f in s.fields.iter_mut() {
          f.attrs.retain(|a| !is_bitpack_attr(a));
        }
      }
      Item::Union(u) => {
        u.attrs.retain(|a| !is_bitpack_attr(a));
        for f in u.fields.named.iter_mut() {
          f.attrs.retain(|a| !is_bitpack_attr(a));
        }
      }
      Item::Type(t) => t.attrs.retain(|a| !is_bitpack_attr(a)),
      _ => {}
    }
  }
}
