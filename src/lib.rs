//! sectorpack: plan and generate bit-packed serialization across fixed-size sectors
//!
//! Put one attribute on an inline module holding your structs, unions and type
//! aliases. The macro computes a minimal bit layout for the listed data objects,
//! splits it over `sector_count` sectors of `sector_size` bytes, and appends a
//! `read` and a `save` function that move one sector at a time through your own
//! bitstream state.
//!
//! - Global options: `sector_count = N`, `sector_size = BYTES`, `read = name`, `save = name`,
//!   `state = Type` (default `BitstreamState`), `data(a: A, b: B; c: C)` (`;` starts a new
//!   sector group), `bool_type = Alias`, `heritable("$name", options...)`,
//!   `func_read_*`/`func_write_*` overrides, `whole_struct_functions = bool`,
//!   `inline_threshold = N`, `debug_dump = object`.
//! - `inline_threshold` (default 4) only shapes the `debug_dump` listing: arrays of structs or
//!   unions with at most that many elements are listed whole instead of per element. The
//!   packed layout and the generated functions do not depend on it.
//! - Per-declaration directives, via `#[bitpack(...)]` on fields, structs, unions and aliases:
//!   - `bitcount = N`, `range(min, max)` → integers stored as `value - min` in N bits.
//!   - `string`, `string(unterminated)` → `[u8; N]` text.
//!   - `opaque_buffer` → bytes copied verbatim.
//!   - `transform(wire = W, pre_pack = f, post_unpack = g)` → stored as `W`.
//!   - `tag = field` on a union field, `internal_tag = field` on a `#[repr(C)]` union, `id = N` on variants.
//!   - `omit`, `default = expr`, `inherit = "$name"`.
//! - Precedence: field attributes, then aliases (nearest first), then the declaration's own
//!   attributes, then the inherited preset, then the type's default.
//! - Documentation candy: the generated `save` function documents the sector layout.
//!
//! Bitstream functions
//! - Called unqualified from inside the module, so bring them into scope there:
//!   `write_u8(state, value, bits)` / `read_u8(state, bits)` and the `u16`, `u32`, `u64`
//!   versions, `write_bool(state, value)` / `read_bool(state)`, and
//!   `(state, slice, len)` for `string`, `string_terminated` and `buffer`.
//!
//! Compile-time checks
//! - Options that do not fit the type (bitcount, range, string on a non-byte array, ...).
//! - Unions without a tag, duplicate or missing variant ids, internal tags outside the
//!   fields every variant shares.
//! - Items larger than a sector, and data that needs more sectors than `sector_count`.
//!
//! Example: two one-byte sectors
//! ```
//! mod io {
//!   #[derive(Default)]
//!   pub struct BitstreamState {
//!     pub bytes: Vec<u8>,
//!     pub pos: usize,
//!   }
//!
//!   pub fn write_u8(s: &mut BitstreamState, v: u8, bits: u32) {
//!     for i in 0..bits as usize {
//!       if s.pos / 8 == s.bytes.len() {
//!         s.bytes.push(0);
//!       }
//!       s.bytes[s.pos / 8] |= ((v >> i) & 1) << (s.pos % 8);
//!       s.pos += 1;
//!     }
//!   }
//!
//!   pub fn read_u8(s: &mut BitstreamState, bits: u32) -> u8 {
//!     let mut v = 0u8;
//!     for i in 0..bits as usize {
//!       v |= ((s.bytes[s.pos / 8] >> (s.pos % 8)) & 1) << i;
//!       s.pos += 1;
//!     }
//!     v
//!   }
//!
//!   pub fn write_bool(s: &mut BitstreamState, v: bool) {
//!     write_u8(s, v as u8, 1)
//!   }
//!
//!   pub fn read_bool(s: &mut BitstreamState) -> bool {
//!     read_u8(s, 1) != 0
//!   }
//! }
//!
//! #[sectorpack::bitpack(sector_count = 2, sector_size = 1, read = read_sector, save = save_sector, data(hero: Hero))]
//! mod layout {
//!   pub use super::io::*;
//!
//!   #[derive(Debug, Default, Clone, Copy, PartialEq)]
//!   pub struct Hero {
//!     #[bitpack(range(1, 100))]
//!     pub level: u8,
//!     pub alive: bool,
//!     #[bitpack(bitcount = 4)]
//!     pub potions: u8,
//!     #[bitpack(omit, default = 3)]
//!     pub cached: u8,
//!   }
//! }
//!
//! fn main() {
//!   use layout::{Hero, read_sector, save_sector};
//!
//!   let hero = Hero { level: 42, alive: true, potions: 9, cached: 0 };
//!   let mut back = Hero::default();
//!   for id in 0..2 {
//!     let mut out = io::BitstreamState::default();
//!     save_sector(&mut out, id, &hero);
//!     let mut input = io::BitstreamState { bytes: out.bytes, pos: 0 };
//!     read_sector(&mut input, id, &mut back);
//!   }
//!   assert_eq!(back, Hero { cached: 3, ..hero });
//! }
//! ```

extern crate proc_macro;
use proc_macro::TokenStream;

mod bitpack;

#[proc_macro_attribute]
pub fn bitpack(args: TokenStream, input: TokenStream) -> TokenStream {
  bitpack::expand(args.into(), syn::parse_macro_input!(input as syn::ItemMod)).into()
}
