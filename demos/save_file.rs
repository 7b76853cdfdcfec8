// A small save file split over two 4-byte sectors.

mod io {
  #[derive(Default)]
  pub struct BitstreamState {
    pub bytes: Vec<u8>,
    pub pos: usize,
  }

  fn put(s: &mut BitstreamState, v: u64, bits: u32) {
    for i in 0..bits {
      if s.pos / 8 == s.bytes.len() {
        s.bytes.push(0);
      }
      s.bytes[s.pos / 8] |= (((v >> i) & 1) as u8) << (s.pos % 8);
      s.pos += 1;
    }
  }

  fn take(s: &mut BitstreamState, bits: u32) -> u64 {
    let mut v = 0u64;
    for i in 0..bits {
      let byte = s.bytes.get(s.pos / 8).copied().unwrap_or(0);
      v |= u64::from((byte >> (s.pos % 8)) & 1) << i;
      s.pos += 1;
    }
    v
  }

  pub fn write_bool(s: &mut BitstreamState, v: bool) {
    put(s, v.into(), 1);
  }

  pub fn read_bool(s: &mut BitstreamState) -> bool {
    take(s, 1) != 0
  }

  pub fn write_u8(s: &mut BitstreamState, v: u8, bits: u32) {
    put(s, v.into(), bits);
  }

  pub fn read_u8(s: &mut BitstreamState, bits: u32) -> u8 {
    take(s, bits) as u8
  }

  pub fn write_u16(s: &mut BitstreamState, v: u16, bits: u32) {
    put(s, v.into(), bits);
  }

  pub fn read_u16(s: &mut BitstreamState, bits: u32) -> u16 {
    take(s, bits) as u16
  }

  pub fn write_string(s: &mut BitstreamState, text: &[u8], len: usize) {
    for &b in &text[..len] {
      put(s, b.into(), 8);
    }
  }

  pub fn read_string(s: &mut BitstreamState, text: &mut [u8], len: usize) {
    for b in &mut text[..len] {
      *b = take(s, 8) as u8;
    }
  }

  pub fn write_string_terminated(s: &mut BitstreamState, text: &[u8], len: usize) {
    write_string(s, text, len);
  }

  pub fn read_string_terminated(s: &mut BitstreamState, text: &mut [u8], len: usize) {
    read_string(s, text, len);
    text[len..].fill(0);
  }
}

#[sectorpack::bitpack(sector_count = 2, sector_size = 4, read = read_sector, save = save_sector, data(save: Save))]
mod layout {
  pub use super::io::*;

  #[derive(Clone, Copy, Debug, Default, PartialEq)]
  pub struct Save {
    #[bitpack(string)]
    pub name: [u8; 5],
    #[bitpack(range(1, 99))]
    pub level: u8,
    #[bitpack(bitcount = 10)]
    pub gold: u16,
    #[bitpack(bitcount = 3)]
    pub items: [u8; 4],
    pub hard_mode: bool,
  }
}

fn main() {
  use layout::{Save, read_sector, save_sector};

  let save = Save { name: *b"Zed\0\0", level: 12, gold: 999, items: [1, 4, 7, 0], hard_mode: true };
  let mut back = Save::default();
  for id in 0..2 {
    let mut out = io::BitstreamState::default();
    save_sector(&mut out, id, &save);
    println!("sector {id}: bytes={:02x?}", out.bytes);
    let mut input = io::BitstreamState { bytes: out.bytes, pos: 0 };
    read_sector(&mut input, id, &mut back);
  }
  assert_eq!(back, save);
}
