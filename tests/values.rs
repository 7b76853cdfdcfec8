#![allow(dead_code)]

mod common;

use common::{bits_written, read_sectors, save_sectors};

#[sectorpack::bitpack(
  sector_size = 32,
  read = read_sector,
  save = save_sector,
  bool_type = Flag,
  heritable("$percent", range(0, 100)),
  heritable("$cached", omit, default = 9),
  debug_dump = profile,
  data(profile: Profile)
)]
mod values {
  pub use crate::common::*;

  pub type Flag = u8;

  #[bitpack(bitcount = 5)]
  pub type Level = u8;

  #[bitpack(bitcount = 7)]
  pub type Tenths = u8;

  #[bitpack(bitcount = 2)]
  pub type FacingBits = u8;

  #[bitpack(transform(wire = Tenths, pre_pack = to_tenths, post_unpack = from_tenths))]
  pub type Speed = f32;

  pub fn to_tenths(v: &f32) -> Tenths {
    (v * 10.0).round().clamp(0.0, 127.0) as u8
  }

  pub fn from_tenths(v: &Tenths) -> f32 {
    f32::from(*v) / 10.0
  }

  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub enum Facing {
    #[default]
    North,
    East,
    South,
    West,
  }

  pub fn facing_to_wire(f: &Facing) -> FacingBits {
    *f as u8
  }

  pub fn facing_from_wire(v: &FacingBits) -> Facing {
    match v & 3 {
      0 => Facing::North,
      1 => Facing::East,
      2 => Facing::South,
      _ => Facing::West,
    }
  }

  #[derive(Clone, Copy, Debug, Default, PartialEq)]
  pub struct Profile {
    #[bitpack(string)]
    pub name: [u8; 8],
    #[bitpack(string(unterminated))]
    pub code: [u8; 4],
    #[bitpack(opaque_buffer)]
    pub blob: [u8; 3],
    pub ratio: f32,
    #[bitpack(opaque_buffer)]
    pub seed: u32,
    pub hidden: Flag,
    pub level: Level,
    #[bitpack(inherit = "$percent")]
    pub volume: u8,
    #[bitpack(inherit = "$cached")]
    pub cached: u16,
    pub speed: Speed,
    #[bitpack(transform(wire = FacingBits, pre_pack = facing_to_wire, post_unpack = facing_from_wire))]
    pub facing: Facing,
  }
}

use values::{Facing, Profile};

fn sample() -> Profile {
  Profile {
    name: *b"Link\0\0\0\0",
    code: *b"ZX81",
    blob: [0xde, 0xad, 0x01],
    ratio: 0.625,
    seed: 0x1234_5678,
    hidden: 1,
    level: 31,
    volume: 80,
    cached: 9,
    speed: 2.5,
    facing: Facing::South,
  }
}

fn roundtrip(p: &Profile) -> Profile {
  let sectors = save_sectors(1, 32, |state, id| values::save_sector(state, id, p));
  let mut got = Profile::default();
  read_sectors(&sectors, |state, id| values::read_sector(state, id, &mut got));
  got
}

#[test]
fn roundtrip_values() {
  let p = sample();
  assert_eq!(roundtrip(&p), p);
}

#[test]
fn stored_bit_count() {
  let bits = 7 * 8 + 4 * 8 + 3 * 8 + 32 + 32 + 1 + 5 + 7 + 7 + 2;
  assert_eq!(bits_written(|state| values::save_sector(state, 0, &sample())), bits);
}

#[test]
fn terminated_strings_keep_their_terminator() {
  let p = Profile { name: *b"ABCDEFGH", ..sample() };
  assert_eq!(&roundtrip(&p).name, b"ABCDEFG\0");
}

#[test]
fn bool_aliases_store_one_bit() {
  let p = Profile { hidden: 5, ..sample() };
  assert_eq!(roundtrip(&p).hidden, 1);
  let p = Profile { hidden: 0, ..sample() };
  assert_eq!(roundtrip(&p).hidden, 0);
}

#[test]
fn preset_values_are_clamped_and_omitted_presets_defaulted() {
  let p = Profile { volume: 200, cached: 1000, ..sample() };
  let got = roundtrip(&p);
  assert_eq!(got.volume, 100);
  assert_eq!(got.cached, 9);
}

#[test]
fn transforms_go_through_the_wire_type() {
  let p = Profile { speed: 20.0, facing: Facing::West, ..sample() };
  let got = roundtrip(&p);
  assert_eq!(got.speed, 12.7);
  assert_eq!(got.facing, Facing::West);
}

#[test]
fn debug_dump_lists_the_object() {
  assert!(values::PROFILE_LAYOUT.starts_with("profile: 198 bits"), "{}", values::PROFILE_LAYOUT);
  assert!(values::PROFILE_LAYOUT.contains("profile.facing"), "{}", values::PROFILE_LAYOUT);
  assert!(values::PROFILE_LAYOUT.contains("profile.cached (omitted, defaulted)"), "{}", values::PROFILE_LAYOUT);
}

#[sectorpack::bitpack(
  sector_size = 1,
  read = read_sector,
  save = save_sector,
  func_write_bool = put_inverted,
  func_read_bool = get_inverted,
  whole_struct_functions = false,
  data(flags: Flags)
)]
mod overrides {
  pub use crate::common::*;

  pub fn put_inverted(state: &mut BitstreamState, v: bool) {
    write_bool(state, !v);
  }

  pub fn get_inverted(state: &mut BitstreamState) -> bool {
    !read_bool(state)
  }

  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct Flags {
    pub a: bool,
    pub b: bool,
    pub c: [bool; 3],
  }
}

#[test]
fn io_function_overrides_are_used() {
  let f = overrides::Flags { a: true, b: false, c: [true, true, false] };
  let sectors = save_sectors(1, 1, |state, id| overrides::save_sector(state, id, &f));
  assert_eq!(sectors, vec![vec![0b10010]]);
  let mut got = overrides::Flags::default();
  read_sectors(&sectors, |state, id| overrides::read_sector(state, id, &mut got));
  assert_eq!(got, f);
}

#[sectorpack::bitpack(sector_size = 1, read = read_sector, save = save_sector, data(wind: Wind))]
mod chained {
  pub use crate::common::*;

  #[bitpack(bitcount = 7)]
  pub type Tenths = u8;

  #[bitpack(transform(wire = Tenths, pre_pack = to_tenths, post_unpack = from_tenths))]
  pub type Speed = f32;

  #[bitpack(transform(wire = Speed, pre_pack = knots_to_speed, post_unpack = speed_to_knots))]
  pub type Knots = u16;

  pub fn to_tenths(v: &f32) -> Tenths {
    (v * 10.0).round().clamp(0.0, 127.0) as u8
  }

  pub fn from_tenths(v: &Tenths) -> f32 {
    f32::from(*v) / 10.0
  }

  pub fn knots_to_speed(v: &u16) -> Speed {
    f32::from(*v) / 2.0
  }

  pub fn speed_to_knots(v: &Speed) -> u16 {
    (v * 2.0).round() as u16
  }

  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct Wind {
    pub gust: Knots,
    pub calm: bool,
  }
}

#[test]
fn transforms_chain_through_transformed_wire_types() {
  let roundtrip = |w: &chained::Wind| {
    let sectors = save_sectors(1, 1, |state, id| chained::save_sector(state, id, w));
    let mut got = chained::Wind::default();
    read_sectors(&sectors, |state, id| chained::read_sector(state, id, &mut got));
    got
  };
  let w = chained::Wind { gust: 25, calm: true };
  assert_eq!(bits_written(|state| chained::save_sector(state, 0, &w)), 8);
  assert_eq!(roundtrip(&w), w);
  // 300 knots is 150.0, past what seven bits of tenths can hold.
  assert_eq!(roundtrip(&chained::Wind { gust: 300, calm: false }).gust, 25);
}
