// A user-named state type with only the primitives the layout needs.
pub struct Cursor {
  pub bits: Vec<bool>,
  pub at: usize,
}

pub fn write_bool(c: &mut Cursor, v: bool) {
  c.bits.push(v);
}

pub fn read_bool(c: &mut Cursor) -> bool {
  c.at += 1;
  c.bits[c.at - 1]
}

pub fn write_u8(c: &mut Cursor, v: u8, bits: u32) {
  (0..bits).for_each(|i| c.bits.push((v >> i) & 1 == 1));
}

pub fn read_u8(c: &mut Cursor, bits: u32) -> u8 {
  (0..bits).fold(0, |acc, i| acc | (u8::from(read_bool(c)) << i))
}

#[sectorpack::bitpack(
  sector_count = 2,
  sector_size = 1,
  state = Cursor,
  read = load,
  save = store,
  data(door: Door; lamp: Lamp)
)]
mod world {
  use super::*;

  #[derive(Clone, Copy, Default)]
  pub struct Door {
    pub open: bool,
    #[bitpack(range(1, 4))]
    pub lock: u8,
  }

  #[derive(Clone, Copy, Default)]
  pub struct Lamp {
    #[bitpack(bitcount = 3)]
    pub hue: u8,
    #[bitpack(omit, default = true)]
    pub lit: bool,
  }
}

fn main() {
  let door = world::Door { open: true, lock: 3 };
  let lamp = world::Lamp { hue: 5, lit: false };
  let mut back = (world::Door::default(), world::Lamp::default());
  for id in 0..2 {
    let mut c = Cursor { bits: Vec::new(), at: 0 };
    world::store(&mut c, id, &door, &lamp);
    world::load(&mut c, id, &mut back.0, &mut back.1);
  }
  assert!(back.0.open && back.0.lock == 3 && back.1.hue == 5 && back.1.lit);
}
