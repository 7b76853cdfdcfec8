// Minimal LSB-first bitstream used by the integration tests.
#![allow(dead_code)]

#[derive(Clone, Debug, Default)]
pub struct BitstreamState {
  pub bytes: Vec<u8>,
  pub pos: usize,
}

impl BitstreamState {
  pub fn reader(bytes: Vec<u8>) -> Self {
    Self { bytes, pos: 0 }
  }

  fn put(&mut self, value: u64, bits: u32) {
    for i in 0..bits {
      if self.pos / 8 == self.bytes.len() {
        self.bytes.push(0);
      }
      if (value >> i) & 1 == 1 {
        self.bytes[self.pos / 8] |= 1 << (self.pos % 8);
      }
      self.pos += 1;
    }
  }

  fn take(&mut self, bits: u32) -> u64 {
    let mut value = 0u64;
    for i in 0..bits {
      let byte = self.bytes.get(self.pos / 8).copied().unwrap_or(0);
      value |= u64::from((byte >> (self.pos % 8)) & 1) << i;
      self.pos += 1;
    }
    value
  }
}

pub fn write_bool(state: &mut BitstreamState, value: bool) {
  state.put(value as u64, 1);
}

pub fn read_bool(state: &mut BitstreamState) -> bool {
  state.take(1) != 0
}

macro_rules! unsigned_io {
  ($( $write:ident, $read:ident: $t:ty ),* $(,)?) => {$(
    pub fn $write(state: &mut BitstreamState, value: $t, bits: u32) {
      assert!(bits <= <$t>::BITS, "{} bits do not fit {}", bits, stringify!($t));
      state.put(value as u64, bits);
    }

    pub fn $read(state: &mut BitstreamState, bits: u32) -> $t {
      state.take(bits) as $t
    }
  )*};
}

unsigned_io!(write_u8, read_u8: u8, write_u16, read_u16: u16, write_u32, read_u32: u32, write_u64, read_u64: u64);

pub fn write_buffer(state: &mut BitstreamState, bytes: &[u8], len: usize) {
  for &b in &bytes[..len] {
    state.put(b.into(), 8);
  }
}

pub fn read_buffer(state: &mut BitstreamState, bytes: &mut [u8], len: usize) {
  for b in &mut bytes[..len] {
    *b = state.take(8) as u8;
  }
}

pub fn write_string(state: &mut BitstreamState, text: &[u8], len: usize) {
  write_buffer(state, text, len);
}

pub fn read_string(state: &mut BitstreamState, text: &mut [u8], len: usize) {
  read_buffer(state, text, len);
}

pub fn write_string_terminated(state: &mut BitstreamState, text: &[u8], len: usize) {
  write_buffer(state, text, len);
}

pub fn read_string_terminated(state: &mut BitstreamState, text: &mut [u8], len: usize) {
  read_buffer(state, text, len);
  for b in &mut text[len..] {
    *b = 0;
  }
}

/// Saves every sector into its own byte vector, checking it stays within `sector_size` bytes.
pub fn save_sectors(count: u32, sector_size: usize, mut save: impl FnMut(&mut BitstreamState, u32)) -> Vec<Vec<u8>> {
  (0..count)
    .map(|id| {
      let mut state = BitstreamState::default();
      save(&mut state, id);
      assert!(state.bytes.len() <= sector_size, "sector {id} overflows: {} bytes", state.bytes.len());
      state.bytes
    })
    .collect()
}

/// Reads the sectors back in order.
pub fn read_sectors(sectors: &[Vec<u8>], mut read: impl FnMut(&mut BitstreamState, u32)) {
  for (id, bytes) in sectors.iter().enumerate() {
    let mut state = BitstreamState::reader(bytes.clone());
    read(&mut state, id as u32);
  }
}

/// Bits a save call writes for one sector.
pub fn bits_written(save: impl FnOnce(&mut BitstreamState)) -> usize {
  let mut state = BitstreamState::default();
  save(&mut state);
  state.pos
}
