#![allow(dead_code)]

mod common;

use common::{bits_written, read_sectors, save_sectors};

#[sectorpack::bitpack(sector_size = 4, read = read_sector, save = save_sector, data(msg: Message))]
mod external {
  pub use crate::common::*;

  #[derive(Clone, Copy)]
  pub struct Message {
    #[bitpack(range(0, 2))]
    pub kind: u8,
    #[bitpack(tag = kind)]
    pub body: Body,
    pub done: bool,
  }

  #[derive(Clone, Copy)]
  pub union Body {
    #[bitpack(id = 0)]
    pub small: u8,
    #[bitpack(id = 1)]
    pub wide: u16,
    #[bitpack(id = 2)]
    pub pair: Pair,
  }

  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct Pair {
    #[bitpack(bitcount = 4)]
    pub x: u8,
    #[bitpack(bitcount = 4)]
    pub y: u8,
  }

  impl Message {
    pub fn empty() -> Self {
      Self { kind: 0, body: Body { wide: 0 }, done: false }
    }
  }
}

fn roundtrip_message(msg: &external::Message) -> external::Message {
  let sectors = save_sectors(1, 4, |state, id| external::save_sector(state, id, msg));
  let mut got = external::Message::empty();
  read_sectors(&sectors, |state, id| external::read_sector(state, id, &mut got));
  got
}

#[test]
fn roundtrip_external_union() {
  let msg = external::Message { kind: 1, body: external::Body { wide: 0xbeef }, done: true };
  let got = roundtrip_message(&msg);
  assert_eq!((got.kind, got.done), (1, true));
  assert_eq!(unsafe { got.body.wide }, 0xbeef);

  let msg = external::Message { kind: 0, body: external::Body { small: 0x5a }, done: false };
  let got = roundtrip_message(&msg);
  assert_eq!((got.kind, got.done), (0, false));
  assert_eq!(unsafe { got.body.small }, 0x5a);

  let pair = external::Pair { x: 9, y: 15 };
  let msg = external::Message { kind: 2, body: external::Body { pair }, done: true };
  let got = roundtrip_message(&msg);
  assert_eq!((got.kind, got.done), (2, true));
  assert_eq!(unsafe { got.body.pair }, pair);
}

#[test]
fn every_variant_occupies_the_widest_variant() {
  let bodies = [external::Body { small: 1 }, external::Body { wide: 1 }, external::Body { pair: external::Pair { x: 1, y: 1 } }];
  for (kind, body) in bodies.into_iter().enumerate() {
    let msg = external::Message { kind: kind as u8, body, done: true };
    assert_eq!(bits_written(|state| external::save_sector(state, 0, &msg)), 2 + 16 + 1, "kind {kind}");
  }
}

#[sectorpack::bitpack(sector_size = 2, read = read_sector, save = save_sector, data(scene: Scene))]
mod internal {
  pub use crate::common::*;

  #[derive(Clone, Copy)]
  pub struct Scene {
    pub shape: Shape,
    #[bitpack(bitcount = 3)]
    pub layer: u8,
  }

  #[repr(C)]
  #[derive(Clone, Copy)]
  #[bitpack(internal_tag = kind)]
  pub union Shape {
    #[bitpack(id = 0)]
    pub circle: Circle,
    #[bitpack(id = 1)]
    pub rect: Rect,
  }

  #[repr(C)]
  #[derive(Clone, Copy, Debug, PartialEq, Eq)]
  pub struct Circle {
    #[bitpack(bitcount = 1)]
    pub kind: u8,
    #[bitpack(bitcount = 6)]
    pub radius: u8,
  }

  #[repr(C)]
  #[derive(Clone, Copy, Debug, PartialEq, Eq)]
  pub struct Rect {
    #[bitpack(bitcount = 1)]
    pub kind: u8,
    #[bitpack(bitcount = 4)]
    pub w: u8,
    #[bitpack(bitcount = 4)]
    pub h: u8,
  }

  impl Scene {
    pub fn empty() -> Self {
      Self { shape: Shape { rect: Rect { kind: 0, w: 0, h: 0 } }, layer: 0 }
    }
  }
}

fn roundtrip_scene(scene: &internal::Scene) -> internal::Scene {
  let sectors = save_sectors(1, 2, |state, id| internal::save_sector(state, id, scene));
  let mut got = internal::Scene::empty();
  read_sectors(&sectors, |state, id| internal::read_sector(state, id, &mut got));
  got
}

#[test]
fn roundtrip_internal_union() {
  let rect = internal::Rect { kind: 1, w: 9, h: 3 };
  let scene = internal::Scene { shape: internal::Shape { rect }, layer: 5 };
  let got = roundtrip_scene(&scene);
  assert_eq!(unsafe { got.shape.rect }, rect);
  assert_eq!(got.layer, 5);

  let circle = internal::Circle { kind: 0, radius: 42 };
  let scene = internal::Scene { shape: internal::Shape { circle }, layer: 2 };
  let got = roundtrip_scene(&scene);
  assert_eq!(unsafe { got.shape.circle }, circle);
  assert_eq!(got.layer, 2);
}

#[test]
fn shared_prefix_is_written_once() {
  let scene = internal::Scene { shape: internal::Shape { circle: internal::Circle { kind: 0, radius: 1 } }, layer: 0 };
  assert_eq!(bits_written(|state| internal::save_sector(state, 0, &scene)), 1 + 8 + 3);
}

#[sectorpack::bitpack(sector_size = 2, read = read_sector, save = save_sector, data(frame: Frame))]
mod skipped {
  pub use crate::common::*;

  #[derive(Clone, Copy)]
  pub struct Frame {
    pub event: Event,
  }

  #[repr(C)]
  #[derive(Clone, Copy)]
  #[bitpack(internal_tag = kind)]
  pub union Event {
    #[bitpack(id = 2, omit)]
    pub legacy: Move,
    #[bitpack(id = 0)]
    pub moved: Move,
    #[bitpack(id = 1)]
    pub hit: Hit,
  }

  #[repr(C)]
  #[derive(Clone, Copy, Debug, PartialEq, Eq)]
  pub struct Move {
    #[bitpack(bitcount = 2)]
    pub kind: u8,
    #[bitpack(bitcount = 5)]
    pub dx: u8,
  }

  #[repr(C)]
  #[derive(Clone, Copy, Debug, PartialEq, Eq)]
  pub struct Hit {
    #[bitpack(bitcount = 2)]
    pub kind: u8,
    #[bitpack(bitcount = 7)]
    pub damage: u8,
  }

  impl Frame {
    pub fn empty() -> Self {
      Self { event: Event { moved: Move { kind: 0, dx: 0 } } }
    }
  }
}

fn roundtrip_frame(frame: &skipped::Frame) -> skipped::Frame {
  assert_eq!(bits_written(|state| skipped::save_sector(state, 0, frame)), 2 + 7);
  let sectors = save_sectors(1, 2, |state, id| skipped::save_sector(state, id, frame));
  let mut got = skipped::Frame::empty();
  read_sectors(&sectors, |state, id| skipped::read_sector(state, id, &mut got));
  got
}

#[test]
fn roundtrip_internal_union_with_omitted_variant() {
  let hit = skipped::Hit { kind: 1, damage: 99 };
  let got = roundtrip_frame(&skipped::Frame { event: skipped::Event { hit } });
  assert_eq!(unsafe { got.event.hit }, hit);

  let moved = skipped::Move { kind: 0, dx: 17 };
  let got = roundtrip_frame(&skipped::Frame { event: skipped::Event { moved } });
  assert_eq!(unsafe { got.event.moved }, moved);

  // Only the shared tag of an omitted variant is stored.
  let legacy = skipped::Move { kind: 2, dx: 31 };
  let got = roundtrip_frame(&skipped::Frame { event: skipped::Event { legacy } });
  assert_eq!(unsafe { got.event.legacy }, skipped::Move { kind: 2, dx: 0 });
}

#[sectorpack::bitpack(sector_count = 4, sector_size = 1, read = read_sector, save = save_sector, data(obj: Big))]
mod spanning {
  pub use crate::common::*;

  #[derive(Clone, Copy)]
  pub struct Big {
    #[bitpack(bitcount = 1)]
    pub kind: u8,
    #[bitpack(tag = kind)]
    pub body: Payload,
    #[bitpack(bitcount = 4)]
    pub after: u8,
  }

  #[derive(Clone, Copy)]
  pub union Payload {
    #[bitpack(id = 0)]
    pub bytes: [u8; 2],
    #[bitpack(id = 1)]
    pub small: Small,
  }

  #[derive(Clone, Copy, Debug, PartialEq, Eq)]
  pub struct Small {
    #[bitpack(bitcount = 3)]
    pub x: u8,
  }

  impl Big {
    pub fn empty() -> Self {
      Self { kind: 0, body: Payload { bytes: [0; 2] }, after: 0 }
    }
  }
}

fn roundtrip_big(big: &spanning::Big) -> spanning::Big {
  let sectors = save_sectors(4, 1, |state, id| spanning::save_sector(state, id, big));
  let mut got = spanning::Big::empty();
  read_sectors(&sectors, |state, id| spanning::read_sector(state, id, &mut got));
  got
}

#[test]
fn roundtrip_union_spanning_sectors() {
  let big = spanning::Big { kind: 0, body: spanning::Payload { bytes: [0xde, 0xad] }, after: 11 };
  let got = roundtrip_big(&big);
  assert_eq!((got.kind, got.after), (0, 11));
  assert_eq!(unsafe { got.body.bytes }, [0xde, 0xad]);

  let small = spanning::Small { x: 6 };
  let big = spanning::Big { kind: 1, body: spanning::Payload { small }, after: 4 };
  let got = roundtrip_big(&big);
  assert_eq!((got.kind, got.after), (1, 4));
  assert_eq!(unsafe { got.body.small }, small);
}

#[test]
fn branches_end_at_the_same_position() {
  let a = spanning::Big { kind: 0, body: spanning::Payload { bytes: [1, 2] }, after: 1 };
  let b = spanning::Big { kind: 1, body: spanning::Payload { small: spanning::Small { x: 1 } }, after: 1 };
  for id in 0..4 {
    let la = bits_written(|state| spanning::save_sector(state, id, &a));
    let lb = bits_written(|state| spanning::save_sector(state, id, &b));
    assert!(la <= 8 && lb <= 8, "sector {id}: {la} / {lb}");
  }
  // `after` sits at the same place whichever variant is stored.
  let sa = save_sectors(4, 1, |state, id| spanning::save_sector(state, id, &a));
  let sb = save_sectors(4, 1, |state, id| spanning::save_sector(state, id, &b));
  let last = |s: &Vec<Vec<u8>>| s.iter().rposition(|bytes| !bytes.is_empty());
  assert_eq!(last(&sa), last(&sb));
}
