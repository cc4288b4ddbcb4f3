// crates/swiftclip-media/src/helpers/mod.rs
//
// Internal helpers for the desktop backend. Not re-exported from lib.rs;
// these are demux/decode/encode implementation details.

pub mod planes;
pub mod seek;
