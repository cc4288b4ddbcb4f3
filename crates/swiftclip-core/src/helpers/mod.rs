// crates/swiftclip-core/src/helpers/mod.rs
//
// Small pure helpers shared by swiftclip-media and the CLI.

pub mod geometry;
pub mod time;
