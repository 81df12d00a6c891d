//! Controller wiring shared by the `strands` binary and its integration
//! tests.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod controller;
