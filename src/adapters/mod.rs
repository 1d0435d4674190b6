//! Hardware adapters

pub mod midi;
pub mod traits;

pub use traits::*;
