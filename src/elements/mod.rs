// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Per-voice DSP building blocks.

/// The most commonly used imports.
pub mod prelude {
    pub use super::{Envelope, Filter, FilterKind, Stage, Value};
}

pub use easing::{ease_in_quad, Easing};
pub use envelope::{Envelope, Stage};
pub use filter::{Filter, FilterKind};
pub use value::Value;

mod easing;
mod envelope;
mod filter;
mod value;
