// Copyright (c) 2023 Mike Tsao. All rights reserved.

#![warn(missing_docs)]

//! The `synthstation` crate is a small synthesizer workstation: four
//! instruments, a step sequencer, a chainer that strings sequences together,
//! and MIDI routing, all driven by one real-time [Engine](orchestration::Engine).
//!
//! Everything runs at 44.1KHz and produces mono samples. The engine is
//! pull-based: an audio callback asks it to fill a buffer, and it renders
//! exactly that many frames.

pub mod composition;
pub mod elements;
pub mod error;
pub mod generators;
pub mod instruments;
pub mod midi;
pub mod orchestration;
pub mod project;
pub mod rng;
pub mod services;
pub mod types;
pub mod util;

pub use error::{Error, Result};
pub use version::app_version;

mod version;

/// A collection of imports that are useful to users of this crate. `use
/// synthstation::prelude::*;` for easier onboarding.
pub mod prelude {
    pub use super::{
        composition::prelude::*, elements::prelude::*, instruments::prelude::*,
        midi::prelude::*, orchestration::prelude::*, project::prelude::*,
        services::prelude::*, types::prelude::*, util::prelude::*, Error, Result,
    };
}
