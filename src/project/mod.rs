// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! Named presets for instruments, sequences, chains, and MIDI controllers.

/// The most commonly used imports.
pub mod prelude {
    pub use super::PresetStore;
}

pub use presets::{default_parameters, sanitize_name, PresetStore};

mod presets;
