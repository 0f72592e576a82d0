// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! Turns instruments, sequences, and chains into audio.

/// The most commonly used imports.
pub mod prelude {
    pub use super::{Engine, EngineCommand, EngineEvent, EngineHandle, EngineStats};
}

pub use engine::{Engine, EngineCommand, EngineEvent, EngineHandle, EngineStats};

mod engine;
