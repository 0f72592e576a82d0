// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! Long-running services that are useful to a music application.

/// The most commonly used imports.
pub mod prelude {
    pub use super::{
        AudioService, AudioServiceEvent, LogService, MidiService, Recorder, RecorderTap,
    };
}
pub use audio::{AudioService, AudioServiceEvent};
pub use logging::{LogRecord, LogService, LogSink};
pub use midi::{ports_to_connect, MidiService};
pub use recorder::{wav_spec, Recorder, RecorderTap};

mod audio;
mod logging;
mod midi;
mod recorder;
