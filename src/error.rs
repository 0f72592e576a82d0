// Copyright (c) 2023 Mike Tsao. All rights reserved.

use thiserror::Error;

/// Errors that the non-real-time parts of the system can report. Nothing on
/// the audio path returns one of these; it logs and carries on instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem trouble.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A preset or settings file couldn't be parsed or written.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The recorder couldn't open or write its WAV file.
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// The MIDI subsystem couldn't start.
    #[error("couldn't initialize MIDI: {0}")]
    MidiInit(String),

    /// A MIDI input port couldn't be opened.
    #[error("couldn't connect to MIDI port {port}: {reason}")]
    MidiConnect {
        /// The port that failed.
        port: String,
        /// Why.
        reason: String,
    },

    /// The audio device couldn't be set up.
    #[error("audio error: {0}")]
    Audio(String),

    /// A DX7 bulk dump had the wrong size or header.
    #[error("invalid sysex data ({0} bytes)")]
    InvalidSysex(usize),

    /// A named preset doesn't exist.
    #[error("unknown preset {0}")]
    UnknownPreset(String),

    /// A preset name was empty or reserved.
    #[error("invalid preset name {0:?}")]
    InvalidName(String),
}

/// Shorthand for results carrying [Error].
pub type Result<T> = std::result::Result<T, Error>;
