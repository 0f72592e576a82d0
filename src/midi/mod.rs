// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Classification and routing of incoming MIDI.

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{MidiMapping, MidiMessage, MidiQueue, MidiRouter};
}

pub use router::{InstrumentMidiMapping, MidiMapping, MidiQueue, MidiRouter};
pub use types::{classify, ChannelEvent, MidiChannel, MidiMessage};

mod router;
mod types;
