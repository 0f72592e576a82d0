// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! Step sequences and chains of them.

/// The most commonly used imports.
pub mod prelude {
    pub use super::{
        Chainer, ChainerConfiguration, ChainerState, Link, NoteMode, Sequencer,
        SequencerAction, SequencerConfiguration, SequencerState,
    };
}

pub use chainer::{Chainer, ChainerConfiguration, ChainerState, Link, DEFAULT_LINK_COUNT};
pub use sequencer::{
    InstrumentSteps, NoteMode, Sequencer, SequencerAction, SequencerConfiguration,
    SequencerState, STEP_COUNT_RANGE, TEMPO_RANGE,
};

mod chainer;
mod sequencer;
