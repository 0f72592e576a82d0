// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Common data types used throughout the system.

/// The most commonly used imports.
pub mod prelude {
    pub use super::{
        equivalent, note_frequency, InstrumentId, Parameter, ParameterClass, ParameterType,
        ParametersValues, SampleType, ACCENT_PRESS_VELOCITY, DEFAULT_PRESS_VELOCITY, SAMPLE_RATE,
    };
}

pub use instrument_id::InstrumentId;
pub use numbers::{
    equivalent, from_db, from_semitone, hard_clip, linear_to_exponential, linear_to_linear,
    milliseconds_from_samples, note_frequency, samples_from_milliseconds, soft_clip, to_db,
    ParameterType, SampleType, ACCENT_PRESS_VELOCITY, DEFAULT_PRESS_VELOCITY, SAMPLE_RATE,
    TOTAL_NOTES,
};
pub use parameter::{
    EnvParameter, FilterParameter, LfoParameter, OscParameter, Parameter, ParameterClass,
    ParametersValues,
};

mod instrument_id;
mod numbers;
mod parameter;
