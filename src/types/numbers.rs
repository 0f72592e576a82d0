// Copyright (c) 2023 Mike Tsao. All rights reserved.

/// The type of a single mono audio sample. Output is always in [-1.0, 1.0].
pub type SampleType = f32;

/// The type of a normalized instrument parameter value.
pub type ParameterType = f32;

/// The one and only sample rate. Everything is mono, 32-bit float.
pub const SAMPLE_RATE: usize = 44100;

/// Velocity of a sequencer step in Press mode.
pub const DEFAULT_PRESS_VELOCITY: f32 = 0.65;

/// Velocity of a sequencer step in Accent mode.
pub const ACCENT_PRESS_VELOCITY: f32 = 1.0;

/// MIDI notes we know frequencies for.
pub const TOTAL_NOTES: usize = 11 * 12;

const EQUIVALENT_EPSILON: f32 = 1e-6;
const MIN_DB: f32 = -30.0;

/// Whether two floats are close enough that changing from one to the other
/// isn't worth doing anything about.
pub fn equivalent(a: f32, b: f32) -> bool {
    (a - b).abs() < EQUIVALENT_EPSILON
}

/// Equal-tempered frequency of a MIDI note, A4 (69) = 440Hz.
pub fn note_frequency(note: u8) -> f32 {
    debug_assert!((note as usize) < TOTAL_NOTES);
    (440.0 * from_semitone(note as f32 - 69.0) as f64) as f32
}

/// Frequency ratio of the given interval in semitones.
pub fn from_semitone(semitones: f32) -> f32 {
    2.0f32.powf(semitones / 12.0)
}

/// Linear gain to decibels, floored at -30dB.
pub fn to_db(linear: f32) -> f32 {
    if linear > 0.0 {
        20.0 * linear.log10()
    } else {
        MIN_DB
    }
}

/// Decibels to linear gain. Anything at or below -30dB is silence.
pub fn from_db(db: f32) -> f32 {
    if db <= MIN_DB {
        0.0
    } else {
        10.0f32.powf(db / 20.0)
    }
}

/// Maps `value` from one linear range onto another.
pub fn linear_to_linear(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    let v = (value - in_min) / (in_max - in_min);
    out_min + v * (out_max - out_min)
}

/// Maps `value` from a linear range onto an exponential one.
pub fn linear_to_exponential(
    value: f32,
    in_min: f32,
    in_max: f32,
    out_min: f32,
    out_max: f32,
) -> f32 {
    let v = (value - in_min) / (in_max - in_min);
    out_min * (v * (out_max / out_min).ln()).exp()
}

/// Rounds a duration in milliseconds to whole samples.
pub fn samples_from_milliseconds(milliseconds: u64) -> u64 {
    milliseconds * SAMPLE_RATE as u64 / 1000
}

/// The duration of a sample count in whole milliseconds.
pub fn milliseconds_from_samples(samples: u64) -> u64 {
    samples * 1000 / SAMPLE_RATE as u64
}

fn soft_limit(x: f32) -> f32 {
    x * (27.0 + x * x) / (27.0 + 9.0 * x * x)
}

/// Rational soft clipper; saturates to ±1 beyond ±3.
pub fn soft_clip(x: f32) -> f32 {
    if x < -3.0 {
        -1.0
    } else if x > 3.0 {
        1.0
    } else {
        soft_limit(x)
    }
}

/// Clamps to [-1.0, 1.0].
pub fn hard_clip(x: f32) -> f32 {
    x.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn note_frequencies() {
        assert!(approx_eq!(f32, note_frequency(69), 440.0, epsilon = 0.001));
        assert!(approx_eq!(f32, note_frequency(57), 220.0, epsilon = 0.001));
        assert!(
            approx_eq!(f32, note_frequency(60), 261.6256, epsilon = 0.01),
            "middle C should be about 261.63Hz"
        );
    }

    #[test]
    fn clipping() {
        assert_eq!(hard_clip(1.5), 1.0);
        assert_eq!(hard_clip(-1.5), -1.0);
        assert_eq!(hard_clip(0.25), 0.25);
        assert_eq!(soft_clip(4.0), 1.0);
        assert_eq!(soft_clip(-4.0), -1.0);
        assert!(
            approx_eq!(f32, soft_clip(3.0), 1.0, epsilon = 0.0001),
            "soft clip should meet the rails continuously"
        );
        assert!(soft_clip(0.5) < 0.5 && soft_clip(0.5) > 0.45);
    }

    #[test]
    fn decibels() {
        assert_eq!(from_db(-60.0), 0.0, "-60dB is below the floor");
        assert!(approx_eq!(f32, from_db(0.0), 1.0, epsilon = 0.0001));
        assert!(approx_eq!(f32, to_db(1.0), 0.0, epsilon = 0.0001));
        assert_eq!(to_db(0.0), -30.0);
    }

    #[test]
    fn ranges() {
        assert!(approx_eq!(
            f32,
            linear_to_linear(0.5, 0.0, 1.0, 400.0, 480.0),
            440.0,
            epsilon = 0.001
        ));
        assert!(approx_eq!(
            f32,
            linear_to_exponential(0.0, 0.0, 1.0, 200.0, 2000.0),
            200.0,
            epsilon = 0.01
        ));
        assert!(approx_eq!(
            f32,
            linear_to_exponential(1.0, 0.0, 1.0, 200.0, 2000.0),
            2000.0,
            epsilon = 0.1
        ));
        assert_eq!(samples_from_milliseconds(1000), SAMPLE_RATE as u64);
        assert_eq!(milliseconds_from_samples(SAMPLE_RATE as u64 / 2), 500);
    }
}
