// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Building blocks for signal generation.

use crate::{
    rng::Rng,
    types::{SampleType, SAMPLE_RATE},
};
use kahan::KahanSum;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter, FromRepr, IntoStaticStr};

/// The shapes an [Oscillator] can produce. The discriminants are what
/// instrument parameters store.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    EnumCountMacro,
    EnumIter,
    FromRepr,
    PartialEq,
    Eq,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[repr(usize)]
#[allow(missing_docs)]
pub enum Waveform {
    #[default]
    Off,
    Sine,
    Square,
    Triangle,
    Saw,
    Ramp,
    #[strum(serialize = "PlbSquare")]
    PolyblepSquare,
    #[strum(serialize = "PlbTriangle")]
    PolyblepTriangle,
    #[strum(serialize = "PlbSaw")]
    PolyblepSaw,
    SmoothNoise,
    WhiteNoise,
    PinkNoise,
}
impl Waveform {
    /// Decodes a waveform stored as a parameter value. Unknown values are
    /// [Waveform::Off].
    pub fn from_parameter(value: f32) -> Self {
        if value < 0.0 {
            return Self::Off;
        }
        Self::from_repr(value as usize).unwrap_or_default()
    }

    /// The value that stores this waveform in a parameter.
    pub fn as_parameter(&self) -> f32 {
        *self as usize as f32
    }

    /// Whether the waveform jumps. Modulating amplitude multiplicatively
    /// with one of these steps audibly, so LFOs that have them are skipped
    /// for amplitude modulation.
    pub fn has_discontinuities(&self) -> bool {
        matches!(
            self,
            Self::Square
                | Self::Saw
                | Self::Ramp
                | Self::PolyblepSquare
                | Self::PolyblepSaw
                | Self::WhiteNoise
                | Self::PinkNoise
        )
    }
}

const PINK_FREQUENCIES: [f64; 7] = [
    8227.219, 8227.219, 6388.570, 3302.754, 479.412, 151.070, 54.264,
];

#[derive(Debug, Default, Clone)]
struct PinkNoise {
    k: [f32; 7],
    b: [f32; 7],
}
impl PinkNoise {
    fn new() -> Self {
        let mut k = [0.0; 7];
        for (k, f) in k.iter_mut().zip(PINK_FREQUENCIES) {
            *k = (-2.0 * PI * f / SAMPLE_RATE as f64).exp() as f32;
        }
        Self { k, b: [0.0; 7] }
    }

    fn next(&mut self, white: f32) -> f32 {
        for (b, k) in self.b.iter_mut().zip(self.k) {
            *b = k * (white + *b);
        }
        let b = &self.b;
        0.05 * (b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + white - b[6])
    }
}

/// Band-limited step correction for the PolyBLEP waveforms.
fn polyblep(phase_increment: f64, t: f64) -> f64 {
    let dt = phase_increment / TAU;
    if t < dt {
        let t = t / dt;
        t + t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + t + t + 1.0
    } else {
        0.0
    }
}

/// A phase-accumulating waveform generator. Output is computed from the
/// current phase, and then the phase advances.
#[derive(Debug)]
pub struct Oscillator {
    waveform: Waveform,
    frequency: f32,
    phase_increment: f64,

    // Kahan summation keeps long-running phase accumulation from drifting.
    phase: KahanSum<f64>,
    end_of_cycle: bool,
    end_of_rise: bool,
    sample_count: u64,

    last_out: f64,
    last_keypoint: f32,
    last_interval: f32,
    pink: PinkNoise,
    rng: Rng,
}
impl Default for Oscillator {
    fn default() -> Self {
        Self::new(1.0, Waveform::Sine)
    }
}
impl Oscillator {
    #[allow(missing_docs)]
    pub fn new(frequency: f32, waveform: Waveform) -> Self {
        let mut r = Self {
            waveform: Waveform::Off,
            frequency,
            phase_increment: 0.0,
            phase: KahanSum::new(),
            end_of_cycle: true,
            end_of_rise: false,
            sample_count: 0,
            last_out: 0.0,
            last_keypoint: 0.0,
            last_interval: 0.0,
            pink: PinkNoise::default(),
            rng: Rng::default(),
        };
        r.set_waveform(waveform);
        r.set_frequency(frequency);
        r
    }

    /// Replaces the noise source, for reproducible output.
    pub fn with_rng(mut self, rng: Rng) -> Self {
        self.rng = rng;
        self
    }

    #[allow(missing_docs)]
    pub fn set_waveform(&mut self, waveform: Waveform) {
        if self.waveform == waveform {
            return;
        }
        self.waveform = waveform;
        if waveform == Waveform::PinkNoise {
            self.pink = PinkNoise::new();
        }
    }

    #[allow(missing_docs)]
    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    #[allow(missing_docs)]
    pub fn is_off(&self) -> bool {
        self.waveform == Waveform::Off
    }

    #[allow(missing_docs)]
    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
        self.phase_increment = TAU * frequency as f64 / SAMPLE_RATE as f64;
    }

    #[allow(missing_docs)]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Whether the most recent [Oscillator::next()] wrapped the phase.
    pub fn end_of_cycle(&self) -> bool {
        self.end_of_cycle
    }

    /// Whether the most recent [Oscillator::next()] crossed from the first
    /// half of the cycle into the second.
    pub fn end_of_rise(&self) -> bool {
        self.end_of_rise
    }

    #[allow(missing_docs)]
    pub fn is_rising(&self) -> bool {
        self.phase.sum() < PI
    }

    #[allow(missing_docs)]
    pub fn is_falling(&self) -> bool {
        !self.is_rising()
    }

    /// Phase in radians, [0, 2π).
    pub fn phase(&self) -> f64 {
        self.phase.sum()
    }

    /// How many times [Oscillator::next()] has been called.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    fn white_noise(&mut self) -> f32 {
        const C1: f32 = ((1 << 15) - 1) as f32;
        const C2: f32 = ((C1 / 3.0) as i32 + 1) as f32;
        const C3: f32 = 1.0 / C1;
        let random = self.rng.unipolar();
        (2.0 * (random * C2 * 3.0) - 3.0 * (C2 - 1.0)) * C3
    }

    fn square(&self, phase: f64, t: f64) -> f64 {
        let mut output = if phase < PI { 1.0 } else { -1.0 };
        output += polyblep(self.phase_increment, t);
        output -= polyblep(self.phase_increment, (t + 0.5) % 1.0);
        output
    }

    /// Produces one sample and advances the phase.
    pub fn next(&mut self) -> SampleType {
        let phase = self.phase.sum();
        let t = phase / TAU;
        let output = match self.waveform {
            Waveform::Off => 0.0,
            Waveform::Sine => phase.sin() as f32,
            Waveform::Square => {
                if phase < PI {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => (2.0 * ((-1.0 + 2.0 * t).abs() - 0.5)) as f32,
            Waveform::Saw => (-(2.0 * t - 1.0)) as f32,
            Waveform::Ramp => (2.0 * t - 1.0) as f32,
            Waveform::PolyblepSquare => (self.square(phase, t) * 0.707) as f32,
            Waveform::PolyblepSaw => (-((2.0 * t - 1.0) - polyblep(self.phase_increment, t))) as f32,
            Waveform::PolyblepTriangle => {
                // Leaky integrator over a band-limited square.
                let square = self.square(phase, t);
                let output =
                    self.phase_increment * square + (1.0 - self.phase_increment) * self.last_out;
                self.last_out = output;
                output as f32
            }
            Waveform::SmoothNoise => {
                if self.end_of_cycle {
                    self.last_keypoint += self.last_interval;
                    self.last_interval = self.rng.bipolar() - self.last_keypoint;
                }
                let t = t as f32;
                self.last_keypoint + t * t * (3.0 - 2.0 * t) * self.last_interval
            }
            Waveform::WhiteNoise => self.white_noise(),
            Waveform::PinkNoise => {
                let white = self.white_noise();
                self.pink.next(white)
            }
        };

        let was_rising = self.is_rising();
        self.phase += self.phase_increment;
        let next_phase = self.phase.sum();
        if next_phase > TAU {
            self.phase = KahanSum::new_with_value(next_phase - TAU);
            self.end_of_cycle = true;
        } else {
            self.end_of_cycle = false;
        }
        self.end_of_rise = was_rising && self.is_falling();
        self.sample_count += 1;

        output
    }
}
