// Copyright (c) 2023 Mike Tsao. All rights reserved.

use super::easing::ease_in_quad;
use crate::types::{equivalent, SampleType, SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter, FromRepr, IntoStaticStr};

/// Response shapes a [Filter] offers. The discriminants are what instrument
/// parameters store.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    EnumCountMacro,
    EnumIter,
    FromRepr,
    IntoStaticStr,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
)]
#[repr(usize)]
#[allow(missing_docs)]
pub enum FilterKind {
    #[default]
    Off,
    Lowpass,
    Bandpass,
    Highpass,
    Notch,
    Peak,
    Moog,
}
impl FilterKind {
    /// Decodes a kind stored as a parameter value. Unknown values are
    /// [FilterKind::Off].
    pub fn from_parameter(value: f32) -> Self {
        if value < 0.0 {
            return Self::Off;
        }
        Self::from_repr(value as usize).unwrap_or_default()
    }

    /// The value that stores this kind in a parameter.
    pub fn as_parameter(&self) -> f32 {
        *self as usize as f32
    }
}

const MOOG_THERMAL: f32 = 0.000025;
const MOOG_MAX_FREQUENCY: f32 = 7000.0;
// Keeps the ladder from self-oscillating into the stratosphere.
const MOOG_MAX_RESONANCE: f32 = 0.95;

/// Four-pole transistor ladder, 2x oversampled, with tanh stage saturation.
#[derive(Debug, Clone)]
struct MoogLadder {
    frequency: f32,
    resonance: f32,
    delay: [f32; 6],
    tanh_stage: [f32; 3],
    cached: Option<(f32, f32, f32, f32)>,
}
impl Default for MoogLadder {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            resonance: 0.4,
            delay: [0.0; 6],
            tanh_stage: [0.0; 3],
            cached: None,
        }
    }
}
impl MoogLadder {
    // Returns (resonance, acr, tune), recomputing only when the knobs move.
    fn coefficients(&mut self) -> (f32, f32, f32) {
        let resonance = self.resonance.max(0.0);
        if let Some((frequency, cached_resonance, acr, tune)) = self.cached {
            if frequency == self.frequency && cached_resonance == resonance {
                return (resonance, acr, tune);
            }
        }
        let fc = self.frequency / SAMPLE_RATE as f32;
        let f = 0.5 * fc;
        let fc2 = fc * fc;
        let fc3 = fc2 * fc2;
        let fcr = 1.8730 * fc3 + 0.4955 * fc2 - 0.6490 * fc + 0.9988;
        let acr = -3.9364 * fc2 + 1.8409 * fc + 0.9968;
        let tune = (1.0 - (-(2.0 * PI) * f * fcr).exp()) / MOOG_THERMAL;
        self.cached = Some((self.frequency, resonance, acr, tune));
        (resonance, acr, tune)
    }

    fn process(&mut self, input: f32) -> f32 {
        let (resonance, acr, tune) = self.coefficients();
        let res4 = 4.0 * resonance * acr;
        let delay = &mut self.delay;
        let tanh_stage = &mut self.tanh_stage;
        let mut input = input;
        let mut stage = [0.0f32; 4];

        for _ in 0..2 {
            input -= res4 * delay[5];
            stage[0] = delay[0] + tune * ((input * MOOG_THERMAL).tanh() - tanh_stage[0]);
            delay[0] = stage[0];
            for k in 1..4 {
                input = stage[k - 1];
                tanh_stage[k - 1] = (input * MOOG_THERMAL).tanh();
                let subtrahend = if k != 3 {
                    tanh_stage[k]
                } else {
                    (delay[k] * MOOG_THERMAL).tanh()
                };
                stage[k] = delay[k] + tune * (tanh_stage[k - 1] - subtrahend);
                delay[k] = stage[k];
            }
            delay[5] = (stage[3] + delay[4]) * 0.5;
            delay[4] = stage[3];
        }
        delay[5]
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SvfOutputs {
    low: f32,
    high: f32,
    band: f32,
    peak: f32,
    notch: f32,
}

/// Double-sampled Chamberlin state-variable filter.
#[derive(Debug, Clone)]
struct StateVariable {
    cutoff: f32,
    resonance: f32,
    drive: f32,
    pre_drive: f32,
    freq: f32,
    damp: f32,
    low: f32,
    high: f32,
    band: f32,
    notch: f32,
}
impl Default for StateVariable {
    fn default() -> Self {
        Self {
            cutoff: 200.0,
            resonance: 0.5,
            drive: 0.5,
            pre_drive: 0.5,
            freq: 0.25,
            damp: 0.0,
            low: 0.0,
            high: 0.0,
            band: 0.0,
            notch: 0.0,
        }
    }
}
impl StateVariable {
    const MAX_CUTOFF: f32 = SAMPLE_RATE as f32 / 3.0;

    fn update_damp(&mut self) {
        self.damp = (2.0 * (1.0 - self.resonance.powf(0.25)))
            .min((2.0f32).min(2.0 / self.freq - self.freq * 0.5));
    }

    fn set_cutoff(&mut self, hz: f32) {
        self.cutoff = hz.clamp(1.0e-6, Self::MAX_CUTOFF);
        // Twice the sample rate, because we run two passes per sample.
        self.freq = 2.0 * (PI * (0.25f32).min(self.cutoff / (SAMPLE_RATE as f32 * 2.0))).sin();
        self.update_damp();
    }

    fn set_resonance(&mut self, resonance: f32) {
        self.resonance = resonance.clamp(0.0, 1.0);
        self.update_damp();
        self.drive = self.pre_drive * self.resonance;
    }

    fn set_drive(&mut self, drive: f32) {
        self.pre_drive = (drive * 0.1).clamp(0.0, 1.0);
        self.drive = self.pre_drive * self.resonance;
    }

    fn pass(&mut self, input: f32) {
        self.notch = input - self.damp * self.band;
        self.low += self.freq * self.band;
        self.high = self.notch - self.low;
        self.band =
            self.freq * self.high + self.band - self.drive * self.band * self.band * self.band;
    }

    fn process(&mut self, input: f32) -> SvfOutputs {
        let mut out = SvfOutputs::default();
        for _ in 0..2 {
            self.pass(input);
            out.low += 0.5 * self.low;
            out.high += 0.5 * self.high;
            out.band += 0.5 * self.band;
            out.peak += 0.5 * (self.low - self.high);
            out.notch += 0.5 * self.notch;
        }
        out
    }
}

/// A resonant filter with normalized cutoff and resonance knobs.
#[derive(Debug, Clone)]
pub struct Filter {
    kind: FilterKind,
    cutoff: f32,
    resonance: f32,
    force_update: bool,
    moog: MoogLadder,
    svf: StateVariable,
}
impl Default for Filter {
    fn default() -> Self {
        Self::new(FilterKind::Lowpass)
    }
}
impl Filter {
    #[allow(missing_docs)]
    pub fn new(kind: FilterKind) -> Self {
        let mut r = Self {
            kind: FilterKind::Off,
            cutoff: 1.0,
            resonance: 0.0,
            force_update: false,
            moog: MoogLadder::default(),
            svf: StateVariable::default(),
        };
        r.set_kind(kind);
        r
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> FilterKind {
        self.kind
    }
    #[allow(missing_docs)]
    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }
    #[allow(missing_docs)]
    pub fn resonance(&self) -> f32 {
        self.resonance
    }

    /// Switches response. Clears filter state and reapplies the knobs.
    pub fn set_kind(&mut self, kind: FilterKind) {
        if self.kind == kind {
            return;
        }
        self.kind = kind;
        match kind {
            FilterKind::Off => {}
            FilterKind::Moog => self.moog = MoogLadder::default(),
            _ => self.svf = StateVariable::default(),
        }
        self.force_update = true;
        self.set_cutoff(self.cutoff);
        self.set_resonance(self.resonance);
        self.force_update = false;
    }

    /// Clears filter state, keeping the current settings.
    pub fn reset(&mut self) {
        let kind = self.kind;
        self.set_kind(FilterKind::Off);
        self.set_kind(kind);
    }

    /// Cutoff knob in [0.0, 1.0], eased so the bottom of the range gets
    /// more travel.
    pub fn set_cutoff(&mut self, value: f32) {
        if equivalent(self.cutoff, value) && !self.force_update {
            return;
        }
        self.cutoff = value;
        match self.kind {
            FilterKind::Off => {}
            FilterKind::Moog => self.moog.frequency = ease_in_quad(value) * MOOG_MAX_FREQUENCY,
            _ => self
                .svf
                .set_cutoff(ease_in_quad(value) * StateVariable::MAX_CUTOFF),
        }
    }

    /// Resonance knob in [0.0, 1.0].
    pub fn set_resonance(&mut self, value: f32) {
        if equivalent(self.resonance, value) && !self.force_update {
            return;
        }
        self.resonance = value;
        match self.kind {
            FilterKind::Off => {}
            FilterKind::Moog => self.moog.resonance = value * MOOG_MAX_RESONANCE,
            _ => {
                self.svf.set_drive(10.0);
                self.svf.set_resonance(value.clamp(0.01, 0.99));
            }
        }
    }

    /// Filters one sample.
    pub fn next(&mut self, input: SampleType) -> SampleType {
        match self.kind {
            FilterKind::Off => input,
            FilterKind::Moog => self.moog.process(input),
            kind => {
                let out = self.svf.process(input);
                match kind {
                    FilterKind::Lowpass => out.low,
                    FilterKind::Bandpass => out.band,
                    FilterKind::Highpass => out.high,
                    FilterKind::Notch => out.notch,
                    FilterKind::Peak => out.peak,
                    FilterKind::Off | FilterKind::Moog => input,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{Oscillator, Waveform};
    use more_asserts::{assert_gt, assert_lt};
    use strum::IntoEnumIterator;

    fn rms(filter: &mut Filter, frequency: f32) -> f32 {
        let mut osc = Oscillator::new(frequency, Waveform::Sine);
        // Let transients settle.
        for _ in 0..4410 {
            filter.next(osc.next());
        }
        let n = 4410;
        let sum: f32 = (0..n)
            .map(|_| {
                let s = filter.next(osc.next());
                s * s
            })
            .sum();
        (sum / n as f32).sqrt()
    }

    #[test]
    fn off_passes_through() {
        let mut f = Filter::new(FilterKind::Off);
        assert_eq!(f.next(0.5), 0.5);
        assert_eq!(f.next(-0.25), -0.25);
    }

    #[test]
    fn lowpass_attenuates_highs() {
        let mut f = Filter::new(FilterKind::Lowpass);
        f.set_cutoff(0.1);
        let low = rms(&mut f, 100.0);
        f.reset();
        let high = rms(&mut f, 8000.0);
        assert_gt!(low, high * 4.0, "lowpass should favor 100Hz over 8KHz");
    }

    #[test]
    fn highpass_attenuates_lows() {
        let mut f = Filter::new(FilterKind::Highpass);
        f.set_cutoff(0.3);
        let low = rms(&mut f, 50.0);
        f.reset();
        let high = rms(&mut f, 10000.0);
        assert_lt!(low * 4.0, high, "highpass should favor 10KHz over 50Hz");
    }

    #[test]
    fn moog_lowpass_attenuates_highs() {
        let mut f = Filter::new(FilterKind::Moog);
        f.set_cutoff(0.2);
        let low = rms(&mut f, 100.0);
        f.reset();
        let high = rms(&mut f, 10000.0);
        assert_gt!(low, high * 4.0);
    }

    #[test]
    fn kind_change_keeps_knobs() {
        let mut f = Filter::new(FilterKind::Lowpass);
        f.set_cutoff(0.3);
        f.set_resonance(0.7);
        f.set_kind(FilterKind::Bandpass);
        assert_eq!(f.cutoff(), 0.3);
        assert_eq!(f.resonance(), 0.7);
        assert_eq!(FilterKind::from_parameter(6.0), FilterKind::Moog);
        assert_eq!(FilterKind::from_parameter(42.0), FilterKind::Off);
    }

    #[test]
    fn all_kinds_are_stable() {
        for kind in FilterKind::iter() {
            let mut f = Filter::new(kind);
            f.set_cutoff(1.0);
            f.set_resonance(1.0);
            let level = rms(&mut f, 440.0);
            assert!(level.is_finite(), "{kind} blew up");
            assert_lt!(level, 10.0, "{kind} is too loud");
        }
    }
}
