// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Six-operator FM voices. Envelopes run in the synth's native log domain,
//! where one unit is 0.75 dB and 121 is full scale.

use super::patch::{OperatorPatch, Patch};
use crate::{
    rng::Rng,
    types::{note_frequency, SAMPLE_RATE},
};
use std::f32::consts::TAU;

pub(super) const OPERATORS: usize = 6;

/// Which operators modulate which, which ones are heard, and where the
/// feedback loop runs. Operators are numbered from zero here; modulators
/// always have higher numbers than what they modulate, so computing from
/// the last operator down is enough.
#[derive(Clone, Copy, Debug)]
pub(super) struct Algorithm {
    modulators: [u8; OPERATORS],
    carriers: u8,
    feedback_from: usize,
    feedback_to: usize,
}
impl Algorithm {
    // Arguments use the operator numbers printed on the front panel.
    const fn new(carriers: &[usize], links: &[(usize, usize)], feedback: (usize, usize)) -> Self {
        let mut r = Self {
            modulators: [0; OPERATORS],
            carriers: 0,
            feedback_from: feedback.0 - 1,
            feedback_to: feedback.1 - 1,
        };
        let mut i = 0;
        while i < carriers.len() {
            r.carriers |= 1 << (carriers[i] - 1);
            i += 1;
        }
        let mut i = 0;
        while i < links.len() {
            let (target, source) = links[i];
            r.modulators[target - 1] |= 1 << (source - 1);
            i += 1;
        }
        r
    }

    pub(super) fn is_carrier(&self, op: usize) -> bool {
        self.carriers & (1 << op) != 0
    }
}

#[rustfmt::skip]
pub(super) const ALGORITHMS: [Algorithm; 32] = [
    Algorithm::new(&[1, 3], &[(1, 2), (3, 4), (4, 5), (5, 6)], (6, 6)),
    Algorithm::new(&[1, 3], &[(1, 2), (3, 4), (4, 5), (5, 6)], (2, 2)),
    Algorithm::new(&[1, 4], &[(1, 2), (2, 3), (4, 5), (5, 6)], (6, 6)),
    Algorithm::new(&[1, 4], &[(1, 2), (2, 3), (4, 5), (5, 6)], (4, 6)),
    Algorithm::new(&[1, 3, 5], &[(1, 2), (3, 4), (5, 6)], (6, 6)),
    Algorithm::new(&[1, 3, 5], &[(1, 2), (3, 4), (5, 6)], (5, 6)),
    Algorithm::new(&[1, 3], &[(1, 2), (3, 4), (3, 5), (5, 6)], (6, 6)),
    Algorithm::new(&[1, 3], &[(1, 2), (3, 4), (3, 5), (5, 6)], (4, 4)),
    Algorithm::new(&[1, 3], &[(1, 2), (3, 4), (3, 5), (5, 6)], (2, 2)),
    Algorithm::new(&[1, 4], &[(1, 2), (2, 3), (4, 5), (4, 6)], (3, 3)),
    Algorithm::new(&[1, 4], &[(1, 2), (2, 3), (4, 5), (4, 6)], (6, 6)),
    Algorithm::new(&[1, 3], &[(1, 2), (3, 4), (3, 5), (3, 6)], (2, 2)),
    Algorithm::new(&[1, 3], &[(1, 2), (3, 4), (3, 5), (3, 6)], (6, 6)),
    Algorithm::new(&[1, 3], &[(1, 2), (3, 4), (4, 5), (4, 6)], (6, 6)),
    Algorithm::new(&[1, 3], &[(1, 2), (3, 4), (4, 5), (4, 6)], (2, 2)),
    Algorithm::new(&[1], &[(1, 2), (1, 3), (3, 4), (1, 5), (5, 6)], (6, 6)),
    Algorithm::new(&[1], &[(1, 2), (1, 3), (3, 4), (1, 5), (5, 6)], (2, 2)),
    Algorithm::new(&[1], &[(1, 2), (1, 3), (1, 4), (4, 5), (5, 6)], (3, 3)),
    Algorithm::new(&[1, 4, 5], &[(1, 2), (2, 3), (4, 6), (5, 6)], (6, 6)),
    Algorithm::new(&[1, 2, 4], &[(1, 3), (2, 3), (4, 5), (4, 6)], (3, 3)),
    Algorithm::new(&[1, 2, 4, 5], &[(1, 3), (2, 3), (4, 6), (5, 6)], (3, 3)),
    Algorithm::new(&[1, 3, 4, 5], &[(1, 2), (3, 6), (4, 6), (5, 6)], (6, 6)),
    Algorithm::new(&[1, 2, 4, 5], &[(2, 3), (4, 6), (5, 6)], (6, 6)),
    Algorithm::new(&[1, 2, 3, 4, 5], &[(3, 6), (4, 6), (5, 6)], (6, 6)),
    Algorithm::new(&[1, 2, 3, 4, 5], &[(4, 6), (5, 6)], (6, 6)),
    Algorithm::new(&[1, 2, 4], &[(2, 3), (4, 5), (4, 6)], (6, 6)),
    Algorithm::new(&[1, 2, 4], &[(2, 3), (4, 5), (4, 6)], (3, 3)),
    Algorithm::new(&[1, 3, 6], &[(1, 2), (3, 4), (4, 5)], (5, 5)),
    Algorithm::new(&[1, 2, 3, 5], &[(3, 4), (5, 6)], (6, 6)),
    Algorithm::new(&[1, 2, 3, 6], &[(3, 4), (4, 5)], (5, 5)),
    Algorithm::new(&[1, 2, 3, 4, 5], &[(5, 6)], (6, 6)),
    Algorithm::new(&[1, 2, 3, 4, 5, 6], &[], (6, 6)),
];

const EG_SCALE: [u8; 20] = [
    0, 5, 9, 13, 17, 20, 23, 25, 27, 29, 31, 33, 35, 37, 39, 41, 42, 43, 45, 46,
];

const VELOCITY_DATA: [u8; 64] = [
    0, 70, 86, 97, 106, 114, 121, 126, 132, 138, 142, 148, 152, 156, 160, 163, 166, 170, 173, 174,
    178, 181, 184, 186, 189, 190, 194, 196, 198, 200, 202, 205, 206, 209, 211, 214, 216, 218, 220,
    222, 224, 225, 227, 229, 230, 232, 233, 235, 237, 238, 240, 241, 242, 243, 244, 246, 246, 248,
    249, 250, 251, 252, 253, 254,
];

const EXP_SCALE: [u8; 33] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 11, 14, 16, 19, 23, 27, 33, 39, 47, 56, 66, 80, 94, 110, 126, 142,
    158, 174, 190, 206, 222, 238, 250,
];

// In 1/32 octave.
const PITCH_ENV_LEVELS: [i8; 100] = [
    -128, -116, -104, -95, -85, -76, -68, -61, -56, -52, -49, -46, -43, -41, -39, -37, -35, -33,
    -32, -31, -30, -29, -28, -27, -26, -25, -24, -23, -22, -21, -20, -19, -18, -17, -16, -15, -14,
    -13, -12, -11, -10, -9, -8, -7, -6, -5, -4, -3, -2, -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11,
    12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35,
    38, 40, 43, 46, 49, 53, 58, 65, 73, 82, 92, 103, 115, 127,
];

const PITCH_MOD_SENSITIVITY: [f32; 8] = [
    0.0,
    10.0 / 255.0,
    20.0 / 255.0,
    33.0 / 255.0,
    55.0 / 255.0,
    92.0 / 255.0,
    153.0 / 255.0,
    1.0,
];
const AMP_MOD_SENSITIVITY: [f32; 4] = [0.0, 66.0 / 255.0, 109.0 / 255.0, 1.0];

const FULL_SCALE: f32 = 121.0;
const MIN_TARGET: f32 = 0.5;
const ATTACK_JUMP: f32 = 53.6;
// Deepest amplitude modulation, in envelope units.
const AMP_MOD_RANGE: f32 = 64.0;
// Modulator output 1.0 shifts the carrier's phase by 4π.
const MODULATION_INDEX: f32 = 2.0;
const CARRIER_GAIN: f32 = 0.125;

fn eg_scale(level: u8) -> f32 {
    match level {
        0..=19 => EG_SCALE[level as usize] as f32,
        _ => 28.0 + level as f32,
    }
}

fn level_to_amplitude(level: f32) -> f32 {
    2.0f32.powf((level - FULL_SCALE) / 8.0)
}

/// Output level adjustment for `velocity` (0..127), in envelope units.
pub(super) fn velocity_scaling(velocity: u8, sensitivity: u8) -> f32 {
    let v = VELOCITY_DATA[(velocity.min(127) >> 1) as usize] as i32 - 239;
    (((sensitivity as i32 * v + 7) >> 3) as f32) / 2.0
}

fn scale_curve(group: i32, depth: u8, curve: u8) -> i32 {
    let depth = depth as i32;
    let scale = if curve == 0 || curve == 3 {
        (group * depth * 329) >> 12
    } else {
        let raw = EXP_SCALE[(group as usize).min(EXP_SCALE.len() - 1)] as i32;
        (raw * depth * 329) >> 15
    };
    if curve < 2 {
        -scale
    } else {
        scale
    }
}

/// Keyboard level scaling for `note`, in the same units as output level.
pub(super) fn keyboard_scaling(note: u8, op: &OperatorPatch) -> i32 {
    let offset = note as i32 - op.break_point as i32 - 17;
    if offset >= 0 {
        scale_curve((offset + 1) / 3, op.right_depth, op.right_curve)
    } else {
        scale_curve(-(offset - 1) / 3, op.left_depth, op.left_curve)
    }
}

fn rate_scaling(note: u8, sensitivity: u8) -> i32 {
    let x = (note as i32 / 3 - 7).clamp(0, 31);
    (sensitivity as i32 * x) >> 3
}

/// The four-stage operator envelope. Stage 2 holds until key up; stage 4
/// means finished.
#[derive(Clone, Debug, Default)]
pub(super) struct OperatorEnvelope {
    rates: [u8; 4],
    levels: [u8; 4],
    output_level: f32,
    rate_scaling: i32,

    level: f32,
    target: f32,
    increment: f32,
    rising: bool,
    stage: usize,
    down: bool,
}
impl OperatorEnvelope {
    fn start(&mut self, op: &OperatorPatch, output_level: f32, rate_scaling: i32) {
        self.rates = op.rates;
        self.levels = op.levels;
        self.output_level = output_level;
        self.rate_scaling = rate_scaling;
        self.down = true;
        self.advance(0);
    }

    fn advance(&mut self, stage: usize) {
        self.stage = stage;
        if stage >= 4 {
            return;
        }
        self.target = (eg_scale(self.levels[stage]) + self.output_level - 133.0).max(MIN_TARGET);
        self.rising = self.target > self.level;
        let q = (((self.rates[stage] as i32 * 41) >> 6) + self.rate_scaling).min(63);
        self.increment = (4 + (q & 3)) as f32 * 2.0f32.powi((q >> 2) - 19);
    }

    fn key_up(&mut self) {
        if self.down {
            self.down = false;
            self.advance(3);
        }
    }

    fn next(&mut self) -> f32 {
        if self.stage < 3 || (self.stage < 4 && !self.down) {
            if self.rising {
                if self.level < ATTACK_JUMP {
                    self.level = ATTACK_JUMP;
                }
                self.level += (17.0 - self.level / 8.0) * self.increment;
                if self.level >= self.target {
                    self.level = self.target;
                    self.advance(self.stage + 1);
                }
            } else {
                self.level -= self.increment;
                if self.level <= self.target {
                    self.level = self.target;
                    self.advance(self.stage + 1);
                }
            }
        }
        self.level
    }

    pub(super) fn finished(&self) -> bool {
        self.stage >= 4
    }
}

fn pitch_rate(rate: u8) -> f32 {
    // Units per second; a rate of 99 sweeps the full range in well under a
    // second.
    1.5 * (rate as f32 * 0.056).exp()
}

#[derive(Clone, Debug, Default)]
struct PitchEnvelope {
    rates: [u8; 4],
    levels: [u8; 4],
    level: f32,
    target: f32,
    increment: f32,
    stage: usize,
    down: bool,
}
impl PitchEnvelope {
    fn start(&mut self, patch: &Patch) {
        self.rates = patch.pitch_rates;
        self.levels = patch.pitch_levels;
        self.level = PITCH_ENV_LEVELS[self.levels[3].min(99) as usize] as f32;
        self.down = true;
        self.advance(0);
    }

    fn advance(&mut self, stage: usize) {
        self.stage = stage;
        if stage >= 4 {
            return;
        }
        self.target = PITCH_ENV_LEVELS[self.levels[stage].min(99) as usize] as f32;
        self.increment = pitch_rate(self.rates[stage]) / SAMPLE_RATE as f32;
    }

    fn key_up(&mut self) {
        if self.down {
            self.down = false;
            self.advance(3);
        }
    }

    /// Octaves.
    fn next(&mut self) -> f32 {
        if self.stage < 3 || (self.stage < 4 && !self.down) {
            if self.target > self.level {
                self.level = (self.level + self.increment).min(self.target);
            } else {
                self.level = (self.level - self.increment).max(self.target);
            }
            if self.level == self.target {
                self.advance(self.stage + 1);
            }
        }
        self.level / 32.0
    }
}

/// The patch's low-frequency oscillator, shared by every voice.
#[derive(Debug, Default)]
pub(super) struct Lfo {
    phase: f32,
    increment: f32,
    waveform: u8,
    sync: bool,
    delay_samples: f32,
    elapsed: f32,
    held: f32,
    pitch_depth: f32,
    amp_depth: f32,
    pitch_sensitivity: f32,
    rng: Rng,
}
impl Lfo {
    pub(super) fn configure(&mut self, patch: &Patch) {
        let frequency = 0.0628 * (patch.lfo_speed as f32 * 0.0673).exp();
        self.increment = frequency / SAMPLE_RATE as f32;
        self.waveform = patch.lfo_waveform;
        self.sync = patch.lfo_sync;
        let delay = patch.lfo_delay as f32 / 99.0;
        self.delay_samples = delay * delay * 3.0 * SAMPLE_RATE as f32;
        self.pitch_depth = patch.lfo_pitch_depth as f32 / 99.0;
        self.amp_depth = patch.lfo_amp_depth as f32 / 99.0;
        self.pitch_sensitivity = PITCH_MOD_SENSITIVITY[patch.pitch_mod_sensitivity as usize & 7];
    }

    pub(super) fn key_down(&mut self) {
        if self.sync {
            self.phase = 0.0;
        }
        self.elapsed = 0.0;
    }

    /// The waveform (-1..1) and how far the delay has let it in (0..1).
    fn next(&mut self) -> (f32, f32) {
        let p = self.phase;
        let value = match self.waveform {
            0 => {
                if p < 0.5 {
                    4.0 * p - 1.0
                } else {
                    3.0 - 4.0 * p
                }
            }
            1 => 1.0 - 2.0 * p,
            2 => 2.0 * p - 1.0,
            3 => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            4 => (TAU * p).sin(),
            _ => self.held,
        };
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
            self.held = self.rng.bipolar();
        }

        // Hold off for the delay time, then fade in over the same span.
        let gain = if self.delay_samples <= 0.0 {
            1.0
        } else {
            self.elapsed += 1.0;
            ((self.elapsed - self.delay_samples) / self.delay_samples).clamp(0.0, 1.0)
        };
        (value, gain)
    }

    /// Produces this sample's modulation. `controllers` adds depth from the
    /// mod wheel and aftertouch.
    pub(super) fn modulation(&mut self, controllers: &ControllerDepths) -> Modulation {
        let (value, gain) = self.next();
        let unipolar = (value + 1.0) / 2.0;
        let pitch_depth = (self.pitch_depth * gain).max(controllers.pitch);
        let amp = (self.amp_depth * gain * unipolar)
            .max(controllers.amp * unipolar)
            .max(controllers.eg_bias);
        Modulation {
            pitch_octaves: pitch_depth * self.pitch_sensitivity * value,
            amp,
        }
    }
}

/// How far the controllers push pitch depth, amplitude depth, and EG bias,
/// each 0..1.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(super) struct ControllerDepths {
    pub pitch: f32,
    pub amp: f32,
    pub eg_bias: f32,
}

/// What every voice applies this sample.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(super) struct Modulation {
    /// Added to every ratio operator's pitch.
    pub pitch_octaves: f32,
    /// 0..1, scaled by each operator's sensitivity.
    pub amp: f32,
}

#[derive(Clone, Debug, Default)]
struct Operator {
    envelope: OperatorEnvelope,
    phase: f32,
    frequency: f32,
    fixed: bool,
    amp_mod_sensitivity: f32,
}

/// One note's worth of operators.
#[derive(Clone, Debug, Default)]
pub(super) struct Voice {
    pub note: u8,
    pub keydown: bool,
    pub sustained: bool,
    pub live: bool,

    operators: [Operator; OPERATORS],
    pitch_envelope: PitchEnvelope,
    algorithm: usize,
    feedback_scale: f32,
    feedback: [f32; 2],
}
impl Voice {
    /// Starts `note` at MIDI `velocity` with `patch`.
    pub(super) fn start(&mut self, patch: &Patch, note: u8, velocity: u8) {
        self.note = note;
        self.keydown = true;
        self.sustained = false;
        self.live = true;
        self.algorithm = patch.algorithm as usize % ALGORITHMS.len();
        self.feedback_scale = if patch.feedback == 0 {
            0.0
        } else {
            // π radians at the top setting, expressed in cycles.
            0.5 * 2.0f32.powi(patch.feedback as i32 - 7)
        };
        self.feedback = [0.0; 2];

        let played = (note as i32 + patch.transpose as i32 - 24).clamp(0, 127) as u8;
        for (operator, op) in self.operators.iter_mut().zip(patch.operators.iter()) {
            let output_level = (eg_scale(op.output_level)
                + keyboard_scaling(played, op) as f32)
                .clamp(0.0, 127.0)
                + velocity_scaling(velocity, op.velocity_sensitivity);
            operator.envelope.start(
                op,
                output_level.clamp(0.0, 127.0),
                rate_scaling(played, op.rate_scaling),
            );
            operator.fixed = op.fixed;
            operator.frequency = if op.fixed {
                10.0f32.powf((op.coarse & 3) as f32 + op.fine as f32 / 100.0)
            } else {
                let coarse = if op.coarse == 0 { 0.5 } else { op.coarse as f32 };
                let cents = op.detune as f32 - 7.0;
                note_frequency(played)
                    * coarse
                    * (1.0 + op.fine as f32 / 100.0)
                    * 2.0f32.powf(cents / 1200.0)
            };
            operator.amp_mod_sensitivity =
                AMP_MOD_SENSITIVITY[op.amp_mod_sensitivity as usize & 3];
            if patch.oscillator_sync {
                operator.phase = 0.0;
            }
        }
        self.pitch_envelope.start(patch);
    }

    pub(super) fn key_up(&mut self) {
        self.keydown = false;
        self.sustained = false;
        for operator in self.operators.iter_mut() {
            operator.envelope.key_up();
        }
        self.pitch_envelope.key_up();
    }

    /// Whether every carrier's envelope has run out.
    pub(super) fn finished(&self) -> bool {
        let algorithm = &ALGORITHMS[self.algorithm];
        self.operators
            .iter()
            .enumerate()
            .filter(|(i, _)| algorithm.is_carrier(*i))
            .all(|(_, op)| op.envelope.finished())
    }

    /// The next sample, before volume. `pitch_octaves` includes pitch bend.
    pub(super) fn next(&mut self, modulation: &Modulation, pitch_octaves: f32) -> f32 {
        let algorithm = ALGORITHMS[self.algorithm];
        let pitch = 2.0f32.powf(self.pitch_envelope.next() + pitch_octaves + modulation.pitch_octaves);
        let mut outputs = [0.0f32; OPERATORS];
        let mut mix = 0.0;

        for i in (0..OPERATORS).rev() {
            let operator = &mut self.operators[i];
            let mut level = operator.envelope.next();
            if operator.amp_mod_sensitivity > 0.0 {
                level -= modulation.amp * operator.amp_mod_sensitivity * AMP_MOD_RANGE;
            }
            let amplitude = level_to_amplitude(level);

            let mut phase_offset = 0.0;
            for (m, output) in outputs.iter().enumerate() {
                if algorithm.modulators[i] & (1 << m) != 0 {
                    phase_offset += output * MODULATION_INDEX;
                }
            }
            if i == algorithm.feedback_to {
                phase_offset += (self.feedback[0] + self.feedback[1]) / 2.0 * self.feedback_scale;
            }
            let out = (TAU * (operator.phase + phase_offset)).sin() * amplitude;
            outputs[i] = out;
            if i == algorithm.feedback_from {
                self.feedback = [self.feedback[1], out];
            }

            let frequency = if operator.fixed {
                operator.frequency
            } else {
                operator.frequency * pitch
            };
            operator.phase = (operator.phase + frequency / SAMPLE_RATE as f32).fract();

            if algorithm.is_carrier(i) {
                mix += out;
            }
        }
        mix * CARRIER_GAIN
    }
}
