// Copyright (c) 2023 Mike Tsao. All rights reserved.

use super::{Instrument, InstrumentCore};
use crate::{
    elements::{Envelope, Value},
    generators::{Oscillator, Waveform},
    midi::MidiMessage,
    types::{
        equivalent, from_semitone, linear_to_exponential, linear_to_linear, EnvParameter,
        FilterParameter, InstrumentId, OscParameter, Parameter, ParametersValues, SampleType,
        SAMPLE_RATE, TOTAL_NOTES,
    },
};
use std::f32::consts::TAU;

const PITCH_BEND_SEMITONES: f32 = 2.0;
const SLIDE_MS: u64 = 60;
const ACCENT_DECAY_MS: f32 = 200.0;
// MIDI velocity 100 and up is an accent.
const ACCENT_THRESHOLD: f32 = 100.0 / 127.0;
const MAX_ENV_MOD_OCTAVES: f32 = 4.0;
const MAX_ACCENT_SWEEP_OCTAVES: f32 = 2.0;
const MAX_CUTOFF: f32 = SAMPLE_RATE as f32 * 0.45;
// Just shy of self-oscillation.
const MAX_FEEDBACK: f32 = 3.6;
// About 1.2 seconds, like the original's amplitude decay.
const AMP_DECAY: f32 = 0.6;

/// A four-pole lowpass: four one-pole stages in series with saturated
/// feedback around them.
#[derive(Debug, Default)]
struct Ladder {
    stages: [f32; 4],
}
impl Ladder {
    fn reset(&mut self) {
        self.stages = [0.0; 4];
    }

    fn process(&mut self, input: f32, cutoff: f32, feedback: f32) -> f32 {
        let g = 1.0 - (-TAU * cutoff.min(MAX_CUTOFF) / SAMPLE_RATE as f32).exp();
        let x = (input - feedback * self.stages[3]).tanh();
        self.stages[0] += g * (x - self.stages[0]);
        self.stages[1] += g * (self.stages[0] - self.stages[1]);
        self.stages[2] += g * (self.stages[1] - self.stages[2]);
        self.stages[3] += g * (self.stages[2] - self.stages[3]);
        self.stages[3] * (1.0 + 0.5 * feedback)
    }
}

/// A monophonic acid bass line voice. Notes that overlap slide into each
/// other without retriggering the envelopes; notes pressed hard enough are
/// accented, which makes them louder and sweeps the filter further.
#[derive(Debug)]
pub struct Tb303 {
    core: InstrumentCore,
    log_changes: bool,

    held_notes: Vec<u8>,
    sounding: bool,
    accented: bool,
    pitch: Value,
    pitch_bend: f32,

    saw: Oscillator,
    square: Oscillator,
    waveform: f32,
    tuning: f32,

    ladder: Ladder,
    cutoff: f32,
    resonance: f32,
    env_mod: f32,
    mod_wheel: f32,
    decay_ms: f32,
    filter_env: f32,
    filter_env_coefficient: f32,

    amp_env: Envelope,
    accent: f32,
    volume: f32,
}
impl Default for Tb303 {
    fn default() -> Self {
        let mut amp_env = Envelope::default();
        amp_env.set_attack(0.0);
        amp_env.set_decay(AMP_DECAY);
        amp_env.set_sustain(0.0);
        amp_env.set_release(0.0);
        let mut r = Self {
            core: Default::default(),
            log_changes: false,
            held_notes: Vec::with_capacity(16),
            sounding: false,
            accented: false,
            pitch: Value::new(69.0),
            pitch_bend: 0.0,
            saw: Oscillator::new(440.0, Waveform::PolyblepSaw),
            square: Oscillator::new(440.0, Waveform::PolyblepSquare),
            waveform: 0.0,
            tuning: 440.0,
            ladder: Ladder::default(),
            cutoff: 1000.0,
            resonance: 0.0,
            env_mod: 0.0,
            mod_wheel: 0.0,
            decay_ms: 1000.0,
            filter_env: 0.0,
            filter_env_coefficient: 0.0,
            amp_env,
            accent: 0.0,
            volume: 1.0,
        };
        r.panic();
        r.set_values(&Self::defaults());
        r.log_changes = true;
        r
    }
}
impl Tb303 {
    /// Every knob at noon, sawtooth.
    pub fn defaults() -> ParametersValues {
        ParametersValues::from([
            (Parameter::TUNING, 0.5),
            (Parameter::filter(0, FilterParameter::Cutoff), 0.5),
            (Parameter::filter(0, FilterParameter::Resonance), 0.5),
            (Parameter::env(0, EnvParameter::Mod), 0.5),
            (Parameter::env(0, EnvParameter::Decay), 0.5),
            (Parameter::ACCENT, 0.5),
            (Parameter::osc(0, OscParameter::Kind), 0.0),
            (Parameter::VOLUME, 0.5),
        ])
    }

    fn update_env_mod(&mut self) {
        let knob = self
            .core
            .value(Parameter::env(0, EnvParameter::Mod))
            .unwrap_or_default();
        self.env_mod = (knob + self.mod_wheel).clamp(0.0, 1.0) * 100.0;
    }

    fn trigger(&mut self, accented: bool) {
        self.accented = accented;
        self.sounding = true;
        self.filter_env = 1.0;
        let decay_ms = if accented {
            ACCENT_DECAY_MS
        } else {
            self.decay_ms
        };
        self.filter_env_coefficient = (-1000.0 / (decay_ms * SAMPLE_RATE as f32)).exp();
        self.amp_env.trigger(1.0);
    }
}
impl Instrument for Tb303 {
    fn id(&self) -> InstrumentId {
        InstrumentId::Tb303
    }

    fn core(&self) -> &InstrumentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InstrumentCore {
        &mut self.core
    }

    fn default_parameters(&self) -> ParametersValues {
        Self::defaults()
    }

    fn set_values(&mut self, values: &ParametersValues) {
        let mut update_modulation = false;
        for (parameter, value) in values {
            let previous = self.core.value(*parameter);
            if previous.is_some_and(|p| equivalent(p, *value)) {
                continue;
            }
            if self.log_changes {
                log::debug!(
                    target: "TB303",
                    "updating {parameter} {:.3} -> {value:.3}",
                    previous.unwrap_or_default()
                );
            }
            match *parameter {
                Parameter::TUNING => {
                    self.tuning = linear_to_linear(*value, 0.0, 1.0, 400.0, 480.0)
                }
                Parameter::ACCENT => self.accent = linear_to_linear(*value, 0.0, 1.0, 0.0, 100.0),
                Parameter::VOLUME => {
                    let db = linear_to_linear(*value, 0.0, 1.0, -60.0, 0.0);
                    self.volume = 10.0f32.powf(db / 20.0);
                }
                p if p == Parameter::filter(0, FilterParameter::Cutoff) => {
                    self.cutoff = linear_to_exponential(*value, 0.0, 1.0, 314.0, 2394.0)
                }
                p if p == Parameter::filter(0, FilterParameter::Resonance) => {
                    self.resonance = linear_to_linear(*value, 0.0, 1.0, 0.0, 100.0)
                }
                p if p == Parameter::env(0, EnvParameter::Mod) => update_modulation = true,
                p if p == Parameter::env(0, EnvParameter::Decay) => {
                    self.decay_ms = linear_to_exponential(*value, 0.0, 1.0, 200.0, 2000.0)
                }
                p if p == Parameter::osc(0, OscParameter::Kind) => {
                    self.waveform = value.clamp(0.0, 1.0)
                }
                _ => log::debug!(target: "TB303", "ignoring {parameter}"),
            }
        }
        self.core.merge_values(values);
        if update_modulation {
            self.update_env_mod();
        }
    }

    fn set_note(&mut self, note: u8, velocity: f32) {
        if note as usize >= TOTAL_NOTES {
            log::warn!(target: "TB303", "ignoring out-of-range note {note}");
            return;
        }
        if velocity > 0.0 {
            let slide = !self.held_notes.is_empty();
            self.held_notes.retain(|n| *n != note);
            self.held_notes.push(note);
            if slide {
                self.pitch.change_with_time(note as f32, SLIDE_MS);
            } else {
                self.pitch.set(note as f32);
                self.trigger(velocity >= ACCENT_THRESHOLD);
            }
        } else {
            let was_last = self.held_notes.last() == Some(&note);
            self.held_notes.retain(|n| *n != note);
            match self.held_notes.last() {
                None => self.amp_env.release(),
                Some(previous) if was_last => {
                    self.pitch.change_with_time(*previous as f32, SLIDE_MS)
                }
                Some(_) => {}
            }
        }
    }

    fn on_midi(&mut self, message: &MidiMessage) {
        if message.parameter == Parameter::PITCH_BEND {
            self.pitch_bend = message.parameter_value * PITCH_BEND_SEMITONES;
        } else if message.parameter == Parameter::MODULATION_WHEEL {
            self.mod_wheel = message.parameter_value;
            self.update_env_mod();
        } else {
            self.handle_midi(message);
        }
    }

    fn next_sample(&mut self) -> SampleType {
        if !self.sounding {
            return 0.0;
        }
        let frequency = self.tuning * from_semitone(self.pitch.next() - 69.0 + self.pitch_bend);
        self.saw.set_frequency(frequency);
        self.square.set_frequency(frequency);
        let oscillator =
            (1.0 - self.waveform) * self.saw.next() + self.waveform * self.square.next();

        self.filter_env *= self.filter_env_coefficient;
        let mut sweep = self.env_mod / 100.0 * MAX_ENV_MOD_OCTAVES;
        if self.accented {
            sweep += self.accent / 100.0 * MAX_ACCENT_SWEEP_OCTAVES;
        }
        let cutoff = self.cutoff * 2.0f32.powf(sweep * self.filter_env);
        let filtered = self.ladder.process(
            oscillator,
            cutoff,
            self.resonance / 100.0 * MAX_FEEDBACK,
        );

        let amplitude = self.amp_env.next();
        if self.amp_env.completed() {
            self.sounding = false;
            self.ladder.reset();
            return 0.0;
        }
        let accent_gain = if self.accented {
            1.0 + self.accent / 100.0
        } else {
            1.0
        };
        filtered * amplitude * accent_gain * self.volume
    }

    fn panic(&mut self) {
        self.held_notes.clear();
        self.amp_env.kill();
        self.sounding = false;
        self.mod_wheel = 0.0;
        self.ladder.reset();
        self.core.reset_midi_notes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ACCENT_PRESS_VELOCITY, DEFAULT_PRESS_VELOCITY};
    use float_cmp::approx_eq;
    use more_asserts::{assert_gt, assert_lt};

    fn peak(tb: &mut Tb303, samples: usize) -> f32 {
        (0..samples).fold(0.0f32, |m, _| m.max(tb.next_sample().abs()))
    }

    #[test]
    fn defaults_map_onto_the_knobs() {
        let tb = Tb303::default();
        assert_eq!(tb.values(), Tb303::defaults());
        assert!(approx_eq!(f32, tb.tuning, 440.0));
        assert!(approx_eq!(f32, tb.resonance, 50.0));
        assert!(approx_eq!(f32, tb.env_mod, 50.0));
        assert!(approx_eq!(f32, tb.volume, 10.0f32.powf(-30.0 / 20.0), epsilon = 1e-6));
        assert_gt!(tb.cutoff, 314.0);
        assert_lt!(tb.cutoff, 2394.0);
    }

    #[test]
    fn silent_until_played() {
        let mut tb = Tb303::default();
        assert_eq!(peak(&mut tb, 1000), 0.0);
        tb.set_note(45, DEFAULT_PRESS_VELOCITY);
        assert_gt!(peak(&mut tb, SAMPLE_RATE / 10), 0.001);
        tb.set_note(45, 0.0);
        peak(&mut tb, SAMPLE_RATE);
        assert!(!tb.sounding);
        assert_eq!(tb.next_sample(), 0.0);
    }

    #[test]
    fn overlapping_notes_slide() {
        let mut tb = Tb303::default();
        tb.set_note(45, DEFAULT_PRESS_VELOCITY);
        assert!(!tb.accented);
        peak(&mut tb, 100);
        tb.set_note(57, ACCENT_PRESS_VELOCITY);
        assert!(!tb.accented, "a slide doesn't retrigger");
        peak(&mut tb, 10);
        let midway = tb.pitch.v();
        assert_gt!(midway, 45.0);
        assert_lt!(midway, 57.0);
        peak(&mut tb, SAMPLE_RATE / 10);
        assert_eq!(tb.pitch.v(), 57.0);

        tb.set_note(57, 0.0);
        assert!(tb.pitch.changing(), "releasing the top note slides back");
        tb.set_note(45, 0.0);
        assert!(tb.held_notes.is_empty());
    }

    #[test]
    fn accents_and_controllers() {
        let mut tb = Tb303::default();
        tb.set_note(40, ACCENT_PRESS_VELOCITY);
        assert!(tb.accented);

        let mut wheel = MidiMessage::new_controller(1, 127);
        wheel.parameter = Parameter::MODULATION_WHEEL;
        wheel.parameter_value = 1.0;
        tb.on_midi(&wheel);
        assert_eq!(tb.env_mod, 100.0, "mod wheel adds to env mod");

        let mut bend = MidiMessage::new("", 0, &[0xe0, 0x7f, 0x7f]);
        bend.parameter = Parameter::PITCH_BEND;
        bend.parameter_value = -0.5;
        tb.on_midi(&bend);
        assert_eq!(tb.pitch_bend, -1.0);

        tb.panic();
        assert_eq!(tb.mod_wheel, 0.0);
        assert_eq!(tb.next_sample(), 0.0);
    }
}
