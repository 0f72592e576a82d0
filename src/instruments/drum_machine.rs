// Copyright (c) 2023 Mike Tsao. All rights reserved.

use super::{Instrument, InstrumentCore};
use crate::{
    elements::{Filter, FilterKind},
    generators::{Oscillator, Waveform},
    midi::MidiMessage,
    rng::Rng,
    types::{equivalent, from_semitone, InstrumentId, Parameter, ParametersValues, SampleType, SAMPLE_RATE},
};

const SAMPLE_PACKET: usize = 64;
const PITCH_BEND_SEMITONES: f32 = 2.0;
// Envelopes count as done at -60dB.
const SILENCE: f32 = 0.001;
const CLAP_SPACING_MS: f32 = 11.0;
const MAX_VOICES: usize = 32;

// The 808's six detuned square waves behind its hats, cymbal, and cowbell.
const METAL_FREQUENCIES: [f32; 6] = [205.3, 304.4, 369.6, 522.7, 540.0, 800.0];

/// One key of a drum machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrumKey {
    #[allow(missing_docs)]
    pub note: u8,
    #[allow(missing_docs)]
    pub name: &'static str,
    /// The two-letter label printed on the original's panel.
    pub alias: &'static str,
}

const TR808: [DrumKey; 17] = [
    DrumKey { note: 48, name: "BaseDrum", alias: "DB" },
    DrumKey { note: 49, name: "BaseDrum", alias: "BD" },
    DrumKey { note: 50, name: "RimShot", alias: "RS" },
    DrumKey { note: 51, name: "SnareDrum", alias: "SD" },
    DrumKey { note: 53, name: "SnareDrum", alias: "SD" },
    DrumKey { note: 52, name: "handClaP", alias: "CP" },
    DrumKey { note: 54, name: "ClsdHihat", alias: "CH" },
    DrumKey { note: 56, name: "OpenHihat", alias: "OH" },
    DrumKey { note: 55, name: "LowTom", alias: "LT" },
    DrumKey { note: 58, name: "HiTom", alias: "HT" },
    DrumKey { note: 57, name: "CYmball", alias: "CY" },
    DrumKey { note: 59, name: "CowBell", alias: "CB" },
    DrumKey { note: 60, name: "MidConga", alias: "MC" },
    DrumKey { note: 61, name: "HiConga", alias: "HC" },
    DrumKey { note: 62, name: "LowConga", alias: "LC" },
    DrumKey { note: 63, name: "MAracas", alias: "MA" },
    DrumKey { note: 64, name: "CLaves", alias: "CL" },
];

const TR909: [DrumKey; 18] = [
    DrumKey { note: 72, name: "BaseDrum", alias: "BD" },
    DrumKey { note: 74, name: "BaseDrum", alias: "BD" },
    DrumKey { note: 73, name: "RimShot", alias: "RS" },
    DrumKey { note: 76, name: "SnareDrum", alias: "SD" },
    DrumKey { note: 77, name: "SnareDrum", alias: "SD" },
    DrumKey { note: 75, name: "HandClap", alias: "HC" },
    DrumKey { note: 78, name: "ClosedHihat", alias: "CH" },
    DrumKey { note: 80, name: "HiHat", alias: "HH" },
    DrumKey { note: 82, name: "OpenHihat", alias: "OH" },
    DrumKey { note: 79, name: "LowTom", alias: "LT" },
    DrumKey { note: 81, name: "LowTom", alias: "LT" },
    DrumKey { note: 83, name: "MidTom", alias: "MT" },
    DrumKey { note: 84, name: "MidTom", alias: "MT" },
    DrumKey { note: 86, name: "HiTom", alias: "HT" },
    DrumKey { note: 85, name: "Crash", alias: "CS" },
    DrumKey { note: 87, name: "Ride", alias: "RD" },
    DrumKey { note: 88, name: "CowBell", alias: "CB" },
    DrumKey { note: 89, name: "Claves", alias: "CL" },
];

#[derive(Clone, Copy, Debug)]
struct Tone {
    waveform: Waveform,
    start_hz: f32,
    end_hz: f32,
    sweep_ms: f32,
    decay_ms: f32,
    level: f32,
    // A second oscillator at this frequency, or 0 for none.
    second_hz: f32,
}

#[derive(Clone, Copy, Debug)]
struct Noise {
    filter: FilterKind,
    cutoff: f32,
    decay_ms: f32,
    level: f32,
    metallic: bool,
    bursts: u8,
}

/// How to synthesize one key.
#[derive(Clone, Copy, Debug)]
struct Recipe {
    tone: Option<Tone>,
    noise: Option<Noise>,
    // Hats on the same machine silence each other.
    choke_group: Option<u8>,
}

const fn tone(waveform: Waveform, start_hz: f32, end_hz: f32, sweep_ms: f32, decay_ms: f32, level: f32) -> Tone {
    Tone {
        waveform,
        start_hz,
        end_hz,
        sweep_ms,
        decay_ms,
        level,
        second_hz: 0.0,
    }
}

const fn noise(filter: FilterKind, cutoff: f32, decay_ms: f32, level: f32) -> Noise {
    Noise {
        filter,
        cutoff,
        decay_ms,
        level,
        metallic: false,
        bursts: 0,
    }
}

const fn metal(cutoff: f32, decay_ms: f32, level: f32) -> Noise {
    Noise {
        metallic: true,
        ..noise(FilterKind::Highpass, cutoff, decay_ms, level)
    }
}

const fn clap(cutoff: f32, decay_ms: f32, level: f32) -> Noise {
    Noise {
        bursts: 3,
        ..noise(FilterKind::Bandpass, cutoff, decay_ms, level)
    }
}

const fn drum(tone: Option<Tone>, noise: Option<Noise>) -> Recipe {
    Recipe {
        tone,
        noise,
        choke_group: None,
    }
}

const fn hat(noise: Noise, group: u8) -> Recipe {
    Recipe {
        tone: None,
        noise: Some(noise),
        choke_group: Some(group),
    }
}

const fn cowbell(decay_ms: f32) -> Recipe {
    Recipe {
        tone: Some(Tone {
            second_hz: 800.0,
            ..tone(Waveform::Square, 540.0, 540.0, 0.0, decay_ms, 0.25)
        }),
        noise: None,
        choke_group: None,
    }
}

fn recipe(note: u8) -> Option<Recipe> {
    use FilterKind::{Bandpass, Highpass};
    use Waveform::{Sine, Triangle};
    let r = match note {
        // TR-808
        48 => drum(Some(tone(Sine, 150.0, 48.0, 40.0, 900.0, 1.0)), None),
        49 => drum(Some(tone(Sine, 160.0, 52.0, 30.0, 450.0, 1.0)), None),
        50 => drum(
            Some(tone(Triangle, 1700.0, 1700.0, 0.0, 15.0, 0.5)),
            Some(noise(Bandpass, 0.55, 10.0, 0.3)),
        ),
        51 => drum(
            Some(tone(Triangle, 330.0, 185.0, 20.0, 120.0, 0.6)),
            Some(noise(Highpass, 0.45, 180.0, 0.5)),
        ),
        53 => drum(
            Some(tone(Triangle, 400.0, 240.0, 20.0, 100.0, 0.6)),
            Some(noise(Highpass, 0.5, 150.0, 0.5)),
        ),
        52 => drum(None, Some(clap(0.4, 180.0, 0.8))),
        54 => hat(metal(0.7, 50.0, 0.5), 8),
        56 => hat(metal(0.7, 420.0, 0.5), 8),
        55 => drum(Some(tone(Sine, 125.0, 90.0, 60.0, 320.0, 0.9)), None),
        58 => drum(Some(tone(Sine, 230.0, 175.0, 50.0, 260.0, 0.9)), None),
        57 => drum(None, Some(metal(0.6, 1200.0, 0.45))),
        59 => cowbell(280.0),
        60 => drum(Some(tone(Sine, 280.0, 250.0, 20.0, 200.0, 0.8)), None),
        61 => drum(Some(tone(Sine, 380.0, 350.0, 15.0, 160.0, 0.8)), None),
        62 => drum(Some(tone(Sine, 190.0, 170.0, 25.0, 250.0, 0.8)), None),
        63 => drum(None, Some(noise(Highpass, 0.8, 40.0, 0.4))),
        64 => drum(Some(tone(Triangle, 2500.0, 2500.0, 0.0, 25.0, 0.6)), None),

        // TR-909
        72 | 74 => drum(
            Some(tone(Sine, 190.0, 55.0, 45.0, 380.0, 1.0)),
            Some(noise(Highpass, 0.6, 5.0, 0.4)),
        ),
        73 => drum(
            Some(tone(Triangle, 1550.0, 1550.0, 0.0, 20.0, 0.5)),
            Some(noise(Bandpass, 0.6, 12.0, 0.35)),
        ),
        76 | 77 => drum(
            Some(tone(Triangle, 290.0, 190.0, 25.0, 110.0, 0.55)),
            Some(noise(Highpass, 0.5, 220.0, 0.6)),
        ),
        75 => drum(None, Some(clap(0.45, 220.0, 0.8))),
        78 => hat(noise(Highpass, 0.85, 60.0, 0.45), 9),
        80 => hat(noise(Highpass, 0.85, 130.0, 0.4), 9),
        82 => hat(noise(Highpass, 0.85, 500.0, 0.45), 9),
        79 | 81 => drum(Some(tone(Sine, 140.0, 95.0, 70.0, 330.0, 0.9)), None),
        83 | 84 => drum(Some(tone(Sine, 190.0, 135.0, 60.0, 290.0, 0.9)), None),
        86 => drum(Some(tone(Sine, 260.0, 190.0, 50.0, 250.0, 0.9)), None),
        85 => drum(None, Some(metal(0.55, 1800.0, 0.45))),
        87 => drum(None, Some(metal(0.75, 1500.0, 0.35))),
        88 => cowbell(220.0),
        89 => drum(Some(tone(Triangle, 2300.0, 2300.0, 0.0, 30.0, 0.6)), None),
        _ => return None,
    };
    Some(r)
}

fn decay_coefficient(milliseconds: f32) -> f32 {
    if milliseconds <= 0.0 {
        0.0
    } else {
        (SILENCE.ln() * 1000.0 / (milliseconds * SAMPLE_RATE as f32)).exp()
    }
}

/// One hit in progress.
#[derive(Debug)]
struct DrumVoice {
    note: u8,
    recipe: Recipe,
    velocity: f32,

    oscillators: [Oscillator; 2],
    metal: [Oscillator; 6],
    filter: Filter,
    rng: Rng,

    sweep: f32,
    sweep_coefficient: f32,
    tone_env: f32,
    tone_coefficient: f32,
    noise_env: f32,
    noise_coefficient: f32,
    bursts_left: u8,
    samples_to_burst: f32,
}
impl DrumVoice {
    fn new(note: u8, recipe: Recipe, velocity: f32) -> Self {
        let mut r = Self {
            note,
            recipe,
            velocity,
            oscillators: std::array::from_fn(|_| Oscillator::new(0.0, Waveform::Off)),
            metal: std::array::from_fn(|_| Oscillator::new(0.0, Waveform::Off)),
            filter: Filter::new(FilterKind::Off),
            rng: Rng::default(),
            sweep: 1.0,
            sweep_coefficient: 0.0,
            tone_env: 0.0,
            tone_coefficient: 0.0,
            noise_env: 0.0,
            noise_coefficient: 0.0,
            bursts_left: 0,
            samples_to_burst: 0.0,
        };
        if let Some(tone) = recipe.tone {
            r.oscillators[0].set_waveform(tone.waveform);
            if tone.second_hz > 0.0 {
                r.oscillators[1].set_waveform(tone.waveform);
            }
            r.sweep_coefficient = decay_coefficient(tone.sweep_ms);
            r.tone_env = 1.0;
            r.tone_coefficient = decay_coefficient(tone.decay_ms);
        }
        if let Some(noise) = recipe.noise {
            if noise.metallic {
                for (osc, frequency) in r.metal.iter_mut().zip(METAL_FREQUENCIES) {
                    osc.set_waveform(Waveform::Square);
                    osc.set_frequency(frequency);
                }
            }
            r.filter.set_kind(noise.filter);
            r.filter.set_cutoff(noise.cutoff);
            r.filter.set_resonance(0.2);
            r.noise_env = 1.0;
            r.noise_coefficient = decay_coefficient(noise.decay_ms);
            r.bursts_left = noise.bursts;
            r.samples_to_burst = CLAP_SPACING_MS * SAMPLE_RATE as f32 / 1000.0;
        }
        r
    }

    fn finished(&self) -> bool {
        self.tone_env < SILENCE && self.noise_env < SILENCE && self.bursts_left == 0
    }

    fn next(&mut self, bend: f32) -> f32 {
        let mut out = 0.0;
        if let Some(tone) = self.recipe.tone {
            let frequency = tone.end_hz + (tone.start_hz - tone.end_hz) * self.sweep;
            self.sweep *= self.sweep_coefficient;
            self.oscillators[0].set_frequency(frequency * bend);
            let mut sample = self.oscillators[0].next();
            if tone.second_hz > 0.0 {
                self.oscillators[1].set_frequency(tone.second_hz * bend);
                sample = (sample + self.oscillators[1].next()) * 0.5;
            }
            out += sample * self.tone_env * tone.level;
            self.tone_env *= self.tone_coefficient;
        }
        if let Some(noise) = self.recipe.noise {
            let source = if noise.metallic {
                self.metal.iter_mut().map(|osc| osc.next()).sum::<f32>() / 6.0
            } else {
                self.rng.bipolar()
            };
            out += self.filter.next(source) * self.noise_env * noise.level;
            self.noise_env *= self.noise_coefficient;

            // A clap is a few quick bursts before the long tail.
            if self.bursts_left > 0 {
                self.samples_to_burst -= 1.0;
                if self.samples_to_burst <= 0.0 {
                    self.bursts_left -= 1;
                    self.noise_env = 1.0;
                    self.samples_to_burst = CLAP_SPACING_MS * SAMPLE_RATE as f32 / 1000.0;
                }
            }
        }
        out * self.velocity
    }
}

/// TR-808 and TR-909 kits on one keyboard: the 808 on notes 48 through 64,
/// the 909 on 72 through 89. Every hit is a one-shot; note offs are
/// ignored.
#[derive(Debug)]
pub struct DrumMachine {
    core: InstrumentCore,
    log_changes: bool,

    voices: Vec<DrumVoice>,
    produced: [f32; SAMPLE_PACKET],
    produced_index: usize,
    pitch_bend: f32,
    volume: f32,
}
impl Default for DrumMachine {
    fn default() -> Self {
        let mut r = Self {
            core: Default::default(),
            log_changes: false,
            voices: Vec::with_capacity(MAX_VOICES),
            produced: [0.0; SAMPLE_PACKET],
            produced_index: SAMPLE_PACKET,
            pitch_bend: 1.0,
            volume: 1.0,
        };
        r.panic();
        r.set_values(&Self::defaults());
        r.log_changes = true;
        r
    }
}
impl DrumMachine {
    #[allow(missing_docs)]
    pub fn defaults() -> ParametersValues {
        ParametersValues::from([(Parameter::VOLUME, 1.0)])
    }

    /// The TR-808 keys.
    pub fn tr808() -> &'static [DrumKey] {
        &TR808
    }

    /// The TR-909 keys.
    pub fn tr909() -> &'static [DrumKey] {
        &TR909
    }

    /// The panel label for `note`, if it's one of ours.
    pub fn alias(note: u8) -> Option<&'static str> {
        TR808
            .iter()
            .chain(TR909.iter())
            .find(|key| key.note == note)
            .map(|key| key.alias)
    }

    fn render_packet(&mut self) {
        self.produced = [0.0; SAMPLE_PACKET];
        if self.voices.is_empty() {
            return;
        }
        let bend = self.pitch_bend;
        for voice in self.voices.iter_mut() {
            for sample in self.produced.iter_mut() {
                *sample += voice.next(bend);
            }
        }
        self.voices.retain(|v| !v.finished());
        for sample in self.produced.iter_mut() {
            *sample *= self.volume;
        }
    }
}
impl Instrument for DrumMachine {
    fn id(&self) -> InstrumentId {
        InstrumentId::DrumMachine
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
        for (parameter, value) in values {
            let previous = self.core.value(*parameter);
            if previous.is_some_and(|p| equivalent(p, *value)) {
                continue;
            }
            match *parameter {
                Parameter::VOLUME => {
                    if self.log_changes {
                        log::debug!(target: "DrumMachine", "updating {parameter} -> {value:.3}");
                    }
                    self.volume = value.max(0.0);
                }
                _ => log::debug!(target: "DrumMachine", "ignoring {parameter}"),
            }
        }
        self.core.merge_values(values);
    }

    fn set_note(&mut self, note: u8, velocity: f32) {
        if velocity <= 0.0 {
            return;
        }
        let Some(recipe) = recipe(note) else {
            log::debug!(target: "DrumMachine", "no drum on note {note}");
            return;
        };
        if let Some(group) = recipe.choke_group {
            self.voices.retain(|v| v.recipe.choke_group != Some(group));
        }
        self.voices.retain(|v| v.note != note);
        if self.voices.len() >= MAX_VOICES {
            self.voices.remove(0);
        }
        self.voices.push(DrumVoice::new(note, recipe, velocity.min(1.0)));
    }

    fn on_midi(&mut self, message: &MidiMessage) {
        if message.parameter == Parameter::PITCH_BEND {
            let bend = (message.parameter_value * 8192.0 + 8192.0) as i32;
            log::debug!(
                target: "DrumMachine",
                "pitch bend {bend} [{:.3}]",
                message.parameter_value
            );
            let semitones = (bend - 8192) as f32 / 8192.0 * PITCH_BEND_SEMITONES;
            self.pitch_bend = from_semitone(semitones);
        } else {
            self.handle_midi(message);
        }
    }

    fn next_sample(&mut self) -> SampleType {
        if self.produced_index == SAMPLE_PACKET {
            self.render_packet();
            self.produced_index = 0;
        }
        let value = self.produced[self.produced_index];
        self.produced_index += 1;
        value
    }

    fn panic(&mut self) {
        self.voices.clear();
        self.produced = [0.0; SAMPLE_PACKET];
        self.core.reset_midi_notes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use more_asserts::assert_gt;

    fn peak(dm: &mut DrumMachine, samples: usize) -> f32 {
        (0..samples).fold(0.0f32, |m, _| m.max(dm.next_sample().abs()))
    }

    #[test]
    fn aliases() {
        assert_eq!(DrumMachine::alias(48), Some("DB"));
        assert_eq!(DrumMachine::alias(52), Some("CP"));
        assert_eq!(DrumMachine::alias(75), Some("HC"));
        assert_eq!(DrumMachine::alias(89), Some("CL"));
        assert_eq!(DrumMachine::alias(65), None);
        assert_eq!(DrumMachine::tr808().len(), 17);
        assert_eq!(DrumMachine::tr909().len(), 18);
    }

    #[test]
    fn every_key_sounds_and_stops() {
        for key in DrumMachine::tr808().iter().chain(DrumMachine::tr909()) {
            let mut dm = DrumMachine::default();
            dm.set_note(key.note, 1.0);
            assert_gt!(
                peak(&mut dm, SAMPLE_RATE / 20),
                0.001,
                "{} ({}) should make a sound",
                key.name,
                key.note
            );
            peak(&mut dm, SAMPLE_RATE * 4);
            assert!(dm.voices.is_empty(), "{} should finish", key.name);
            assert_eq!(dm.next_sample(), 0.0);
        }
    }

    #[test]
    fn unmapped_notes_and_note_offs_are_ignored() {
        let mut dm = DrumMachine::default();
        dm.set_note(20, 1.0);
        dm.set_note(49, 0.0);
        assert!(dm.voices.is_empty());
        assert_eq!(peak(&mut dm, 1000), 0.0);
    }

    #[test]
    fn closed_hat_chokes_open_hat() {
        let mut dm = DrumMachine::default();
        dm.set_note(56, 1.0);
        dm.set_note(49, 1.0);
        dm.set_note(54, 1.0);
        let notes: Vec<u8> = dm.voices.iter().map(|v| v.note).collect();
        assert_eq!(notes, vec![49, 54]);

        dm.set_note(49, 1.0);
        assert_eq!(dm.voices.len(), 2, "retriggering replaces the old hit");
    }

    #[test]
    fn packets_and_volume() {
        let mut dm = DrumMachine::default();
        dm.set_note(49, 1.0);
        assert_eq!(dm.produced_index, SAMPLE_PACKET);
        dm.next_sample();
        assert_eq!(dm.produced_index, 1, "a whole packet is rendered at once");

        let mut quiet = DrumMachine::default();
        quiet.set_values(&ParametersValues::from([(Parameter::VOLUME, 0.0)]));
        quiet.set_note(49, 1.0);
        assert_eq!(peak(&mut quiet, 1000), 0.0);
    }

    #[test]
    fn pitch_bend() {
        let mut dm = DrumMachine::default();
        let mut bend = MidiMessage::new("", 0, &[0xe0, 0x7f, 0x7f]);
        bend.parameter = Parameter::PITCH_BEND;
        bend.parameter_value = 1.0;
        dm.on_midi(&bend);
        assert_eq!(dm.pitch_bend, from_semitone(2.0));
    }
}
