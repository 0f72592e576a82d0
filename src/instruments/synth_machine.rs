// Copyright (c) 2023 Mike Tsao. All rights reserved.

use super::{Instrument, InstrumentCore};
use crate::{
    elements::{Envelope, Filter, FilterKind, Value},
    generators::{Oscillator, Waveform},
    midi::MidiMessage,
    types::{
        equivalent, from_semitone, note_frequency, soft_clip, EnvParameter, FilterParameter,
        InstrumentId, LfoParameter, OscParameter, Parameter, ParametersValues, SampleType,
        SAMPLE_RATE, TOTAL_NOTES,
    },
};

const OSC_COUNT: usize = 3;
const MAX_EMITTERS: usize = 8;

const DETUNE_OCTAVES: f32 = 4.0;
const PITCH_BEND_OCTAVES: f32 = 2.0;
const LFO_PITCH_SEMITONES: f32 = 2.0;
const MAX_LFO_FREQUENCY: f32 = 20.0;
const MAX_PORTAMENTO_MS: f32 = 3000.0;

const VOLUME_RAMP: f32 = 10.0 / SAMPLE_RATE as f32;
const FILTER_RAMP: f32 = 3.0 / SAMPLE_RATE as f32;
const LFO_AMP_RAMP: f32 = 10.0 / SAMPLE_RATE as f32;
const PITCH_BEND_RAMP: f32 = 15.0 / SAMPLE_RATE as f32;

// Three oscillators at full volume shouldn't clip.
const MAX_VOLUME: f32 = 1.0 / OSC_COUNT as f32;

/// One sounding note.
#[derive(Debug, Default)]
struct Emitter {
    id: u64,
    note: u8,
    note_frequency: f32,
    on: bool,
    killed: bool,
    produced: u64,

    oscillators: [Oscillator; OSC_COUNT],
    lfos: [Oscillator; OSC_COUNT],
    envelope: Envelope,
}
impl Emitter {
    fn release(&mut self) {
        self.on = false;
        self.envelope.release();
    }

    fn kill(&mut self) {
        self.envelope.kill();
        self.killed = true;
    }

    /// Applies a parameter that only takes effect on a voice when it starts.
    fn apply_setup_parameter(&mut self, parameter: Parameter, value: f32) {
        if let Some((i, OscParameter::Kind)) = parameter.as_osc() {
            if let Some(osc) = self.oscillators.get_mut(i) {
                osc.set_waveform(Waveform::from_parameter(value));
            }
        } else if let Some((_, p)) = parameter.as_env() {
            match p {
                EnvParameter::Attack => self.envelope.set_attack(value),
                EnvParameter::Decay => self.envelope.set_decay(value),
                EnvParameter::Sustain => self.envelope.set_sustain(value),
                EnvParameter::Release => self.envelope.set_release(value),
                EnvParameter::Mod => {}
            }
        } else if let Some((i, LfoParameter::Kind)) = parameter.as_lfo() {
            if let Some(lfo) = self.lfos.get_mut(i) {
                lfo.set_waveform(Waveform::from_parameter(value));
            }
        }
        self.apply_live_parameter(parameter, value);
    }

    /// Applies a parameter that also affects voices already sounding.
    fn apply_live_parameter(&mut self, parameter: Parameter, value: f32) {
        if let Some((i, LfoParameter::Frequency)) = parameter.as_lfo() {
            if let Some(lfo) = self.lfos.get_mut(i) {
                lfo.set_frequency(value * MAX_LFO_FREQUENCY);
            }
        }
    }
}

/// A polyphonic subtractive synth: three oscillators per voice, each with
/// its own LFO, one envelope per voice, and a filter over the mix.
///
/// Voices live in a slot arena. A slot is reused once its voice's envelope
/// completes. When more than eight voices are alive, the longest-playing
/// released ones are killed.
#[derive(Debug)]
pub struct SynthMachine {
    core: InstrumentCore,
    log_changes: bool,

    emitters: Vec<Option<Emitter>>,
    free_slots: Vec<usize>,
    emitter_counter: u64,

    osc_volume: [Value; OSC_COUNT],
    osc_detune: [Value; OSC_COUNT],
    lfo_pitch: [f32; OSC_COUNT],
    lfo_amplitude: [Value; OSC_COUNT],

    filter: Filter,
    filter_cutoff: Value,
    filter_resonance: Value,

    mono: bool,
    portamento: Value,
    portamento_ms: u64,

    pitch_bend: Value,
    volume: Value,
}
impl Default for SynthMachine {
    fn default() -> Self {
        let mut r = Self {
            core: Default::default(),
            log_changes: false,
            emitters: Vec::with_capacity(MAX_EMITTERS * 4),
            free_slots: Vec::with_capacity(MAX_EMITTERS * 4),
            emitter_counter: 0,
            osc_volume: std::array::from_fn(|_| Value::new(MAX_VOLUME)),
            osc_detune: std::array::from_fn(|_| Value::new(1.0)),
            lfo_pitch: [0.0; OSC_COUNT],
            lfo_amplitude: Default::default(),
            filter: Filter::new(FilterKind::Off),
            filter_cutoff: Value::new(1.0),
            filter_resonance: Value::new(0.0),
            mono: false,
            portamento: Value::new(0.0),
            portamento_ms: 0,
            pitch_bend: Value::new(1.0),
            volume: Value::new(1.0),
        };
        r.panic();
        r.set_values(&Self::defaults());
        r.log_changes = true;
        r
    }
}
impl SynthMachine {
    /// One sine oscillator, everything else off, no envelope shaping.
    pub fn defaults() -> ParametersValues {
        let mut values = ParametersValues::default();
        for i in 0..OSC_COUNT {
            let kind = if i == 0 { Waveform::Sine } else { Waveform::Off };
            values.insert(Parameter::osc(i, OscParameter::Kind), kind.as_parameter());
            values.insert(Parameter::osc(i, OscParameter::Detune), 0.0);
            values.insert(Parameter::osc(i, OscParameter::Volume), 1.0);

            values.insert(
                Parameter::lfo(i, LfoParameter::Kind),
                Waveform::Off.as_parameter(),
            );
            values.insert(Parameter::lfo(i, LfoParameter::Frequency), 0.0);
            values.insert(Parameter::lfo(i, LfoParameter::Amplitude), 0.0);
            values.insert(Parameter::lfo(i, LfoParameter::Pitch), 0.0);
        }
        values.insert(Parameter::env(0, EnvParameter::Attack), 0.0);
        values.insert(Parameter::env(0, EnvParameter::Decay), 0.0);
        values.insert(Parameter::env(0, EnvParameter::Sustain), 1.0);
        values.insert(Parameter::env(0, EnvParameter::Release), 0.0);

        values.insert(
            Parameter::filter(0, FilterParameter::Kind),
            FilterKind::Off.as_parameter(),
        );
        values.insert(Parameter::filter(0, FilterParameter::Cutoff), 1.0);
        values.insert(Parameter::filter(0, FilterParameter::Resonance), 0.0);

        values.insert(Parameter::MONO, 0.0);
        values.insert(Parameter::PORTAMENTO, 0.0);
        values.insert(Parameter::VOLUME, 1.0);
        values
    }

    fn live_emitters_mut(&mut self) -> impl Iterator<Item = &mut Emitter> {
        self.emitters.iter_mut().flatten()
    }

    /// Applies one changed parameter to the machine-wide state.
    fn apply_parameter(&mut self, parameter: Parameter, value: f32) {
        match parameter {
            Parameter::MONO => {
                self.mono = value as i32 != 0;
                // Keys still held on the controller stay tracked.
                for emitter in self.live_emitters_mut() {
                    emitter.kill();
                }
                self.portamento.set(0.0);
            }
            Parameter::PORTAMENTO => {
                self.portamento_ms = (value * MAX_PORTAMENTO_MS) as u64;
            }
            Parameter::VOLUME => self.volume.change_with_increment(value, VOLUME_RAMP),
            _ => {
                if let Some((i, p)) = parameter.as_osc() {
                    if i >= OSC_COUNT {
                        return;
                    }
                    match p {
                        OscParameter::Detune => self.osc_detune[i]
                            .change_with_increment(2.0f32.powf(value * DETUNE_OCTAVES), PITCH_BEND_RAMP),
                        OscParameter::Volume => self.osc_volume[i]
                            .change_with_increment(value * MAX_VOLUME, VOLUME_RAMP),
                        OscParameter::Kind => {}
                    }
                } else if let Some((0, p)) = parameter.as_filter() {
                    match p {
                        FilterParameter::Kind => {
                            self.filter.set_kind(FilterKind::from_parameter(value))
                        }
                        FilterParameter::Cutoff => {
                            self.filter_cutoff.change_with_increment(value, FILTER_RAMP)
                        }
                        FilterParameter::Resonance => {
                            self.filter_resonance.change_with_increment(value, FILTER_RAMP)
                        }
                        FilterParameter::Drive | FilterParameter::Track => {}
                    }
                } else if let Some((i, p)) = parameter.as_lfo() {
                    if i >= OSC_COUNT {
                        return;
                    }
                    match p {
                        LfoParameter::Amplitude => {
                            self.lfo_amplitude[i].change_with_increment(value, LFO_AMP_RAMP)
                        }
                        LfoParameter::Pitch => self.lfo_pitch[i] = value,
                        LfoParameter::Kind | LfoParameter::Frequency => {}
                    }
                } else if parameter.as_env().is_none() {
                    log::debug!(target: "SynthMachine", "ignoring {parameter}");
                }
            }
        }
    }

    fn allocate_emitter(&mut self, note: u8) {
        self.emitter_counter += 1;
        let mut emitter = Emitter {
            id: self.emitter_counter,
            note,
            note_frequency: note_frequency(note),
            on: true,
            oscillators: std::array::from_fn(|_| Oscillator::new(0.0, Waveform::Off)),
            lfos: std::array::from_fn(|_| Oscillator::new(0.0, Waveform::Off)),
            ..Default::default()
        };
        for (parameter, value) in self.core.values() {
            emitter.apply_setup_parameter(*parameter, *value);
        }
        emitter.envelope.trigger(1.0);

        match self.free_slots.pop() {
            Some(slot) => self.emitters[slot] = Some(emitter),
            None => self.emitters.push(Some(emitter)),
        }
    }

    /// Drops voices whose envelopes finished, then kills released voices,
    /// longest-playing first, until no more than [MAX_EMITTERS] are left
    /// that aren't already dying.
    fn prune(&mut self) {
        let mut live = 0;
        let mut already_killed = 0;
        for (slot, entry) in self.emitters.iter_mut().enumerate() {
            let Some(emitter) = entry else {
                continue;
            };
            if emitter.envelope.completed() {
                *entry = None;
                self.free_slots.push(slot);
                continue;
            }
            live += 1;
            if emitter.killed {
                already_killed += 1;
            }
        }

        while live - already_killed > MAX_EMITTERS {
            let victim = self
                .emitters
                .iter_mut()
                .flatten()
                .filter(|e| !e.on && !e.killed)
                .max_by(|a, b| a.produced.cmp(&b.produced).then(b.id.cmp(&a.id)));
            let Some(victim) = victim else {
                break;
            };
            log::debug!(
                target: "SynthMachine",
                "killing voice {} after {} samples",
                victim.id,
                victim.produced
            );
            victim.kill();
            already_killed += 1;
        }
    }
}
impl Instrument for SynthMachine {
    fn id(&self) -> InstrumentId {
        InstrumentId::SynthMachine
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
            if self.log_changes {
                log::info!(
                    target: "SynthMachine",
                    "updating {parameter} {:.3} -> {value:.3}",
                    previous.unwrap_or_default()
                );
            }
            self.apply_parameter(*parameter, *value);
            for emitter in self.live_emitters_mut() {
                emitter.apply_live_parameter(*parameter, *value);
            }
        }
        self.core.merge_values(values);
    }

    fn set_note(&mut self, note: u8, velocity: f32) {
        if note as usize >= TOTAL_NOTES {
            log::warn!(target: "SynthMachine", "ignoring out-of-range note {note}");
            return;
        }
        let on = velocity > 0.0;

        if on && self.mono {
            let mut glide_id = None;
            if self.portamento_ms > 0 {
                let target = note_frequency(note);
                let portamento_ms = self.portamento_ms;
                if let Some(current) = self
                    .emitters
                    .iter_mut()
                    .flatten()
                    .filter(|e| e.on && !e.killed)
                    .max_by_key(|e| e.id)
                {
                    glide_id = Some(current.id);
                    self.portamento.set(current.note_frequency);
                    self.portamento.change_with_time(target, portamento_ms);
                    current.note = note;
                }
            }

            for emitter in self.live_emitters_mut() {
                if !emitter.killed && Some(emitter.id) != glide_id {
                    emitter.kill();
                }
            }
            if glide_id.is_some() {
                return;
            }
            self.portamento.set(0.0);
        }

        let mut found = false;
        for emitter in self.live_emitters_mut() {
            if emitter.note != note || !emitter.on || emitter.killed {
                continue;
            }
            found = true;
            if on {
                emitter.envelope.trigger(1.0);
            } else {
                emitter.release();
            }
        }
        if on && !found {
            self.allocate_emitter(note);
        }
    }

    fn on_midi(&mut self, message: &MidiMessage) {
        if message.parameter == Parameter::PITCH_BEND {
            self.pitch_bend.change_with_increment(
                2.0f32.powf(message.parameter_value * PITCH_BEND_OCTAVES),
                PITCH_BEND_RAMP,
            );
            return;
        }
        if !message.has_parameter() {
            self.handle_midi(message);
            return;
        }
        log::info!(
            target: "SynthMachine",
            "midi {} {:.3}",
            message.parameter,
            message.parameter_value
        );
        let mut copy = message.clone();
        if let Some((_, OscParameter::Detune)) = message.parameter.as_osc() {
            // Controllers are 0..1; detune is bipolar.
            copy.parameter_value = (copy.parameter_value * 2.0 - 1.0).clamp(-1.0, 1.0);
        }
        self.handle_midi(&copy);
    }

    fn next_sample(&mut self) -> SampleType {
        self.prune();

        for i in 0..OSC_COUNT {
            self.osc_detune[i].next();
            self.osc_volume[i].next();
            self.lfo_amplitude[i].next();
        }
        self.pitch_bend.next();
        self.filter.set_cutoff(self.filter_cutoff.next());
        self.filter.set_resonance(self.filter_resonance.next());

        let glide = if self.mono && self.portamento.changing() {
            Some(self.portamento.next())
        } else {
            None
        };

        let pitch_bend = self.pitch_bend.v();
        let mut mix = 0.0;
        for emitter in self.emitters.iter_mut().flatten() {
            if let Some(frequency) = glide {
                if !emitter.killed {
                    emitter.note_frequency = frequency;
                }
            }

            let mut sample = 0.0;
            for i in 0..OSC_COUNT {
                if emitter.oscillators[i].is_off() {
                    continue;
                }
                let mut amplitude = self.osc_volume[i].v();
                let mut frequency = emitter.note_frequency;

                let lfo = &mut emitter.lfos[i];
                if !lfo.is_off() {
                    let lfo_value = lfo.next();
                    if !lfo.waveform().has_discontinuities() {
                        amplitude -= lfo_value * self.lfo_amplitude[i].v() * amplitude;
                    }
                    frequency *= from_semitone(lfo_value * self.lfo_pitch[i] * LFO_PITCH_SEMITONES);
                }

                let osc = &mut emitter.oscillators[i];
                let osc_frequency = frequency * pitch_bend * self.osc_detune[i].v();
                if osc_frequency != osc.frequency() {
                    osc.set_frequency(osc_frequency);
                }
                sample += osc.next() * amplitude;
            }

            mix += sample * emitter.envelope.next();
            emitter.produced += 1;
        }

        let mix = soft_clip(mix);
        self.filter.next(mix) * self.volume.next()
    }

    fn panic(&mut self) {
        for emitter in self.live_emitters_mut() {
            emitter.kill();
        }
        self.portamento.set(0.0);
        self.pitch_bend.set(1.0);
        self.filter.reset();
        self.core.reset_midi_notes();
    }
}
