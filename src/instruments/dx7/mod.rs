// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! A six-operator FM synth that plays DX7 voice banks.

pub use banks::{BankStore, BuiltInBanks, SyxFolderBanks};
pub use patch::{bank_sysex, OperatorPatch, Patch, BANK_SYSEX_SIZE, VOICES_PER_BANK};

use super::{Instrument, InstrumentCore};
use crate::{
    elements::Value,
    midi::{ChannelEvent, MidiMessage},
    types::{equivalent, hard_clip, InstrumentId, Parameter, ParametersValues, SampleType, SAMPLE_RATE},
};
use fm::{ControllerDepths, Lfo, Voice};
use std::sync::Arc;

mod banks;
mod fm;
mod patch;

const MAX_VOICES: usize = 16;
const VOLUME_RAMP: f32 = 10.0 / SAMPLE_RATE as f32;
const MAX_CONTROLLER_RANGE: f32 = 99.0;

/// How one physical controller feeds the modulation section.
#[derive(Clone, Copy, Debug, Default)]
struct ModSource {
    range: f32,
    pitch: bool,
    amp: bool,
    eg: bool,
    value: f32,
}
impl ModSource {
    fn depth(&self) -> f32 {
        (self.range / MAX_CONTROLLER_RANGE).clamp(0.0, 1.0) * self.value
    }

    // EG bias attenuates until the controller is pushed.
    fn eg_bias(&self) -> f32 {
        if self.eg {
            (self.range / MAX_CONTROLLER_RANGE).clamp(0.0, 1.0) * (1.0 - self.value)
        } else {
            0.0
        }
    }
}

/// Sixteen voices of FM. Voices are taken round-robin, skipping any whose
/// key is still down; if every key is down, the new note is dropped.
///
/// Group, Bank, and Patch select a voice through the [BankStore]. A bank can
/// also arrive as a bulk-dump sysex message, which switches to its first
/// voice.
#[derive(Debug)]
pub struct Dx7 {
    core: InstrumentCore,
    log_changes: bool,

    banks: Arc<dyn BankStore>,
    group_index: Option<usize>,
    bank_index: Option<usize>,
    program_index: Option<usize>,
    bank_data: Vec<u8>,
    patch: Patch,

    voices: Vec<Voice>,
    current_voice: usize,
    lfo: Lfo,
    sustain: bool,
    mono: bool,

    wheel: ModSource,
    aftertouch: ModSource,
    breath: f32,
    foot: f32,
    pitch_bend: f32,
    pitch_bend_step: f32,
    pitch_bend_up: f32,
    pitch_bend_down: f32,

    volume: Value,
}
impl Dx7 {
    /// A DX7 that resolves Group/Bank/Patch through `banks`.
    pub fn new(banks: Arc<dyn BankStore>) -> Self {
        let mut r = Self {
            core: Default::default(),
            log_changes: false,
            banks,
            group_index: None,
            bank_index: None,
            program_index: None,
            bank_data: Vec::default(),
            patch: Patch::init_voice(),
            voices: vec![Voice::default(); MAX_VOICES],
            current_voice: 0,
            lfo: Lfo::default(),
            sustain: false,
            mono: false,
            wheel: Default::default(),
            aftertouch: Default::default(),
            breath: 0.0,
            foot: 0.0,
            pitch_bend: 0.0,
            pitch_bend_step: 0.0,
            pitch_bend_up: 3.0,
            pitch_bend_down: 3.0,
            volume: Value::new(1.0),
        };
        r.lfo.configure(&r.patch);
        r.set_values(&Self::defaults());
        r.log_changes = true;
        r
    }

    /// First voice of the first bank, no controller routing, a bend range
    /// of three semitones each way.
    pub fn defaults() -> ParametersValues {
        ParametersValues::from([
            (Parameter::GROUP, 0.0),
            (Parameter::BANK, 0.0),
            (Parameter::PATCH, 0.0),
            (Parameter::MODULATION_WHEEL_RANGE, 0.0),
            (Parameter::MODULATION_WHEEL_PITCH, 0.0),
            (Parameter::MODULATION_WHEEL_AMP, 0.0),
            (Parameter::MODULATION_WHEEL_ENV, 0.0),
            (Parameter::AFTERTOUCH_RANGE, 0.0),
            (Parameter::AFTERTOUCH_PITCH, 0.0),
            (Parameter::AFTERTOUCH_AMP, 0.0),
            (Parameter::AFTERTOUCH_ENV, 0.0),
            (Parameter::PITCH_BEND_STEP, 0.0),
            (Parameter::PITCH_BEND_UP, 3.0),
            (Parameter::PITCH_BEND_DOWN, 3.0),
            (Parameter::MONO, 0.0),
            (Parameter::VOLUME, 1.0),
        ])
    }

    /// The voice that new notes will use.
    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    #[allow(missing_docs)]
    pub fn banks(&self) -> &Arc<dyn BankStore> {
        &self.banks
    }

    /// Voice names in the current bank.
    pub fn patch_names(&self) -> Vec<String> {
        patch::bank_patch_names(&self.bank_data)
    }

    /// Accepts a 32-voice bulk dump as the current bank. Returns false and
    /// changes nothing if `sysex` isn't one.
    pub fn load_sysex(&mut self, sysex: &[u8]) -> bool {
        match patch::bank_voices(sysex) {
            Ok(_) => {
                self.bank_data = sysex.to_vec();
                true
            }
            Err(e) => {
                log::warn!(target: "Dx7", "ignoring sysex: {e}");
                false
            }
        }
    }

    /// Switches to voice `program` of the current bank and silences
    /// everything.
    fn program_change(&mut self, program: usize) {
        let unpacked = patch::bank_voices(&self.bank_data).and_then(|voices| {
            Patch::unpack(&voices[program * patch::PACKED_VOICE_SIZE..])
        });
        match unpacked {
            Ok(patch) => {
                if self.log_changes {
                    log::debug!(target: "Dx7", "program changed to {program} [{}]", patch.name);
                }
                self.patch = patch;
                self.lfo.configure(&self.patch);
                self.program_index = Some(program);
            }
            Err(e) => log::error!(target: "Dx7", "couldn't change program to {program}: {e}"),
        }
        self.panic();
    }

    fn load_bank(&mut self, group: usize, bank: usize) -> bool {
        let data = self.banks.bank(group, bank).map(|d| d.to_vec());
        if let Some(data) = data {
            if self.load_sysex(&data) {
                if self.log_changes {
                    log::debug!(target: "Dx7", "loaded group {group} bank {bank}");
                }
                self.group_index = Some(group);
                self.bank_index = Some(bank);
                self.program_index = None;
                return true;
            }
        }
        log::error!(target: "Dx7", "invalid group={group} bank={bank}");
        self.group_index = None;
        self.bank_index = None;
        self.program_index = None;
        false
    }

    /// Resolves a change to any of Group, Bank, or Patch.
    fn select(&mut self, group: i32, bank: i32, program: i32) {
        if group < 0 || bank < 0 || program < 0 {
            log::error!(target: "Dx7", "invalid group={group} bank={bank} program={program}");
            return;
        }
        let (group, bank, program) = (group as usize, bank as usize, program as usize);
        if (Some(group) != self.group_index || Some(bank) != self.bank_index)
            && !self.load_bank(group, bank)
        {
            return;
        }
        if self.program_index != Some(program) {
            if program < VOICES_PER_BANK {
                self.program_change(program);
            } else {
                log::error!(target: "Dx7", "invalid program={program}");
            }
        }
    }

    fn note_pressed(&mut self, note: u8, velocity: u8) {
        if self.mono {
            for voice in self.voices.iter_mut().filter(|v| v.live) {
                voice.live = false;
                voice.keydown = false;
                voice.sustained = false;
            }
        }
        let mut index = self.current_voice;
        for _ in 0..MAX_VOICES {
            if !self.voices[index].keydown {
                self.current_voice = (index + 1) % MAX_VOICES;
                self.lfo.key_down();
                let voice = &mut self.voices[index];
                voice.start(&self.patch, note, velocity);
                voice.sustained = self.sustain;
                return;
            }
            index = (index + 1) % MAX_VOICES;
        }
        log::debug!(target: "Dx7", "no free voice for note {note}");
    }

    fn note_released(&mut self, note: u8) {
        let Some(voice) = self
            .voices
            .iter_mut()
            .find(|v| v.note == note && v.keydown)
        else {
            log::debug!(target: "Dx7", "released note {note} wasn't playing");
            return;
        };
        if self.sustain {
            voice.sustained = true;
            voice.keydown = false;
        } else {
            voice.key_up();
        }
    }

    fn set_sustain(&mut self, sustain: bool) {
        self.sustain = sustain;
        if !sustain {
            for voice in self.voices.iter_mut() {
                if voice.sustained && !voice.keydown {
                    voice.key_up();
                }
            }
        }
    }

    fn pitch_bend_octaves(&self) -> f32 {
        let range = if self.pitch_bend >= 0.0 {
            self.pitch_bend_up
        } else {
            self.pitch_bend_down
        };
        let mut semitones = self.pitch_bend * range;
        if self.pitch_bend_step > 0.0 {
            semitones = (semitones / self.pitch_bend_step).round() * self.pitch_bend_step;
        }
        semitones / 12.0
    }

    // Breath and foot controllers follow the mod wheel's routing.
    fn controller_depths(&self) -> ControllerDepths {
        let mut wheel = self.wheel;
        wheel.value = wheel.value.max(self.breath).max(self.foot);
        let mut r = ControllerDepths::default();
        for source in [&wheel, &self.aftertouch] {
            if source.pitch {
                r.pitch = r.pitch.max(source.depth());
            }
            if source.amp {
                r.amp = r.amp.max(source.depth());
            }
            r.eg_bias = r.eg_bias.max(source.eg_bias());
        }
        r
    }
}
impl Instrument for Dx7 {
    fn id(&self) -> InstrumentId {
        InstrumentId::Dx7
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
        let mut selection_changed = false;
        for (parameter, value) in values {
            let previous = self.core.value(*parameter);
            if previous.is_some_and(|p| equivalent(p, *value)) {
                continue;
            }
            let flag = *value as i32 != 0;
            match *parameter {
                Parameter::GROUP | Parameter::BANK | Parameter::PATCH => selection_changed = true,
                Parameter::MODULATION_WHEEL => self.wheel.value = *value,
                Parameter::MODULATION_WHEEL_RANGE => self.wheel.range = *value,
                Parameter::MODULATION_WHEEL_PITCH => self.wheel.pitch = flag,
                Parameter::MODULATION_WHEEL_AMP => self.wheel.amp = flag,
                Parameter::MODULATION_WHEEL_ENV => self.wheel.eg = flag,
                Parameter::AFTERTOUCH_RANGE => self.aftertouch.range = *value,
                Parameter::AFTERTOUCH_PITCH => self.aftertouch.pitch = flag,
                Parameter::AFTERTOUCH_AMP => self.aftertouch.amp = flag,
                Parameter::AFTERTOUCH_ENV => self.aftertouch.eg = flag,
                Parameter::PITCH_BEND => self.pitch_bend = value.clamp(-1.0, 1.0),
                Parameter::PITCH_BEND_STEP => self.pitch_bend_step = value.trunc().max(0.0),
                Parameter::PITCH_BEND_UP => self.pitch_bend_up = value.trunc().max(0.0),
                Parameter::PITCH_BEND_DOWN => self.pitch_bend_down = value.trunc().max(0.0),
                Parameter::MONO => {
                    if flag != self.mono {
                        self.mono = flag;
                        self.panic();
                    }
                }
                Parameter::VOLUME => self.volume.change_with_increment(*value, VOLUME_RAMP),
                _ => {
                    log::debug!(target: "Dx7", "ignoring {parameter}");
                    continue;
                }
            }
            if self.log_changes {
                log::info!(
                    target: "Dx7",
                    "updating {parameter} {:.3} -> {value:.3}",
                    previous.unwrap_or_default()
                );
            }
        }
        self.core.merge_values(values);

        if selection_changed {
            let index = |p: Parameter| self.core.value(p).map(|v| v as i32).unwrap_or(-1);
            let (group, bank, program) = (
                index(Parameter::GROUP),
                index(Parameter::BANK),
                index(Parameter::PATCH),
            );
            self.select(group, bank, program);
        }
    }

    fn set_note(&mut self, note: u8, velocity: f32) {
        if velocity > 0.0 {
            let velocity = (velocity * 127.0).clamp(1.0, 127.0) as u8;
            self.note_pressed(note, velocity);
        } else {
            self.note_released(note);
        }
    }

    fn on_midi(&mut self, message: &MidiMessage) {
        if message.has_parameter() && message.parameter != Parameter::PITCH_BEND {
            self.handle_midi(message);
            return;
        }
        if message.bytes.first() == Some(&0xf0) {
            if self.load_sysex(&message.bytes) {
                self.program_change(0);
            }
            return;
        }
        match message.event() {
            Some((_, ChannelEvent::PitchBend(value))) => self.pitch_bend = value,
            Some((_, ChannelEvent::Controller { cc: 1, value })) => self.wheel.value = value,
            Some((_, ChannelEvent::Controller { cc: 2, value })) => self.breath = value,
            Some((_, ChannelEvent::Controller { cc: 3, value })) => self.foot = value,
            Some((_, ChannelEvent::Controller { cc: 64, value })) => self.set_sustain(value > 0.0),
            Some((_, ChannelEvent::Aftertouch(value))) => self.aftertouch.value = value,
            Some((_, ChannelEvent::ProgramChange(program))) => {
                self.program_change((program as usize).min(VOICES_PER_BANK - 1))
            }
            _ => self.handle_midi(message),
        }
    }

    fn next_sample(&mut self) -> SampleType {
        let modulation = self.lfo.modulation(&self.controller_depths());
        let bend = self.pitch_bend_octaves();
        let mut sum = 0.0;
        for voice in self.voices.iter_mut().filter(|v| v.live) {
            sum += hard_clip(voice.next(&modulation, bend));
            if !voice.keydown && !voice.sustained && voice.finished() {
                voice.live = false;
            }
        }
        sum * self.volume.next()
    }

    fn panic(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.live = false;
            voice.keydown = false;
            voice.sustained = false;
        }
        self.core.reset_midi_notes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use more_asserts::assert_gt;

    fn peak(dx7: &mut Dx7, samples: usize) -> f32 {
        (0..samples).fold(0.0f32, |m, _| m.max(dx7.next_sample().abs()))
    }

    fn live_voices(dx7: &Dx7) -> usize {
        dx7.voices.iter().filter(|v| v.live).count()
    }

    #[test]
    fn defaults() {
        let mut dx7 = Dx7::new(Arc::new(BuiltInBanks::default()));
        assert_eq!(dx7.values(), Dx7::defaults());
        assert_eq!(dx7.patch().name, "ALGO 01");
        assert_eq!(dx7.patch_names().len(), VOICES_PER_BANK);
        assert_eq!(peak(&mut dx7, 100), 0.0);
    }

    #[test]
    fn plays_and_goes_silent() {
        let mut dx7 = Dx7::new(Arc::new(BuiltInBanks::default()));
        dx7.set_note(60, 0.8);
        assert_gt!(peak(&mut dx7, SAMPLE_RATE / 10), 0.01);
        dx7.set_note(60, 0.0);
        peak(&mut dx7, SAMPLE_RATE * 4);
        assert_eq!(live_voices(&dx7), 0);
        assert_eq!(dx7.next_sample(), 0.0);
    }

    #[test]
    fn selects_patches_through_the_store() {
        let mut dx7 = Dx7::new(Arc::new(BuiltInBanks::default()));
        dx7.set_values(&ParametersValues::from([(Parameter::PATCH, 12.0)]));
        assert_eq!(dx7.patch().name, "ALGO 13");
        assert_eq!(dx7.patch().algorithm, 12);

        dx7.set_values(&ParametersValues::from([(Parameter::PATCH, 40.0)]));
        assert_eq!(dx7.patch().name, "ALGO 13", "out-of-range program is ignored");

        dx7.set_values(&ParametersValues::from([(Parameter::BANK, 3.0)]));
        assert_eq!(dx7.bank_index, None, "invalid bank resets the selection");
        dx7.set_values(&ParametersValues::from([
            (Parameter::BANK, 0.0),
            (Parameter::PATCH, 2.0),
        ]));
        assert_eq!(dx7.patch().name, "ALGO 03");
    }

    #[test]
    fn sysex_and_program_change() {
        let mut dx7 = Dx7::new(Arc::new(BuiltInBanks::default()));
        let mut custom = Patch::init_voice();
        custom.name = "CUSTOM".to_string();
        let dump = bank_sysex(&[custom.clone(), Patch::init_voice()]);
        dx7.on_midi(&MidiMessage::new("", 0, &dump));
        assert_eq!(dx7.patch(), &custom);

        dx7.on_midi(&MidiMessage::new("", 0, &[0xc0, 1]));
        assert_eq!(dx7.patch().name, "INIT VOICE");
        dx7.on_midi(&MidiMessage::new("", 0, &[0xc0, 100]));
        assert_eq!(dx7.program_index, Some(31), "program change clamps to the bank");

        dx7.on_midi(&MidiMessage::new("", 0, &[0xf0, 0x43, 0x00, 0xf7]));
        assert_eq!(dx7.program_index, Some(31), "short sysex is ignored");
    }

    #[test]
    fn sustain_holds_released_notes() {
        let mut dx7 = Dx7::new(Arc::new(BuiltInBanks::default()));
        dx7.on_midi(&MidiMessage::new_controller(64, 127));
        dx7.on_midi(&MidiMessage::new_note(60, 100));
        dx7.on_midi(&MidiMessage::new_note(60, 0));
        peak(&mut dx7, SAMPLE_RATE);
        assert_eq!(live_voices(&dx7), 1, "sustain pedal holds the note");

        dx7.on_midi(&MidiMessage::new_controller(64, 0));
        peak(&mut dx7, SAMPLE_RATE * 4);
        assert_eq!(live_voices(&dx7), 0);
    }

    #[test]
    fn voice_allocation() {
        let mut dx7 = Dx7::new(Arc::new(BuiltInBanks::default()));
        for note in 40..(40 + MAX_VOICES as u8 + 2) {
            dx7.set_note(note, 1.0);
        }
        assert_eq!(live_voices(&dx7), MAX_VOICES, "extra notes are dropped");
        assert!(dx7.voices.iter().all(|v| v.note < 40 + MAX_VOICES as u8));

        dx7.panic();
        dx7.set_values(&ParametersValues::from([(Parameter::MONO, 1.0)]));
        dx7.set_note(60, 1.0);
        dx7.set_note(64, 1.0);
        assert_eq!(live_voices(&dx7), 1);
        assert!(dx7.voices.iter().any(|v| v.live && v.note == 64));
    }

    #[test]
    fn pitch_bend_ranges() {
        let mut dx7 = Dx7::new(Arc::new(BuiltInBanks::default()));
        let mut bend = MidiMessage::new("", 0, &[0xe0, 0x00, 0x00]);
        bend.parameter = Parameter::PITCH_BEND;
        bend.parameter_value = -1.0;
        dx7.on_midi(&bend);
        assert_eq!(dx7.pitch_bend_octaves(), -0.25);

        dx7.set_values(&ParametersValues::from([
            (Parameter::PITCH_BEND_UP, 12.0),
            (Parameter::PITCH_BEND_STEP, 4.0),
        ]));
        dx7.on_midi(&MidiMessage::new("", 0, &[0xe0, 0x00, 0x50]));
        // 0.25 of 12 semitones is 3, which rounds to the nearest 4.
        assert_eq!(dx7.pitch_bend_octaves(), 4.0 / 12.0);
    }

    #[test]
    fn controllers_feed_modulation() {
        let mut dx7 = Dx7::new(Arc::new(BuiltInBanks::default()));
        assert_eq!(dx7.controller_depths(), ControllerDepths::default());

        dx7.set_values(&ParametersValues::from([
            (Parameter::MODULATION_WHEEL_RANGE, 99.0),
            (Parameter::MODULATION_WHEEL_PITCH, 1.0),
            (Parameter::AFTERTOUCH_RANGE, 99.0),
            (Parameter::AFTERTOUCH_AMP, 1.0),
        ]));
        dx7.on_midi(&MidiMessage::new_controller(2, 127));
        assert_eq!(dx7.controller_depths().pitch, 1.0, "breath follows the wheel");
        assert_eq!(dx7.controller_depths().amp, 0.0);

        dx7.on_midi(&MidiMessage::new("", 0, &[0xd0, 127]));
        assert_eq!(dx7.controller_depths().amp, 1.0);
    }
}
