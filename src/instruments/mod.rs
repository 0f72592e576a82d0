// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The four built-in instruments and the contract they share.

/// The most commonly used imports.
pub mod prelude {
    pub use super::{
        DrumMachine, Dx7, Instrument, InstrumentCore, Instruments, MidiControllerUpdates,
        NoteSink, SynthMachine, Tb303,
    };
}

pub use drum_machine::DrumMachine;
pub use dx7::{BankStore, BuiltInBanks, Dx7, SyxFolderBanks};
pub use synth_machine::SynthMachine;
pub use tb303::Tb303;

use crate::{
    midi::{ChannelEvent, MidiMessage},
    types::{InstrumentId, Parameter, ParametersValues, SampleType},
};
use std::{collections::BTreeSet, sync::Arc};

mod drum_machine;
pub mod dx7;
mod synth_machine;
mod tb303;

/// What changed because of MIDI controller input since the last time
/// someone asked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MidiControllerUpdates {
    /// A mapped controller changed a parameter.
    pub values: bool,
    /// A key went down or up.
    pub notes: bool,
}
impl MidiControllerUpdates {
    #[allow(missing_docs)]
    pub fn any(&self) -> bool {
        self.values || self.notes
    }
}

/// State that every [Instrument] carries: its current parameters and what
/// the MIDI controller has been doing to it.
#[derive(Clone, Debug, Default)]
pub struct InstrumentCore {
    values: ParametersValues,
    midi_updated_values: bool,
    midi_notes_pressed: BTreeSet<u8>,
    midi_updated_notes: bool,
}
impl InstrumentCore {
    #[allow(missing_docs)]
    pub fn values(&self) -> &ParametersValues {
        &self.values
    }

    /// The stored value for `parameter`, if it has been set.
    pub fn value(&self, parameter: Parameter) -> Option<f32> {
        self.values.get(&parameter).copied()
    }

    /// Records `values` on top of what's already stored.
    pub fn merge_values(&mut self, values: &ParametersValues) {
        self.values
            .extend(values.iter().map(|(parameter, value)| (*parameter, *value)));
    }

    fn track_midi_note(&mut self, note: u8, on: bool) {
        if on {
            self.midi_notes_pressed.insert(note);
        } else {
            self.midi_notes_pressed.remove(&note);
        }
        self.midi_updated_notes = true;
    }

    /// Forgets every key held on the controller. Instruments call this from
    /// [Instrument::panic()].
    pub fn reset_midi_notes(&mut self) {
        self.midi_notes_pressed.clear();
        self.midi_updated_notes = true;
    }

    fn take_updates(&mut self) -> MidiControllerUpdates {
        let r = MidiControllerUpdates {
            values: self.midi_updated_values,
            notes: self.midi_updated_notes,
        };
        self.midi_updated_values = false;
        self.midi_updated_notes = false;
        r
    }
}

/// The contract between the engine and a sound source.
///
/// Everything here runs on the audio thread. None of it returns errors:
/// unknown parameters are logged and ignored, and bad indices leave the
/// previous state in place.
pub trait Instrument: Send + std::fmt::Debug {
    #[allow(missing_docs)]
    fn id(&self) -> InstrumentId;

    #[allow(missing_docs)]
    fn core(&self) -> &InstrumentCore;

    #[allow(missing_docs)]
    fn core_mut(&mut self) -> &mut InstrumentCore;

    /// The parameters a fresh instance starts with, used when no preset is
    /// available.
    fn default_parameters(&self) -> ParametersValues;

    /// Applies `values`, acting only on the ones that changed, and merges
    /// them into the instrument's state.
    fn set_values(&mut self, values: &ParametersValues);

    /// The instrument's complete state.
    fn values(&self) -> ParametersValues {
        self.core().values().clone()
    }

    /// Starts `note` at `velocity` (0..1), or releases it if `velocity` is
    /// zero.
    fn set_note(&mut self, note: u8, velocity: f32);

    /// Handles a routed MIDI message. Override to intercept messages, then
    /// call [Instrument::handle_midi()] for everything else.
    fn on_midi(&mut self, message: &MidiMessage) {
        self.handle_midi(message);
    }

    /// Shared MIDI handling: a mapped controller updates its one parameter,
    /// and notes go to [Instrument::set_note()] and are tracked.
    fn handle_midi(&mut self, message: &MidiMessage) {
        if message.has_parameter() {
            let mut values = self.values();
            values.insert(message.parameter, message.parameter_value);
            self.set_values(&values);
            self.core_mut().midi_updated_values = true;
            return;
        }
        match message.event() {
            Some((_, ChannelEvent::NoteOn { note, velocity })) => {
                self.set_note(note, velocity);
                self.core_mut().track_midi_note(note, true);
            }
            Some((_, ChannelEvent::NoteOff { note })) => {
                self.set_note(note, 0.0);
                self.core_mut().track_midi_note(note, false);
            }
            _ => {}
        }
    }

    /// Produces the next sample.
    fn next_sample(&mut self) -> SampleType;

    /// Silences everything right away.
    fn panic(&mut self);

    /// Returns and clears what MIDI input changed.
    fn take_midi_controller_updates(&mut self) -> MidiControllerUpdates {
        self.core_mut().take_updates()
    }

    /// The keys currently held on the MIDI controller.
    fn notes_pressed_on_midi_controller(&self) -> BTreeSet<u8> {
        self.core().midi_notes_pressed.clone()
    }
}

/// Something that can be told to play a note on a given instrument. The
/// sequencer plays into one of these.
pub trait NoteSink {
    /// Starts or (with velocity 0) stops `note` on `instrument`.
    fn set_instrument_note(&mut self, instrument: InstrumentId, note: u8, velocity: f32);
}

/// Every instrument, one of each, addressed by [InstrumentId].
#[derive(Debug)]
pub struct Instruments {
    synth_machine: SynthMachine,
    drum_machine: DrumMachine,
    dx7: Dx7,
    tb303: Tb303,
}
impl Default for Instruments {
    fn default() -> Self {
        Self::new(Arc::new(BuiltInBanks::default()))
    }
}
impl Instruments {
    /// Builds every instrument with its default parameters. The DX7 resolves
    /// patches through `banks`.
    pub fn new(banks: Arc<dyn BankStore>) -> Self {
        Self {
            synth_machine: SynthMachine::default(),
            drum_machine: DrumMachine::default(),
            dx7: Dx7::new(banks),
            tb303: Tb303::default(),
        }
    }

    #[allow(missing_docs)]
    pub fn instrument(&self, id: InstrumentId) -> &dyn Instrument {
        match id {
            InstrumentId::SynthMachine => &self.synth_machine,
            InstrumentId::DrumMachine => &self.drum_machine,
            InstrumentId::Dx7 => &self.dx7,
            InstrumentId::Tb303 => &self.tb303,
        }
    }

    #[allow(missing_docs)]
    pub fn instrument_mut(&mut self, id: InstrumentId) -> &mut dyn Instrument {
        match id {
            InstrumentId::SynthMachine => &mut self.synth_machine,
            InstrumentId::DrumMachine => &mut self.drum_machine,
            InstrumentId::Dx7 => &mut self.dx7,
            InstrumentId::Tb303 => &mut self.tb303,
        }
    }

    /// Visits every instrument in id order.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut dyn Instrument)) {
        f(&mut self.synth_machine);
        f(&mut self.drum_machine);
        f(&mut self.dx7);
        f(&mut self.tb303);
    }

    /// The sum of every instrument's next sample, unclipped.
    pub fn next_sample(&mut self) -> SampleType {
        self.synth_machine.next_sample()
            + self.drum_machine.next_sample()
            + self.dx7.next_sample()
            + self.tb303.next_sample()
    }

    /// Panics every instrument.
    pub fn panic(&mut self) {
        self.for_each_mut(|i| i.panic());
    }
}
impl NoteSink for Instruments {
    fn set_instrument_note(&mut self, instrument: InstrumentId, note: u8, velocity: f32) {
        self.instrument_mut(instrument).set_note(note, velocity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[derive(Debug, Default)]
    struct Recording {
        core: InstrumentCore,
        notes: Vec<(u8, f32)>,
        set_values_calls: usize,
    }
    impl Instrument for Recording {
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
            ParametersValues::default()
        }
        fn set_values(&mut self, values: &ParametersValues) {
            self.set_values_calls += 1;
            self.core.merge_values(values);
        }
        fn set_note(&mut self, note: u8, velocity: f32) {
            self.notes.push((note, velocity));
        }
        fn next_sample(&mut self) -> SampleType {
            0.0
        }
        fn panic(&mut self) {
            self.core.reset_midi_notes();
        }
    }

    #[test]
    fn midi_notes_are_tracked() {
        let mut r = Recording::default();
        r.on_midi(&MidiMessage::new_note(60, 127));
        r.on_midi(&MidiMessage::new_note(64, 127));
        assert_eq!(r.notes, vec![(60, 1.0), (64, 1.0)]);
        assert_eq!(
            r.notes_pressed_on_midi_controller(),
            BTreeSet::from([60, 64])
        );
        assert_eq!(
            r.take_midi_controller_updates(),
            MidiControllerUpdates {
                values: false,
                notes: true
            }
        );
        assert!(!r.take_midi_controller_updates().any(), "taking clears");

        r.on_midi(&MidiMessage::new_note(60, 0));
        assert_eq!(r.notes.last(), Some(&(60, 0.0)));
        assert_eq!(r.notes_pressed_on_midi_controller(), BTreeSet::from([64]));

        r.panic();
        assert!(r.notes_pressed_on_midi_controller().is_empty());
    }

    #[test]
    fn mapped_controllers_set_one_value() {
        let mut r = Recording::default();
        r.set_values(&ParametersValues::from([(Parameter::VOLUME, 1.0)]));
        let mut message = MidiMessage::new_controller(7, 64);
        message.parameter = Parameter::MONO;
        message.parameter_value = 0.5;
        r.on_midi(&message);
        assert_eq!(r.set_values_calls, 2);
        assert_eq!(r.core().value(Parameter::MONO), Some(0.5));
        assert_eq!(
            r.core().value(Parameter::VOLUME),
            Some(1.0),
            "other values are kept"
        );
        assert!(r.notes.is_empty());
        assert!(r.take_midi_controller_updates().values);
    }

    #[test]
    fn bank_addresses_each_instrument() {
        let mut instruments = Instruments::default();
        for id in InstrumentId::iter() {
            assert_eq!(instruments.instrument(id).id(), id);
            assert_eq!(instruments.instrument_mut(id).id(), id);
            assert!(!instruments.instrument(id).values().is_empty());
        }
        instruments.panic();
        for _ in 0..100 {
            assert_eq!(instruments.next_sample(), 0.0, "nothing is playing");
        }
    }
}
