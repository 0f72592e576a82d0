// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::{
    composition::{Chainer, ChainerConfiguration, ChainerState, Sequencer, SequencerConfiguration, SequencerState},
    instruments::{BankStore, BuiltInBanks, Instruments},
    midi::MidiQueue,
    services::RecorderTap,
    types::{hard_clip, milliseconds_from_samples, InstrumentId, ParametersValues, SampleType, SAMPLE_RATE},
    util::{Analyser, RunningAverage},
};
use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::{collections::BTreeSet, sync::Arc, time::Instant};

// Feedback is dropped rather than queued without bound when nobody listens.
const EVENT_CAPACITY: usize = 1024;

/// Work that other threads hand to the engine. Commands run on the audio
/// thread at the start of the next fill, in the order they were sent.
#[derive(Clone, Debug)]
pub enum EngineCommand {
    /// Merges parameters into one instrument.
    SetInstrumentParams(InstrumentId, ParametersValues),
    /// Plays (or with velocity 0, releases) a note.
    SetInstrumentNote(InstrumentId, u8, f32),
    #[allow(missing_docs)]
    SetSequencerConfiguration(Box<SequencerConfiguration>),
    #[allow(missing_docs)]
    SetChainerConfiguration(Box<ChainerConfiguration>),
    /// Stops the chainer and sequencer and silences every instrument.
    Panic,
}

/// What the engine tells the rest of the app.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// A MIDI controller changed this instrument's parameters.
    InstrumentParams(InstrumentId, ParametersValues),
    /// The keys held on this instrument's MIDI controller changed.
    MidiNotes(InstrumentId, BTreeSet<u8>),
    #[allow(missing_docs)]
    SequencerState(SequencerState),
    #[allow(missing_docs)]
    ChainerState(ChainerState),
}

/// How hard the engine is working.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EngineStats {
    /// Average wall time of recent fills.
    pub synthesis_average_ms: f64,
    /// How much audio has been produced, in milliseconds.
    pub produced_ms: u64,
    /// How many samples the last fill produced.
    pub last_fill_samples: usize,
}

/// The cloneable, thread-safe side of an [Engine]: send commands, receive
/// events, read statistics.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    commands: Sender<EngineCommand>,
    events: Receiver<EngineEvent>,
    stats: Arc<AtomicCell<EngineStats>>,
}
impl EngineHandle {
    /// Queues a command for the next fill.
    pub fn send(&self, command: EngineCommand) {
        if let Err(e) = self.commands.send(command) {
            log::error!(target: "Engine", "engine is gone: {e:?}");
        }
    }

    #[allow(missing_docs)]
    pub fn set_instrument_params(&self, instrument: InstrumentId, values: ParametersValues) {
        self.send(EngineCommand::SetInstrumentParams(instrument, values));
    }

    #[allow(missing_docs)]
    pub fn set_instrument_note(&self, instrument: InstrumentId, note: u8, velocity: f32) {
        self.send(EngineCommand::SetInstrumentNote(instrument, note, velocity));
    }

    #[allow(missing_docs)]
    pub fn set_sequencer_configuration(&self, configuration: SequencerConfiguration) {
        self.send(EngineCommand::SetSequencerConfiguration(Box::new(configuration)));
    }

    #[allow(missing_docs)]
    pub fn set_chainer_configuration(&self, configuration: ChainerConfiguration) {
        self.send(EngineCommand::SetChainerConfiguration(Box::new(configuration)));
    }

    #[allow(missing_docs)]
    pub fn panic(&self) {
        self.send(EngineCommand::Panic);
    }

    /// Feedback from the engine. Integrate this into a select loop.
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    /// The most recent statistics.
    pub fn stats(&self) -> EngineStats {
        self.stats.load()
    }
}

/// Owns the instruments, the sequencer, and the chainer, and turns them into
/// audio one fill at a time. Lives on the audio thread; everyone else talks
/// to it through an [EngineHandle].
#[derive(Debug)]
pub struct Engine {
    instruments: Instruments,
    sequencer: Sequencer,
    chainer: Chainer,

    commands: Receiver<EngineCommand>,
    events: Sender<EngineEvent>,
    handle: EngineHandle,

    midi: Option<MidiQueue>,
    recorder: Option<RecorderTap>,
    analyser: Option<Arc<Analyser>>,

    produced_samples: u64,
    synthesis_duration_ms: RunningAverage,
    stats: Arc<AtomicCell<EngineStats>>,
}
impl Default for Engine {
    fn default() -> Self {
        Self::new(Arc::new(BuiltInBanks::default()))
    }
}
impl Engine {
    /// A stopped engine whose DX7 finds patches in `banks`.
    pub fn new(banks: Arc<dyn BankStore>) -> Self {
        let (command_sender, commands) = crossbeam_channel::unbounded();
        let (events, event_receiver) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let stats: Arc<AtomicCell<EngineStats>> = Default::default();
        Self {
            instruments: Instruments::new(banks),
            sequencer: Default::default(),
            chainer: Default::default(),
            commands,
            events,
            handle: EngineHandle {
                commands: command_sender,
                events: event_receiver,
                stats: Arc::clone(&stats),
            },
            midi: None,
            recorder: None,
            analyser: None,
            produced_samples: 0,
            synthesis_duration_ms: RunningAverage::new(SAMPLE_RATE / 2048, 0.0),
            stats,
        }
    }

    #[allow(missing_docs)]
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Routed MIDI is taken from `queue` at the start of every fill.
    pub fn set_midi_queue(&mut self, queue: MidiQueue) {
        self.midi = Some(queue);
    }

    /// Every produced sample also goes to `recorder` while it's accepting.
    pub fn set_recorder(&mut self, recorder: RecorderTap) {
        self.recorder = Some(recorder);
    }

    /// Every produced sample also goes to `analyser` while it's accepting.
    pub fn set_analyser(&mut self, analyser: Arc<Analyser>) {
        self.analyser = Some(analyser);
    }

    #[allow(missing_docs)]
    pub fn instruments(&self) -> &Instruments {
        &self.instruments
    }

    #[allow(missing_docs)]
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    #[allow(missing_docs)]
    pub fn chainer(&self) -> &Chainer {
        &self.chainer
    }

    /// Fills an interleaved buffer of `num_frames` frames. The engine is
    /// mono, so each frame gets the same sample in every channel.
    pub fn fill(&mut self, buffer: &mut [SampleType], num_frames: usize, num_channels: usize) {
        let num_channels = num_channels.max(1);
        let num_frames = num_frames.min(buffer.len() / num_channels);
        let frames = &mut buffer[..num_frames * num_channels];
        if num_channels == 1 {
            self.produce_samples(frames);
            return;
        }
        // Render mono into the front, then spread it out from the back so
        // nothing is overwritten before it's copied.
        self.produce_samples(&mut frames[..num_frames]);
        for frame in (0..num_frames).rev() {
            let sample = frames[frame];
            frames[frame * num_channels..(frame + 1) * num_channels].fill(sample);
        }
    }

    /// Renders `buffer.len()` mono samples: MIDI first, then queued
    /// commands, then one sample at a time through the chainer, the
    /// sequencer, and the instruments.
    pub fn produce_samples(&mut self, buffer: &mut [SampleType]) {
        let start = Instant::now();

        self.dispatch_midi();
        self.dispatch_commands();

        for slot in buffer.iter_mut() {
            if self.chainer.next(&mut self.sequencer, &mut self.instruments) {
                self.notify(EngineEvent::ChainerState(self.chainer.state()));
            }
            if self.sequencer.next(&mut self.instruments) {
                self.notify(EngineEvent::SequencerState(self.sequencer.state()));
            }

            let sample = hard_clip(self.instruments.next_sample());
            *slot = sample;

            if let Some(recorder) = self.recorder.as_ref() {
                if recorder.is_accepting() {
                    recorder.push(sample);
                }
            }
            if let Some(analyser) = self.analyser.as_ref() {
                if analyser.is_accepting() {
                    analyser.push(sample);
                }
            }
        }
        self.produced_samples += buffer.len() as u64;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.stats.store(EngineStats {
            synthesis_average_ms: self.synthesis_duration_ms.add(elapsed_ms),
            produced_ms: milliseconds_from_samples(self.produced_samples),
            last_fill_samples: buffer.len(),
        });
    }

    fn dispatch_midi(&mut self) {
        let Some(queue) = self.midi.as_ref() else {
            return;
        };
        let messages = queue.take();
        if messages.is_empty() {
            return;
        }
        for message in messages.iter() {
            match message.instrument {
                Some(id) => self.instruments.instrument_mut(id).on_midi(message),
                None => debug_assert!(false, "unrouted MIDI message {message:?}"),
            }
        }

        let mut feedback = Vec::default();
        self.instruments.for_each_mut(|instrument| {
            let updates = instrument.take_midi_controller_updates();
            if updates.values {
                feedback.push(EngineEvent::InstrumentParams(instrument.id(), instrument.values()));
            }
            if updates.notes {
                feedback.push(EngineEvent::MidiNotes(
                    instrument.id(),
                    instrument.notes_pressed_on_midi_controller(),
                ));
            }
        });
        for event in feedback {
            self.notify(event);
        }
    }

    fn dispatch_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.execute(command);
        }
    }

    fn execute(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetInstrumentParams(id, values) => {
                self.instruments.instrument_mut(id).set_values(&values);
            }
            EngineCommand::SetInstrumentNote(id, note, velocity) => {
                self.instruments.instrument_mut(id).set_note(note, velocity);
            }
            EngineCommand::SetSequencerConfiguration(configuration) => {
                self.sequencer.apply(*configuration, false, &mut self.instruments);
            }
            EngineCommand::SetChainerConfiguration(configuration) => {
                self.chainer
                    .apply(*configuration, &mut self.sequencer, &mut self.instruments);
            }
            EngineCommand::Panic => {
                log::info!(target: "Engine", "panic");
                self.chainer.panic();
                self.sequencer.panic(&mut self.instruments);
                self.instruments.panic();
            }
        }
    }

    fn notify(&self, event: EngineEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            log::trace!(target: "Engine", "dropping {event:?}");
        }
    }
}
