// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::{
    instruments::NoteSink,
    types::{equivalent, InstrumentId, ACCENT_PRESS_VELOCITY, DEFAULT_PRESS_VELOCITY, SAMPLE_RATE},
};
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ops::RangeInclusive};
use strum::EnumCount;
use strum_macros::{Display, EnumIter, FromRepr, IntoStaticStr};

/// Allowed tempos, in beats per minute.
pub const TEMPO_RANGE: RangeInclusive<u32> = 40..=700;

/// Allowed sequence lengths.
pub const STEP_COUNT_RANGE: RangeInclusive<usize> = 2..=64;

/// What a step does with one note. The discriminants are what sequence
/// presets store.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    EnumIter,
    FromRepr,
    IntoStaticStr,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum NoteMode {
    /// Nothing.
    #[default]
    Off,
    /// Play the note at normal velocity, releasing it at the end of the duty.
    Press,
    /// Like [NoteMode::Press], but at full velocity. Always retriggers.
    Accent,
    /// Keep the note sounding into the next step if it also holds or
    /// presses the same note.
    Hold,
}

/// A one-shot transport command carried by a configuration.
#[derive(
    Clone, Copy, Debug, Default, Display, EnumIter, IntoStaticStr, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum SequencerAction {
    #[default]
    #[allow(missing_docs)]
    None,
    /// Loop until told otherwise.
    Play,
    /// Play through to the last step, then stop.
    PlayOnce,
    /// Stop, keeping the current step.
    Pause,
    /// [SequencerAction::Play] if paused, otherwise [SequencerAction::Pause].
    TogglePlay,
    /// Stop and rewind.
    Stop,
}

/// One instrument's lane in a sequence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstrumentSteps {
    /// Keyed by (step, note). Only non-[NoteMode::Off] entries are stored.
    pub steps: BTreeMap<(usize, u8), NoteMode>,
    /// A muted lane plays nothing.
    pub muted: bool,
    /// First visible row in a step grid editor.
    pub ui_first_row: i32,
    /// First visible column in a step grid editor.
    pub ui_first_col: i32,
}

/// Everything the [Sequencer] needs to play a sequence, plus an optional
/// transport command.
#[derive(Clone, Debug, Derivative)]
#[derivative(Default)]
pub struct SequencerConfiguration {
    /// Fraction of each beat that pressed notes stay down.
    #[derivative(Default(value = "0.3"))]
    pub duty: f32,
    /// Beats per minute. One step is one beat.
    #[derivative(Default(value = "90"))]
    pub tempo: u32,
    #[allow(missing_docs)]
    #[derivative(Default(value = "16"))]
    pub step_count: usize,

    instruments: [InstrumentSteps; InstrumentId::COUNT],

    /// Consumed once by the sequencer, then reset.
    pub action: SequencerAction,
    /// Where [SequencerAction::Play], [SequencerAction::PlayOnce] and
    /// [SequencerAction::Stop] put the playhead. `None` leaves it alone.
    #[derivative(Default(value = "Some(0)"))]
    pub action_step: Option<usize>,

    /// The lane a step grid editor shows.
    #[derivative(Default(value = "InstrumentId::SynthMachine"))]
    pub ui_selected_instrument: InstrumentId,
}
impl SequencerConfiguration {
    /// An empty sequence with the given timing. Out-of-range values are
    /// clamped when the [Sequencer] applies it.
    pub fn new(tempo: u32, duty: f32, step_count: usize) -> Self {
        Self {
            tempo,
            duty,
            step_count,
            ..Default::default()
        }
    }

    #[allow(missing_docs)]
    pub fn instrument(&self, instrument: InstrumentId) -> &InstrumentSteps {
        &self.instruments[instrument.index()]
    }

    #[allow(missing_docs)]
    pub fn instrument_mut(&mut self, instrument: InstrumentId) -> &mut InstrumentSteps {
        &mut self.instruments[instrument.index()]
    }

    #[allow(missing_docs)]
    pub fn step_state(&self, instrument: InstrumentId, step: usize, note: u8) -> NoteMode {
        self.instrument(instrument)
            .steps
            .get(&(step, note))
            .copied()
            .unwrap_or_default()
    }

    /// Setting a step to [NoteMode::Off] erases it.
    pub fn set_step_state(&mut self, instrument: InstrumentId, step: usize, note: u8, mode: NoteMode) {
        let steps = &mut self.instrument_mut(instrument).steps;
        if mode == NoteMode::Off {
            steps.remove(&(step, note));
        } else {
            steps.insert((step, note), mode);
        }
    }

    /// Flips a step between [NoteMode::Off] and [NoteMode::Press].
    pub fn toggle_step_state(&mut self, instrument: InstrumentId, step: usize, note: u8) {
        let mode = match self.step_state(instrument, step, note) {
            NoteMode::Off => NoteMode::Press,
            _ => NoteMode::Off,
        };
        self.set_step_state(instrument, step, note, mode);
    }

    /// True if any unmuted lane has a note inside `step_count`.
    pub fn has_playable_steps(&self) -> bool {
        self.instruments.iter().any(|lane| {
            !lane.muted
                && lane
                    .steps
                    .iter()
                    .any(|(&(step, _), &mode)| mode != NoteMode::Off && step < self.step_count)
        })
    }

    /// Returns a copy carrying `action`.
    pub fn with_action(mut self, action: SequencerAction) -> Self {
        self.action = action;
        self
    }
}

/// What the sequencer is doing, for display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequencerState {
    #[allow(missing_docs)]
    pub active_step: usize,
    #[allow(missing_docs)]
    pub playing: bool,
    /// Playing with [SequencerAction::PlayOnce].
    pub once: bool,
    /// Driven by the [Chainer](super::Chainer) rather than directly.
    pub chaining: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StepNote {
    instrument: InstrumentId,
    note: u8,
    mode: NoteMode,
}

fn find_mode(notes: &[StepNote], instrument: InstrumentId, note: u8) -> NoteMode {
    notes
        .iter()
        .find(|n| n.instrument == instrument && n.note == note)
        .map(|n| n.mode)
        .unwrap_or_default()
}

/// A step sequencer that advances one sample per [Sequencer::next()] and
/// plays notes into a [NoteSink].
#[derive(Debug)]
pub struct Sequencer {
    state: SequencerState,
    cfg: SequencerConfiguration,
    cfg_changed: bool,

    beat_samples: usize,
    duty_samples: usize,
    samples_since_last_beat: usize,

    // Unmuted notes for each step.
    steps: Vec<Vec<StepNote>>,
    playing_notes: Vec<StepNote>,
}
impl Default for Sequencer {
    fn default() -> Self {
        let mut r = Self {
            state: Default::default(),
            cfg: SequencerConfiguration {
                tempo: 0,
                ..Default::default()
            },
            cfg_changed: true,
            beat_samples: 0,
            duty_samples: 0,
            samples_since_last_beat: 0,
            steps: Default::default(),
            playing_notes: Default::default(),
        };
        r.load(SequencerConfiguration::default(), false);
        r
    }
}
impl Sequencer {
    #[allow(missing_docs)]
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// The configuration most recently applied.
    pub fn configuration(&self) -> &SequencerConfiguration {
        &self.cfg
    }

    /// Samples per step at the current tempo.
    pub fn beat_samples(&self) -> usize {
        self.beat_samples
    }

    /// Samples into each step at which pressed notes are released.
    pub fn duty_samples(&self) -> usize {
        self.duty_samples
    }

    /// Replaces the sequence. A [SequencerAction::Stop] takes effect
    /// immediately; other actions wait for the next [Sequencer::next()].
    pub fn apply(&mut self, cfg: SequencerConfiguration, chaining: bool, sink: &mut dyn NoteSink) {
        if cfg.action != SequencerAction::None {
            log::info!(
                target: "Sequencer",
                "action={} action_step={:?}",
                cfg.action,
                cfg.action_step
            );
        }
        if cfg.action == SequencerAction::Stop {
            self.stop_all_playing_notes(sink);
            self.state.playing = false;
            self.state.active_step = cfg.action_step.unwrap_or(0);
        }
        self.load(cfg, chaining);
    }

    fn load(&mut self, mut cfg: SequencerConfiguration, chaining: bool) {
        cfg.tempo = cfg.tempo.clamp(*TEMPO_RANGE.start(), *TEMPO_RANGE.end());
        cfg.step_count = cfg
            .step_count
            .clamp(*STEP_COUNT_RANGE.start(), *STEP_COUNT_RANGE.end());
        cfg.duty = cfg.duty.clamp(0.0, 1.0);

        if cfg.step_count != self.cfg.step_count {
            self.state.active_step %= cfg.step_count;
        }

        if cfg.tempo != self.cfg.tempo || !equivalent(cfg.duty, self.cfg.duty) {
            self.beat_samples = SAMPLE_RATE * 60 / cfg.tempo as usize;
            self.duty_samples = (self.beat_samples as f32 * cfg.duty) as usize;
        }

        let mut steps = vec![Vec::default(); cfg.step_count];
        for (index, lane) in cfg.instruments.iter().enumerate() {
            if lane.muted {
                continue;
            }
            let Some(instrument) = InstrumentId::from_repr(index as i32 + 1) else {
                continue;
            };
            for (&(step, note), &mode) in lane.steps.iter() {
                if mode == NoteMode::Off || step >= steps.len() {
                    continue;
                }
                steps[step].push(StepNote {
                    instrument,
                    note,
                    mode,
                });
            }
        }
        self.steps = steps;
        self.cfg = cfg;
        self.cfg_changed = true;
        self.state.chaining = chaining;
    }

    /// Advances one sample. Returns true when the state changed in a way
    /// someone displaying it would care about.
    pub fn next(&mut self, sink: &mut dyn NoteSink) -> bool {
        let mut start_notes = false;
        let mut report_state = self.cfg_changed;

        if self.cfg.action != SequencerAction::None {
            if self.cfg.action == SequencerAction::TogglePlay {
                self.cfg.action = if self.state.playing {
                    SequencerAction::Pause
                } else {
                    SequencerAction::Play
                };
            }
            match self.cfg.action {
                SequencerAction::Pause => {
                    self.stop_all_playing_notes(sink);
                    self.state.playing = false;
                }
                SequencerAction::Play | SequencerAction::PlayOnce => {
                    self.state.playing = true;
                    self.state.once = self.cfg.action == SequencerAction::PlayOnce;
                    if let Some(step) = self.cfg.action_step {
                        self.state.active_step = step;
                    }
                    self.samples_since_last_beat = 0;
                    start_notes = true;
                }
                _ => {}
            }
            self.state.active_step %= self.cfg.step_count;
            report_state = true;
            self.cfg.action = SequencerAction::None;
        }

        if self.state.playing {
            let do_next_step = self.samples_since_last_beat >= self.beat_samples;
            // Exact match: the duty ends on one particular sample of the beat.
            let do_duty_end = self.samples_since_last_beat == self.duty_samples;

            if do_next_step {
                self.state.active_step = (self.state.active_step + 1) % self.cfg.step_count;
                self.samples_since_last_beat = 0;

                if self.state.once && self.state.active_step == 0 {
                    self.stop_all_playing_notes(sink);
                    self.state.playing = false;
                } else {
                    start_notes = true;
                }
                report_state = true;
            } else if do_duty_end {
                self.stop_playing_previous_notes(sink);
            }

            if start_notes {
                self.stop_playing_previous_notes(sink);
                self.start_playing_new_notes(sink);
            }
            self.samples_since_last_beat += 1;
        }

        self.cfg_changed = false;
        report_state
    }

    /// Stops, rewinds, and releases every note this sequencer started.
    pub fn panic(&mut self, sink: &mut dyn NoteSink) {
        self.state = SequencerState::default();
        self.samples_since_last_beat = 0;
        self.cfg_changed = true;
        self.stop_all_playing_notes(sink);
    }

    fn stop_all_playing_notes(&mut self, sink: &mut dyn NoteSink) {
        for n in self.playing_notes.drain(..) {
            sink.set_instrument_note(n.instrument, n.note, 0.0);
        }
    }

    // Releases notes that shouldn't continue into the active step: anything
    // the step doesn't play, every press or accent, and holds that the step
    // accents.
    fn stop_playing_previous_notes(&mut self, sink: &mut dyn NoteSink) {
        let current = &self.steps[self.state.active_step];
        self.playing_notes.retain(|playing| {
            let current_mode = find_mode(current, playing.instrument, playing.note);
            let stopped = current_mode == NoteMode::Off
                || matches!(playing.mode, NoteMode::Press | NoteMode::Accent)
                || (playing.mode == NoteMode::Hold && current_mode == NoteMode::Accent);
            if stopped {
                sink.set_instrument_note(playing.instrument, playing.note, 0.0);
            }
            !stopped
        });
    }

    fn start_playing_new_notes(&mut self, sink: &mut dyn NoteSink) {
        for current in self.steps[self.state.active_step].iter() {
            if find_mode(&self.playing_notes, current.instrument, current.note) == NoteMode::Off {
                let velocity = if current.mode == NoteMode::Accent {
                    ACCENT_PRESS_VELOCITY
                } else {
                    DEFAULT_PRESS_VELOCITY
                };
                sink.set_instrument_note(current.instrument, current.note, velocity);
                self.playing_notes.push(*current);
            } else {
                for playing in self
                    .playing_notes
                    .iter_mut()
                    .filter(|p| p.instrument == current.instrument && p.note == current.note)
                {
                    *playing = *current;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every note event it receives, stamped with the sample it
    /// arrived on.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) sample: usize,
        pub(crate) events: Vec<(usize, InstrumentId, u8, f32)>,
    }
    impl NoteSink for RecordingSink {
        fn set_instrument_note(&mut self, instrument: InstrumentId, note: u8, velocity: f32) {
            self.events.push((self.sample, instrument, note, velocity));
        }
    }
    impl RecordingSink {
        pub(crate) fn run(&mut self, sequencer: &mut Sequencer, samples: usize) {
            for _ in 0..samples {
                sequencer.next(self);
                self.sample += 1;
            }
        }
    }

    fn configuration() -> SequencerConfiguration {
        SequencerConfiguration {
            tempo: 120,
            duty: 0.5,
            step_count: 16,
            ..Default::default()
        }
    }

    #[test]
    fn step_editing() {
        let mut cfg = SequencerConfiguration::default();
        let synth = InstrumentId::SynthMachine;
        assert_eq!(cfg.step_state(synth, 0, 60), NoteMode::Off);
        assert!(!cfg.has_playable_steps());

        cfg.toggle_step_state(synth, 0, 60);
        assert_eq!(cfg.step_state(synth, 0, 60), NoteMode::Press);
        assert!(cfg.has_playable_steps());

        cfg.set_step_state(synth, 0, 60, NoteMode::Hold);
        assert_eq!(cfg.step_state(synth, 0, 60), NoteMode::Hold);
        cfg.toggle_step_state(synth, 0, 60);
        assert!(cfg.instrument(synth).steps.is_empty(), "Off erases");

        cfg.set_step_state(synth, 20, 60, NoteMode::Press);
        assert!(!cfg.has_playable_steps(), "step 20 is past step_count");
        cfg.set_step_state(InstrumentId::Tb303, 1, 40, NoteMode::Accent);
        cfg.instrument_mut(InstrumentId::Tb303).muted = true;
        assert!(!cfg.has_playable_steps(), "muted lanes don't count");
    }

    #[test]
    fn configuration_is_clamped() {
        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();
        sequencer.apply(
            SequencerConfiguration {
                tempo: 5000,
                step_count: 1,
                duty: 2.0,
                ..Default::default()
            },
            false,
            &mut sink,
        );
        assert_eq!(sequencer.configuration().tempo, 700);
        assert_eq!(sequencer.configuration().step_count, 2);
        assert_eq!(sequencer.beat_samples(), SAMPLE_RATE * 60 / 700);
        assert_eq!(sequencer.duty_samples(), sequencer.beat_samples());
    }

    #[test]
    fn step_timing_is_sample_accurate() {
        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();
        let mut cfg = configuration();
        cfg.set_step_state(InstrumentId::SynthMachine, 3, 60, NoteMode::Press);
        sequencer.apply(cfg.with_action(SequencerAction::Play), false, &mut sink);

        let beat = sequencer.beat_samples();
        assert_eq!(beat, SAMPLE_RATE * 60 / 120);

        sink.run(&mut sequencer, 3 * beat);
        assert_eq!(sequencer.state().active_step, 2);
        assert!(sink.events.is_empty());

        sink.run(&mut sequencer, 1);
        assert_eq!(sequencer.state().active_step, 3);
        assert_eq!(
            sink.events,
            vec![(
                3 * beat,
                InstrumentId::SynthMachine,
                60,
                DEFAULT_PRESS_VELOCITY
            )],
            "the note starts on exactly the first sample of step 3"
        );

        let duty = sequencer.duty_samples();
        sink.run(&mut sequencer, duty);
        assert_eq!(
            sink.events.last(),
            Some(&(
                3 * beat + duty,
                InstrumentId::SynthMachine,
                60,
                0.0
            )),
            "and stops when the duty runs out"
        );
    }

    #[test]
    fn holds_continue_and_accents_retrigger() {
        let synth = InstrumentId::SynthMachine;
        let mut cfg = configuration();
        cfg.set_step_state(synth, 0, 60, NoteMode::Hold);
        cfg.set_step_state(synth, 1, 60, NoteMode::Hold);
        cfg.set_step_state(synth, 2, 60, NoteMode::Accent);

        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();
        sequencer.apply(cfg.with_action(SequencerAction::Play), false, &mut sink);
        let beat = sequencer.beat_samples();
        let duty = sequencer.duty_samples();

        sink.run(&mut sequencer, 2 * beat);
        assert_eq!(
            sink.events,
            vec![(0, synth, 60, DEFAULT_PRESS_VELOCITY)],
            "a held note isn't retriggered or released at duty end"
        );

        sink.run(&mut sequencer, beat);
        assert_eq!(
            &sink.events[1..],
            &[
                (2 * beat, synth, 60, 0.0),
                (2 * beat, synth, 60, ACCENT_PRESS_VELOCITY),
                (2 * beat + duty, synth, 60, 0.0),
            ],
            "an accent retriggers over a hold and ends with its duty"
        );
    }

    #[test]
    fn play_once_stops_at_the_end() {
        let mut cfg = configuration();
        cfg.step_count = 4;
        cfg.set_step_state(InstrumentId::Tb303, 3, 40, NoteMode::Hold);

        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();
        sequencer.apply(cfg.with_action(SequencerAction::PlayOnce), false, &mut sink);
        let beat = sequencer.beat_samples();

        sink.run(&mut sequencer, 1);
        assert!(sequencer.state().playing);
        assert!(sequencer.state().once);

        sink.run(&mut sequencer, 4 * beat);
        assert!(!sequencer.state().playing);
        assert_eq!(sequencer.state().active_step, 0);
        assert_eq!(
            sink.events.last(),
            Some(&(4 * beat, InstrumentId::Tb303, 40, 0.0)),
            "wrapping to step 0 releases everything"
        );
    }

    #[test]
    fn toggle_pause_and_stop() {
        let synth = InstrumentId::SynthMachine;
        let mut cfg = configuration();
        cfg.set_step_state(synth, 0, 60, NoteMode::Hold);
        cfg.set_step_state(synth, 1, 60, NoteMode::Hold);

        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();
        sequencer.apply(cfg.clone().with_action(SequencerAction::TogglePlay), false, &mut sink);
        let beat = sequencer.beat_samples();
        sink.run(&mut sequencer, beat + 1);
        assert!(sequencer.state().playing);
        assert_eq!(sequencer.state().active_step, 1);

        sequencer.apply(cfg.clone().with_action(SequencerAction::TogglePlay), false, &mut sink);
        assert!(sequencer.state().playing, "pause waits for next()");
        sink.run(&mut sequencer, 1);
        assert!(!sequencer.state().playing);
        assert_eq!(sink.events.last().map(|e| e.3), Some(0.0));
        assert_eq!(sequencer.state().active_step, 1, "pause keeps the playhead");

        let mut stop = cfg.with_action(SequencerAction::Stop);
        stop.action_step = Some(5);
        sequencer.apply(stop, false, &mut sink);
        assert_eq!(sequencer.state().active_step, 5, "stop takes effect at once");
    }

    #[test]
    fn next_reports_changes() {
        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();
        assert!(sequencer.next(&mut sink), "a fresh configuration is news");
        assert!(!sequencer.next(&mut sink));

        sequencer.apply(configuration(), true, &mut sink);
        assert!(sequencer.next(&mut sink));
        assert!(sequencer.state().chaining);
    }

    #[test]
    fn panic_releases_everything() {
        let mut cfg = configuration();
        cfg.set_step_state(InstrumentId::Dx7, 0, 60, NoteMode::Hold);
        cfg.set_step_state(InstrumentId::Dx7, 0, 64, NoteMode::Hold);
        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();
        sequencer.apply(cfg.with_action(SequencerAction::Play), false, &mut sink);
        sink.run(&mut sequencer, 10);
        assert_eq!(sink.events.len(), 2);

        sequencer.panic(&mut sink);
        assert_eq!(sink.events.len(), 4);
        assert!(sink.events[2..].iter().all(|e| e.3 == 0.0));
        assert_eq!(sequencer.state(), SequencerState::default());
    }
}
