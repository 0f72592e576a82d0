// Copyright (c) 2023 Mike Tsao. All rights reserved.

use super::sequencer::{Sequencer, SequencerAction, SequencerConfiguration};
use crate::instruments::NoteSink;
use derivative::Derivative;

/// How many links a fresh chain has.
pub const DEFAULT_LINK_COUNT: usize = 5;

/// One entry in a chain: a named sequence and how many times to play it.
#[derive(Clone, Debug, Derivative)]
#[derivative(Default)]
pub struct Link {
    /// The sequence's preset name. A link without a name never plays.
    pub name: String,
    #[allow(missing_docs)]
    #[derivative(Default(value = "1"))]
    pub runs: usize,
    #[allow(missing_docs)]
    pub sequence: SequencerConfiguration,
    valid: bool,
}
impl Link {
    #[allow(missing_docs)]
    pub fn new(name: &str, runs: usize, sequence: SequencerConfiguration) -> Self {
        Self {
            name: name.to_string(),
            runs,
            sequence,
            valid: false,
        }
    }

    /// Whether this link has anything to play, as of the last
    /// [Chainer::apply()].
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    fn validate(&mut self) -> bool {
        self.valid =
            !self.name.is_empty() && self.runs > 0 && self.sequence.has_playable_steps();
        self.valid
    }
}

/// An ordered list of [Link]s plus an optional transport command.
#[derive(Clone, Debug, Derivative)]
#[derivative(Default)]
pub struct ChainerConfiguration {
    /// Consumed once by the chainer, then reset.
    pub action: SequencerAction,
    #[allow(missing_docs)]
    #[derivative(Default(value = "vec![Link::default(); DEFAULT_LINK_COUNT]"))]
    pub chain: Vec<Link>,
    /// Where play and stop put the chain. `None` means the first link.
    #[derivative(Default(value = "Some(0)"))]
    pub action_link: Option<usize>,
    valid: bool,
}
impl ChainerConfiguration {
    /// Whether any link is playable, as of the last [Chainer::apply()].
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns a copy carrying `action`.
    pub fn with_action(mut self, action: SequencerAction) -> Self {
        self.action = action;
        self
    }

    fn validate(&mut self) {
        // Every link is validated, so no short-circuiting.
        self.valid = self
            .chain
            .iter_mut()
            .fold(false, |any, link| link.validate() || any);
    }
}

/// Where the chainer is, for display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainerState {
    #[allow(missing_docs)]
    pub link_index: usize,
    /// How many times the current link has already finished.
    pub link_run: usize,
    #[allow(missing_docs)]
    pub playing: bool,
}

/// Plays a chain of sequences by feeding them one at a time to a
/// [Sequencer] as [SequencerAction::PlayOnce], moving on each time the
/// sequencer stops.
#[derive(Debug, Default)]
pub struct Chainer {
    state: ChainerState,
    cfg: ChainerConfiguration,
}
impl Chainer {
    #[allow(missing_docs)]
    pub fn state(&self) -> ChainerState {
        self.state
    }

    /// The configuration most recently applied, with link validity filled
    /// in.
    pub fn configuration(&self) -> &ChainerConfiguration {
        &self.cfg
    }

    /// Replaces the chain. Stop and pause also stop the sequencer
    /// immediately.
    pub fn apply(&mut self, cfg: ChainerConfiguration, sequencer: &mut Sequencer, sink: &mut dyn NoteSink) {
        if cfg.action != SequencerAction::None {
            log::info!(target: "Chainer", "action={}", cfg.action);
        }
        if matches!(cfg.action, SequencerAction::Stop | SequencerAction::Pause) {
            let stop = SequencerConfiguration::default().with_action(SequencerAction::Stop);
            sequencer.apply(stop, true, sink);
        }

        self.cfg = cfg;
        self.cfg.validate();
        self.state.playing = false;
    }

    /// Advances one sample, ahead of [Sequencer::next()]. Returns true when
    /// an action was consumed or the chain moved to another link.
    pub fn next(&mut self, sequencer: &mut Sequencer, sink: &mut dyn NoteSink) -> bool {
        let mut report_state = self.cfg.action != SequencerAction::None;
        let mut play_link = false;

        if self.state.playing && !sequencer.state().playing {
            log::info!(
                target: "Chainer",
                "{}/{} done",
                self.state.link_index,
                self.state.link_run
            );
            if self.advance_to_next() {
                log::debug!(target: "Chainer", "looped");
            }
            play_link = true;
            report_state = true;
        }

        match self.cfg.action {
            SequencerAction::None => {}
            SequencerAction::Stop | SequencerAction::Pause => {
                self.state.playing = false;
                self.state.link_run = 0;
                self.state.link_index = self.action_link();
            }
            SequencerAction::Play | SequencerAction::PlayOnce if self.cfg.valid => {
                self.state.playing = true;
                self.state.link_run = 0;
                self.state.link_index = self.action_link();
                if !self.cfg.chain[self.state.link_index].valid {
                    self.skip_invalid_links();
                }
                play_link = true;
            }
            action => {
                log::debug!(target: "Chainer", "ignoring {action}");
            }
        }
        self.cfg.action = SequencerAction::None;

        if play_link {
            let sequence = self.cfg.chain[self.state.link_index]
                .sequence
                .clone()
                .with_action(SequencerAction::PlayOnce);
            sequencer.apply(sequence, true, sink);
        }
        report_state
    }

    /// Forgets where the chain was.
    pub fn panic(&mut self) {
        self.state = ChainerState::default();
    }

    fn action_link(&self) -> usize {
        match self.cfg.action_link {
            Some(link) if link < self.cfg.chain.len() => link,
            Some(link) => {
                log::error!(target: "Chainer", "no link {link}");
                0
            }
            None => 0,
        }
    }

    // Either repeats the current link or moves to the next valid one.
    // Returns true if the chain wrapped around.
    fn advance_to_next(&mut self) -> bool {
        if !self.cfg.valid {
            return false;
        }
        if self.state.link_run + 1 < self.cfg.chain[self.state.link_index].runs {
            self.state.link_run += 1;
            return false;
        }
        let current = self.state.link_index;
        self.state.link_run = 0;
        self.skip_invalid_links();
        self.state.link_index <= current
    }

    fn skip_invalid_links(&mut self) {
        let len = self.cfg.chain.len();
        for _ in 0..len {
            self.state.link_index = (self.state.link_index + 1) % len;
            if self.cfg.chain[self.state.link_index].valid {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        composition::{sequencer::tests::RecordingSink, NoteMode},
        types::InstrumentId,
    };

    fn sequence(note: u8) -> SequencerConfiguration {
        let mut cfg = SequencerConfiguration::new(600, 0.3, 2);
        cfg.set_step_state(InstrumentId::SynthMachine, 0, note, NoteMode::Press);
        cfg
    }

    fn run(chainer: &mut Chainer, sequencer: &mut Sequencer, sink: &mut RecordingSink, samples: usize) {
        for _ in 0..samples {
            chainer.next(sequencer, sink);
            sequencer.next(sink);
            sink.sample += 1;
        }
    }

    fn notes_on(sink: &RecordingSink) -> Vec<u8> {
        sink.events
            .iter()
            .filter(|e| e.3 > 0.0)
            .map(|e| e.2)
            .collect()
    }

    #[test]
    fn default_chain() {
        let cfg = ChainerConfiguration::default();
        assert_eq!(cfg.chain.len(), DEFAULT_LINK_COUNT);
        assert!(cfg.chain.iter().all(|l| l.runs == 1 && l.name.is_empty()));
    }

    #[test]
    fn link_validity() {
        let mut chainer = Chainer::default();
        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();

        let mut empty = SequencerConfiguration::default();
        empty.set_step_state(InstrumentId::Dx7, 40, 60, NoteMode::Press);
        let cfg = ChainerConfiguration {
            chain: vec![
                Link::new("out of range", 1, empty),
                Link::new("", 1, sequence(60)),
                Link::new("never", 0, sequence(60)),
                Link::new("good", 2, sequence(60)),
            ],
            ..Default::default()
        };
        chainer.apply(cfg, &mut sequencer, &mut sink);
        let validity: Vec<bool> = chainer
            .configuration()
            .chain
            .iter()
            .map(|l| l.is_valid())
            .collect();
        assert_eq!(validity, vec![false, false, false, true]);
        assert!(chainer.configuration().is_valid());

        chainer.apply(ChainerConfiguration::default(), &mut sequencer, &mut sink);
        assert!(!chainer.configuration().is_valid());
        chainer.apply(
            ChainerConfiguration::default().with_action(SequencerAction::Play),
            &mut sequencer,
            &mut sink,
        );
        assert!(chainer.next(&mut sequencer, &mut sink), "the action is consumed");
        assert!(!chainer.state().playing, "an invalid chain can't play");
    }

    #[test]
    fn plays_links_in_order_with_repeats() {
        let mut chainer = Chainer::default();
        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();
        let cfg = ChainerConfiguration {
            chain: vec![
                Link::new("a", 2, sequence(60)),
                Link::new("empty", 3, SequencerConfiguration::default()),
                Link::new("b", 1, sequence(62)),
            ],
            ..Default::default()
        }
        .with_action(SequencerAction::Play);
        chainer.apply(cfg, &mut sequencer, &mut sink);

        run(&mut chainer, &mut sequencer, &mut sink, 1);
        assert!(chainer.state().playing);
        assert!(sequencer.state().playing);
        assert!(sequencer.state().once);
        assert!(sequencer.state().chaining);

        // Each pass of a two-step sequence takes two beats, plus a sample for
        // the handoff.
        let pass = 2 * sequencer.beat_samples() + 1;
        run(&mut chainer, &mut sequencer, &mut sink, 4 * pass);
        assert_eq!(
            notes_on(&sink)[..4],
            [60, 60, 62, 60],
            "a plays twice, the empty link is skipped, then b, then around again"
        );
        assert_eq!(chainer.state().link_index, 0);
    }

    #[test]
    fn starting_on_an_invalid_link_skips_ahead() {
        let mut chainer = Chainer::default();
        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();
        let mut cfg = ChainerConfiguration {
            chain: vec![
                Link::new("empty", 3, SequencerConfiguration::default()),
                Link::new("b", 1, sequence(62)),
            ],
            ..Default::default()
        }
        .with_action(SequencerAction::PlayOnce);
        cfg.action_link = Some(0);
        chainer.apply(cfg, &mut sequencer, &mut sink);
        run(&mut chainer, &mut sequencer, &mut sink, 1);
        assert_eq!(chainer.state().link_index, 1);
        assert_eq!(chainer.state().link_run, 0);
        assert_eq!(notes_on(&sink), vec![62]);
    }

    #[test]
    fn stop_stops_the_sequencer() {
        let mut chainer = Chainer::default();
        let mut sequencer = Sequencer::default();
        let mut sink = RecordingSink::default();
        let cfg = ChainerConfiguration {
            chain: vec![Link::new("a", 1, sequence(60))],
            ..Default::default()
        };
        chainer.apply(cfg.clone().with_action(SequencerAction::Play), &mut sequencer, &mut sink);
        run(&mut chainer, &mut sequencer, &mut sink, 10);
        assert!(sequencer.state().playing);

        chainer.apply(cfg.with_action(SequencerAction::Stop), &mut sequencer, &mut sink);
        assert!(!sequencer.state().playing);
        assert_eq!(sink.events.last().map(|e| e.3), Some(0.0));
        run(&mut chainer, &mut sequencer, &mut sink, 10);
        assert!(!chainer.state().playing);
        assert_eq!(chainer.state(), ChainerState::default());
    }
}
