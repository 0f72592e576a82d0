// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::types::{InstrumentId, Parameter};
use derive_more::Display as DeriveDisplay;
use midly::{live::LiveEvent, num::u4, MidiMessage as RawMessage};
use serde::{Deserialize, Serialize};

/// Newtype for MIDI channel.
#[derive(
    Clone, Copy, Debug, Default, DeriveDisplay, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct MidiChannel(pub u8);
#[allow(missing_docs)]
impl MidiChannel {
    pub const MIN_VALUE: u8 = 0;
    pub const MAX_VALUE: u8 = 15; // inclusive

    pub const fn new(value: u8) -> Self {
        Self(value)
    }
}
impl From<u4> for MidiChannel {
    fn from(value: u4) -> Self {
        Self(value.as_int())
    }
}

/// The parts of a channel message that routing and instruments care about.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChannelEvent {
    /// Note on with nonzero velocity, normalized to 0..1.
    NoteOn {
        #[allow(missing_docs)]
        note: u8,
        #[allow(missing_docs)]
        velocity: f32,
    },
    /// Note off, or note on with zero velocity.
    NoteOff {
        #[allow(missing_docs)]
        note: u8,
    },
    /// A controller change, value normalized to 0..1.
    Controller {
        #[allow(missing_docs)]
        cc: u8,
        #[allow(missing_docs)]
        value: f32,
    },
    /// Pitch bend normalized to -1..1, center 0.
    PitchBend(f32),
    /// A program change.
    ProgramChange(u8),
    /// Channel pressure, normalized to 0..1.
    Aftertouch(f32),
    /// Something we parse but don't act on.
    Other,
}

/// Splits raw bytes into a channel and a [ChannelEvent]. Returns None for
/// anything that isn't a complete channel message.
pub fn classify(bytes: &[u8]) -> Option<(MidiChannel, ChannelEvent)> {
    let LiveEvent::Midi { channel, message } = LiveEvent::parse(bytes).ok()? else {
        return None;
    };
    let event = match message {
        RawMessage::NoteOn { key, vel } if vel.as_int() > 0 => ChannelEvent::NoteOn {
            note: key.as_int(),
            velocity: vel.as_int() as f32 / 127.0,
        },
        RawMessage::NoteOn { key, .. } | RawMessage::NoteOff { key, .. } => {
            ChannelEvent::NoteOff { note: key.as_int() }
        }
        RawMessage::Controller { controller, value } => ChannelEvent::Controller {
            cc: controller.as_int(),
            value: value.as_int().min(127) as f32 / 127.0,
        },
        RawMessage::PitchBend { bend } => {
            ChannelEvent::PitchBend((bend.as_int() as f32 / 8192.0).clamp(-1.0, 1.0))
        }
        RawMessage::ProgramChange { program } => ChannelEvent::ProgramChange(program.as_int()),
        RawMessage::ChannelAftertouch { vel } => {
            ChannelEvent::Aftertouch(vel.as_int() as f32 / 127.0)
        }
        _ => ChannelEvent::Other,
    };
    Some((MidiChannel::from(channel), event))
}

/// One incoming MIDI message, with whatever routing resolved about it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MidiMessage {
    /// The raw bytes as they arrived.
    pub bytes: Vec<u8>,
    /// The instrument this copy is addressed to.
    pub instrument: Option<InstrumentId>,
    /// The parameter a mapped controller resolved to, or
    /// [Parameter::NONE].
    pub parameter: Parameter,
    /// The normalized value for [MidiMessage::parameter].
    pub parameter_value: f32,
    /// The input port name.
    pub port: String,
    /// Microseconds, as reported by the port.
    pub timestamp: u64,
}
impl MidiMessage {
    #[allow(missing_docs)]
    pub fn new(port: &str, timestamp: u64, bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            port: port.to_string(),
            timestamp,
            ..Default::default()
        }
    }

    /// Builds a note on (or, with velocity 0, a note off) on channel 0.
    pub fn new_note(note: u8, velocity: u8) -> Self {
        Self::new("", 0, &[0x90, note & 0x7f, velocity & 0x7f])
    }

    /// Builds a controller change on channel 0.
    pub fn new_controller(cc: u8, value: u8) -> Self {
        Self::new("", 0, &[0xb0, cc & 0x7f, value & 0x7f])
    }

    /// The parsed channel event, if any.
    pub fn event(&self) -> Option<(MidiChannel, ChannelEvent)> {
        classify(&self.bytes)
    }

    /// Whether routing mapped this message onto a parameter.
    pub fn has_parameter(&self) -> bool {
        self.parameter != Parameter::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn notes() {
        assert_eq!(
            classify(&[0x91, 60, 127]),
            Some((
                MidiChannel(1),
                ChannelEvent::NoteOn {
                    note: 60,
                    velocity: 1.0
                }
            ))
        );
        assert_eq!(
            classify(&[0x90, 60, 0]),
            Some((MidiChannel(0), ChannelEvent::NoteOff { note: 60 })),
            "note on with zero velocity is a note off"
        );
        assert_eq!(
            classify(&[0x8f, 61, 64]),
            Some((MidiChannel(15), ChannelEvent::NoteOff { note: 61 }))
        );
        assert_eq!(classify(&[0x90, 60]), None, "truncated messages are ignored");
        assert_eq!(classify(&[]), None);
    }

    #[test]
    fn pitch_bend_is_centered() {
        let Some((_, ChannelEvent::PitchBend(center))) = classify(&[0xe0, 0x00, 0x40]) else {
            panic!("expected a pitch bend");
        };
        assert_eq!(center, 0.0);
        let Some((channel, ChannelEvent::PitchBend(top))) = classify(&[0xe3, 0x7f, 0x7f]) else {
            panic!("expected a pitch bend");
        };
        assert_eq!(channel, MidiChannel(3));
        assert!(approx_eq!(f32, top, 8191.0 / 8192.0));
        let Some((_, ChannelEvent::PitchBend(bottom))) = classify(&[0xe0, 0x00, 0x00]) else {
            panic!("expected a pitch bend");
        };
        assert_eq!(bottom, -1.0);
    }

    #[test]
    fn controllers() {
        let m = MidiMessage::new_controller(74, 127);
        assert_eq!(
            m.event(),
            Some((MidiChannel(0), ChannelEvent::Controller { cc: 74, value: 1.0 }))
        );
        assert!(!m.has_parameter());
    }
}
