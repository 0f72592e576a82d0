// Copyright (c) 2023 Mike Tsao. All rights reserved.

use super::{classify, ChannelEvent, MidiChannel, MidiMessage};
use crate::types::{InstrumentId, Parameter};
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};
use strum::IntoEnumIterator;

// Controllers persist by parameter name so that files survive id changes.
mod controllers_by_name {
    use crate::types::Parameter;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(value: &BTreeMap<u8, Parameter>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let named: BTreeMap<u8, String> = value
            .iter()
            .filter_map(|(cc, p)| p.name().map(|name| (*cc, name)))
            .collect();
        named.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<u8, Parameter>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let named = BTreeMap::<u8, String>::deserialize(deserializer)?;
        Ok(named
            .into_iter()
            .map(|(cc, name)| (cc, Parameter::from_name(&name)))
            .filter(|(_, p)| *p != Parameter::NONE)
            .collect())
    }
}

/// Which port and channel drive one instrument, and which controllers map
/// onto which of its parameters.
#[derive(Clone, Debug, Derivative, PartialEq, Eq, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct InstrumentMidiMapping {
    /// The input port name. Empty means unmapped.
    pub port: String,
    /// 0-15, or -1 for any channel.
    #[derivative(Default(value = "-1"))]
    pub channel: i32,
    /// Controller number to parameter.
    #[serde(with = "controllers_by_name")]
    pub controllers: BTreeMap<u8, Parameter>,
}
impl InstrumentMidiMapping {
    fn accepts(&self, port: &str, channel: u8) -> bool {
        self.port == port && (self.channel == -1 || self.channel == channel as i32)
    }
}

/// The routing table for every instrument.
#[derive(Clone, Debug, Derivative, PartialEq, Eq, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct MidiMapping {
    #[derivative(Default(value = "Self::default_instruments()"))]
    instruments: BTreeMap<InstrumentId, InstrumentMidiMapping>,
    /// When set, only the active instrument receives MIDI.
    #[derivative(Default(value = "true"))]
    pub filter_active_instrument: bool,
}
impl MidiMapping {
    fn default_instruments() -> BTreeMap<InstrumentId, InstrumentMidiMapping> {
        InstrumentId::iter()
            .map(|id| (id, InstrumentMidiMapping::default()))
            .collect()
    }

    /// The mapping for `id`. Instruments missing from a loaded file get the
    /// default.
    pub fn instrument(&self, id: InstrumentId) -> InstrumentMidiMapping {
        self.instruments.get(&id).cloned().unwrap_or_default()
    }

    #[allow(missing_docs)]
    pub fn instrument_mut(&mut self, id: InstrumentId) -> &mut InstrumentMidiMapping {
        self.instruments.entry(id).or_default()
    }

    /// Sorted, deduplicated, nonempty port names that any instrument uses.
    pub fn ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self
            .instruments
            .values()
            .filter(|m| !m.port.is_empty())
            .map(|m| m.port.clone())
            .collect();
        ports.sort();
        ports.dedup();
        ports
    }

    /// Replaces every instrument's controller map. Instruments absent from
    /// `controllers` end up with none.
    pub fn replace_controllers(&mut self, mut controllers: BTreeMap<InstrumentId, BTreeMap<u8, Parameter>>) {
        for id in InstrumentId::iter() {
            self.instrument_mut(id).controllers = controllers.remove(&id).unwrap_or_default();
        }
    }
}

/// Routed messages waiting for the audio thread. Producers push, the engine
/// takes everything once per callback.
#[derive(Clone, Debug, Default)]
pub struct MidiQueue(Arc<Mutex<Vec<MidiMessage>>>);
impl MidiQueue {
    #[allow(missing_docs)]
    pub fn push(&self, message: MidiMessage) {
        if let Ok(mut messages) = self.0.lock() {
            messages.push(message);
        }
    }

    /// Everything queued so far, in arrival order.
    pub fn take(&self) -> Vec<MidiMessage> {
        self.0
            .lock()
            .map(|mut messages| std::mem::take(&mut *messages))
            .unwrap_or_default()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.0.lock().map(|m| m.is_empty()).unwrap_or(true)
    }
}

/// Decides which instruments a raw message is for. Pure, so the MIDI
/// service can call it from its port callbacks and tests can call it
/// directly.
#[derive(Clone, Debug, Default)]
pub struct MidiRouter {
    mapping: MidiMapping,
    active_instrument: Option<InstrumentId>,
}
impl MidiRouter {
    #[allow(missing_docs)]
    pub fn new(mapping: MidiMapping) -> Self {
        Self {
            mapping,
            active_instrument: None,
        }
    }

    #[allow(missing_docs)]
    pub fn mapping(&self) -> &MidiMapping {
        &self.mapping
    }

    #[allow(missing_docs)]
    pub fn set_mapping(&mut self, mapping: MidiMapping) {
        self.mapping = mapping;
    }

    /// The instrument the user is looking at, for
    /// [MidiMapping::filter_active_instrument].
    pub fn set_active_instrument(&mut self, instrument: Option<InstrumentId>) {
        self.active_instrument = instrument;
    }

    #[allow(missing_docs)]
    pub fn active_instrument(&self) -> Option<InstrumentId> {
        self.active_instrument
    }

    /// One copy of `message` per instrument whose mapping matches its port
    /// and channel. Mapped controllers and pitch bend get their parameter
    /// resolved.
    pub fn route(&self, message: &MidiMessage) -> Vec<MidiMessage> {
        let (channel, event) = match classify(&message.bytes) {
            Some(classified) => classified,
            // System exclusive (DX7 bank dumps) travels as channel 0.
            None if message.bytes.first() == Some(&0xf0) => (MidiChannel(0), ChannelEvent::Other),
            None => return Vec::default(),
        };
        InstrumentId::iter()
            .filter(|id| {
                !self.mapping.filter_active_instrument || self.active_instrument == Some(*id)
            })
            .filter_map(|id| {
                let mapping = self.mapping.instruments.get(&id)?;
                if !mapping.accepts(&message.port, channel.0) {
                    return None;
                }
                let mut routed = message.clone();
                routed.instrument = Some(id);
                match event {
                    ChannelEvent::Controller { cc, value } => {
                        if let Some(parameter) = mapping.controllers.get(&cc) {
                            routed.parameter = *parameter;
                            routed.parameter_value = value;
                        }
                    }
                    ChannelEvent::PitchBend(value) => {
                        routed.parameter = Parameter::PITCH_BEND;
                        routed.parameter_value = value;
                    }
                    _ => {}
                }
                Some(routed)
            })
            .collect()
    }

    /// Routes `message` into `queue`.
    pub fn route_into(&self, message: &MidiMessage, queue: &MidiQueue) {
        for routed in self.route(message) {
            queue.push(routed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterParameter;

    fn mapping() -> MidiMapping {
        let mut mapping = MidiMapping::default();
        let synth = mapping.instrument_mut(InstrumentId::SynthMachine);
        synth.port = "Keys".to_string();
        synth
            .controllers
            .insert(74, Parameter::filter(0, FilterParameter::Cutoff));
        let drums = mapping.instrument_mut(InstrumentId::DrumMachine);
        drums.port = "Pads".to_string();
        drums.channel = 9;
        mapping
    }

    #[test]
    fn default_mapping() {
        let mapping = MidiMapping::default();
        assert!(mapping.filter_active_instrument);
        for id in InstrumentId::iter() {
            assert_eq!(mapping.instrument(id).channel, -1);
            assert!(mapping.instrument(id).port.is_empty());
        }
        assert!(mapping.ports().is_empty());
    }

    #[test]
    fn filters_to_active_instrument() {
        let mut router = MidiRouter::new(mapping());
        let note = MidiMessage::new("Keys", 0, &[0x90, 60, 100]);
        assert!(router.route(&note).is_empty(), "nothing is active yet");

        router.set_active_instrument(Some(InstrumentId::SynthMachine));
        let routed = router.route(&note);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].instrument, Some(InstrumentId::SynthMachine));
        assert!(!routed[0].has_parameter());

        router.set_active_instrument(Some(InstrumentId::DrumMachine));
        assert!(router.route(&note).is_empty(), "drums listen on another port");
    }

    #[test]
    fn channel_and_port_matching() {
        let mut m = mapping();
        m.filter_active_instrument = false;
        let router = MidiRouter::new(m);
        assert_eq!(
            router.route(&MidiMessage::new("Pads", 0, &[0x99, 36, 100])).len(),
            1
        );
        assert!(router
            .route(&MidiMessage::new("Pads", 0, &[0x90, 36, 100]))
            .is_empty());
        assert!(router
            .route(&MidiMessage::new("Nowhere", 0, &[0x90, 36, 100]))
            .is_empty());
    }

    #[test]
    fn controllers_and_pitch_bend_resolve() {
        let mut router = MidiRouter::new(mapping());
        router.set_active_instrument(Some(InstrumentId::SynthMachine));

        let cc = router.route(&MidiMessage::new("Keys", 0, &[0xb0, 74, 127]));
        assert_eq!(cc[0].parameter, Parameter(4002));
        assert_eq!(cc[0].parameter_value, 1.0);

        let unmapped = router.route(&MidiMessage::new("Keys", 0, &[0xb0, 1, 127]));
        assert_eq!(unmapped.len(), 1, "unmapped controllers still reach the instrument");
        assert!(!unmapped[0].has_parameter());

        let bend = router.route(&MidiMessage::new("Keys", 0, &[0xe2, 0, 0]));
        assert_eq!(bend[0].parameter, Parameter::PITCH_BEND);
        assert_eq!(bend[0].parameter_value, -1.0);
    }

    #[test]
    fn sysex_reaches_any_channel_mappings() {
        let mut router = MidiRouter::new(mapping());
        router.set_active_instrument(Some(InstrumentId::SynthMachine));
        let dump = MidiMessage::new("Keys", 0, &[0xf0, 0x43, 0x00, 0x09, 0xf7]);
        assert_eq!(router.route(&dump).len(), 1);
        assert!(router.route(&MidiMessage::new("Keys", 0, &[])).is_empty());
    }

    #[test]
    fn queue_takes_everything() {
        let mut router = MidiRouter::new(mapping());
        router.set_active_instrument(Some(InstrumentId::SynthMachine));
        let queue = MidiQueue::default();
        router.route_into(&MidiMessage::new("Keys", 0, &[0x90, 60, 100]), &queue);
        router.route_into(&MidiMessage::new("Keys", 0, &[0x80, 60, 0]), &queue);
        assert!(!queue.is_empty());
        assert_eq!(queue.take().len(), 2);
        assert!(queue.take().is_empty());
    }

    #[test]
    fn controllers_persist_by_name() {
        let m = mapping();
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("FilterCutoff_0"), "{json}");
        let back: MidiMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.ports(), vec!["Keys".to_string(), "Pads".to_string()]);
    }
}
