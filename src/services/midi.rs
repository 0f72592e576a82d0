// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::{
    error::{Error, Result},
    midi::{MidiMapping, MidiMessage, MidiQueue, MidiRouter},
    types::InstrumentId,
    util::{PeriodicTask, TaskRunner},
};
use midir::{Ignore, MidiInput, MidiInputConnection};
use std::{
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};

const IDLE: Duration = Duration::from_secs(3);
const ENUMERATE_PERIOD: Duration = Duration::from_secs(5);
const CLIENT_NAME: &str = "synthstation";

#[derive(Debug, Default)]
struct Pending {
    next_mapping: MidiMapping,
    needs_mapping_update: bool,
    available_ports: Vec<String>,
}

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<Pending>,
    router: RwLock<MidiRouter>,
    queue: MidiQueue,
}

/// The ports worth opening: those some instrument is mapped to that also
/// exist right now. Sorted, without duplicates.
pub fn ports_to_connect(mapping: &MidiMapping, available: &[String]) -> Vec<String> {
    mapping
        .ports()
        .into_iter()
        .filter(|port| available.contains(port))
        .collect()
}

fn input_port_names() -> Result<Vec<String>> {
    let input = MidiInput::new(CLIENT_NAME).map_err(|e| Error::MidiInit(e.to_string()))?;
    Ok(input
        .ports()
        .iter()
        .filter_map(|port| input.port_name(port).ok())
        .collect())
}

struct MidiTask {
    shared: Arc<Shared>,
    connections: Vec<MidiInputConnection<()>>,
    connected: Vec<String>,
    last_enumerate: Option<Instant>,
}
impl MidiTask {
    fn enumerate(&mut self) {
        let ports = match input_port_names() {
            Ok(ports) => ports,
            Err(e) => {
                log::error!(target: "Midi", "{e}");
                return;
            }
        };
        let Ok(mut pending) = self.shared.pending.lock() else {
            return;
        };
        if ports != pending.available_ports {
            log::info!(target: "Midi", "MIDI ports changed ({}):", ports.len());
            for (i, port) in ports.iter().enumerate() {
                log::info!(target: "Midi", "{i} [{port}]");
            }
            pending.available_ports = ports;
            pending.needs_mapping_update = true;
        }
    }

    fn update_mapping(&mut self) {
        let (mapping, available) = {
            let Ok(mut pending) = self.shared.pending.lock() else {
                return;
            };
            if !pending.needs_mapping_update {
                return;
            }
            pending.needs_mapping_update = false;
            (pending.next_mapping.clone(), pending.available_ports.clone())
        };

        let names = ports_to_connect(&mapping, &available);
        if let Ok(mut router) = self.shared.router.write() {
            router.set_mapping(mapping);
        }
        if names != self.connected {
            log::debug!(target: "Midi", "setting up MIDI...");
            self.setup(names);
            log::debug!(target: "Midi", "setup done");
        }
    }

    fn setup(&mut self, ports: Vec<String>) {
        self.teardown();
        for port in ports {
            match self.connect(&port) {
                Ok(connection) => {
                    self.connections.push(connection);
                    self.connected.push(port);
                }
                Err(e) => log::error!(target: "Midi", "{e}"),
            }
        }
    }

    fn connect(&self, port_name: &str) -> Result<MidiInputConnection<()>> {
        let mut input = MidiInput::new(CLIENT_NAME).map_err(|e| Error::MidiInit(e.to_string()))?;
        input.ignore(Ignore::None);
        let port = input
            .ports()
            .into_iter()
            .find(|p| input.port_name(p).ok().as_deref() == Some(port_name))
            .ok_or_else(|| Error::MidiConnect {
                port: port_name.to_string(),
                reason: "unable to find port".to_string(),
            })?;

        let shared = Arc::clone(&self.shared);
        let name = port_name.to_string();
        input
            .connect(
                &port,
                "synthstation-input",
                move |timestamp, bytes, _| {
                    if bytes.is_empty() {
                        return;
                    }
                    let message = MidiMessage::new(&name, timestamp, bytes);
                    if let Ok(router) = shared.router.read() {
                        router.route_into(&message, &shared.queue);
                    }
                },
                (),
            )
            .map_err(|e| Error::MidiConnect {
                port: port_name.to_string(),
                reason: e.to_string(),
            })
    }

    fn teardown(&mut self) {
        for connection in self.connections.drain(..) {
            connection.close();
        }
        self.connected.clear();
    }
}
impl PeriodicTask for MidiTask {
    fn pre_work(&mut self) {
        self.teardown();
    }

    fn work_step(&mut self) {
        if self
            .last_enumerate
            .map_or(true, |last| last.elapsed() >= ENUMERATE_PERIOD)
        {
            self.enumerate();
            self.last_enumerate = Some(Instant::now());
        }
        self.update_mapping();
    }

    fn post_work(&mut self) {
        self.teardown();
    }
}

/// Listens to MIDI input ports on a background thread and routes what
/// arrives to instruments according to a [MidiMapping]. Routed messages
/// wait in a [MidiQueue] for the engine.
///
/// Ports are re-enumerated every five seconds, and connections are rebuilt
/// whenever the mapping or the set of available ports changes.
#[derive(Debug)]
pub struct MidiService {
    shared: Arc<Shared>,
    runner: TaskRunner,
}
impl MidiService {
    /// Starts listening with `mapping`.
    pub fn new(mapping: MidiMapping) -> Self {
        let shared = Arc::new(Shared::default());
        if let Ok(mut pending) = shared.pending.lock() {
            pending.next_mapping = mapping;
            pending.needs_mapping_update = true;
        }
        let mut runner = TaskRunner::new("Midi", IDLE);
        runner.start(MidiTask {
            shared: Arc::clone(&shared),
            connections: Default::default(),
            connected: Default::default(),
            last_enumerate: None,
        });
        Self { shared, runner }
    }

    /// Replaces the mapping. Connections are rebuilt on the worker thread.
    pub fn set_mapping(&self, mapping: MidiMapping) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.next_mapping = mapping;
            pending.needs_mapping_update = true;
        }
        self.runner.signal_work_arrived();
    }

    /// Which instrument is in front, for mappings that only drive that one.
    pub fn set_active_instrument(&self, instrument: Option<InstrumentId>) {
        if let Ok(mut router) = self.shared.router.write() {
            router.set_active_instrument(instrument);
        }
    }

    /// Input port names as of the last enumeration.
    pub fn ports(&self) -> Vec<String> {
        self.shared
            .pending
            .lock()
            .map(|pending| pending.available_ports.clone())
            .unwrap_or_default()
    }

    /// The queue to hand to the engine.
    pub fn queue(&self) -> MidiQueue {
        self.shared.queue.clone()
    }

    /// Everything routed since the last call.
    pub fn take(&self) -> Vec<MidiMessage> {
        self.shared.queue.take()
    }

    /// Stops listening and closes every port.
    pub fn stop(&mut self) {
        self.runner.stop();
    }
}
