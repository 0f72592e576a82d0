// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::{
    error::Result,
    types::{milliseconds_from_samples, SampleType, SAMPLE_RATE},
    util::{PeriodicTask, TaskRunner, WorkSignal},
};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Pending samples past this many wake the writer early.
const FLUSH_SIZE: usize = 1024 * 10;

const IDLE: Duration = Duration::from_millis(500);

/// The format every recording is written in.
pub fn wav_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<Vec<SampleType>>,
    accepting: AtomicBool,
    received_samples: AtomicU64,
}

/// The audio thread's end of a [Recorder].
#[derive(Clone, Debug)]
pub struct RecorderTap {
    shared: Arc<Shared>,
    signal: WorkSignal,
}
impl RecorderTap {
    /// Whether a file is open and samples are being kept.
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Relaxed)
    }

    /// Queues one sample for the writer thread.
    pub fn push(&self, sample: SampleType) {
        if !self.is_accepting() {
            return;
        }
        let pending = match self.shared.pending.lock() {
            Ok(mut pending) => {
                pending.push(sample);
                pending.len()
            }
            Err(_) => return,
        };
        self.shared.received_samples.fetch_add(1, Ordering::Relaxed);
        if pending > FLUSH_SIZE {
            self.signal.signal_work_arrived();
        }
    }
}

struct RecorderTask {
    path: PathBuf,
    shared: Arc<Shared>,
    writer: Option<WavWriter<BufWriter<File>>>,
    scratch: Vec<SampleType>,
}
impl RecorderTask {
    fn open(&self) -> Result<WavWriter<BufWriter<File>>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(WavWriter::create(&self.path, wav_spec())?)
    }

    fn write_to_file(&mut self) {
        self.scratch.clear();
        if let Ok(mut pending) = self.shared.pending.lock() {
            std::mem::swap(&mut *pending, &mut self.scratch);
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        for sample in self.scratch.iter() {
            if let Err(e) = writer.write_sample(*sample) {
                log::error!(target: "Recorder", "while writing {}: {e:?}", self.path.display());
                break;
            }
        }
    }
}
impl PeriodicTask for RecorderTask {
    fn pre_work(&mut self) {
        log::info!(target: "Recorder", "starting recorder ({})...", self.path.display());
        match self.open() {
            Ok(writer) => {
                self.writer = Some(writer);
                self.shared.accepting.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                log::error!(target: "Recorder", "failed to start output to ({}): {e}", self.path.display());
            }
        }
    }

    fn work_step(&mut self) {
        self.write_to_file();
    }

    fn post_work(&mut self) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        self.write_to_file();
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                log::error!(target: "Recorder", "while closing {}: {e:?}", self.path.display());
            }
        }
        log::info!(target: "Recorder", "stopped recorder");
    }
}

/// Captures the engine's output to a mono 32-bit float WAV file. Samples
/// arrive through a [RecorderTap] and a background thread writes them out
/// every half second, or sooner when plenty are waiting.
#[derive(Debug)]
pub struct Recorder {
    shared: Arc<Shared>,
    runner: TaskRunner,
}
impl Default for Recorder {
    fn default() -> Self {
        Self {
            shared: Default::default(),
            runner: TaskRunner::new("Recorder", IDLE),
        }
    }
}
impl Recorder {
    /// Hand this to the engine.
    pub fn tap(&self) -> RecorderTap {
        RecorderTap {
            shared: Arc::clone(&self.shared),
            signal: self.runner.work_signal(),
        }
    }

    /// Finishes any current recording and starts a new one at `path`,
    /// creating its folder if needed. Failure to open the file is logged,
    /// and the recorder then never accepts samples.
    pub fn start_recording(&mut self, path: &Path) {
        self.stop_recording();
        self.shared.received_samples.store(0, Ordering::SeqCst);
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.clear();
        }
        self.runner.start(RecorderTask {
            path: path.to_path_buf(),
            shared: Arc::clone(&self.shared),
            writer: None,
            scratch: Vec::with_capacity(FLUSH_SIZE * 2),
        });
    }

    /// Writes out what's pending and closes the file.
    pub fn stop_recording(&mut self) {
        if self.runner.is_working() {
            self.runner.stop();
        }
    }

    #[allow(missing_docs)]
    pub fn is_recording(&self) -> bool {
        self.runner.is_working()
    }

    /// Whether samples pushed now would be kept.
    pub fn is_accepting(&self) -> bool {
        self.is_recording() && self.shared.accepting.load(Ordering::SeqCst)
    }

    /// Pushes one sample, the same as through a [RecorderTap].
    pub fn push(&self, sample: SampleType) {
        self.tap().push(sample);
    }

    /// Length of the current (or last) recording.
    pub fn recorded_milliseconds(&self) -> u64 {
        milliseconds_from_samples(self.shared.received_samples.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn wait_for(what: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !what() {
            assert!(std::time::Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn records_a_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("takes").join("one.wav");

        let mut recorder = Recorder::default();
        let tap = recorder.tap();
        assert!(!tap.is_accepting());
        tap.push(1.0);

        recorder.start_recording(&path);
        wait_for(|| recorder.is_accepting());
        for i in 0..SAMPLE_RATE {
            tap.push((i as f32 / SAMPLE_RATE as f32) - 0.5);
        }
        assert_eq!(recorder.recorded_milliseconds(), 1000);
        recorder.stop_recording();
        assert!(!recorder.is_accepting());
        assert!(!recorder.is_recording());

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec(), wav_spec());
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), SAMPLE_RATE);
        assert!(approx_eq!(f32, samples[0], -0.5));
    }

    #[test]
    fn unwritable_path_never_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"in the way").unwrap();

        let mut recorder = Recorder::default();
        recorder.start_recording(&blocker.join("take.wav"));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!recorder.is_accepting());
        recorder.push(0.5);
        assert_eq!(recorder.recorded_milliseconds(), 0);
        recorder.stop_recording();
    }
}
