// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::types::{samples_from_milliseconds, SampleType, SAMPLE_RATE};
use bounded_vec_deque::BoundedVecDeque;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};
use strum_macros::{Display, EnumIter, IntoStaticStr};

/// How a scope graph picks its starting point.
#[derive(
    Clone, Copy, Debug, Default, Display, EnumIter, IntoStaticStr, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum AnalyserSync {
    /// Graph the latest samples as they are.
    #[default]
    None,
    /// Back up to the most recent upward zero crossing.
    RiseZero,
    /// Back up to the most recent downward zero crossing.
    FallZero,
}

#[derive(Debug, Clone, Copy)]
struct GraphSettings {
    points: usize,
    duration_samples: usize,
    offset: usize,
    sync: AnalyserSync,
}

/// Keeps the last second of output for scopes and meters.
///
/// The audio thread pushes and the UI reads, both under one mutex. UI reads
/// are infrequent and short, so the audio thread rarely waits.
#[derive(Debug)]
pub struct Analyser {
    samples: Mutex<BoundedVecDeque<SampleType>>,
    graph: Mutex<GraphSettings>,
    keys: Mutex<Vec<String>>,
    started: AtomicBool,
}
impl Default for Analyser {
    fn default() -> Self {
        let r = Self {
            samples: Mutex::new(BoundedVecDeque::new(Self::CAPACITY)),
            graph: Mutex::new(GraphSettings {
                points: 0,
                duration_samples: 0,
                offset: 0,
                sync: AnalyserSync::None,
            }),
            keys: Default::default(),
            started: Default::default(),
        };
        r.configure_graph(10, 100, 0.0, AnalyserSync::None);
        r
    }
}
impl Analyser {
    const CAPACITY: usize = SAMPLE_RATE;
    const MAX_DURATION_MS: u64 = 1000;
    /// How far back [Analyser::peak()] looks.
    pub const PEAK_MS: u64 = 150;

    /// Sets up [Analyser::generate_graph()]: `points` values spanning the
    /// last `duration_ms` (at most one second), shifted back by
    /// `offset_factor` of the buffer, optionally aligned to a zero crossing.
    pub fn configure_graph(
        &self,
        points: usize,
        duration_ms: u64,
        offset_factor: f32,
        sync: AnalyserSync,
    ) {
        let offset_factor = offset_factor.clamp(0.0, 1.0);
        let duration = duration_ms.min(Self::MAX_DURATION_MS);
        let settings = GraphSettings {
            points,
            duration_samples: samples_from_milliseconds(duration) as usize,
            offset: (Self::CAPACITY as f32 * offset_factor) as usize,
            sync,
        };
        log::debug!(
            target: "Analyser",
            "points={points} duration={duration} graph_offset={} sync={sync}",
            settings.offset
        );
        if let Ok(mut graph) = self.graph.lock() {
            *graph = settings;
        }
    }

    /// Samples the recent output into `points` values. Leaves the points
    /// zeroed until enough audio has arrived.
    pub fn generate_graph(&self) -> Vec<SampleType> {
        let Ok(settings) = self.graph.lock().map(|g| *g) else {
            return Vec::default();
        };
        let mut points = vec![0.0; settings.points];
        let Ok(samples) = self.samples.lock() else {
            return points;
        };
        if samples.len() < settings.duration_samples || settings.points == 0 {
            return points;
        }

        let increment = settings.duration_samples as f32 / settings.points as f32;
        let mut start = samples.len() - settings.duration_samples;

        if settings.sync != AnalyserSync::None {
            let mut index = start;
            let back_over_negative = |index: &mut usize| {
                while *index > 0 && samples[*index] <= 0.0 {
                    *index -= 1;
                }
            };
            let back_over_positive = |index: &mut usize| {
                while *index > 0 && samples[*index] > 0.0 {
                    *index -= 1;
                }
            };
            // Walk back across the current half-cycle, then across the
            // opposite one, to land on the wanted crossing.
            if settings.sync == AnalyserSync::RiseZero {
                if samples[index] < 0.0 {
                    back_over_negative(&mut index);
                }
                if samples[index] > 0.0 {
                    back_over_positive(&mut index);
                }
            } else {
                if samples[index] > 0.0 {
                    back_over_positive(&mut index);
                }
                if samples[index] < 0.0 {
                    back_over_negative(&mut index);
                }
            }
            if index > 0 {
                start = index;
            }
        }

        let start = start.saturating_sub(settings.offset);
        for (i, point) in points.iter_mut().enumerate() {
            let index = start + (i as f32 * increment) as usize;
            if let Some(sample) = samples.get(index) {
                *point = *sample;
            }
        }
        points
    }

    /// The largest magnitude over the last 150ms, or zero if we don't have
    /// that much yet.
    pub fn peak(&self) -> SampleType {
        let count = samples_from_milliseconds(Self::PEAK_MS) as usize;
        let Ok(samples) = self.samples.lock() else {
            return 0.0;
        };
        if samples.len() <= count {
            return 0.0;
        }
        samples
            .iter()
            .rev()
            .take(count)
            .fold(0.0, |max: f32, s| max.max(s.abs()))
    }

    /// Registers a consumer. The analyser accepts samples while any
    /// consumer is registered.
    pub fn start(&self, key: &str) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.retain(|k| k != key);
            keys.push(key.to_string());
        }
        if !self.started.swap(true, Ordering::Relaxed) {
            log::debug!(target: "Analyser", "start");
        }
    }

    /// Unregisters a consumer.
    pub fn stop(&self, key: &str) {
        if !self.started.load(Ordering::Relaxed) {
            return;
        }
        if let Ok(mut keys) = self.keys.lock() {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.started.store(false, Ordering::Relaxed);
                log::debug!(target: "Analyser", "stop");
            }
        }
    }

    /// Whether anyone wants samples.
    pub fn is_accepting(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Appends one sample, dropping the oldest when full.
    pub fn push(&self, sample: SampleType) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.push_back(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_start_stop() {
        let a = Analyser::default();
        assert!(!a.is_accepting());
        a.start("scope");
        a.start("vu");
        a.start("scope");
        a.stop("scope");
        assert!(a.is_accepting(), "vu is still listening");
        a.stop("vu");
        assert!(!a.is_accepting());
    }

    #[test]
    fn peak_needs_enough_audio() {
        let a = Analyser::default();
        for _ in 0..100 {
            a.push(0.9);
        }
        assert_eq!(a.peak(), 0.0);
        for i in 0..10_000 {
            a.push(if i == 9_000 { -0.75 } else { 0.5 });
        }
        assert_eq!(a.peak(), 0.75);
    }

    #[test]
    fn buffer_holds_one_second() {
        let a = Analyser::default();
        for _ in 0..SAMPLE_RATE * 2 {
            a.push(0.1);
        }
        assert_eq!(a.samples.lock().map(|s| s.len()).unwrap_or_default(), SAMPLE_RATE);
    }

    #[test]
    fn graph_samples_the_tail() {
        let a = Analyser::default();
        a.configure_graph(4, 1, 0.0, AnalyserSync::None);
        assert_eq!(a.generate_graph(), vec![0.0; 4], "not enough audio yet");
        for i in 0..88 {
            a.push(i as f32);
        }
        // 1ms is 44 samples; the last 44 of 0..88 start at 44.
        assert_eq!(a.generate_graph(), vec![44.0, 55.0, 66.0, 77.0]);

        a.configure_graph(4, 5000, 0.0, AnalyserSync::None);
        assert_eq!(
            a.generate_graph(),
            vec![0.0; 4],
            "duration caps at one second, which we don't have"
        );
    }

    #[test]
    fn rise_sync_backs_up_to_crossing() {
        let a = Analyser::default();
        a.configure_graph(2, 1, 0.0, AnalyserSync::RiseZero);
        // Positive run, then a negative run, then positive again at the
        // window start.
        let mut signal = vec![0.5; 20];
        signal.extend(vec![-0.5; 20]);
        signal.extend(vec![0.5; 50]);
        for s in &signal {
            a.push(*s);
        }
        let graph = a.generate_graph();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph[0], -0.5, "graph should start at the last negative sample");
    }
}
