// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::types::{equivalent, SAMPLE_RATE};
use strum_macros::{Display, IntoStaticStr};

// -80dB
const HYSTERESIS: f32 = 0.0001;
const MIN_TIME_MS: f32 = 10.0;
const MAX_TIME_MS: f32 = 2000.0;
// The attack curve aims past 1.0 so that it actually arrives.
const ATTACK_TARGET: f32 = 1.6;

/// Third-order Taylor approximation of e^x. Good enough for the small
/// negative exponents we feed it.
const fn fast_exp3(x: f32) -> f32 {
    (6.0 + x * (6.0 + x * (3.0 + x))) * 0.16666666
}

/// Per-sample exponential coefficient for a stage lasting `factor * max_ms`,
/// never shorter than 10ms.
fn calculate_rate(factor: f32, max_ms: f32) -> f32 {
    let ms = (factor * max_ms).max(MIN_TIME_MS);
    let samples = (ms / 1000.0) * SAMPLE_RATE as f32;
    fast_exp3(-2.0 / samples)
}

/// Where an [Envelope] is in its lifecycle. Order matters: anything before
/// [Stage::Release] can still be released.
#[derive(Clone, Copy, Debug, Default, Display, IntoStaticStr, PartialEq, Eq, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Stage {
    #[default]
    NotStarted,
    Attack,
    Decay,
    Sustain,
    Release,
    Kill,
    Off,
}

/// An exponential ADSR. Knob values are 0..1 and map to 10ms..2000ms.
#[derive(Clone, Debug)]
pub struct Envelope {
    stage: Stage,
    attack_rate: f32,
    decay_rate: f32,
    sustain: f32,
    release_rate: f32,
    kill_rate: f32,
    current: f32,
    level: f32,
    off_level: f32,
}
impl Default for Envelope {
    fn default() -> Self {
        Self {
            stage: Stage::NotStarted,
            attack_rate: 0.0,
            decay_rate: 0.0,
            sustain: 1.0,
            release_rate: 0.0,
            kill_rate: calculate_rate(0.0, MIN_TIME_MS),
            current: 0.0,
            level: 0.0,
            off_level: 0.0,
        }
    }
}
impl Envelope {
    #[allow(missing_docs)]
    pub fn set_attack(&mut self, attack: f32) {
        self.attack_rate = calculate_rate(attack, MAX_TIME_MS);
    }
    #[allow(missing_docs)]
    pub fn set_decay(&mut self, decay: f32) {
        self.decay_rate = calculate_rate(decay, MAX_TIME_MS);
    }
    /// Sustain level as a fraction of the trigger level.
    pub fn set_sustain(&mut self, sustain: f32) {
        self.sustain = sustain;
    }
    #[allow(missing_docs)]
    pub fn set_release(&mut self, release: f32) {
        self.release_rate = calculate_rate(release, MAX_TIME_MS);
    }

    /// Starts the attack toward `level`, unless the envelope is already
    /// louder than that.
    pub fn trigger(&mut self, level: f32) {
        if self.current <= level {
            self.level = level;
            self.stage = Stage::Attack;
        }
    }

    /// Begins the release stage. An envelope that never started goes
    /// straight to [Stage::Off].
    pub fn release(&mut self) {
        if self.stage == Stage::NotStarted {
            self.stage = Stage::Off;
        } else if self.stage < Stage::Release {
            self.stage = Stage::Release;
        }
    }

    /// Fades out over 10ms, whatever the current stage.
    pub fn kill(&mut self) {
        self.stage = match self.stage {
            Stage::NotStarted | Stage::Off => Stage::Off,
            _ => Stage::Kill,
        };
    }

    /// True once the envelope has fully decayed.
    pub fn completed(&self) -> bool {
        self.stage == Stage::Off
    }

    #[allow(missing_docs)]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Advances one sample and returns the new level.
    pub fn next(&mut self) -> f32 {
        match self.stage {
            Stage::Attack => {
                self.current = ATTACK_TARGET + self.attack_rate * (self.current - ATTACK_TARGET);
                if self.current > self.level {
                    self.current = self.level;
                    self.stage = if equivalent(1.0, self.sustain) {
                        Stage::Sustain
                    } else {
                        Stage::Decay
                    };
                }
            }
            Stage::Decay => {
                let level = self.level * self.sustain;
                self.current = level + self.decay_rate * (self.current - level);
                if self.current < level + HYSTERESIS {
                    self.current = level;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Release => self.update_release(self.release_rate),
            Stage::Kill => self.update_release(self.kill_rate),
            Stage::NotStarted | Stage::Sustain | Stage::Off => {}
        }
        self.current
    }

    fn update_release(&mut self, rate: f32) {
        self.current = self.off_level + rate * (self.current - self.off_level);
        if self.current < self.off_level + HYSTERESIS {
            self.current = self.off_level;
            self.stage = Stage::Off;
        }
    }
}
