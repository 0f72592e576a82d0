// Copyright (c) 2023 Mike Tsao. All rights reserved.

use super::Easing;
use crate::types::{equivalent, samples_from_milliseconds};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum Ramp {
    #[default]
    Idle,
    Eased {
        start: f32,
        range: f32,
        samples: u64,
        current_sample: u64,
    },
    Constant {
        target: f32,
        increment: f32,
    },
}

/// A scalar that moves toward a target over time rather than jumping.
/// Every audible parameter change (volume, cutoff, detune, pitch bend) goes
/// through one of these so that it doesn't click.
#[derive(Clone, Debug, Default)]
pub struct Value {
    current: f32,
    easing: Easing,
    ramp: Ramp,
}
impl Value {
    #[allow(missing_docs)]
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            ..Default::default()
        }
    }

    /// The curve used by [Value::change_with_samples()].
    pub fn set_easing(&mut self, easing: Easing) {
        self.easing = easing;
    }

    #[allow(missing_docs)]
    pub fn easing(&self) -> Easing {
        self.easing
    }

    /// Jumps to `value` and cancels any transition.
    pub fn set(&mut self, value: f32) {
        self.current = value;
        self.ramp = Ramp::Idle;
    }

    /// Eases toward `value` over `samples` calls to [Value::next()]. Zero
    /// samples means right now.
    pub fn change_with_samples(&mut self, value: f32, samples: u64) {
        if samples == 0 {
            self.set(value);
            return;
        }
        self.ramp = Ramp::Eased {
            start: self.current,
            range: value - self.current,
            samples,
            current_sample: 1,
        };
    }

    /// Like [Value::change_with_samples()], in milliseconds.
    pub fn change_with_time(&mut self, value: f32, milliseconds: u64) {
        self.change_with_samples(value, samples_from_milliseconds(milliseconds));
    }

    /// Moves toward `value` by a fixed step per sample. The sign of
    /// `increment` is ignored; direction comes from the target.
    pub fn change_with_increment(&mut self, value: f32, increment: f32) {
        if equivalent(self.current, value) {
            self.set(value);
            return;
        }
        let direction = if value > self.current { 1.0 } else { -1.0 };
        self.ramp = Ramp::Constant {
            target: value,
            increment: direction * increment.abs(),
        };
    }

    /// The current value, without advancing.
    pub fn v(&self) -> f32 {
        self.current
    }

    /// Whether a transition is still underway.
    pub fn changing(&self) -> bool {
        self.ramp != Ramp::Idle
    }

    /// Advances one sample and returns the new current value.
    pub fn next(&mut self) -> f32 {
        match &mut self.ramp {
            Ramp::Idle => {}
            Ramp::Eased {
                start,
                range,
                samples,
                current_sample,
            } => {
                let progress = (*current_sample as f32 / *samples as f32).clamp(0.0, 1.0);
                self.current = *start + *range * self.easing.apply(progress);
                let done = *current_sample >= *samples;
                *current_sample += 1;
                if done {
                    self.ramp = Ramp::Idle;
                }
            }
            Ramp::Constant { target, increment } => {
                if (*target - self.current).abs() < increment.abs() {
                    self.current = *target;
                    self.ramp = Ramp::Idle;
                } else {
                    self.current += *increment;
                }
            }
        }
        self.current
    }
}
