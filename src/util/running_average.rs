// Copyright (c) 2023 Mike Tsao. All rights reserved.

use std::collections::VecDeque;

/// Mean of the most recent `window` values.
#[derive(Debug, Clone)]
pub struct RunningAverage {
    window: usize,
    values: VecDeque<f64>,
    sum: f64,
    average: f64,
}
impl RunningAverage {
    /// Starts a window of `window` values, seeded with `initial`.
    pub fn new(window: usize, initial: f64) -> Self {
        let mut r = Self {
            window: window.max(1),
            values: VecDeque::with_capacity(window.max(1) + 1),
            sum: 0.0,
            average: 0.0,
        };
        r.reset(initial);
        r
    }

    /// Forgets everything except `initial`.
    pub fn reset(&mut self, initial: f64) {
        self.values.clear();
        self.sum = 0.0;
        self.average = 0.0;
        self.add(initial);
    }

    /// Adds a value and returns the new average.
    pub fn add(&mut self, value: f64) -> f64 {
        self.values.push_back(value);
        self.sum += value;
        if self.values.len() > self.window {
            if let Some(oldest) = self.values.pop_front() {
                self.sum -= oldest;
            }
        }
        self.average = self.sum / self.values.len() as f64;
        self.average
    }

    #[allow(missing_docs)]
    pub fn average(&self) -> f64 {
        self.average
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_slides() {
        let mut avg = RunningAverage::new(2, 0.0);
        assert_eq!(avg.average(), 0.0);
        assert_eq!(avg.add(2.0), 1.0, "initial value counts");
        assert_eq!(avg.add(4.0), 3.0, "initial value has slid out");
        avg.reset(10.0);
        assert_eq!(avg.average(), 10.0);
    }
}
