// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Useful things that don't have anything to do with making sound.

/// The most commonly used imports.
pub mod prelude {
    pub use super::{
        Analyser, AnalyserSync, AppSettings, AudioSettings, HasSettings, PeriodicTask,
        TaskRunner,
    };
}

pub use analyser::{Analyser, AnalyserSync};
pub use running_average::RunningAverage;
pub use settings::{AppSettings, AudioSettings, HasSettings};
pub use task_runner::{PeriodicTask, TaskRunner, WorkSignal};

mod analyser;
mod running_average;
pub mod settings;
mod task_runner;
