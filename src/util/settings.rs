// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Structs that hold configuration information about various parts of the
//! system. Intended to be serialized.

use crate::{error::Result, midi::MidiMapping, types::SAMPLE_RATE};
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Dirty-tracking for anything persisted to disk.
pub trait HasSettings {
    /// Whether the current state of this struct has been saved to disk.
    fn has_been_saved(&self) -> bool;
    /// Call this whenever the struct changes.
    fn needs_save(&mut self);
    /// Call this after a load() or a save().
    fn mark_clean(&mut self);
}

/// Contains persistent audio settings.
#[derive(Debug, Clone, Derivative, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case")]
pub struct AudioSettings {
    #[derivative(Default(value = "SAMPLE_RATE"))]
    sample_rate: usize,
    #[derivative(Default(value = "2"))]
    channel_count: u16,

    #[serde(skip)]
    has_been_saved: bool,
}
impl HasSettings for AudioSettings {
    fn has_been_saved(&self) -> bool {
        self.has_been_saved
    }

    fn needs_save(&mut self) {
        self.has_been_saved = false;
    }

    fn mark_clean(&mut self) {
        self.has_been_saved = true;
    }
}
impl AudioSettings {
    /// Returns the audio sample rate, in Hertz (samples per second). The
    /// engine only runs at 44.1KHz.
    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    /// Returns the number of output channels. The engine produces mono, which
    /// is copied into each one.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }
}

/// The user's persistent global preferences.
#[derive(Debug, Clone, Derivative, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct AppSettings {
    /// How many times the app has started.
    pub runs: u32,

    /// Frames requested per audio callback.
    #[derivative(Default(value = "512"))]
    pub audio_buffer_size: u32,

    #[allow(missing_docs)]
    pub audio: AudioSettings,

    /// Which ports and channels drive which instruments.
    pub midi: MidiMapping,

    /// The name of the MIDI preset last applied to [AppSettings::midi].
    pub midi_preset: String,

    /// The current project.
    #[derivative(Default(value = "\"default\".to_string()"))]
    pub project: String,

    /// Where projects live. Empty means the platform default.
    pub project_folder: String,

    #[serde(skip)]
    has_been_saved: bool,
}
impl HasSettings for AppSettings {
    fn has_been_saved(&self) -> bool {
        self.has_been_saved
    }

    fn needs_save(&mut self) {
        self.has_been_saved = false;
    }

    fn mark_clean(&mut self) {
        self.has_been_saved = true;
    }
}
impl AppSettings {
    /// The settings file name inside the root folder.
    pub const FILENAME: &'static str = "settings.json";

    /// Where the settings file for `root` lives.
    pub fn path(root: &Path) -> PathBuf {
        root.join(Self::FILENAME)
    }

    /// Reads settings from `root`. A missing or malformed file yields the
    /// defaults, logged.
    pub fn load(root: &Path) -> Self {
        let path = Self::path(root);
        let mut r = match Self::try_load(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!(target: "Settings", "using defaults, couldn't load {path:?}: {e}");
                Self::default()
            }
        };
        r.mark_clean();
        r
    }

    fn try_load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Writes settings into `root`, creating it if needed.
    pub fn save(&mut self, root: &Path) -> Result<()> {
        std::fs::create_dir_all(root)?;
        let json = serde_json::to_string_pretty(&self)?;
        std::fs::write(Self::path(root), json)?;
        self.mark_clean();
        Ok(())
    }

    /// The folder holding the current project's presets, sequences and
    /// chains.
    pub fn project_path(&self, root: &Path) -> PathBuf {
        let base = if self.project_folder.is_empty() {
            root.join("projects")
        } else {
            PathBuf::from(&self.project_folder)
        };
        base.join(&self.project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstrumentId, Parameter};

    #[test]
    fn defaults() {
        let s = AppSettings::default();
        assert_eq!(s.audio_buffer_size, 512);
        assert_eq!(s.project, "default");
        assert!(s.midi.filter_active_instrument);
        assert_eq!(s.audio.sample_rate(), 44100);
        assert_eq!(s.audio.channel_count(), 2);
        assert!(!s.has_been_saved());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = AppSettings::default();
        s.runs = 7;
        s.midi
            .instrument_mut(InstrumentId::Tb303)
            .controllers
            .insert(74, Parameter::filter(0, crate::types::FilterParameter::Cutoff));
        s.save(dir.path()).unwrap();
        assert!(s.has_been_saved());

        let loaded = AppSettings::load(dir.path());
        assert_eq!(loaded.runs, 7);
        assert_eq!(
            loaded.midi.instrument(InstrumentId::Tb303).controllers.get(&74),
            Some(&Parameter(4002))
        );
        assert!(loaded.has_been_saved());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = AppSettings::load(dir.path());
        assert_eq!(s.runs, 0);
        assert_eq!(
            s.project_path(dir.path()),
            dir.path().join("projects").join("default")
        );
    }
}
