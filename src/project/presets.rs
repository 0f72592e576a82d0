// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::{
    composition::{ChainerConfiguration, Link, NoteMode, SequencerConfiguration},
    error::{Error, Result},
    instruments::{DrumMachine, Dx7, SynthMachine, Tb303},
    midi::MidiMapping,
    types::{InstrumentId, Parameter, ParametersValues},
};
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::OnceLock,
};
use strum::IntoEnumIterator;

const PRESETS_FOLDER_NAME: &str = "presets";
const SEQUENCES_FOLDER_NAME: &str = "sequences";
const CHAINS_FOLDER_NAME: &str = "chains";
const MIDI_FOLDER_NAME: &str = "midi";

/// Written into every file so later versions can migrate old ones.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct InstrumentPresetFile {
    version: u32,
    parameters: BTreeMap<String, f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StepFile {
    step: usize,
    note: u8,
    value: u8,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LaneFile {
    steps: Vec<StepFile>,
    muted: bool,
    first_col: i32,
    first_row: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct SequenceFile {
    #[serde(default)]
    version: u32,
    duty: Option<f32>,
    tempo: Option<u32>,
    step_count: Option<usize>,
    selected_instrument: Option<i32>,
    #[serde(flatten)]
    lanes: BTreeMap<String, LaneFile>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LinkFile {
    runs: usize,
    name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ChainFile {
    version: u32,
    chain: Vec<LinkFile>,
}

/// Instrument name to parameter name to controller number.
type MidiPresetFile = BTreeMap<String, BTreeMap<String, u8>>;

/// What a fresh `id` sounds like, and the base every preset of it merges into.
pub fn default_parameters(id: InstrumentId) -> ParametersValues {
    match id {
        InstrumentId::SynthMachine => SynthMachine::defaults(),
        InstrumentId::DrumMachine => DrumMachine::defaults(),
        InstrumentId::Dx7 => Dx7::defaults(),
        InstrumentId::Tb303 => Tb303::defaults(),
    }
}

fn invalid_characters() -> Option<&'static Regex> {
    static INVALID: OnceLock<Option<Regex>> = OnceLock::new();
    INVALID.get_or_init(|| Regex::new("[^a-z0-9 ]").ok()).as_ref()
}

/// Lowercases `name` and keeps only letters, digits, and inner spaces, so it
/// is always safe as a file name.
pub fn sanitize_name(name: &str) -> String {
    let lowercase = name.to_lowercase();
    match invalid_characters() {
        Some(invalid) => invalid.replace_all(&lowercase, "").trim().to_string(),
        None => String::default(),
    }
}

/// Named instrument presets, sequences, and chains for one project, plus
/// MIDI controller presets shared by every project. Everything is a JSON
/// file named after the preset.
///
/// Loading never fails: a missing or broken file gives the defaults, and the
/// problem is logged.
#[derive(Clone, Debug)]
pub struct PresetStore {
    root: PathBuf,
    project: PathBuf,
}
impl PresetStore {
    /// Saved automatically when the app quits.
    pub const LAST_SESSION: &'static str = "last session";
    /// Always available and never written.
    pub const DEFAULT: &'static str = "default";

    /// `root` holds shared MIDI presets; `project` holds everything else.
    pub fn new(root: &Path, project: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            project: project.to_path_buf(),
        }
    }

    fn instrument_folder(&self, id: InstrumentId) -> PathBuf {
        self.project.join(PRESETS_FOLDER_NAME).join(id.to_string())
    }

    fn sequence_folder(&self) -> PathBuf {
        self.project.join(SEQUENCES_FOLDER_NAME)
    }

    fn chain_folder(&self) -> PathBuf {
        self.project.join(CHAINS_FOLDER_NAME)
    }

    fn midi_folder(&self) -> PathBuf {
        self.root.join(MIDI_FOLDER_NAME)
    }

    /// Names are sanitized here too, so no lookup escapes `folder`.
    fn file_in(folder: &Path, name: &str) -> PathBuf {
        folder.join(format!("{}.json", sanitize_name(name)))
    }

    /// The reserved names, then every `.json` file in `folder`, sorted.
    fn names_in(folder: &Path, reserved: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = reserved.iter().map(|n| n.to_string()).collect();
        let mut found: Vec<String> = std::fs::read_dir(folder)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.extension().is_some_and(|e| e == "json"))
                    .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        found.sort();
        for name in found {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    fn project_names_in(folder: &Path) -> Vec<String> {
        Self::names_in(folder, &[Self::LAST_SESSION, Self::DEFAULT])
    }

    fn read<T: DeserializeOwned>(path: &Path) -> Option<T> {
        if !path.exists() {
            return None;
        }
        let parsed = std::fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|contents| serde_json::from_str(&contents).map_err(Error::from));
        match parsed {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!(target: "Configuration", "couldn't load {}: {e}", path.display());
                None
            }
        }
    }

    /// Writes `value` under a sanitized `name`. Saving over
    /// [PresetStore::DEFAULT] does nothing.
    fn write<T: Serialize>(folder: &Path, name: &str, value: &T) -> Result<()> {
        let sanitized = sanitize_name(name);
        if sanitized.is_empty() {
            return Err(Error::InvalidName(name.to_string()));
        }
        if sanitized == Self::DEFAULT {
            return Ok(());
        }
        std::fs::create_dir_all(folder)?;
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(Self::file_in(folder, name), json)?;
        Ok(())
    }

    fn delete(folder: &Path, name: &str) -> Result<()> {
        let sanitized = sanitize_name(name);
        if sanitized == Self::DEFAULT || sanitized == Self::LAST_SESSION {
            return Ok(());
        }
        match std::fs::remove_file(Self::file_in(folder, name)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    #[allow(missing_docs)]
    pub fn instrument_preset_names(&self, id: InstrumentId) -> Vec<String> {
        Self::project_names_in(&self.instrument_folder(id))
    }

    /// The instrument's defaults with the preset's values laid over them.
    /// Parameter names this version doesn't know are skipped.
    pub fn instrument_preset(&self, id: InstrumentId, name: &str) -> ParametersValues {
        let mut values = default_parameters(id);
        if sanitize_name(name) == Self::DEFAULT {
            return values;
        }
        let path = Self::file_in(&self.instrument_folder(id), name);
        if let Some(file) = Self::read::<InstrumentPresetFile>(&path) {
            for (key, value) in file.parameters {
                let parameter = Parameter::from_name(&key);
                if parameter != Parameter::NONE {
                    values.insert(parameter, value);
                }
            }
        }
        values
    }

    /// Parameters without a stable name aren't saved.
    pub fn save_instrument_preset(
        &self,
        id: InstrumentId,
        name: &str,
        values: &ParametersValues,
    ) -> Result<()> {
        let file = InstrumentPresetFile {
            version: FORMAT_VERSION,
            parameters: values
                .iter()
                .filter_map(|(parameter, value)| parameter.name().map(|name| (name, *value)))
                .collect(),
        };
        Self::write(&self.instrument_folder(id), name, &file)
    }

    #[allow(missing_docs)]
    pub fn delete_instrument_preset(&self, id: InstrumentId, name: &str) -> Result<()> {
        Self::delete(&self.instrument_folder(id), name)
    }

    #[allow(missing_docs)]
    pub fn sequence_names(&self) -> Vec<String> {
        Self::project_names_in(&self.sequence_folder())
    }

    /// A missing sequence is an empty one.
    pub fn load_sequence(&self, name: &str) -> SequencerConfiguration {
        let mut cfg = SequencerConfiguration::default();
        if sanitize_name(name) == Self::DEFAULT {
            return cfg;
        }
        let Some(file) = Self::read::<SequenceFile>(&Self::file_in(&self.sequence_folder(), name))
        else {
            return cfg;
        };

        if let Some(duty) = file.duty {
            cfg.duty = duty;
        }
        if let Some(tempo) = file.tempo {
            cfg.tempo = tempo;
        }
        if let Some(step_count) = file.step_count {
            cfg.step_count = step_count;
        }
        if let Some(selected) = file.selected_instrument.and_then(InstrumentId::from_repr) {
            cfg.ui_selected_instrument = selected;
        }
        for id in InstrumentId::iter() {
            let Some(lane) = file.lanes.get(&id.to_string()) else {
                continue;
            };
            {
                let steps = cfg.instrument_mut(id);
                steps.muted = lane.muted;
                steps.ui_first_col = lane.first_col;
                steps.ui_first_row = lane.first_row;
            }
            for step in lane.steps.iter() {
                let mode = NoteMode::from_repr(step.value).unwrap_or_default();
                cfg.set_step_state(id, step.step, step.note, mode);
            }
        }
        cfg
    }

    #[allow(missing_docs)]
    pub fn save_sequence(&self, name: &str, cfg: &SequencerConfiguration) -> Result<()> {
        let lanes = InstrumentId::iter()
            .map(|id| {
                let steps = cfg.instrument(id);
                let lane = LaneFile {
                    steps: steps
                        .steps
                        .iter()
                        .map(|(&(step, note), &mode)| StepFile {
                            step,
                            note,
                            value: mode as u8,
                        })
                        .collect(),
                    muted: steps.muted,
                    first_col: steps.ui_first_col,
                    first_row: steps.ui_first_row,
                };
                (id.to_string(), lane)
            })
            .collect();
        let file = SequenceFile {
            version: FORMAT_VERSION,
            duty: Some(cfg.duty),
            tempo: Some(cfg.tempo),
            step_count: Some(cfg.step_count),
            selected_instrument: Some(cfg.ui_selected_instrument as i32),
            lanes,
        };
        Self::write(&self.sequence_folder(), name, &file)
    }

    #[allow(missing_docs)]
    pub fn delete_sequence(&self, name: &str) -> Result<()> {
        Self::delete(&self.sequence_folder(), name)
    }

    #[allow(missing_docs)]
    pub fn chain_names(&self) -> Vec<String> {
        Self::project_names_in(&self.chain_folder())
    }

    /// Loads a chain and the sequence each link names. A missing chain is
    /// the default one of empty links.
    pub fn load_chain(&self, name: &str) -> ChainerConfiguration {
        let mut cfg = ChainerConfiguration::default();
        if sanitize_name(name) == Self::DEFAULT {
            return cfg;
        }
        let Some(file) = Self::read::<ChainFile>(&Self::file_in(&self.chain_folder(), name)) else {
            return cfg;
        };
        cfg.chain = file
            .chain
            .into_iter()
            .map(|link| {
                let sequence = if link.name.is_empty() {
                    SequencerConfiguration::default()
                } else {
                    self.load_sequence(&link.name)
                };
                Link::new(&link.name, link.runs, sequence)
            })
            .collect();
        cfg
    }

    /// Only link names and run counts are saved; sequences live on their
    /// own.
    pub fn save_chain(&self, name: &str, cfg: &ChainerConfiguration) -> Result<()> {
        let file = ChainFile {
            version: FORMAT_VERSION,
            chain: cfg
                .chain
                .iter()
                .map(|link| LinkFile {
                    runs: link.runs,
                    name: link.name.clone(),
                })
                .collect(),
        };
        Self::write(&self.chain_folder(), name, &file)
    }

    #[allow(missing_docs)]
    pub fn delete_chain(&self, name: &str) -> Result<()> {
        Self::delete(&self.chain_folder(), name)
    }

    /// MIDI presets have no reserved names.
    pub fn midi_preset_names(&self) -> Vec<String> {
        Self::names_in(&self.midi_folder(), &[])
    }

    /// Replaces every instrument's controller map with the preset's. An
    /// empty or missing preset leaves no controllers mapped.
    pub fn load_midi_preset(&self, name: &str, mapping: &mut MidiMapping) {
        let mut controllers: BTreeMap<InstrumentId, BTreeMap<u8, Parameter>> = BTreeMap::new();
        if !name.is_empty() {
            let path = Self::file_in(&self.midi_folder(), name);
            if let Some(file) = Self::read::<MidiPresetFile>(&path) {
                for (instrument, parameters) in file {
                    let Some(id) = InstrumentId::from_name(&instrument) else {
                        log::warn!(target: "Configuration", "unknown instrument {instrument} in MIDI preset {name}");
                        continue;
                    };
                    let map = controllers.entry(id).or_default();
                    for (parameter, cc) in parameters {
                        let parameter = Parameter::from_name(&parameter);
                        if parameter != Parameter::NONE {
                            map.insert(cc, parameter);
                        }
                    }
                }
            }
        }
        mapping.replace_controllers(controllers);
    }

    /// Saves the controller maps of `mapping`, without ports or channels.
    pub fn save_midi_preset(&self, name: &str, mapping: &MidiMapping) -> Result<()> {
        let file: MidiPresetFile = InstrumentId::iter()
            .map(|id| {
                let controllers = mapping
                    .instrument(id)
                    .controllers
                    .iter()
                    .filter_map(|(cc, parameter)| parameter.name().map(|name| (name, *cc)))
                    .collect();
                (id.to_string(), controllers)
            })
            .collect();
        Self::write(&self.midi_folder(), name, &file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterParameter;

    fn store(dir: &tempfile::TempDir) -> PresetStore {
        PresetStore::new(dir.path(), &dir.path().join("projects").join("mine"))
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("  My Bass/../../etc  "), "my bassetc");
        assert_eq!(sanitize_name("Acid #1!"), "acid 1");
        assert_eq!(sanitize_name("***"), "");
    }

    #[test]
    fn reserved_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert_eq!(
            store.sequence_names(),
            vec!["last session".to_string(), "default".to_string()]
        );

        let cfg = SequencerConfiguration::default();
        store.save_sequence("default", &cfg).unwrap();
        assert_eq!(store.sequence_names().len(), 2, "default is never written");
        assert!(matches!(
            store.save_sequence("!!", &cfg),
            Err(Error::InvalidName(_))
        ));

        store.save_sequence("last session", &cfg).unwrap();
        store.delete_sequence("last session").unwrap();
        assert!(store
            .sequence_folder()
            .join("last session.json")
            .exists(), "last session can't be deleted");
        assert_eq!(store.sequence_names().len(), 2, "and isn't listed twice");
        store.delete_sequence(" Last Session!").unwrap();
        assert!(
            store.sequence_folder().join("last session.json").exists(),
            "spelled differently, it's still reserved"
        );
        store.delete_sequence("never saved").unwrap();
    }

    #[test]
    fn instrument_presets_merge_into_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let id = InstrumentId::Tb303;
        let cutoff = Parameter::filter(0, FilterParameter::Cutoff);

        let mut values = ParametersValues::new();
        values.insert(cutoff, 0.125);
        values.insert(Parameter(999_999), 0.5);
        store.save_instrument_preset(id, "Squelch", &values).unwrap();
        assert!(dir
            .path()
            .join("projects/mine/presets/TB-303/squelch.json")
            .exists());
        assert_eq!(
            store.instrument_preset_names(id),
            vec!["last session".to_string(), "default".to_string(), "squelch".to_string()]
        );

        let loaded = store.instrument_preset(id, "squelch");
        let defaults = default_parameters(id);
        assert_eq!(loaded[&cutoff], 0.125);
        assert_eq!(loaded.len(), defaults.len(), "unnamed parameters aren't saved");
        for (parameter, value) in defaults.iter().filter(|(p, _)| **p != cutoff) {
            assert_eq!(loaded[parameter], *value, "{parameter:?} comes from defaults");
        }

        assert_eq!(store.instrument_preset(id, "missing"), defaults);
        store.delete_instrument_preset(id, "squelch").unwrap();
        assert_eq!(store.instrument_preset_names(id).len(), 2);
    }

    #[test]
    fn broken_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.sequence_folder()).unwrap();
        std::fs::write(store.sequence_folder().join("bad.json"), "{ not json").unwrap();
        let cfg = store.load_sequence("bad");
        assert_eq!(cfg.tempo, 90);
        assert!(!cfg.has_playable_steps());
    }

    #[test]
    fn sequence_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let mut cfg = SequencerConfiguration::default();
        cfg.tempo = 120;
        cfg.step_count = 8;
        cfg.ui_selected_instrument = InstrumentId::DrumMachine;
        cfg.set_step_state(InstrumentId::DrumMachine, 3, 49, NoteMode::Accent);
        cfg.instrument_mut(InstrumentId::Dx7).muted = true;
        store.save_sequence("Beat", &cfg).unwrap();

        let json: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(store.sequence_folder().join("beat.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(json["tempo"], 120);
        assert_eq!(json["selected_instrument"], 2);
        assert_eq!(json["DrumMachine"]["steps"][0]["step"], 3);
        assert_eq!(json["DrumMachine"]["steps"][0]["note"], 49);
        assert_eq!(json["DrumMachine"]["steps"][0]["value"], 2);
        assert_eq!(json["Dx7"]["muted"], true);
        assert!(json["TB-303"]["steps"].as_array().unwrap().is_empty());

        let loaded = store.load_sequence("beat");
        assert_eq!(loaded.tempo, 120);
        assert_eq!(loaded.step_count, 8);
        assert_eq!(loaded.ui_selected_instrument, InstrumentId::DrumMachine);
        assert_eq!(
            loaded.step_state(InstrumentId::DrumMachine, 3, 49),
            NoteMode::Accent
        );
        assert!(loaded.instrument(InstrumentId::Dx7).muted);
    }

    #[test]
    fn chains_resolve_their_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let mut verse = SequencerConfiguration::default();
        verse.set_step_state(InstrumentId::SynthMachine, 0, 60, NoteMode::Press);
        store.save_sequence("verse", &verse).unwrap();

        let default_chain = store.load_chain("default");
        assert_eq!(default_chain.chain.len(), crate::composition::DEFAULT_LINK_COUNT);

        let mut chain = ChainerConfiguration::default();
        chain.chain = vec![
            Link::new("verse", 2, SequencerConfiguration::default()),
            Link::new("", 1, SequencerConfiguration::default()),
        ];
        store.save_chain("Song", &chain).unwrap();

        let loaded = store.load_chain("song");
        assert_eq!(loaded.chain.len(), 2);
        assert_eq!(loaded.chain[0].name, "verse");
        assert_eq!(loaded.chain[0].runs, 2);
        assert_eq!(
            loaded.chain[0].sequence.step_state(InstrumentId::SynthMachine, 0, 60),
            NoteMode::Press
        );
        assert!(!loaded.chain[1].sequence.has_playable_steps());
    }

    #[test]
    fn midi_presets_replace_controllers() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let cutoff = Parameter::filter(0, FilterParameter::Cutoff);

        let mut mapping = MidiMapping::default();
        mapping.instrument_mut(InstrumentId::Tb303).controllers.insert(74, cutoff);
        mapping.instrument_mut(InstrumentId::Tb303).port = "Keys".to_string();
        store.save_midi_preset("Knobs", &mapping).unwrap();
        assert_eq!(store.midi_preset_names(), vec!["knobs".to_string()]);

        let mut other = MidiMapping::default();
        other.instrument_mut(InstrumentId::Dx7).controllers.insert(1, Parameter::VOLUME);
        store.load_midi_preset("knobs", &mut other);
        assert_eq!(
            other.instrument(InstrumentId::Tb303).controllers.get(&74),
            Some(&cutoff)
        );
        assert!(other.instrument(InstrumentId::Dx7).controllers.is_empty());
        assert!(other.instrument(InstrumentId::Tb303).port.is_empty(), "ports are untouched");

        store.load_midi_preset("", &mut other);
        assert!(other.instrument(InstrumentId::Tb303).controllers.is_empty());
    }
}
