// Copyright (c) 2023 Mike Tsao. All rights reserved.

use synthstation::{
    prelude::*,
    types::{EnvParameter, FilterParameter, OscParameter},
};

// A sound saved from one engine comes back in another.
#[test]
fn instrument_sound_survives_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = AppSettings::default();
    settings.project = "demo".to_string();
    settings.save(dir.path()).unwrap();

    let settings = AppSettings::load(dir.path());
    let store = PresetStore::new(dir.path(), &settings.project_path(dir.path()));

    let mut values = store.instrument_preset(InstrumentId::SynthMachine, PresetStore::DEFAULT);
    values.insert(Parameter::osc(1, OscParameter::Kind), 4.0);
    values.insert(Parameter::env(0, EnvParameter::Attack), 0.25);
    values.insert(Parameter::filter(0, FilterParameter::Cutoff), 0.5);
    store
        .save_instrument_preset(InstrumentId::SynthMachine, PresetStore::LAST_SESSION, &values)
        .unwrap();
    assert!(dir
        .path()
        .join("projects/demo/presets/SynthMachine/last session.json")
        .exists());

    let mut engine = Engine::default();
    let handle = engine.handle();
    handle.set_instrument_params(
        InstrumentId::SynthMachine,
        store.instrument_preset(InstrumentId::SynthMachine, PresetStore::LAST_SESSION),
    );
    engine.produce_samples(&mut [0.0; 16]);

    let loaded = engine
        .instruments()
        .instrument(InstrumentId::SynthMachine)
        .values();
    for (parameter, value) in values.iter() {
        assert_eq!(loaded.get(parameter), Some(value), "{}", parameter.name().unwrap_or_default());
    }
}

// Sequence presets carry steps, tempo, and lane settings for every
// instrument.
#[test]
fn sequence_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = PresetStore::new(dir.path(), dir.path());

    let mut cfg = SequencerConfiguration::new(128, 0.5, 12);
    cfg.set_step_state(InstrumentId::Tb303, 0, 36, NoteMode::Accent);
    cfg.set_step_state(InstrumentId::Tb303, 1, 36, NoteMode::Hold);
    cfg.set_step_state(InstrumentId::DrumMachine, 4, 50, NoteMode::Press);
    cfg.instrument_mut(InstrumentId::Dx7).muted = true;
    cfg.instrument_mut(InstrumentId::Tb303).ui_first_row = 24;
    store.save_sequence("Acid Line", &cfg).unwrap();
    assert!(store.sequence_names().contains(&"acid line".to_string()));

    let loaded = store.load_sequence("acid line");
    assert_eq!(loaded.tempo, 128);
    assert_eq!(loaded.duty, 0.5);
    assert_eq!(loaded.step_count, 12);
    for id in [InstrumentId::Tb303, InstrumentId::DrumMachine, InstrumentId::Dx7] {
        assert_eq!(loaded.instrument(id), cfg.instrument(id), "{id}");
    }

    store.delete_sequence("acid line").unwrap();
    assert_eq!(store.sequence_names().len(), 2);
    assert_eq!(store.load_sequence("acid line").tempo, 90, "gone means default");
}

// A MIDI preset fills in controllers and leaves port routing alone.
#[test]
fn midi_preset_into_settings() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("midi")).unwrap();
    std::fs::write(
        dir.path().join("midi").join("knobs.json"),
        r#"{ "TB-303": { "FilterCutoff_0": 74, "NotAParameter": 12 }, "Moog": { "Volume": 7 } }"#,
    )
    .unwrap();

    let store = PresetStore::new(dir.path(), &dir.path().join("project"));
    assert_eq!(store.midi_preset_names(), vec!["knobs".to_string()]);

    let mut settings = AppSettings::default();
    settings.midi.instrument_mut(InstrumentId::Tb303).port = "Keys".to_string();
    store.load_midi_preset("knobs", &mut settings.midi);

    let tb303 = settings.midi.instrument(InstrumentId::Tb303);
    assert_eq!(tb303.port, "Keys");
    assert_eq!(tb303.controllers.len(), 1);
    assert_eq!(
        tb303.controllers.get(&74),
        Some(&Parameter::filter(0, FilterParameter::Cutoff))
    );
}
