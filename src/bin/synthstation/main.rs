// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! `synthstation` plays or renders sequences and chains from a project's
//! presets.

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use strum::IntoEnumIterator;
use synthstation::{
    composition::SequencerAction,
    instruments::{BankStore, BuiltInBanks, SyxFolderBanks},
    orchestration::{Engine, EngineEvent, EngineHandle},
    project::PresetStore,
    services::{wav_spec, AudioService, LogService, MidiService, Recorder},
    types::{InstrumentId, ParametersValues, SAMPLE_RATE},
    util::{AppSettings, HasSettings},
};

#[derive(Parser, Debug)]
#[clap(author, about, long_about = None, version = synthstation::app_version())]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Source {
    /// Folder holding settings.json, shared MIDI presets, DX7 banks, and
    /// projects
    #[clap(short, long, default_value = ".")]
    root: PathBuf,

    /// Name of a saved sequence in the current project
    #[clap(short, long)]
    sequence: Option<String>,

    /// Name of a saved chain in the current project. Wins over --sequence.
    #[clap(short, long)]
    chain: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Renders to a mono WAV file without touching audio or MIDI hardware
    Render {
        #[command(flatten)]
        source: Source,

        /// Where to write the WAV file
        #[clap(short, long)]
        output: PathBuf,

        /// How much to render
        #[clap(long, default_value_t = 10.0)]
        seconds: f32,
    },
    /// Plays live with MIDI input until Enter is pressed
    Play {
        #[command(flatten)]
        source: Source,

        /// Also record what's played to this WAV file
        #[clap(long)]
        record: Option<PathBuf>,

        /// Log to <root>/app.log instead of stderr
        #[clap(long)]
        log_file: bool,
    },
}

/// The folder of `.syx` banks if there is one, else the built-in bank.
fn banks(root: &Path) -> Arc<dyn BankStore> {
    let folder = root.join("dx7");
    if folder.is_dir() {
        match SyxFolderBanks::load(&folder) {
            Ok(banks) => return Arc::new(banks),
            Err(e) => log::warn!(target: "Main", "using built-in DX7 bank: {e}"),
        }
    }
    Arc::new(BuiltInBanks::default())
}

/// Restores the last session's instrument sounds and starts the requested
/// sequence or chain.
fn load(handle: &EngineHandle, store: &PresetStore, source: &Source) -> anyhow::Result<()> {
    for id in InstrumentId::iter() {
        handle.set_instrument_params(id, store.instrument_preset(id, PresetStore::LAST_SESSION));
    }
    if let Some(name) = source.chain.as_ref() {
        let cfg = store.load_chain(name);
        log::info!(target: "Main", "playing chain {name} ({} links)", cfg.chain.len());
        handle.set_chainer_configuration(cfg.with_action(SequencerAction::Play));
    } else if let Some(name) = source.sequence.as_ref() {
        let cfg = store.load_sequence(name);
        if !cfg.has_playable_steps() {
            return Err(anyhow!("sequence {name} has nothing to play"));
        }
        log::info!(target: "Main", "playing sequence {name} at {} BPM", cfg.tempo);
        handle.set_sequencer_configuration(cfg.with_action(SequencerAction::Play));
    }
    Ok(())
}

fn render(source: Source, output: PathBuf, seconds: f32) -> anyhow::Result<()> {
    let settings = AppSettings::load(&source.root);
    let store = PresetStore::new(&source.root, &settings.project_path(&source.root));
    let mut engine = Engine::new(banks(&source.root));
    load(&engine.handle(), &store, &source)?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = hound::WavWriter::create(&output, wav_spec())?;
    let mut remaining = (seconds.max(0.0) * SAMPLE_RATE as f32) as usize;
    let mut buffer = vec![0.0; settings.audio_buffer_size.max(1) as usize];
    while remaining > 0 {
        let chunk = remaining.min(buffer.len());
        engine.produce_samples(&mut buffer[..chunk]);
        for sample in buffer[..chunk].iter() {
            writer.write_sample(*sample)?;
        }
        remaining -= chunk;
    }
    writer.finalize()?;

    let stats = engine.handle().stats();
    eprintln!(
        "Rendered {} ms to {} (average fill {:.3} ms)",
        stats.produced_ms,
        output.display(),
        stats.synthesis_average_ms
    );
    Ok(())
}

fn play(source: Source, record: Option<PathBuf>, log_file: bool) -> anyhow::Result<()> {
    let log_service = if log_file {
        let service = LogService::new(&source.root, log::LevelFilter::Info);
        service.install()?;
        Some(service)
    } else {
        env_logger::init();
        None
    };
    log::info!(target: "Main", "synthstation {}", synthstation::app_version());

    let mut settings = AppSettings::load(&source.root);
    settings.runs += 1;
    settings.needs_save();
    let store = PresetStore::new(&source.root, &settings.project_path(&source.root));

    let mut engine = Engine::new(banks(&source.root));
    let handle = engine.handle();
    load(&handle, &store, &source)?;

    let mut midi = MidiService::new(settings.midi.clone());
    engine.set_midi_queue(midi.queue());

    let mut recorder = Recorder::default();
    if let Some(path) = record.as_ref() {
        recorder.start_recording(path);
        engine.set_recorder(recorder.tap());
    }

    let audio = AudioService::new_with(engine, settings.audio_buffer_size as usize)?;
    eprintln!(
        "Playing at {} Hz on {} channels. MIDI ports: {:?}. Press Enter to stop.",
        audio.sample_rate(),
        audio.channel_count(),
        midi.ports()
    );
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    handle.panic();
    drop(audio);
    midi.stop();
    recorder.stop_recording();

    // Whatever MIDI controllers changed becomes next time's starting point.
    let mut changed: BTreeMap<InstrumentId, ParametersValues> = BTreeMap::new();
    for event in handle.events().try_iter() {
        if let EngineEvent::InstrumentParams(id, values) = event {
            changed.insert(id, values);
        }
    }
    for (id, values) in changed {
        store.save_instrument_preset(id, PresetStore::LAST_SESSION, &values)?;
    }
    if !settings.has_been_saved() {
        settings.save(&source.root)?;
    }

    let stats = handle.stats();
    log::info!(target: "Main",
        "played {} ms, average fill {:.3} ms",
        stats.produced_ms,
        stats.synthesis_average_ms
    );
    if let Some(mut service) = log_service {
        service.stop();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Render {
            source,
            output,
            seconds,
        } => {
            env_logger::init();
            render(source, output, seconds)
        }
        Command::Play {
            source,
            record,
            log_file,
        } => play(source, record, log_file),
    }
}
