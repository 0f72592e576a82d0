// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::{
    error::Result,
    util::{PeriodicTask, TaskRunner},
};
use crossbeam_channel::{Receiver, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

const IDLE: Duration = Duration::from_millis(15);

/// A log file bigger than this at startup starts over.
const MAX_FILE_SIZE: u64 = 150 * 1024 * 1024;

/// Lines the debug window hasn't picked up yet. Older lines win.
const LINE_BACKLOG: usize = 4096;

/// One captured log call.
#[derive(Clone, Debug)]
pub struct LogRecord {
    #[allow(missing_docs)]
    pub level: Level,
    /// The component that logged it.
    pub target: String,
    #[allow(missing_docs)]
    pub message: String,
    #[allow(missing_docs)]
    pub timestamp: SystemTime,
}
impl LogRecord {
    fn level_tag(level: Level) -> &'static str {
        match level {
            Level::Error => "ERR",
            Level::Warn => "WRN",
            Level::Info => "INF",
            Level::Debug | Level::Trace => "DBG",
        }
    }

    /// `[LVL HH:MM:SS.mmm target] message`, with the time of day in UTC.
    pub fn format(&self) -> String {
        let since_epoch = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let seconds = since_epoch.as_secs() % 86400;
        format!(
            "[{} {:02}:{:02}:{:02}.{:03} {}] {}",
            Self::level_tag(self.level),
            seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60,
            since_epoch.subsec_millis(),
            self.target,
            self.message
        )
    }
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Vec<LogRecord>>,
    count: AtomicUsize,
    level: LevelFilter,
}

/// The [Log] half of a [LogService], cheap to hand to the `log` crate.
#[derive(Clone, Debug)]
pub struct LogSink(Arc<Shared>);
impl Log for LogSink {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.0.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Ok(mut queue) = self.0.queue.lock() {
            queue.push(LogRecord {
                level: record.level(),
                target: record.target().to_string(),
                message: record.args().to_string(),
                timestamp: SystemTime::now(),
            });
            self.0.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {}
}

struct LogTask {
    shared: Arc<Shared>,
    path: PathBuf,
    file: Option<BufWriter<File>>,
    lines: Sender<String>,
    scratch: Vec<LogRecord>,
}
impl LogTask {
    fn open(path: &Path) -> Result<BufWriter<File>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let too_big = std::fs::metadata(path)
            .map(|m| m.len() > MAX_FILE_SIZE)
            .unwrap_or(false);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!too_big)
            .truncate(too_big)
            .open(path)?;
        Ok(BufWriter::new(file))
    }

    fn write_line(&mut self, line: String) {
        if let Some(file) = self.file.as_mut() {
            if writeln!(file, "{line}").is_err() {
                self.file = None;
            }
        }
        let _ = self.lines.try_send(line);
    }

    fn drain(&mut self) {
        self.scratch.clear();
        if let Ok(mut queue) = self.shared.queue.lock() {
            std::mem::swap(&mut *queue, &mut self.scratch);
        }
        let records = std::mem::take(&mut self.scratch);
        for record in records.iter() {
            self.write_line(record.format());
        }
        self.scratch = records;
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}
impl PeriodicTask for LogTask {
    fn pre_work(&mut self) {
        self.file = match Self::open(&self.path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("couldn't open log file {}: {e}", self.path.display());
                None
            }
        };
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.write_line(format!("--------- Log Started {started} ---------"));
    }

    fn work_step(&mut self) {
        self.drain();
    }

    fn post_work(&mut self) {
        self.drain();
        let count = self.shared.count.load(Ordering::Relaxed);
        self.write_line(format!("--------- Log Stopped {count} ---------"));
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
    }
}

/// Collects log records from anywhere and writes them out on a background
/// thread, both to `app.log` and to a channel a log viewer can read.
#[derive(Debug)]
pub struct LogService {
    shared: Arc<Shared>,
    lines: Receiver<String>,
    runner: TaskRunner,
}
impl LogService {
    /// The log file's name inside the log folder.
    pub const FILENAME: &'static str = "app.log";

    /// Starts writing records at `level` or more severe into `folder`.
    pub fn new(folder: &Path, level: LevelFilter) -> Self {
        let shared = Arc::new(Shared {
            queue: Default::default(),
            count: Default::default(),
            level,
        });
        let (sender, lines) = crossbeam_channel::bounded(LINE_BACKLOG);
        let mut runner = TaskRunner::new("Log", IDLE);
        runner.start(LogTask {
            shared: Arc::clone(&shared),
            path: folder.join(Self::FILENAME),
            file: None,
            lines: sender,
            scratch: Default::default(),
        });
        Self {
            shared,
            lines,
            runner,
        }
    }

    /// Something to register with the `log` crate.
    pub fn sink(&self) -> LogSink {
        LogSink(Arc::clone(&self.shared))
    }

    /// Makes this the process-wide logger. Only the first logger installed
    /// in a process takes effect.
    pub fn install(&self) -> anyhow::Result<()> {
        log::set_boxed_logger(Box::new(self.sink()))?;
        log::set_max_level(self.shared.level);
        Ok(())
    }

    /// Formatted lines, in order, for a log window.
    pub fn lines(&self) -> &Receiver<String> {
        &self.lines
    }

    /// How many records have been captured.
    pub fn record_count(&self) -> usize {
        self.shared.count.load(Ordering::Relaxed)
    }

    /// Writes out everything pending and closes the file.
    pub fn stop(&mut self) {
        self.runner.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::RecordBuilder;

    fn emit(sink: &LogSink, level: Level, target: &str, message: &str) {
        sink.log(
            &RecordBuilder::new()
                .level(level)
                .target(target)
                .args(format_args!("{message}"))
                .build(),
        );
    }

    #[test]
    fn format() {
        let record = LogRecord {
            level: Level::Warn,
            target: "Midi".to_string(),
            message: "hello".to_string(),
            timestamp: UNIX_EPOCH + Duration::from_millis(3_723_004),
        };
        assert_eq!(record.format(), "[WRN 01:02:03.004 Midi] hello");
    }

    #[test]
    fn writes_file_and_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = LogService::new(dir.path(), LevelFilter::Info);
        let sink = service.sink();
        emit(&sink, Level::Info, "Engine", "one");
        emit(&sink, Level::Debug, "Engine", "filtered out");
        emit(&sink, Level::Error, "Recorder", "two");
        service.stop();
        assert_eq!(service.record_count(), 2);

        let lines: Vec<String> = service.lines().try_iter().collect();
        assert_eq!(lines.len(), 4, "start, two records, stop: {lines:?}");
        assert!(lines[0].starts_with("--------- Log Started "));
        assert!(lines[1].starts_with("[INF ") && lines[1].ends_with(" Engine] one"));
        assert!(lines[2].starts_with("[ERR ") && lines[2].ends_with(" Recorder] two"));
        assert_eq!(lines[3], "--------- Log Stopped 2 ---------");

        let contents = std::fs::read_to_string(dir.path().join(LogService::FILENAME)).unwrap();
        assert_eq!(contents.lines().collect::<Vec<_>>(), lines);
    }

    #[test]
    fn appends_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..2 {
            let mut service = LogService::new(dir.path(), LevelFilter::Debug);
            emit(&service.sink(), Level::Debug, "Test", "run");
            service.stop();
        }
        let contents = std::fs::read_to_string(dir.path().join(LogService::FILENAME)).unwrap();
        assert_eq!(contents.lines().filter(|l| l.contains("Log Started")).count(), 2);
        assert_eq!(contents.lines().filter(|l| l.starts_with("[DBG ")).count(), 2);
    }
}
