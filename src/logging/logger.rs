use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

// ── Constants ───────────────────────────────────────────────────────────────

/// Size at which the log file is cut down (5 MB).
const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Env var controlling the log level (`error`..`trace`, default `info`).
const LEVEL_ENV: &str = "CLEFCAST_LOG";

// ── Logger ──────────────────────────────────────────────────────────────────

struct FileSink {
    path: PathBuf,
    file: File,
}

/// Logger for relays and participants: every enabled record goes to
/// stderr right away, and optionally to a size-capped file.
pub struct ClefcastLogger {
    level: LevelFilter,
    sink: Option<Mutex<FileSink>>,
}

impl ClefcastLogger {
    fn new(level: LevelFilter, sink: Option<FileSink>) -> Self {
        Self {
            level,
            sink: sink.map(Mutex::new),
        }
    }

    fn format_line(record: &Record) -> String {
        format!(
            "{} {:<5} {} — {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.module_path().unwrap_or("?"),
            record.args()
        )
    }

    /// When the file passes `max_size`, keep only its newer half.
    fn trim_if_oversized(sink: &mut FileSink, max_size: u64) {
        let len = match std::fs::metadata(&sink.path) {
            Ok(m) => m.len(),
            Err(_) => return,
        };
        if len <= max_size {
            return;
        }

        let lines: Vec<String> = match File::open(&sink.path) {
            Ok(f) => BufReader::new(f).lines().map_while(Result::ok).collect(),
            Err(_) => return,
        };
        let keep = &lines[lines.len() / 2..];

        if let Ok(mut fresh) = File::create(&sink.path) {
            for line in keep {
                let _ = writeln!(fresh, "{line}");
            }
            if let Ok(reopened) = OpenOptions::new().append(true).open(&sink.path) {
                sink.file = reopened;
            }
        }
    }
}

impl Log for ClefcastLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = Self::format_line(record);
        eprintln!("{line}");

        if let Some(sink) = &self.sink {
            let mut sink = sink.lock();
            let _ = writeln!(sink.file, "{line}");
            Self::trim_if_oversized(&mut sink, MAX_FILE_SIZE);
        }
    }

    fn flush(&self) {
        if let Some(sink) = &self.sink {
            let _ = sink.lock().file.flush();
        }
    }
}

// ── Public init ─────────────────────────────────────────────────────────────

/// Install the logger as the global `log` backend.
///
/// - Level comes from `CLEFCAST_LOG` (default: `info`).
/// - With `log_file`, records are also appended there; the parent
///   directory is created as needed.
pub fn init(log_file: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let level = std::env::var(LEVEL_ENV)
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let sink = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            Some(FileSink { path, file })
        }
        None => None,
    };

    log::set_boxed_logger(Box::new(ClefcastLogger::new(level, sink)))?;
    log::set_max_level(level);
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────
