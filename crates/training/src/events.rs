//! Structured run events and the reporters that consume them.
//!
//! Training and evaluation never print directly; they hand [`Event`]s to a [`Reporter`], and
//! the binary decides whether those go to stdout, a JSONL metrics file, both, or nowhere.

use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    CheckpointLoaded {
        path: PathBuf,
        epoch: usize,
    },
    Batch {
        epoch: usize,
        /// 1-based within the epoch.
        batch: usize,
        loss: f32,
        triplet: f32,
        embed: f32,
    },
    Epoch {
        epoch: usize,
        batches: usize,
        mean_loss: f32,
        checkpoint: PathBuf,
    },
    EvalRow {
        i: usize,
        path: PathBuf,
    },
    Distance {
        i: usize,
        j: usize,
        distance: f32,
    },
}

pub trait Reporter {
    fn report(&mut self, event: &Event);

    fn flush(&mut self) {}
}

/// Human-readable lines on stdout.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&mut self, event: &Event) {
        match event {
            Event::CheckpointLoaded { path, epoch } => {
                println!("Loaded checkpoint {} (next epoch {epoch})", path.display())
            }
            Event::Batch {
                epoch,
                batch,
                loss,
                triplet,
                embed,
            } => println!(
                "epoch {epoch} batch {batch}: loss={loss:.6} (triplet={triplet:.6}, embed={embed:.4})"
            ),
            Event::Epoch {
                epoch,
                batches,
                mean_loss,
                checkpoint,
            } => println!(
                "epoch {epoch}: avg loss {mean_loss:.4} over {batches} batches; saved {}",
                checkpoint.display()
            ),
            Event::EvalRow { i, path } => println!("\n\n# {i} {}", path.display()),
            Event::Distance { i, j, distance } => println!("{i} {j} {distance}"),
        }
    }

    fn flush(&mut self) {
        let _ = std::io::stdout().flush();
    }
}

/// Appends one JSON object per event; stops writing after the first I/O error.
pub struct JsonlReporter {
    path: PathBuf,
    file: Option<fs::File>,
}

impl JsonlReporter {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }
}

impl Reporter for JsonlReporter {
    fn report(&mut self, event: &Event) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                eprintln!("Failed to encode event for {}: {e}", self.path.display());
                return;
            }
        };
        if let Err(e) = writeln!(file, "{line}") {
            eprintln!("Failed to write metrics to {}: {e}", self.path.display());
            self.file = None;
        }
    }

    fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    pub events: Vec<Event>,
}

impl Reporter for MemoryReporter {
    fn report(&mut self, event: &Event) {
        self.events.push(event.clone());
    }
}

#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&mut self, _event: &Event) {}
}

/// Forwards each event to every inner reporter in order.
#[derive(Default)]
pub struct FanOut {
    reporters: Vec<Box<dyn Reporter>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Reporter for FanOut {
    fn report(&mut self, event: &Event) {
        for r in self.reporters.iter_mut() {
            r.report(event);
        }
    }

    fn flush(&mut self) {
        for r in self.reporters.iter_mut() {
            r.flush();
        }
    }
}
