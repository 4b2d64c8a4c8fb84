//! Dedicated IO thread consuming diagnostic records over a bounded queue,
//! so the simulation never blocks on the filesystem.

use crate::errors::*;
use crate::output::path::OutputPath;
use empic::output::{DiagnosticSink, GridRecord, OutputFormat};
use empic::settings::Settings;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

enum Message {
    Grid(GridRecord),
    Quit,
}

pub struct Worker {
    tx: mpsc::SyncSender<Message>,
    handle: thread::JoinHandle<Result<()>>,
    dir: PathBuf,
}

impl Worker {
    pub fn new(path: &OutputPath, format: OutputFormat, queue_size: usize) -> Result<Worker> {
        let dir = path.dir().to_path_buf();
        let (tx, rx) = mpsc::sync_channel(queue_size.max(1));

        let worker_dir = dir.clone();
        let handle = thread::Builder::new()
            .name("output-worker".to_string())
            .spawn(move || -> Result<()> {
                for msg in rx {
                    match msg {
                        Message::Grid(record) => write_record(&worker_dir, format, &record)?,
                        Message::Quit => break,
                    }
                }
                Ok(())
            })
            .chain_err(|| "Unable to spawn the output thread.")?;

        Ok(Worker { tx, handle, dir })
    }

    /// Queues one grid record; blocks only when the IO thread is more than
    /// the configured backlog behind.
    pub fn append(&self, record: GridRecord) -> Result<()> {
        self.tx
            .send(Message::Grid(record))
            .chain_err(|| "Output thread is gone.")
    }

    /// Writes the run metadata (resolved settings and version) as JSON.
    pub fn write_metadata(&self, settings: &Settings, version: &str) -> Result<()> {
        let meta = serde_json::json!({
            "version": version,
            "created": SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            "settings": serde_json::to_value(settings)
                .chain_err(|| "Unable to serialize settings.")?,
        });
        let text = serde_json::to_string_pretty(&meta)
            .chain_err(|| "Unable to serialize metadata.")?;
        fs::write(self.dir.join("metadata.json"), text)
            .chain_err(|| "Unable to write metadata.json.")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flushes the queue and shuts the IO thread down.
    pub fn quit(self) -> Result<()> {
        let _ = self.tx.send(Message::Quit);
        self.join()
    }

    /// Called when an append failed: surfaces the IO thread's own error
    /// instead of the broken-pipe symptom.
    pub fn emergency_join(self) -> Result<()> {
        self.join()
    }

    fn join(self) -> Result<()> {
        let Worker { tx, handle, .. } = self;
        drop(tx);
        match handle.join() {
            Ok(res) => res,
            Err(_) => bail!("Output thread panicked."),
        }
    }
}

impl DiagnosticSink for Worker {
    fn emit_grid(&mut self, record: GridRecord) -> empic::errors::Result<()> {
        self.tx
            .send(Message::Grid(record))
            .map_err(|_| "output thread is gone".into())
    }
}

fn write_record(dir: &Path, format: OutputFormat, record: &GridRecord) -> Result<()> {
    let bytes = format.to_bytes(record)?;
    let file = dir.join(format!(
        "{}-{:06}.{}",
        record.name,
        record.iteration,
        format.extension()
    ));
    fs::write(&file, bytes).chain_err(|| format!("Unable to write '{}'", file.display()))?;
    debug!("wrote {}", file.display());
    Ok(())
}
