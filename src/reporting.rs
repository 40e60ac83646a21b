//! Structured per-step records and the backends they are emitted to.
//!
//! Emission is best-effort: a backend error is logged and the step carries on.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::debug;
use serde::Serialize;

use crate::config::RunConfig;

pub const METRICS_FILE: &str = "metrics.jsonl";

/// The record emitted to the metrics backend after a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub batch: usize,
    pub steps: u64,
    pub epoch: usize,
    pub gradient_size: f32,
    pub loss: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<f32>,
}

/// A sink for step records.
pub trait MetricsBackend {
    /// Whether the backend is ready to accept records.
    fn initialized(&self) -> bool;

    fn emit(&mut self, record: &StepRecord) -> io::Result<()>;
}

/// Decides once whether records get emitted at all.
///
/// Requires an initialized backend and a non-empty credential under `key_env`.
pub fn resolve_logging<F>(backend: Option<&dyn MetricsBackend>, key_env: &str, lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    let Some(backend) = backend else {
        debug!("no metrics backend attached, step records disabled");
        return false;
    };

    if !backend.initialized() {
        debug!("metrics backend is not initialized, step records disabled");
        return false;
    }

    let has_key = lookup(key_env).is_some_and(|v| !v.is_empty());
    if !has_key {
        debug!("{key_env} is not set, step records disabled");
    }

    has_key
}

#[derive(Serialize)]
struct RunHeader<'a> {
    run: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity: Option<&'a str>,
}

/// Appends one JSON object per record to `{save_path}/{run_name}/metrics.jsonl`.
pub struct JsonlBackend {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonlBackend {
    /// Opens (or creates) the run's metrics file and writes a header line for this session.
    pub fn open(config: &RunConfig) -> io::Result<Self> {
        let dir = config.run_dir();
        fs::create_dir_all(&dir)?;

        let path = dir.join(METRICS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut backend = Self {
            path,
            out: BufWriter::new(file),
        };

        let wandb = config.wandb.as_ref();
        let header = RunHeader {
            run: &config.run_name,
            project: wandb.and_then(|w| w.project.as_deref()),
            entity: wandb.and_then(|w| w.entity.as_deref()),
        };
        backend.write_line(&header)?;

        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl MetricsBackend for JsonlBackend {
    fn initialized(&self) -> bool {
        true
    }

    fn emit(&mut self, record: &StepRecord) -> io::Result<()> {
        self.write_line(record)
    }
}

/// Formats the human readable progress line.
pub fn progress_line(
    epoch: usize,
    steps: u64,
    batch: usize,
    loss: f32,
    mean: f32,
    max: f32,
) -> String {
    format!(
        "Epoch: {epoch}, Steps: {steps}, Batch: {batch}, Loss: {loss:.4}, \
         Gradient size: {mean:.4}, Max gradient size: {max:.4}"
    )
}
