//! Scalar metric logging for observer callbacks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::RieszResult;

#[derive(Serialize)]
struct MetricRecord<'a> {
    epoch: usize,
    tag: &'a str,
    value: f64,
}

/// Append-only JSONL sink for per-epoch scalars, written as `metrics.jsonl`
/// inside the run directory.
///
/// Opened at fit start when an observer is registered and handed to the
/// observer each epoch. Flushed explicitly on the success path and again on
/// drop, so error paths release it too.
pub struct MetricSink {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl MetricSink {
    /// Open (or truncate) `metrics.jsonl` inside `run_dir`.
    pub fn create(run_dir: &Path) -> RieszResult<Self> {
        let path = run_dir.join("metrics.jsonl");
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self { writer, path })
    }

    /// Path of the underlying JSONL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one `{epoch, tag, value}` line.
    pub fn log_scalar(&mut self, tag: &str, epoch: usize, value: f64) -> RieszResult<()> {
        serde_json::to_writer(&mut self.writer, &MetricRecord { epoch, tag, value })?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> RieszResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for MetricSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "metric sink flush failed on drop");
        }
    }
}
