//! Per-host, per-metric time series files
//!
//! Layout on disk:
//! - `<output>/<host>/<metric>` holds one `"<time> <value>\n"` line per sample
//! - directories and files are created on first write
//! - every append opens, writes and closes the file so a killed process
//!   never leaves buffered samples behind

use crate::error::{CollectorError, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::trace;

/// One derived value ready to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub host: String,
    pub metric: &'static str,
    pub time: String,
    pub value: String,
}

impl MetricSample {
    fn line(&self) -> String {
        format!("{} {}\n", self.time, self.value)
    }
}

/// Appends samples below a fixed output directory
#[derive(Debug, Clone)]
pub struct MetricWriter {
    output_dir: PathBuf,
}

impl MetricWriter {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Append a single sample, creating the host directory if needed
    pub async fn append(&self, sample: &MetricSample) -> Result<()> {
        let dir = self.host_dir(&sample.host)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| CollectorError::Write { path: dir.clone(), source })?;

        let path = dir.join(sample.metric);
        let write = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(sample.line().as_bytes()).await?;
            file.flush().await
        };
        write
            .await
            .map_err(|source| CollectorError::Write { path: path.clone(), source })?;

        trace!("{}: {} {} {}", sample.host, sample.time, sample.metric, sample.value);
        Ok(())
    }

    /// Host names become directory names, so they must be a single normal component
    fn host_dir(&self, host: &str) -> Result<PathBuf> {
        let mut components = Path::new(host).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == host => {
                Ok(self.output_dir.join(host))
            }
            _ => Err(CollectorError::InvalidHost(host.to_string())),
        }
    }
}
