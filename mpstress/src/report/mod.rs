//! Report parsing for mpstat output relayed by the helper
//!
//! Each helper record carries one line of `mpstat` output. Lines are classified as:
//! - noise: stderr records, the `Linux ...` banner, blank separators, `Average:` summaries
//! - header: the `%idle` column line, used to refresh the host's column map
//! - data: everything else, turned into one sample per metric plus `total`

pub mod columns;

use crate::error::{CollectorError, Result};
use crate::writer::MetricSample;
use columns::{ColumnMap, TOTAL};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One JSON line emitted by the helper
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReportRecord {
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "Host", default)]
    pub host: String,
    #[serde(rename = "Stream", default)]
    pub stream: String,
}

/// Classification of a report line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    NotStdout,
    Banner,
    Blank,
    Summary,
    Header,
    Data,
}

impl LineKind {
    /// Filters are applied in order; the first match wins
    pub fn classify(record: &ReportRecord) -> Self {
        let body = record.body.as_str();
        if record.stream != "stdout" {
            LineKind::NotStdout
        } else if body.starts_with("Linux") {
            LineKind::Banner
        } else if body == "\n" {
            LineKind::Blank
        } else if body.starts_with("Average") {
            LineKind::Summary
        } else if body.contains("%idle") {
            LineKind::Header
        } else {
            LineKind::Data
        }
    }
}

/// Turns report records into samples, tracking the column layout of every host
#[derive(Debug, Default)]
pub struct ReportParser {
    layouts: HashMap<String, ColumnMap>,
}

impl ReportParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column map currently used for `host`
    pub fn layout(&self, host: &str) -> ColumnMap {
        self.layouts.get(host).copied().unwrap_or_default()
    }

    /// Parse one record. Non-data lines produce no samples.
    pub fn parse(&mut self, record: &ReportRecord) -> Result<Vec<MetricSample>> {
        match LineKind::classify(record) {
            LineKind::Data => self.parse_data(record),
            LineKind::Header => {
                self.learn_header(record);
                Ok(Vec::new())
            }
            kind => {
                debug!("{}: skipping {:?} line", record.host, kind);
                Ok(Vec::new())
            }
        }
    }

    fn learn_header(&mut self, record: &ReportRecord) {
        match ColumnMap::from_header(&record.body) {
            Some(map) => {
                if self.layout(&record.host) != map {
                    debug!("{}: column layout {:?}", record.host, map);
                }
                self.layouts.insert(record.host.clone(), map);
            }
            None => warn!(
                "{}: unrecognized report header, keeping current layout: {:?}",
                record.host, record.body
            ),
        }
    }

    fn parse_data(&self, record: &ReportRecord) -> Result<Vec<MetricSample>> {
        let tokens: Vec<&str> = record.body.split_whitespace().collect();
        let layout = self.layout(&record.host);

        let column = |metric: &'static str, index: usize| {
            tokens.get(index).copied().ok_or_else(|| CollectorError::MissingColumn {
                host: record.host.clone(),
                metric,
                index,
                body: record.body.clone(),
            })
        };

        // The time label is kept verbatim, whatever clock format mpstat uses
        let time = column("time", 0)?;

        let values = layout
            .iter()
            .map(|(metric, index)| column(metric, index).map(|token| (metric, token)))
            .collect::<Result<Vec<_>>>()?;

        let idle_token = column("idle", layout.index_of("idle").unwrap_or_default())?;
        let idle: f64 = idle_token.parse().map_err(|source| CollectorError::MalformedIdle {
            host: record.host.clone(),
            token: idle_token.to_string(),
            source,
        })?;

        let sample = |metric: &'static str, value: String| MetricSample {
            host: record.host.clone(),
            metric,
            time: time.to_string(),
            value,
        };

        let mut samples: Vec<MetricSample> = values
            .into_iter()
            .map(|(metric, token)| sample(metric, token.to_string()))
            .collect();
        samples.push(sample(TOTAL, (100.0 - idle).to_string()));

        Ok(samples)
    }
}
