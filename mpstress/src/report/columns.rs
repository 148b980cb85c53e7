//! Column positions of the mpstat CPU report

/// Metric names in the order they are written for every data line
pub const METRICS: [&str; 4] = ["usr", "sys", "iowait", "idle"];

/// Name of the derived busy percentage
pub const TOTAL: &str = "total";

/// Header spellings accepted for each metric (sysstat renamed `%user` to `%usr`)
const HEADER_NAMES: [(&str, &[&str]); 4] = [
    ("usr", &["%usr", "%user"]),
    ("sys", &["%sys", "%system"]),
    ("iowait", &["%iowait"]),
    ("idle", &["%idle"]),
];

/// Token index of each metric within a whitespace-split data line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    indices: [usize; 4],
}

impl Default for ColumnMap {
    /// Layout of a 24h-clock `mpstat <interval>` line:
    /// `time CPU %usr %nice %sys %iowait %irq %soft %steal %guest %gnice %idle`
    fn default() -> Self {
        Self {
            indices: [2, 4, 5, 11],
        }
    }
}

impl ColumnMap {
    /// Build a map from a header line, `None` unless every metric is present
    pub fn from_header(header: &str) -> Option<Self> {
        let tokens: Vec<&str> = header.split_whitespace().collect();
        let mut indices = [0usize; 4];

        for (slot, (_, names)) in indices.iter_mut().zip(HEADER_NAMES.iter()) {
            *slot = tokens.iter().position(|t| names.contains(t))?;
        }

        Some(Self { indices })
    }

    /// `(metric, index)` pairs in write order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        METRICS.iter().copied().zip(self.indices.iter().copied())
    }

    pub fn index_of(&self, metric: &str) -> Option<usize> {
        self.iter().find(|(name, _)| *name == metric).map(|(_, i)| i)
    }
}
