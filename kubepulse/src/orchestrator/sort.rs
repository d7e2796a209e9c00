use std::{cmp::Ordering, fmt, str::FromStr};

use serde::Deserialize;

use super::Row;
use crate::{error::Error, model::ResourceMetrics};

/// Row ordering. Cycles status -> name -> cpu -> memory -> status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Status,
    Name,
    Cpu,
    Memory,
}

impl SortMode {
    pub fn next(self) -> Self {
        match self {
            SortMode::Status => SortMode::Name,
            SortMode::Name => SortMode::Cpu,
            SortMode::Cpu => SortMode::Memory,
            SortMode::Memory => SortMode::Status,
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SortMode::Status => "status",
            SortMode::Name => "name",
            SortMode::Cpu => "cpu",
            SortMode::Memory => "memory",
        };
        f.write_str(s)
    }
}

impl FromStr for SortMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "status" => Ok(SortMode::Status),
            "name" => Ok(SortMode::Name),
            "cpu" => Ok(SortMode::Cpu),
            "memory" | "mem" => Ok(SortMode::Memory),
            other => Err(Error::config(format!("unknown sort mode {other:?}"))),
        }
    }
}

fn by_identity(a: &Row, b: &Row) -> Ordering {
    a.namespace
        .cmp(&b.namespace)
        .then_with(|| a.name.cmp(&b.name))
}

/// Sorts row/metric pairs in place. Pairs move together so index `i` keeps
/// describing one entity.
pub fn sort_pairs(pairs: &mut [(Row, ResourceMetrics)], mode: SortMode) {
    pairs.sort_by(|(ra, ma), (rb, mb)| match mode {
        // unhealthy first
        SortMode::Status => ra
            .healthy
            .cmp(&rb.healthy)
            .then_with(|| mb.cpu_usage_pct().total_cmp(&ma.cpu_usage_pct()))
            .then_with(|| by_identity(ra, rb)),
        SortMode::Name => ra
            .name
            .cmp(&rb.name)
            .then_with(|| ra.namespace.cmp(&rb.namespace)),
        SortMode::Cpu => mb
            .cpu_usage_pct()
            .total_cmp(&ma.cpu_usage_pct())
            .then_with(|| by_identity(ra, rb)),
        SortMode::Memory => mb
            .mem_usage_pct()
            .total_cmp(&ma.mem_usage_pct())
            .then_with(|| by_identity(ra, rb)),
    });
}

/// Keeps the first `limit` pairs; 0 keeps everything.
pub fn truncate_pairs<T>(pairs: &mut Vec<T>, limit: usize) {
    if limit > 0 {
        pairs.truncate(limit);
    }
}
