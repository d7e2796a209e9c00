//! Quantity parsing helpers for Kubernetes resource values.
//!
//! CPU is normalized to milli-cores and memory to bytes, both as `i64`, so
//! summing thousands of container requests never accumulates float drift.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const KI: f64 = 1024.0;

/// Parse a Kubernetes CPU quantity string to milli-cores.
pub fn parse_cpu_milli(s: &str) -> Option<i64> {
    let s = s.trim();
    let cores = if let Some(n) = s.strip_suffix('m') {
        n.parse::<f64>().ok()? / 1000.0
    } else if let Some(n) = s.strip_suffix('u') {
        n.parse::<f64>().ok()? / 1_000_000.0
    } else if let Some(n) = s.strip_suffix('n') {
        n.parse::<f64>().ok()? / 1_000_000_000.0
    } else {
        s.parse::<f64>().ok()?
    };
    Some((cores * 1000.0).round() as i64)
}

/// Parse a Kubernetes memory quantity string to bytes.
pub fn parse_memory_bytes(s: &str) -> Option<i64> {
    let s = s.trim();
    let suffixes: &[(&str, f64)] = &[
        ("Ei", KI * KI * KI * KI * KI * KI),
        ("Pi", KI * KI * KI * KI * KI),
        ("Ti", KI * KI * KI * KI),
        ("Gi", KI * KI * KI),
        ("Mi", KI * KI),
        ("Ki", KI),
        ("E", 1e18),
        ("P", 1e15),
        ("T", 1e12),
        ("G", 1e9),
        ("M", 1e6),
        ("k", 1e3),
        ("K", 1e3),
        ("m", 1e-3),
    ];

    for (suffix, multiplier) in suffixes {
        if let Some(n) = s.strip_suffix(suffix) {
            return n.parse::<f64>().ok().map(|v| (v * multiplier).round() as i64);
        }
    }

    s.parse::<f64>().ok().map(|v| v.round() as i64)
}

/// CPU quantity in milli-cores; unparseable values count as zero.
pub fn cpu_milli(q: &Quantity) -> i64 {
    parse_cpu_milli(&q.0).unwrap_or(0)
}

/// Memory quantity in bytes; unparseable values count as zero.
pub fn memory_bytes(q: &Quantity) -> i64 {
    parse_memory_bytes(&q.0).unwrap_or(0)
}

/// Usage as a percentage of capacity. A zero capacity yields 0%.
pub fn percent(used: f64, capacity: f64) -> f64 {
    if capacity > 0.0 {
        (used / capacity) * 100.0
    } else {
        0.0
    }
}

/// Formats milli-cores the way kubectl does: `250m` below one core, `1.5` above.
pub fn format_cpu(milli: i64) -> String {
    if milli.abs() < 1000 {
        format!("{milli}m")
    } else {
        let cores = milli as f64 / 1000.0;
        if milli % 1000 == 0 {
            format!("{}", milli / 1000)
        } else {
            format!("{cores:.1}")
        }
    }
}

/// Formats bytes using binary suffixes (`512Mi`, `1.5Gi`).
pub fn format_memory(bytes: i64) -> String {
    let units = [("Ti", KI * KI * KI * KI), ("Gi", KI * KI * KI), ("Mi", KI * KI), ("Ki", KI)];
    let value = bytes as f64;
    for (suffix, size) in units {
        if value.abs() >= size {
            let scaled = value / size;
            return if (scaled.fract()).abs() < 0.05 {
                format!("{:.0}{suffix}", scaled)
            } else {
                format!("{scaled:.1}{suffix}")
            };
        }
    }
    format!("{bytes}")
}
