//! Turning an `opcache_get_status()` document into Prometheus gauges.

use serde_json::Value;

use std::fmt::Write;
use std::sync::Mutex;
use std::time::Duration;

const TOP_LEVEL: &[&str] = &["opcache_enabled", "cache_full", "restart_in_progress", "restart_pending"];

const INTERNED_STRINGS_USAGE: &[&str] =
    &["used_memory", "buffer_size", "number_of_strings", "free_memory"];

const MEMORY_USAGE: &[&str] =
    &["used_memory", "wasted_memory", "current_wasted_percentage", "free_memory"];

const OPCACHE_STATISTICS: &[&str] = &[
    "hits", "blacklist_miss_ratio", "max_cached_keys", "manual_restarts", "num_cached_keys",
    "opcache_hit_rate", "last_restart_time", "start_time", "misses", "oom_restarts",
    "num_cached_scripts", "blacklist_misses", "hash_restarts",
];

/// (object key, metric name prefix, fields exported)
///
/// The `opcache_statistics` gauges have always been exported without the `php_opcache_` prefix;
/// existing dashboards depend on that.
const NESTED: &[(&str, &str, &[&str])] = &[
    ("interned_strings_usage", "php_opcache_", INTERNED_STRINGS_USAGE),
    ("memory_usage", "php_opcache_", MEMORY_USAGE),
    ("opcache_statistics", "", OPCACHE_STATISTICS),
];

#[derive(Clone, Debug, PartialEq)]
pub struct Gauge {
    pub name: String,
    pub help: String,
    pub value: Option<f64>,
}

fn sample(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Every gauge this exporter knows, in a stable order, filled from `status` where present.
pub fn gauges(status: &Value) -> Vec<Gauge> {
    let mut out = Vec::new();

    for &key in TOP_LEVEL {
        out.push(Gauge {
            name: format!("php_opcache_{}", key),
            help: format!("PHP OPcache {}", key),
            value: status.get(key).and_then(sample),
        });
    }

    for &(object, prefix, fields) in NESTED {
        let nested = status.get(object);
        for &field in fields {
            out.push(Gauge {
                name: format!("{}{}_{}", prefix, object, field),
                help: format!("PHP OPcache {} {}", object, field),
                value: nested.and_then(|o| o.get(field)).and_then(sample),
            });
        }
    }

    out
}

/// Parse the raw document and map it.
pub fn parse(raw: &str) -> Result<Vec<Gauge>, serde_json::Error> {
    let status: Value = serde_json::from_str(raw)?;
    Ok(gauges(&status))
}

fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// Prometheus text exposition format, version 0.0.4.
pub fn render(gauges: &[Gauge], out: &mut String) {
    for gauge in gauges {
        let _ = writeln!(out, "# HELP {} {}", gauge.name, gauge.help);
        let _ = writeln!(out, "# TYPE {} gauge", gauge.name);
        if let Some(value) = gauge.value {
            let _ = writeln!(out, "{} {}", gauge.name, format_value(value));
        }
    }
}

/// Time spent per collection, exported as a summary without quantiles.
#[derive(Debug, Default)]
pub struct CollectTime {
    inner: Mutex<(u64, f64)>,
}

pub const COLLECT_TIME_NAME: &str = "php_opcache_collector_collect_seconds";

impl CollectTime {
    pub fn observe(&self, elapsed: Duration) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.0 += 1;
        guard.1 += elapsed.as_secs_f64();
    }

    pub fn render(&self, out: &mut String) {
        let (count, sum) = match self.inner.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        let _ = writeln!(out, "# HELP {} Time spent to collect metrics from PHP OPcache",
                         COLLECT_TIME_NAME);
        let _ = writeln!(out, "# TYPE {} summary", COLLECT_TIME_NAME);
        let _ = writeln!(out, "{}_count {}", COLLECT_TIME_NAME, format_value(count as f64));
        let _ = writeln!(out, "{}_sum {}", COLLECT_TIME_NAME, sum);
    }
}
