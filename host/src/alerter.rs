//! Shared alerting surface. Background loops and action-item handlers
//! register named, severity-tagged alerts for conditions an operator
//! needs to see (persist-layer corruption, risk-ceiling hits); an
//! RPC/API layer outside this core's scope can expose them. Every
//! registration also emits through `log` and `metrics`, matching the
//! pattern used throughout the obligation and escrow handling paths.

use std::collections::BTreeMap;
use std::sync::Mutex;

use log::{error, warn};
use metrics::counter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub module: &'static str,
    pub cause: String,
    pub msg: String,
    pub severity: Severity,
}

/// Deduplicated by `(module, cause)`: registering the same alert twice
/// updates its message rather than accumulating duplicates, so a
/// persistently-failing background loop doesn't grow the alert set
/// unbounded.
#[derive(Default)]
pub struct Alerter {
    alerts: Mutex<BTreeMap<(&'static str, String), Alert>>,
}

impl Alerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module: &'static str, cause: impl Into<String>, msg: impl Into<String>, severity: Severity) {
        let cause = cause.into();
        let msg = msg.into();
        match severity {
            Severity::Critical => {
                error!(target: "host::alerter", "[{module}] {cause}: {msg}");
                counter!("host_alerts_critical_total").increment(1);
            }
            Severity::Warning => {
                warn!(target: "host::alerter", "[{module}] {cause}: {msg}");
                counter!("host_alerts_warning_total").increment(1);
            }
        }
        let alert = Alert {
            module,
            cause: cause.clone(),
            msg,
            severity,
        };
        self.alerts
            .lock()
            .expect("alerter mutex poisoned")
            .insert((module, cause), alert);
    }

    pub fn unregister(&self, module: &'static str, cause: &str) {
        self.alerts
            .lock()
            .expect("alerter mutex poisoned")
            .remove(&(module, cause.to_string()));
    }

    pub fn active(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .expect("alerter mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}
