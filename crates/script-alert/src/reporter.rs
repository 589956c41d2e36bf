//! Destinations for [`Alert`]s.

use std::io::Write;
use std::sync::Mutex;

use crate::detector::Alert;

/// Receives every alert raised by a [`ScriptAlerter`](crate::ScriptAlerter).
///
/// Reporters are called inline on the relay path, so they must not block
/// for long and must never panic.
pub trait AlertReporter: Send + Sync {
    fn report(&self, alert: &Alert);
}

/// Writes alerts to stderr, flushing each one, and mirrors them as
/// `tracing` warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrReporter;

impl AlertReporter for StderrReporter {
    fn report(&self, alert: &Alert) {
        tracing::warn!(
            method = %alert.method,
            category = %alert.category,
            excerpt = %alert.excerpt,
            "script injection command observed"
        );

        let mut stderr = std::io::stderr().lock();
        // Nothing useful can be done if stderr is gone.
        let _ = writeln!(stderr, "[ALERT] {alert}");
        let _ = stderr.flush();
    }
}

/// Keeps alerts in memory. Useful for tests and for embedding.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryReporter {
    /// Snapshot of the alerts reported so far.
    pub fn alerts(&self) -> Vec<Alert> {
        match self.alerts.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AlertReporter for MemoryReporter {
    fn report(&self, alert: &Alert) {
        match self.alerts.lock() {
            Ok(mut guard) => guard.push(alert.clone()),
            Err(poisoned) => poisoned.into_inner().push(alert.clone()),
        }
    }
}
