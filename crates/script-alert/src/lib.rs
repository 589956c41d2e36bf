//! Script-injection alerting for remote-debugging traffic.
//!
//! Text messages relayed between the gateway and the browser endpoint are
//! JSON commands of the form `{"id": .., "method": .., "params": ..}`. A
//! handful of methods let the caller run arbitrary code inside the page;
//! this crate recognises them from a [`RuleSet`] table and raises an
//! [`Alert`] through an [`AlertReporter`].
//!
//! Detection is best effort: text that is not JSON, or that lacks a
//! `method`, simply produces no alert.
//!
//! ```rust
//! use script_alert::{Detector, RuleSet};
//!
//! let detector = Detector::new(RuleSet::builtin());
//! let alert = detector
//!     .inspect(r#"{"method":"Runtime.evaluate","params":{"expression":"alert(1)"}}"#)
//!     .unwrap();
//! assert_eq!(alert.method, "Runtime.evaluate");
//! assert!(detector.inspect(r#"{"method":"Network.enable"}"#).is_none());
//! ```

pub mod detector;
pub mod reporter;
pub mod rules;

use std::sync::Arc;

pub use detector::{Alert, Detector, EXCERPT_CHARS};
pub use reporter::{AlertReporter, MemoryReporter, StderrReporter};
pub use rules::{MethodCategory, MethodRule, RuleSet, BUILTIN_RULES};

/// A [`Detector`] wired to the reporter that receives its alerts.
#[derive(Clone)]
pub struct ScriptAlerter {
    detector: Arc<Detector>,
    reporter: Arc<dyn AlertReporter>,
}

impl ScriptAlerter {
    pub fn new(detector: Detector, reporter: Arc<dyn AlertReporter>) -> Self {
        Self {
            detector: Arc::new(detector),
            reporter,
        }
    }

    /// Inspect one text message and report an alert if it names a
    /// dangerous method. Returns whether an alert was raised.
    pub fn check(&self, text: &str) -> bool {
        match self.detector.inspect(text) {
            Some(alert) => {
                self.reporter.report(&alert);
                true
            }
            None => false,
        }
    }
}

impl Default for ScriptAlerter {
    fn default() -> Self {
        Self::new(Detector::default(), Arc::new(StderrReporter))
    }
}

impl std::fmt::Debug for ScriptAlerter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptAlerter")
            .field("rules", &self.detector.rules().len())
            .finish()
    }
}
