//! Matches decoded text messages against a [`RuleSet`].

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::rules::{MethodCategory, RuleSet};

/// Maximum number of characters of injected code carried by an [`Alert`].
pub const EXCERPT_CHARS: usize = 200;

/// A dangerous command observed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub method: String,
    pub category: MethodCategory,
    /// Leading part of the injected code, at most [`EXCERPT_CHARS`] long.
    pub excerpt: String,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JS injection: {} {}", self.method, self.excerpt)
    }
}

/// Rule-driven detector for script-executing commands.
#[derive(Debug, Clone)]
pub struct Detector {
    rules: RuleSet,
}

impl Detector {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Parse `text` as a command and return an alert when its method is in
    /// the rule table. Only a JSON object with a string `method` counts as a
    /// command; anything else yields `None`.
    pub fn inspect(&self, text: &str) -> Option<Alert> {
        let message: Value = serde_json::from_str(text).ok()?;
        let command = message.as_object()?;
        let method = command.get("method")?.as_str()?;
        let rule = self.rules.get(method)?;

        let excerpt = command
            .get("params")
            .and_then(|params| params.get(&rule.code_param))
            .and_then(|v| v.as_str())
            .map(|code| code.chars().take(EXCERPT_CHARS).collect())
            .unwrap_or_default();

        Some(Alert {
            method: method.to_string(),
            category: rule.category,
            excerpt,
        })
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(RuleSet::builtin())
    }
}
