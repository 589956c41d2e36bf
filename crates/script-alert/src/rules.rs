//! Dangerous-method rule table.
//!
//! Each rule maps a remote-debugging method name to the
//! [`MethodCategory`] of code execution it allows, and names the parameter
//! that carries the injected code so an excerpt can be shown in the alert.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Kind of script execution a method grants the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodCategory {
    /// Evaluates an arbitrary expression in a page context.
    ExpressionEvaluation,
    /// Invokes an arbitrary function declaration on a remote object.
    FunctionInvocation,
    /// Registers a script that runs in every future document.
    NewDocumentScript,
}

impl fmt::Display for MethodCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpressionEvaluation => write!(f, "ExpressionEvaluation"),
            Self::FunctionInvocation => write!(f, "FunctionInvocation"),
            Self::NewDocumentScript => write!(f, "NewDocumentScript"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule definitions
// ---------------------------------------------------------------------------

/// A built-in rule, kept static so the table costs nothing until a
/// [`RuleSet`] is built from it.
pub struct BuiltinRule {
    pub method: &'static str,
    pub category: MethodCategory,
    pub code_param: &'static str,
}

/// The built-in dangerous-method table.
pub static BUILTIN_RULES: &[BuiltinRule] = &[
    BuiltinRule {
        method: "Runtime.evaluate",
        category: MethodCategory::ExpressionEvaluation,
        code_param: "expression",
    },
    BuiltinRule {
        method: "Runtime.callFunctionOn",
        category: MethodCategory::FunctionInvocation,
        code_param: "functionDeclaration",
    },
    BuiltinRule {
        method: "Page.addScriptToEvaluateOnNewDocument",
        category: MethodCategory::NewDocumentScript,
        code_param: "source",
    },
];

/// An owned rule, as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRule {
    /// Exact method name, e.g. `Runtime.evaluate`.
    pub method: String,
    pub category: MethodCategory,
    /// Name of the `params` field holding the code.
    pub code_param: String,
}

impl From<&BuiltinRule> for MethodRule {
    fn from(rule: &BuiltinRule) -> Self {
        Self {
            method: rule.method.to_string(),
            category: rule.category,
            code_param: rule.code_param.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule set
// ---------------------------------------------------------------------------

/// Lookup table from method name to rule.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    by_method: HashMap<String, MethodRule>,
}

impl RuleSet {
    /// The built-in rules only.
    pub fn builtin() -> Self {
        let mut set = Self::default();
        for rule in BUILTIN_RULES {
            set.insert(rule.into());
        }
        set
    }

    /// Add or replace a rule. Later rules for the same method win.
    pub fn insert(&mut self, rule: MethodRule) {
        self.by_method.insert(rule.method.clone(), rule);
    }

    /// Builder-style [`insert`](Self::insert) for several rules.
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = MethodRule>) -> Self {
        for rule in rules {
            self.insert(rule);
        }
        self
    }

    pub fn get(&self, method: &str) -> Option<&MethodRule> {
        self.by_method.get(method)
    }

    pub fn len(&self) -> usize {
        self.by_method.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_method.is_empty()
    }
}
