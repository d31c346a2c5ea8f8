//! Transition guards: predicates over the instance context
//!
//! A guard decides whether an automatic transition may fire for a given
//! instance. Guards are written as small expressions over the instance
//! context map and are parsed when the template is built, so a malformed
//! expression is rejected at registration time rather than mid-process.
//!
//! Grammar:
//! - `key`              : context has `key` with a truthy value
//! - `!key`             : context lacks `key`, or its value is falsy
//! - `key == 'value'`   : context value equals `value`
//! - `key != 'value'`   : context value differs from `value` (or is absent)
//!
//! Falsy values are the empty string, `"false"`, and `"0"`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{WorkflowError, WorkflowResult};

/// A parsed guard expression
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Guard {
    expr: String,
    kind: GuardKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum GuardKind {
    Present(String),
    Absent(String),
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
}

impl Guard {
    /// Parse a guard expression
    pub fn parse(expr: impl Into<String>) -> WorkflowResult<Self> {
        let expr = expr.into();
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(WorkflowError::InvalidGuard("empty expression".into()));
        }

        let kind = if let Some((key, value)) = split_operator(trimmed, "==") {
            GuardKind::Equals {
                key: parse_key(key)?,
                value: parse_literal(value)?,
            }
        } else if let Some((key, value)) = split_operator(trimmed, "!=") {
            GuardKind::NotEquals {
                key: parse_key(key)?,
                value: parse_literal(value)?,
            }
        } else if let Some(key) = trimmed.strip_prefix('!') {
            GuardKind::Absent(parse_key(key)?)
        } else {
            GuardKind::Present(parse_key(trimmed)?)
        };

        Ok(Self { expr, kind })
    }

    /// Evaluate against an instance context
    pub fn evaluate(&self, context: &HashMap<String, String>) -> bool {
        match &self.kind {
            GuardKind::Present(key) => context.get(key).map(|v| truthy(v)).unwrap_or(false),
            GuardKind::Absent(key) => !context.get(key).map(|v| truthy(v)).unwrap_or(false),
            GuardKind::Equals { key, value } => context.get(key).map(String::as_str) == Some(value),
            GuardKind::NotEquals { key, value } => {
                context.get(key).map(String::as_str) != Some(value)
            }
        }
    }

    /// The source expression this guard was parsed from
    pub fn expr(&self) -> &str {
        &self.expr
    }
}

impl std::fmt::Display for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expr)
    }
}

impl TryFrom<String> for Guard {
    type Error = WorkflowError;

    fn try_from(expr: String) -> Result<Self, Self::Error> {
        Self::parse(expr)
    }
}

impl From<Guard> for String {
    fn from(guard: Guard) -> Self {
        guard.expr
    }
}

fn truthy(value: &str) -> bool {
    !(value.is_empty() || value == "false" || value == "0")
}

fn split_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    expr.split_once(op)
}

fn parse_key(raw: &str) -> WorkflowResult<String> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(WorkflowError::InvalidGuard("missing context key".into()));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(WorkflowError::InvalidGuard(format!(
            "invalid context key '{key}'"
        )));
    }
    Ok(key.to_string())
}

fn parse_literal(raw: &str) -> WorkflowResult<String> {
    let literal = raw.trim();
    let unquoted = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| {
            literal
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
        });
    match unquoted {
        Some(value) => Ok(value.to_string()),
        None => Err(WorkflowError::InvalidGuard(format!(
            "literal must be quoted: {literal}"
        ))),
    }
}
