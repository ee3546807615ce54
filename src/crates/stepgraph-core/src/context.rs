//! Context accumulation and `{{var}}` template substitution
//!
//! The accumulator keeps an ordered record of per-step outputs for one run.
//! Each recorded step binds `<step>_output`, refreshes `previous_output`,
//! and optionally binds a custom `output_variable`. Before a step executes,
//! the runtime asks for the variables that step is allowed to see and
//! substitutes them into its action template.

use crate::task::Task;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// How to render tokens that have no binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingToken {
    /// Leave `{{token}}` in place, untouched (action templates)
    KeepLiteral,
    /// Substitute the empty string (condition expressions)
    Empty,
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("token pattern is valid")
    })
}

/// Render a JSON value the way templates expect: strings unquoted, booleans
/// lower-case, numbers via their display form, null as empty.
pub fn value_to_template_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve a possibly dotted token against the variable map.
///
/// The exact token is tried first, then each `.` segment descends into
/// nested objects (`item.score` reads `score` inside `item`).
pub fn lookup_path(vars: &HashMap<String, Value>, token: &str) -> Option<Value> {
    if let Some(value) = vars.get(token) {
        return Some(value.clone());
    }

    let mut segments = token.split('.');
    let mut current = vars.get(segments.next()?)?.clone();
    for segment in segments {
        current = current.get(segment)?.clone();
    }
    Some(current)
}

/// Replace every `{{token}}` in `template` with its bound value.
pub fn substitute(template: &str, vars: &HashMap<String, Value>, missing: MissingToken) -> String {
    token_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let token = &caps[1];
            match lookup_path(vars, token) {
                Some(value) => value_to_template_string(&value),
                None => match missing {
                    MissingToken::KeepLiteral => caps[0].to_string(),
                    MissingToken::Empty => String::new(),
                },
            }
        })
        .into_owned()
}

#[derive(Debug, Clone)]
struct ContextEntry {
    step: String,
    output: String,
    output_variable: Option<String>,
}

/// Ordered record of step outputs for one workflow run.
#[derive(Debug, Clone, Default)]
pub struct ContextAccumulator {
    entries: Vec<ContextEntry>,
    previous_output: Option<String>,
}

impl ContextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed step's raw output.
    pub fn record(
        &mut self,
        step: impl Into<String>,
        output: impl Into<String>,
        output_variable: Option<String>,
    ) {
        let output = output.into();
        self.previous_output = Some(output.clone());
        self.entries.push(ContextEntry {
            step: step.into(),
            output,
            output_variable,
        });
    }

    /// Output of the most recently recorded step, if any.
    pub fn previous_output(&self) -> Option<&str> {
        self.previous_output.as_deref()
    }

    /// Raw output recorded for a specific step, if it has run.
    pub fn output_of(&self, step: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.step == step)
            .map(|entry| entry.output.as_str())
    }

    /// Variables visible to `task`, per its context settings.
    ///
    /// `context_from` limits visibility to the named steps; otherwise
    /// `retain_full_context` exposes every prior output. With neither, and
    /// whenever `context_enabled` is off, only `previous_output` remains.
    pub fn variables_for(&self, task: &Task, context_enabled: bool) -> HashMap<String, Value> {
        let mut vars = HashMap::new();

        if context_enabled {
            let visible = |step: &str| match &task.context_from {
                Some(steps) => steps.iter().any(|s| s == step),
                None => task.retain_full_context,
            };

            for entry in &self.entries {
                if !visible(&entry.step) {
                    continue;
                }
                vars.insert(
                    format!("{}_output", entry.step),
                    Value::String(entry.output.clone()),
                );
                if let Some(name) = &entry.output_variable {
                    vars.insert(name.clone(), Value::String(entry.output.clone()));
                }
            }
        }

        if let Some(previous) = &self.previous_output {
            vars.insert(
                "previous_output".to_string(),
                Value::String(previous.clone()),
            );
        }

        vars
    }
}
