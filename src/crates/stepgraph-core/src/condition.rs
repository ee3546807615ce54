//! Condition evaluation for routing decisions
//!
//! Two condition kinds sit behind the [`Condition`] trait:
//!
//! - [`ExpressionCondition`] interprets a template string such as
//!   `"{{score}} > 80"`. The template is parsed once into a small
//!   [`ConditionAst`]; evaluation substitutes variables and resolves the
//!   expression. Evaluation is fail-open: anything unparseable, and any
//!   comparison with a missing left-hand variable, is simply `false`.
//! - [`DictCondition`] maps a decision value (by default the `decision`
//!   variable) to lists of target step names, matched case-insensitively.

use crate::context::{substitute, value_to_template_string, MissingToken};
use crate::task::RouteTargets;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Variables a condition is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct ConditionContext {
    pub variables: HashMap<String, Value>,
}

impl ConditionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_vars(mut self, vars: HashMap<String, Value>) -> Self {
        self.variables.extend(vars);
        self
    }
}

impl From<HashMap<String, Value>> for ConditionContext {
    fn from(variables: HashMap<String, Value>) -> Self {
        Self { variables }
    }
}

/// Anything that can gate a routing decision.
pub trait Condition: Send + Sync {
    fn evaluate(&self, ctx: &ConditionContext) -> bool;
}

/// Comparison operators accepted in expression conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    fn apply_f64(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
        }
    }

    fn token(self) -> &'static str {
        match self {
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }
}

// Multi-character operators first so ">=" never splits as ">".
const OPERATORS: [CompareOp; 6] = [
    CompareOp::Ge,
    CompareOp::Le,
    CompareOp::Eq,
    CompareOp::Ne,
    CompareOp::Gt,
    CompareOp::Lt,
];

/// Parsed shape of an expression condition.
///
/// Operands keep their raw template text; variables are substituted at
/// evaluation time, so the same parsed condition works against any context.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionAst {
    /// `L op R`; numeric when both sides parse as numbers, string equality
    /// for `==`/`!=` otherwise
    Comparison {
        left: String,
        op: CompareOp,
        right: String,
    },
    /// Case-insensitive substring check (`X in Y`, `Y contains X`)
    Contains { needle: String, haystack: String },
    /// Bare `true`/`false`
    BooleanLiteral(bool),
    /// Anything else: true iff the substituted text is non-empty
    /// (or the literal `true`)
    Truthy(String),
}

impl ConditionAst {
    /// Parse a template into its condition shape.
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();

        if let Some((left, op, right)) = split_on_operator(text) {
            return ConditionAst::Comparison {
                left: left.trim().to_string(),
                op,
                right: right.trim().to_string(),
            };
        }

        let lower = text.to_lowercase();
        if let Some(idx) = lower.find(" in ") {
            return ConditionAst::Contains {
                needle: text[..idx].trim().to_string(),
                haystack: text[idx + 4..].trim().to_string(),
            };
        }
        if let Some(idx) = lower.find(" contains ") {
            return ConditionAst::Contains {
                needle: text[idx + 10..].trim().to_string(),
                haystack: text[..idx].trim().to_string(),
            };
        }

        match lower.as_str() {
            "true" => ConditionAst::BooleanLiteral(true),
            "false" => ConditionAst::BooleanLiteral(false),
            _ => ConditionAst::Truthy(text.to_string()),
        }
    }

    fn evaluate(&self, vars: &HashMap<String, Value>) -> bool {
        let resolve = |template: &str| substitute(template, vars, MissingToken::Empty);

        match self {
            ConditionAst::Comparison { left, op, right } => {
                let left = resolve(left);
                let right = resolve(right);
                let left = left.trim();
                let right = right.trim();

                // a missing left-hand variable never satisfies a comparison
                if left.is_empty() {
                    return false;
                }

                match (left.parse::<f64>(), right.parse::<f64>()) {
                    (Ok(l), Ok(r)) => op.apply_f64(l, r),
                    _ => match op {
                        CompareOp::Eq => left == right,
                        CompareOp::Ne => left != right,
                        _ => false,
                    },
                }
            }
            ConditionAst::Contains { needle, haystack } => {
                let needle = resolve(needle).trim().to_lowercase();
                let haystack = resolve(haystack).to_lowercase();
                if needle.is_empty() {
                    return false;
                }
                haystack.contains(&needle)
            }
            ConditionAst::BooleanLiteral(value) => *value,
            ConditionAst::Truthy(template) => {
                let text = resolve(template);
                let text = text.trim();
                match text.to_lowercase().as_str() {
                    "" | "false" => false,
                    "true" => true,
                    _ => true,
                }
            }
        }
    }
}

/// Split at the first comparison operator, if any.
fn split_on_operator(text: &str) -> Option<(&str, CompareOp, &str)> {
    let mut best: Option<(usize, CompareOp)> = None;
    for op in OPERATORS {
        if let Some(idx) = text.find(op.token()) {
            if best.map_or(true, |(best_idx, _)| idx < best_idx) {
                best = Some((idx, op));
            }
        }
    }
    let (idx, op) = best?;
    Some((&text[..idx], op, &text[idx + op.token().len()..]))
}

/// A template-string condition, e.g. `"{{score}} > 80"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionCondition {
    raw: String,
    ast: ConditionAst,
}

impl ExpressionCondition {
    /// Parse the expression once. Parsing never fails; unrecognized text
    /// degrades to a truthiness check.
    pub fn new(expr: impl Into<String>) -> Self {
        let raw = expr.into();
        let ast = ConditionAst::parse(&raw);
        Self { raw, ast }
    }

    pub fn expression(&self) -> &str {
        &self.raw
    }

    pub fn ast(&self) -> &ConditionAst {
        &self.ast
    }
}

impl Condition for ExpressionCondition {
    fn evaluate(&self, ctx: &ConditionContext) -> bool {
        let result = self.ast.evaluate(&ctx.variables);
        debug!(expression = %self.raw, result, "condition evaluated");
        result
    }
}

/// A routing map keyed by decision value, e.g.
/// `{"approved": ["publish"], "rejected": ["revise"]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct DictCondition {
    routes: HashMap<String, Vec<String>>,
    key: String,
}

impl DictCondition {
    /// Build from a routing map; keys are normalized to lower case and
    /// targets to lists. The decision is read from the `decision` variable
    /// unless overridden with [`with_key`](Self::with_key).
    pub fn new(routes: HashMap<String, RouteTargets>) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|(key, targets)| (key.trim().to_lowercase(), targets.to_vec()))
                .collect(),
            key: "decision".to_string(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    fn decision(&self, ctx: &ConditionContext) -> Option<String> {
        ctx.variables
            .get(&self.key)
            .map(|value| value_to_template_string(value).trim().to_lowercase())
    }

    /// Targets for the context's decision value; empty when nothing matches.
    /// There is no implicit fallback -- a `"default"` route only exists if
    /// the caller supplied one literally.
    pub fn targets(&self, ctx: &ConditionContext) -> Vec<String> {
        self.decision(ctx)
            .and_then(|decision| self.routes.get(&decision).cloned())
            .unwrap_or_default()
    }
}

impl Condition for DictCondition {
    fn evaluate(&self, ctx: &ConditionContext) -> bool {
        match self.decision(ctx) {
            Some(decision) => self.routes.contains_key(&decision),
            None => false,
        }
    }
}
