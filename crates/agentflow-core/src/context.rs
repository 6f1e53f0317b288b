// Execution context and placeholder resolution
//
// The context is a transient map from "step_<n>" to that step's result map,
// accumulated across one run, plus auxiliary keys used by the decision
// strategy. Step descriptions and tool parameters may reference prior output
// via `{{path.to.value}}` placeholders, with pipe-delimited fallback chains.
//
// Unresolvable placeholders stay in the text literally. Never throw, never
// silently empty: downstream steps and humans both see what failed to bind.

use serde_json::{Map, Value};
use std::sync::OnceLock;

use regex::Regex;

use crate::step::{StepStatus, WorkflowStep};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").unwrap())
}

/// Accumulated outputs of prior steps, keyed by `step_<n>`
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the context from previously completed steps' persisted results
    pub fn from_steps(steps: &[WorkflowStep]) -> Self {
        let mut ctx = Self::new();
        for step in steps {
            if step.status == StepStatus::Completed {
                if let Some(result) = &step.result {
                    ctx.insert(step.context_key(), result.clone());
                }
            }
        }
        ctx
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn merge_step_result(&mut self, step: &WorkflowStep) {
        if let Some(result) = &step.result {
            self.insert(step.context_key(), result.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Walk a dotted path (`step_2.result.x`, `jobs[0].company`) through the
    /// context. Returns None if any segment fails to match.
    pub fn lookup_path(&self, path: &str) -> Option<&Value> {
        let mut current: Option<&Value> = None;
        for segment in path.split('.') {
            let (name, indexes) = split_indexes(segment);
            if !name.is_empty() {
                current = match current {
                    None => self.values.get(name),
                    Some(Value::Object(map)) => map.get(name),
                    _ => None,
                };
                current?;
            }
            for idx in indexes {
                current = match current {
                    Some(Value::Array(items)) => items.get(idx),
                    _ => None,
                };
                current?;
            }
        }
        current.filter(|v| !v.is_null())
    }

    /// Snapshot the whole context as a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Resolve all placeholders in a string, leaving unresolved ones literal
    pub fn resolve_string(&self, input: &str) -> String {
        placeholder_re()
            .replace_all(input, |caps: &regex::Captures<'_>| {
                self.resolve_placeholder(&caps[1])
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Recursively resolve placeholders in a JSON value. Only strings are
    /// rewritten; maps and lists are resolved element-wise, everything else
    /// passes through unchanged.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.resolve_string(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve the inside of one `{{...}}`: try each pipe-delimited
    /// alternative left to right. If none resolves and more than one
    /// alternative was given, the last alternative is taken as a literal.
    fn resolve_placeholder(&self, inner: &str) -> Option<String> {
        let alternatives: Vec<&str> = inner.split('|').map(str::trim).collect();
        for alt in &alternatives {
            if let Some(value) = self.lookup_path(alt) {
                return Some(value_to_string(value));
            }
        }
        if alternatives.len() > 1 {
            return Some(alternatives.last().unwrap().to_string());
        }
        None
    }
}

/// Split `jobs[0][1]` into `("jobs", [0, 1])`
fn split_indexes(segment: &str) -> (&str, Vec<usize>) {
    match segment.find('[') {
        None => (segment, vec![]),
        Some(pos) => {
            let name = &segment[..pos];
            let indexes = segment[pos..]
                .trim_end_matches(']')
                .split("][")
                .filter_map(|raw| raw.trim_matches(['[', ']']).parse().ok())
                .collect();
            (name, indexes)
        }
    }
}

/// Scalars render as-is, complex values JSON-serialized
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
