//! In-memory engine.

use std::{
    collections::HashSet,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use remote_pipeline_core::{Engine, EngineError, ExecuteReply};
use serde_json::Value;

enum Rule {
    Fail { pattern: String, message: String },
    Respond { pattern: String, output: Value },
}

#[derive(Default)]
struct State {
    executed: Vec<String>,
    defined: HashSet<String>,
    interrupts: usize,
}

/// In-process engine implementation.
///
/// Useful for development and tests. It tracks variables bound with
/// `var <name> = ...` and, unless lenient, rejects statements that use a
/// remote name nobody has bound yet, the way a real session would.
/// Nothing is evaluated.
pub struct MemoryEngine {
    state: Mutex<State>,
    rules: Vec<Rule>,
    latency: Duration,
    strict: bool,
}

impl MemoryEngine {
    /// Create an engine that accepts every well-formed statement.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            rules: Vec::new(),
            latency: Duration::ZERO,
            strict: true,
        }
    }

    /// Fail statements containing `pattern` with `message`.
    #[must_use]
    pub fn fail_on(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push(Rule::Fail {
            pattern: pattern.into(),
            message: message.into(),
        });
        self
    }

    /// Answer statements containing `pattern` with `output`.
    #[must_use]
    pub fn respond(mut self, pattern: impl Into<String>, output: Value) -> Self {
        self.rules.push(Rule::Respond {
            pattern: pattern.into(),
            output,
        });
        self
    }

    /// Delay every statement by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Skip the undefined-name check.
    #[must_use]
    pub const fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Statements executed so far, in execution order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Whether `name` has been bound.
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.lock().defined.contains(name)
    }

    /// Number of interrupt requests received.
    #[must_use]
    pub fn interrupts(&self) -> usize {
        self.lock().interrupts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evaluate(&self, code: &str, defined: &HashSet<String>) -> ExecuteReply {
        for rule in &self.rules {
            if let Rule::Fail { pattern, message } = rule {
                if code.contains(pattern.as_str()) {
                    return ExecuteReply::error(message.clone());
                }
            }
        }

        if self.strict {
            if let Some(name) = undefined_reference(code, defined) {
                return ExecuteReply::error(format!("ReferenceError: {name} is not defined"));
            }
        }

        let output = self.rules.iter().find_map(|rule| match rule {
            Rule::Respond { pattern, output } if code.contains(pattern.as_str()) => {
                Some(output.clone())
            }
            _ => None,
        });
        ExecuteReply::ok(output)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn execute(&self, code: &str) -> Result<ExecuteReply, EngineError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.lock();
        state.executed.push(code.to_string());
        let reply = self.evaluate(code, &state.defined);
        if reply.error.is_none() {
            if let Some(name) = bound_name(code) {
                state.defined.insert(name.to_string());
            }
        }
        drop(state);

        tracing::trace!(code, ok = reply.error.is_none(), "Memory engine executed");
        Ok(reply)
    }

    async fn interrupt(&self) -> Result<(), EngineError> {
        self.lock().interrupts += 1;
        Ok(())
    }
}

/// Name bound by a `var <name> = ...` statement.
fn bound_name(code: &str) -> Option<&str> {
    let rest = code.strip_prefix("var ")?;
    let (name, _) = rest.split_once(" = ")?;
    Some(name.trim())
}

/// First remote-name-shaped identifier used but not bound.
///
/// Skips string literals, comments, property accesses (`.name1`) and
/// `function` expressions, whose bodies run in their own scope.
fn undefined_reference(code: &str, defined: &HashSet<String>) -> Option<String> {
    let body = code
        .strip_prefix("var ")
        .and_then(|rest| rest.split_once(" = "))
        .map_or(code, |(_, rhs)| rhs);
    let bytes = body.as_bytes();
    let mut prev = b' ';
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if matches!(c, b'"' | b'\'' | b'`') {
            i = skip_string(bytes, i);
            prev = c;
            continue;
        }
        if let Some(end) = skip_comment(bytes, i) {
            i = end;
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            let ident = &body[start..i];
            if ident == "function" && prev != b'.' {
                i = skip_function(bytes, i);
                prev = b'}';
                continue;
            }
            if prev != b'.' && is_remote_name(ident) && !defined.contains(ident) {
                return Some(ident.to_string());
            }
            prev = bytes[i - 1];
            continue;
        } else if c.is_ascii_digit() {
            // Numeric literal; consume it whole so `1e5` is not an identifier.
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                i += 1;
            }
            prev = b'0';
            continue;
        }

        if !c.is_ascii_whitespace() {
            prev = c;
        }
        i += 1;
    }
    None
}

/// Index just past the string literal opening at `start`.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Index just past a `//` or `/* */` comment opening at `start`, if any.
fn skip_comment(bytes: &[u8], start: usize) -> Option<usize> {
    if bytes.get(start) != Some(&b'/') {
        return None;
    }
    let rest = bytes.get(start + 2..).unwrap_or_default();
    match bytes.get(start + 1) {
        Some(b'/') => Some(
            rest.iter()
                .position(|&b| b == b'\n')
                .map_or(bytes.len(), |p| start + 2 + p + 1),
        ),
        Some(b'*') => Some(
            rest.windows(2)
                .position(|w| w == b"*/")
                .map_or(bytes.len(), |p| start + 2 + p + 2),
        ),
        _ => None,
    }
}

/// Index just past the body of a `function` expression whose keyword ends
/// at `start`.
fn skip_function(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'/' => {
                if let Some(end) = skip_comment(bytes, i) {
                    i = end;
                    continue;
                }
            }
            b'{' => depth += 1,
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

fn is_remote_name(ident: &str) -> bool {
    let prefix = ident.trim_end_matches(|c: char| c.is_ascii_digit());
    prefix.len() < ident.len()
        && prefix.starts_with(|c: char| c.is_ascii_lowercase())
        && prefix.chars().all(|c| c.is_ascii_lowercase() || c == '_')
}
