//! Scripted in-memory host for tests.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::RemoteHost;
use crate::context::RunContext;
use crate::error::TransportError;

type Responder = Arc<dyn Fn(&str) -> Result<String, TransportError> + Send + Sync>;

struct Rule {
    pattern: String,
    respond: Responder,
}

/// A `RemoteHost` that answers commands from registered rules and records every call.
///
/// Rules match when the command contains the pattern. Later rules take precedence, so a test
/// can register broad defaults first and narrow overrides after. Unmatched commands fail the
/// way a missing binary would (exit status 127).
pub struct MockHost {
    id: String,
    address: String,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl MockHost {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            address: format!("{id}.mock:22"),
            id,
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, pattern: impl Into<String>, output: impl Into<String>) -> Self {
        let output = output.into();
        self.respond_with(pattern, move |_| Ok(output.clone()))
    }

    pub fn fail(self, pattern: impl Into<String>, output: impl Into<String>, status: i32) -> Self {
        let output = output.into();
        self.respond_with(pattern, move |command| {
            Err(TransportError::Command {
                command: command.to_string(),
                status: format!("exit status {status}"),
                output: output.clone(),
            })
        })
    }

    pub fn respond_with<F>(self, pattern: impl Into<String>, respond: F) -> Self
    where
        F: Fn(&str) -> Result<String, TransportError> + Send + Sync + 'static,
    {
        self.add_rule(pattern, respond);
        self
    }

    /// Registers a rule on a shared host.
    pub fn add_rule<F>(&self, pattern: impl Into<String>, respond: F)
    where
        F: Fn(&str) -> Result<String, TransportError> + Send + Sync + 'static,
    {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.into(),
                respond: Arc::new(respond),
            });
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of recorded calls whose command contains `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    fn lookup(&self, command: &str) -> Option<Responder> {
        let rules = self.rules.lock().ok()?;
        rules
            .iter()
            .rev()
            .find(|rule| command.contains(&rule.pattern))
            .map(|rule| rule.respond.clone())
    }
}

#[async_trait]
impl RemoteHost for MockHost {
    fn id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn execute(&self, ctx: &RunContext, command: &str) -> Result<String, TransportError> {
        if let Some(cause) = ctx.cause() {
            return Err(TransportError::Cancelled {
                phase: "dial",
                cause,
            });
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.to_string());
        }
        match self.lookup(command) {
            Some(respond) => respond(command),
            None => Err(TransportError::Command {
                command: command.to_string(),
                status: "exit status 127".to_string(),
                output: format!("sh: {command}: not found\n"),
            }),
        }
    }
}
