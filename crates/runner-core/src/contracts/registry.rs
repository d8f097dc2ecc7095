use std::collections::HashMap;
use std::fmt;

use super::traits::AgentRunner;

/// Construction-time factory mapping a normalized backend name to a boxed
/// `AgentRunner`. Selection fails loudly if the chosen backend is missing a
/// capability the caller requires, per the capability-matrix design note.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, Box<dyn AgentRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    pub fn register(&mut self, runner: Box<dyn AgentRunner>) {
        self.runners.insert(runner.name().to_string(), runner);
    }

    pub fn get(&self, name: &str) -> Option<&dyn AgentRunner> {
        self.runners.get(name).map(|b| b.as_ref())
    }

    /// Looks up `name`, failing loudly if it is unregistered or lacks a
    /// capability `require_review`/`require_streaming` demands.
    pub fn resolve(
        &self,
        name: &str,
        require_review: bool,
        require_streaming: bool,
    ) -> Result<&dyn AgentRunner, RegistryError> {
        let runner = self
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let caps = runner.capabilities();
        if require_review && !caps.review {
            return Err(RegistryError::MissingCapability {
                backend: name.to_string(),
                capability: "review",
            });
        }
        if require_streaming && !caps.streaming {
            return Err(RegistryError::MissingCapability {
                backend: name.to_string(),
                capability: "streaming",
            });
        }
        Ok(runner)
    }

    pub fn list(&self) -> Vec<&str> {
        self.runners.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

impl fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("backends", &self.list())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no runner backend registered under name '{0}'")]
    NotFound(String),
    #[error("runner backend '{backend}' does not support required capability '{capability}'")]
    MissingCapability {
        backend: String,
        capability: &'static str,
    },
}
