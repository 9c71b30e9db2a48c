//! Handler trait and name-based handler registry.
//!
//! The engine refers to handlers by fully-qualified name strings. Hosts
//! register a constructor closure per name at startup; the registry builds
//! a fresh handler for every invocation, so handlers must be side-effect
//! free at construction time and must not rely on in-process state
//! surviving across attempts.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::core::payload::JobArgs;

/// A failure raised by a handler invocation.
///
/// The engine does not introspect the cause; any error enters the retry
/// path. Hosts that distinguish transient from permanent failures must
/// encode that in the message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with the given message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A user-supplied unit of work.
///
/// Handlers may be invoked more than once with the same arguments; the
/// delivery guarantee is at-least-once, so implementations must be
/// idempotent.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Short symbolic name of the handler. Must match the name it was
    /// registered under.
    fn name(&self) -> &str;

    /// Execute the unit of work with the given argument bag.
    async fn execute(&self, args: &JobArgs) -> Result<Value, HandlerError>;
}

/// Errors that can occur when resolving a handler by name.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No factory is registered under the requested name.
    #[error("handler not found: {0}")]
    HandlerNotFound(String),

    /// A factory produced a handler whose name disagrees with its
    /// registration.
    #[error("handler contract violation: '{registered}' constructs a handler named '{actual}'")]
    ContractViolation { registered: String, actual: String },
}

type HandlerFactory = Box<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

/// Registry mapping handler names to constructor closures.
///
/// Read-only at steady state: hosts populate it during startup, then share
/// it behind an `Arc`.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for the given handler name.
    pub fn register<F, H>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: Handler + 'static,
    {
        self.factories
            .insert(name.into(), Box::new(move || Box::new(factory())));
    }

    /// Construct a fresh handler for the given name.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn Handler>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::HandlerNotFound(name.to_string()))?;

        let handler = factory();
        if handler.name() != name {
            return Err(RegistryError::ContractViolation {
                registered: name.to_string(),
                actual: handler.name().to_string(),
            });
        }

        Ok(handler)
    }

    /// Check whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered handler names, in no particular order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
