//! Test harness: fixtures, registration, discovery and execution.
//!
//! Tests are plain async methods on a fixture type. A fixture type is
//! registered once in a [`Registry`] together with a factory closure that
//! builds an instance from the shared [`TestContext`]; each registered method
//! is either a plain test or a theory with literal argument tuples.
//! [`discover`] expands the registry into [`TestCase`]s and the [`Executor`]
//! runs one case at a time:
//!
//! 1. build a fresh fixture through its factory,
//! 2. `initialize` it,
//! 3. await the body with the case's arguments,
//! 4. `dispose` it, whatever the outcome.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::probes::ServiceClient;

pub mod assert;
pub mod discovery;
pub mod executor;
pub mod registry;

pub use self::assert::AssertionError;
pub use self::discovery::{discover, TestCase};
pub use self::executor::{Executor, RunScope, TestCaseResult, TestFailure};
pub use self::registry::{DiscoveryError, FixtureSpec, Registry, RegistryLoader};

/// Lifecycle of a test fixture. Both hooks default to no-ops; a fixture
/// declares a hook by overriding it.
#[async_trait::async_trait]
pub trait Fixture: Send + Sync + 'static {
    async fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn dispose(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Shared dependencies handed to every fixture factory.
#[derive(Clone)]
pub struct TestContext {
    services: Arc<HashMap<String, Arc<ServiceClient>>>,
    cancellation: CancellationToken,
}

impl TestContext {
    pub fn new(
        services: impl IntoIterator<Item = Arc<ServiceClient>>,
        cancellation: CancellationToken,
    ) -> Self {
        let services = services
            .into_iter()
            .map(|client| (client.name().to_string(), client))
            .collect();
        Self {
            services: Arc::new(services),
            cancellation,
        }
    }

    /// The client for a configured service.
    pub fn service(&self, name: &str) -> anyhow::Result<Arc<ServiceClient>> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("service '{}' is not configured", name))
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.services.keys().collect();
        names.sort();
        f.debug_struct("TestContext").field("services", &names).finish()
    }
}

/// One literal argument of a theory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Null => write!(f, "null"),
            ArgValue::Bool(b) => write!(f, "{}", b),
            ArgValue::Int(i) => write!(f, "{}", i),
            ArgValue::Float(x) => write!(f, "{}", x),
            ArgValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Str(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        ArgValue::Int(v.into())
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ArgValue::Null)
    }
}

/// A bound argument tuple. Plain tests receive an empty one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestArgs(Vec<ArgValue>);

impl TestArgs {
    pub fn new(values: Vec<ArgValue>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        self.0.get(index)
    }

    /// The string argument at `index`.
    pub fn str(&self, index: usize) -> anyhow::Result<&str> {
        self.0
            .get(index)
            .and_then(ArgValue::as_str)
            .ok_or_else(|| anyhow::anyhow!("argument {} is missing or not a string", index))
    }
}

impl fmt::Display for TestArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}

/// Build a [`TestArgs`] tuple from literals: `args!["USER", 3, true]`.
#[macro_export]
macro_rules! args {
    ($($value:expr),* $(,)?) => {
        $crate::harness::TestArgs::new(vec![$($crate::harness::ArgValue::from($value)),*])
    };
}
