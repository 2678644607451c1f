//! Static test registry.
//!
//! Every fixture type is listed explicitly with its factory and its test
//! methods. The registry erases the fixture type behind [`FixtureType`] so
//! discovery and execution can treat all fixtures uniformly.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use super::{Fixture, TestArgs, TestContext};

/// A test body: borrows the fixture instance and the bound arguments.
pub type TestBody<F> =
    Arc<dyn for<'a> Fn(&'a F, &'a TestArgs) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync>;

type Factory<F> = Box<dyn Fn(&TestContext) -> anyhow::Result<F> + Send + Sync>;

/// Produces a fresh registry. Called once per run so registration problems
/// surface on every run rather than only at startup.
pub type RegistryLoader = Arc<dyn Fn() -> Result<Registry, DiscoveryError> + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiscoveryError {
    #[error("fixture '{0}' is registered more than once")]
    DuplicateFixture(String),
    #[error("test '{fixture}.{method}' is registered more than once")]
    DuplicateTest { fixture: String, method: String },
    #[error("theory '{fixture}.{method}' data row {row} has {found} arguments, expected {expected}")]
    ArityMismatch {
        fixture: String,
        method: String,
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("test registry unavailable: {0}")]
    Unavailable(String),
}

/// How a registered method is invoked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MethodKind<'a> {
    /// Plain test, invoked once with no arguments.
    Fact,
    /// Parameterized test, invoked once per data row.
    Theory(&'a [TestArgs]),
}

/// Type-erased view of one registered method.
#[derive(Debug, Clone, Copy)]
pub struct MethodInfo<'a> {
    pub index: usize,
    pub name: &'a str,
    pub kind: MethodKind<'a>,
}

/// A registered fixture type with its type erased.
pub trait FixtureType: Send + Sync {
    fn name(&self) -> &str;

    fn methods(&self) -> Vec<MethodInfo<'_>>;

    /// Build a fresh, uninitialized instance.
    fn construct(&self, ctx: &TestContext) -> anyhow::Result<Box<dyn FixtureInstance>>;
}

/// A live fixture instance with its type erased.
#[async_trait::async_trait]
pub trait FixtureInstance: Send + Sync {
    async fn initialize(&mut self) -> anyhow::Result<()>;

    async fn invoke(&self, method: usize, args: &TestArgs) -> anyhow::Result<()>;

    async fn dispose(&mut self) -> anyhow::Result<()>;
}

struct MethodSpec<F> {
    name: &'static str,
    data: Option<Vec<TestArgs>>,
    body: TestBody<F>,
}

/// Registration entry for one fixture type.
///
/// ```ignore
/// FixtureSpec::new("ConfigurationApiTests", ConfigurationApiTests::new)
///     .test("HealthCheck_Should_Return_OK", |f, _| f.health_check().boxed())
///     .theory("Search", vec![args!["healthcare"]], |f, a| f.search(a).boxed())
/// ```
pub struct FixtureSpec<F: Fixture> {
    name: &'static str,
    factory: Factory<F>,
    methods: Vec<MethodSpec<F>>,
}

impl<F: Fixture> FixtureSpec<F> {
    pub fn new<Fac>(name: &'static str, factory: Fac) -> Self
    where
        Fac: Fn(&TestContext) -> anyhow::Result<F> + Send + Sync + 'static,
    {
        Self {
            name,
            factory: Box::new(factory),
            methods: Vec::new(),
        }
    }

    /// Register a plain test.
    pub fn test<B>(mut self, name: &'static str, body: B) -> Self
    where
        B: for<'a> Fn(&'a F, &'a TestArgs) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.methods.push(MethodSpec {
            name,
            data: None,
            body: Arc::new(body),
        });
        self
    }

    /// Register a theory with its literal data rows.
    pub fn theory<B>(mut self, name: &'static str, data: Vec<TestArgs>, body: B) -> Self
    where
        B: for<'a> Fn(&'a F, &'a TestArgs) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.methods.push(MethodSpec {
            name,
            data: Some(data),
            body: Arc::new(body),
        });
        self
    }

    fn validate(&self) -> Result<(), DiscoveryError> {
        let mut seen = HashSet::new();
        for method in &self.methods {
            if !seen.insert(method.name) {
                return Err(DiscoveryError::DuplicateTest {
                    fixture: self.name.to_string(),
                    method: method.name.to_string(),
                });
            }
            if let Some(rows) = &method.data {
                let expected = rows.first().map(TestArgs::len).unwrap_or(0);
                for (row, args) in rows.iter().enumerate() {
                    if args.len() != expected {
                        return Err(DiscoveryError::ArityMismatch {
                            fixture: self.name.to_string(),
                            method: method.name.to_string(),
                            row,
                            expected,
                            found: args.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl<F: Fixture> FixtureType for FixtureSpec<F> {
    fn name(&self) -> &str {
        self.name
    }

    fn methods(&self) -> Vec<MethodInfo<'_>> {
        self.methods
            .iter()
            .enumerate()
            .map(|(index, m)| MethodInfo {
                index,
                name: m.name,
                kind: match &m.data {
                    Some(rows) => MethodKind::Theory(rows),
                    None => MethodKind::Fact,
                },
            })
            .collect()
    }

    fn construct(&self, ctx: &TestContext) -> anyhow::Result<Box<dyn FixtureInstance>> {
        let fixture = (self.factory)(ctx)?;
        Ok(Box::new(Instance {
            fixture,
            bodies: self.methods.iter().map(|m| m.body.clone()).collect(),
        }))
    }
}

struct Instance<F> {
    fixture: F,
    bodies: Vec<TestBody<F>>,
}

#[async_trait::async_trait]
impl<F: Fixture> FixtureInstance for Instance<F> {
    async fn initialize(&mut self) -> anyhow::Result<()> {
        self.fixture.initialize().await
    }

    async fn invoke(&self, method: usize, args: &TestArgs) -> anyhow::Result<()> {
        let body = self
            .bodies
            .get(method)
            .ok_or_else(|| anyhow::anyhow!("no test method at index {}", method))?;
        body(&self.fixture, args).await
    }

    async fn dispose(&mut self) -> anyhow::Result<()> {
        self.fixture.dispose().await
    }
}

/// All registered fixture types, in registration order.
#[derive(Default, Clone)]
pub struct Registry {
    fixtures: Vec<Arc<dyn FixtureType>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixture type. Fixtures without any test methods are
    /// accepted and contribute no cases.
    pub fn add<F: Fixture>(&mut self, spec: FixtureSpec<F>) -> Result<&mut Self, DiscoveryError> {
        if self.fixtures.iter().any(|f| f.name() == spec.name) {
            return Err(DiscoveryError::DuplicateFixture(spec.name.to_string()));
        }
        spec.validate()?;
        self.fixtures.push(Arc::new(spec));
        Ok(self)
    }

    pub fn fixtures(&self) -> &[Arc<dyn FixtureType>] {
        &self.fixtures
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fixtures.iter().map(|fx| fx.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use tokio_util::sync::CancellationToken;

    struct Counter {
        prefix: &'static str,
    }

    impl Fixture for Counter {}

    impl Counter {
        async fn check(&self, args: &TestArgs) -> anyhow::Result<()> {
            anyhow::ensure!(args.str(0)?.starts_with(self.prefix), "bad prefix");
            Ok(())
        }
    }

    fn spec(name: &'static str) -> FixtureSpec<Counter> {
        FixtureSpec::new(name, |_| Ok(Counter { prefix: "med" }))
    }

    #[test]
    fn test_rejects_duplicate_fixture() {
        let mut registry = Registry::new();
        registry.add(spec("Counter")).unwrap();
        let err = registry.add(spec("Counter")).unwrap_err();
        assert_eq!(err, DiscoveryError::DuplicateFixture("Counter".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_method() {
        let mut registry = Registry::new();
        let err = registry
            .add(
                spec("Counter")
                    .test("A", |f, a| f.check(a).boxed())
                    .test("A", |f, a| f.check(a).boxed()),
            )
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::DuplicateTest { .. }));
    }

    #[test]
    fn test_rejects_ragged_theory_rows() {
        let mut registry = Registry::new();
        let err = registry
            .add(spec("Counter").theory(
                "Check",
                vec![crate::args!["medicine"], crate::args!["medical", 2]],
                |f, a| f.check(a).boxed(),
            ))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "theory 'Counter.Check' data row 1 has 2 arguments, expected 1"
        );
    }

    #[tokio::test]
    async fn test_instance_invokes_registered_body() {
        let mut registry = Registry::new();
        registry
            .add(spec("Counter").theory(
                "Check",
                vec![crate::args!["medicine"]],
                |f, a| f.check(a).boxed(),
            ))
            .unwrap();

        let ctx = TestContext::new(Vec::new(), CancellationToken::new());
        let fixture = &registry.fixtures()[0];
        let methods = fixture.methods();
        assert_eq!(methods.len(), 1);
        assert!(matches!(methods[0].kind, MethodKind::Theory(rows) if rows.len() == 1));

        let mut instance = fixture.construct(&ctx).unwrap();
        instance.initialize().await.unwrap();
        instance.invoke(0, &crate::args!["medicine"]).await.unwrap();
        assert!(instance.invoke(0, &crate::args!["aspirin"]).await.is_err());
        assert!(instance.invoke(7, &TestArgs::default()).await.is_err());
        instance.dispose().await.unwrap();
    }
}
