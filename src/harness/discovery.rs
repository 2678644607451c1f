//! Expands the registry into concrete test cases.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::registry::{FixtureType, MethodKind, Registry};
use super::TestArgs;

pub const NO_DATA: &str = "no data";

/// One runnable unit: a fixture method bound to at most one argument tuple.
#[derive(Clone)]
pub struct TestCase {
    fixture: Arc<dyn FixtureType>,
    method_index: usize,
    method_name: String,
    display_name: String,
    args: TestArgs,
    skip_reason: Option<String>,
}

impl TestCase {
    pub fn fixture(&self) -> &Arc<dyn FixtureType> {
        &self.fixture
    }

    pub fn fixture_name(&self) -> &str {
        self.fixture.name()
    }

    pub fn method_index(&self) -> usize {
        self.method_index
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// `Fixture.Method` or `Fixture.Method(a, b)` for theory rows.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn args(&self) -> &TestArgs {
        &self.args
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.display_name)
            .field("skip_reason", &self.skip_reason)
            .finish()
    }
}

pub fn display_name(fixture: &str, method: &str, args: Option<&TestArgs>) -> String {
    match args {
        Some(args) => format!("{}.{}({})", fixture, method, args),
        None => format!("{}.{}", fixture, method),
    }
}

/// Enumerate every case in registration order. Plain tests yield one case;
/// theories yield one case per data row, or a single skipped case when they
/// have no rows. Non-empty `filters` keep only cases whose display name
/// contains one of them, ignoring case.
pub fn discover(registry: &Registry, filters: &[String]) -> Vec<TestCase> {
    let filters: Vec<String> = filters
        .iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect();

    let mut cases = Vec::new();
    for fixture in registry.fixtures() {
        let fixture_name = fixture.name();
        for method in fixture.methods() {
            match method.kind {
                MethodKind::Fact => cases.push(TestCase {
                    fixture: fixture.clone(),
                    method_index: method.index,
                    method_name: method.name.to_string(),
                    display_name: display_name(fixture_name, method.name, None),
                    args: TestArgs::default(),
                    skip_reason: None,
                }),
                MethodKind::Theory([]) => cases.push(TestCase {
                    fixture: fixture.clone(),
                    method_index: method.index,
                    method_name: method.name.to_string(),
                    display_name: display_name(fixture_name, method.name, None),
                    args: TestArgs::default(),
                    skip_reason: Some(NO_DATA.to_string()),
                }),
                MethodKind::Theory(rows) => {
                    for args in rows {
                        cases.push(TestCase {
                            fixture: fixture.clone(),
                            method_index: method.index,
                            method_name: method.name.to_string(),
                            display_name: display_name(fixture_name, method.name, Some(args)),
                            args: args.clone(),
                            skip_reason: None,
                        });
                    }
                }
            }
        }
    }

    let total = cases.len();
    if !filters.is_empty() {
        cases.retain(|case| {
            let name = case.display_name.to_lowercase();
            filters.iter().any(|f| name.contains(f.as_str()))
        });
        debug!(?filters, kept = cases.len(), total, "applied test filters");
    }

    info!(
        fixtures = registry.len(),
        cases = cases.len(),
        "discovered test cases"
    );
    cases
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::harness::{Fixture, FixtureSpec};
    use futures::FutureExt;

    struct Api;

    impl Fixture for Api {}

    impl Api {
        async fn ok(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn with_args(&self, _args: &TestArgs) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .add(
                FixtureSpec::new("MedicationApiTests", |_| Ok(Api))
                    .test("GetMedications_Should_Return_List", |f, _| f.ok().boxed())
                    .theory(
                        "SearchMedications",
                        vec![args!["aspirin"], args!["ibuprofen"], args!["paracetamol"]],
                        |f, a| f.with_args(a).boxed(),
                    )
                    .theory("Unused", Vec::new(), |f, a| f.with_args(a).boxed()),
            )
            .unwrap();
        registry
            .add(
                FixtureSpec::new("ConfigurationApiTests", |_| Ok(Api))
                    .test("HealthCheck_Should_Return_OK", |f, _| f.ok().boxed()),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_theory_yields_one_case_per_row() {
        let cases = discover(&registry(), &[]);
        let names: Vec<&str> = cases.iter().map(TestCase::display_name).collect();
        assert_eq!(
            names,
            vec![
                "MedicationApiTests.GetMedications_Should_Return_List",
                "MedicationApiTests.SearchMedications(aspirin)",
                "MedicationApiTests.SearchMedications(ibuprofen)",
                "MedicationApiTests.SearchMedications(paracetamol)",
                "MedicationApiTests.Unused",
                "ConfigurationApiTests.HealthCheck_Should_Return_OK",
            ]
        );
        assert_eq!(cases[2].args(), &args!["ibuprofen"]);
        assert_eq!(cases[2].method_name(), "SearchMedications");
    }

    #[test]
    fn test_theory_without_data_is_skipped() {
        let cases = discover(&registry(), &["unused".to_string()]);
        assert_eq!(cases.len(), 1);
        assert!(cases[0].is_skipped());
        assert_eq!(cases[0].skip_reason(), Some(NO_DATA));
    }

    #[test]
    fn test_filters_are_case_insensitive_substrings() {
        let cases = discover(&registry(), &["HEALTHCHECK".to_string(), "(ibu".to_string()]);
        let names: Vec<&str> = cases.iter().map(TestCase::display_name).collect();
        assert_eq!(
            names,
            vec![
                "MedicationApiTests.SearchMedications(ibuprofen)",
                "ConfigurationApiTests.HealthCheck_Should_Return_OK",
            ]
        );
    }

    #[test]
    fn test_empty_registry_yields_nothing() {
        assert!(discover(&Registry::new(), &[]).is_empty());
    }
}
