//! Bundled end-to-end suites for the MedicineTrack services.

use std::sync::Arc;

use reqwest::{RequestBuilder, StatusCode};
use tracing::debug;

use crate::harness::assert::{expect_json_array, expect_json_object, expect_status, expect_success};
use crate::harness::{DiscoveryError, Registry, RegistryLoader};
use crate::probes::ServiceClient;

pub mod configuration;
pub mod medication;
pub mod system_user;

pub use self::configuration::ConfigurationApiTests;
pub use self::medication::MedicationApiTests;
pub use self::system_user::SystemUser;

/// Every bundled fixture, in run order.
pub fn load_registry() -> Result<Registry, DiscoveryError> {
    let mut registry = Registry::new();
    registry
        .add(configuration::fixture())?
        .add(medication::fixture())?;
    Ok(registry)
}

pub fn loader() -> RegistryLoader {
    Arc::new(load_registry)
}

/// GET `path` and require a 2xx JSON array.
pub(crate) async fn get_array(client: &ServiceClient, path: &str) -> anyhow::Result<String> {
    let body = expect_success(client.get(path).send().await?)?.text().await?;
    debug!(service = client.name(), path, body = %body, "response");
    expect_json_array(&body)?;
    Ok(body)
}

/// GET `path` and require a 2xx JSON object.
pub(crate) async fn get_object(client: &ServiceClient, path: &str) -> anyhow::Result<String> {
    let body = expect_success(client.get(path).send().await?)?.text().await?;
    debug!(service = client.name(), path, body = %body, "response");
    expect_json_object(&body)?;
    Ok(body)
}

/// Send and require a 2xx JSON object.
pub(crate) async fn send_for_object(req: RequestBuilder) -> anyhow::Result<String> {
    let body = expect_success(req.send().await?)?.text().await?;
    expect_json_object(&body)?;
    Ok(body)
}

/// Send and require a 2xx JSON array.
pub(crate) async fn send_for_array(req: RequestBuilder) -> anyhow::Result<String> {
    let body = expect_success(req.send().await?)?.text().await?;
    expect_json_array(&body)?;
    Ok(body)
}

/// Send and require exactly `status`. Returns the body.
pub(crate) async fn send_expecting(req: RequestBuilder, status: StatusCode) -> anyhow::Result<String> {
    let resp = expect_status(req.send().await?, status)?;
    Ok(resp.text().await?)
}
