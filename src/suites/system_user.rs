//! Bootstrap organization and user shared by the API suites.

use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::harness::assert::expect_success;
use crate::probes::ServiceClient;

pub const SYSTEM_USER_EMAIL: &str = "system@medicinetrack.test";
pub const SYSTEM_USER_NAME: &str = "System Test User";

#[derive(Debug, Deserialize)]
struct Created {
    #[serde(alias = "Id")]
    id: Uuid,
}

/// Creates a test organization and a system user on the configuration
/// service, and removes both again on teardown.
pub struct SystemUser {
    config: Arc<ServiceClient>,
    organization_id: Option<Uuid>,
    user_id: Option<Uuid>,
}

impl SystemUser {
    pub fn new(config: Arc<ServiceClient>) -> Self {
        Self {
            config,
            organization_id: None,
            user_id: None,
        }
    }

    pub fn organization_id(&self) -> anyhow::Result<Uuid> {
        self.organization_id
            .context("system user fixture has no organization")
    }

    pub fn user_id(&self) -> anyhow::Result<Uuid> {
        self.user_id.context("system user fixture has no user")
    }

    pub async fn bootstrap(&mut self) -> anyhow::Result<()> {
        info!("initializing system user fixture");

        let org = json!({
            "name": "Test Organization",
            "description": "Organization for end-to-end testing",
            "contactEmail": "admin@medicinetrack.test",
            "address": "123 Test St, Test City, TC 12345",
            "phoneNumber": "+1-555-TEST",
        });
        let org_id = create(&self.config, "/organizations", &org)
            .await
            .context("failed to create test organization")?;
        self.organization_id = Some(org_id);
        info!(organization_id = %org_id, "created test organization");

        let user = json!({
            "email": SYSTEM_USER_EMAIL,
            "name": SYSTEM_USER_NAME,
            "role": "USER",
            "phoneNumber": "+1-555-SYSTEM",
            "timezone": "UTC",
        });
        let user_id = create(&self.config, &format!("/organizations/{}/users", org_id), &user)
            .await
            .context("failed to create system user")?;
        self.user_id = Some(user_id);
        info!(organization_id = %org_id, user_id = %user_id, "system user initialized");
        Ok(())
    }

    /// Delete whatever `bootstrap` created. Both deletes are attempted; the
    /// first failure is returned.
    pub async fn teardown(&mut self) -> anyhow::Result<()> {
        let mut first_err = None;

        if let (Some(org_id), Some(user_id)) = (self.organization_id, self.user_id.take()) {
            let path = format!("/organizations/{}/users/{}", org_id, user_id);
            match delete(&self.config, &path).await {
                Ok(()) => info!(%user_id, "deleted system user"),
                Err(e) => {
                    warn!(%user_id, error = %e, "failed to delete system user");
                    first_err.get_or_insert(e);
                }
            }
        }

        if let Some(org_id) = self.organization_id.take() {
            match delete(&self.config, &format!("/organizations/{}", org_id)).await {
                Ok(()) => info!(organization_id = %org_id, "deleted organization"),
                Err(e) => {
                    warn!(organization_id = %org_id, error = %e, "failed to delete organization");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// POST `body` and return the `id` of the created resource.
pub(crate) async fn create(
    client: &ServiceClient,
    path: &str,
    body: &serde_json::Value,
) -> anyhow::Result<Uuid> {
    let resp = expect_success(client.post(path).json(body).send().await?)?;
    let created: Created = resp.json().await?;
    Ok(created.id)
}

pub(crate) async fn delete(client: &ServiceClient, path: &str) -> anyhow::Result<()> {
    expect_success(client.delete(path).send().await?)?;
    Ok(())
}
