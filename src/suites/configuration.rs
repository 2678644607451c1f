//! Configuration service: organizations and their users.

use std::sync::Arc;

use futures::FutureExt;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{info, warn};

use super::system_user::{delete, SystemUser};
use super::{get_array, get_object, send_expecting, send_for_array, send_for_object};
use crate::args;
use crate::config::CONFIG_SERVICE;
use crate::harness::assert::{expect_contains, expect_success};
use crate::harness::{Fixture, FixtureSpec, TestArgs, TestContext};
use crate::probes::ServiceClient;

pub struct ConfigurationApiTests {
    config: Arc<ServiceClient>,
    system: SystemUser,
}

#[async_trait::async_trait]
impl Fixture for ConfigurationApiTests {
    async fn initialize(&mut self) -> anyhow::Result<()> {
        self.system.bootstrap().await
    }

    async fn dispose(&mut self) -> anyhow::Result<()> {
        self.system.teardown().await
    }
}

pub fn fixture() -> FixtureSpec<ConfigurationApiTests> {
    FixtureSpec::new("ConfigurationApiTests", ConfigurationApiTests::new)
        .test("HealthCheck_Should_Return_OK", |f, _| f.health_check().boxed())
        .test("GetOrganizations_Should_Return_List", |f, _| f.get_organizations().boxed())
        .theory(
            "GetOrganizations_WithSearch_Should_Return_List",
            vec![args!["healthcare"], args!["medical"]],
            |f, a| f.get_organizations_with_search(a).boxed(),
        )
        .test("GetOrganization_Should_Return_Organization", |f, _| f.get_organization().boxed())
        .test("UpdateOrganization_Should_Return_Updated", |f, _| f.update_organization().boxed())
        .test("GetUsers_Should_Return_List", |f, _| f.get_users().boxed())
        .theory(
            "GetUsers_WithRole_Should_Return_List",
            vec![args!["USER"], args!["ADMIN"]],
            |f, a| f.get_users_with_role(a).boxed(),
        )
        .test("GetUser_Should_Return_User", |f, _| f.get_user().boxed())
        .test("UpdateUser_Should_Return_Updated", |f, _| f.update_user().boxed())
        .test("CreateTemporaryUser_Should_Return_Created", |f, _| {
            f.create_temporary_user().boxed()
        })
        .test("CreateTemporaryOrganization_Should_Return_Created", |f, _| {
            f.create_temporary_organization().boxed()
        })
}

impl ConfigurationApiTests {
    pub fn new(ctx: &TestContext) -> anyhow::Result<Self> {
        let config = ctx.service(CONFIG_SERVICE)?;
        Ok(Self {
            system: SystemUser::new(config.clone()),
            config,
        })
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        let body = expect_success(self.config.get("/health").send().await?)?.text().await?;
        info!(body = %body, "health check response");
        expect_contains(&body, "Configuration API is healthy")?;
        Ok(())
    }

    async fn get_organizations(&self) -> anyhow::Result<()> {
        get_array(&self.config, "/organizations").await?;
        Ok(())
    }

    async fn get_organizations_with_search(&self, args: &TestArgs) -> anyhow::Result<()> {
        let search = args.str(0)?;
        let req = self.config.get("/organizations").query(&[("search", search)]);
        send_for_array(req).await?;
        Ok(())
    }

    async fn get_organization(&self) -> anyhow::Result<()> {
        let org_id = self.system.organization_id()?;
        get_object(&self.config, &format!("/organizations/{}", org_id)).await?;
        Ok(())
    }

    async fn update_organization(&self) -> anyhow::Result<()> {
        let org_id = self.system.organization_id()?;
        let body = json!({
            "name": "Updated Test Organization",
            "description": "Updated description for testing",
            "isActive": true,
        });
        let req = self.config.put(&format!("/organizations/{}", org_id)).json(&body);
        send_for_object(req).await?;
        Ok(())
    }

    async fn get_users(&self) -> anyhow::Result<()> {
        let org_id = self.system.organization_id()?;
        get_array(&self.config, &format!("/organizations/{}/users", org_id)).await?;
        Ok(())
    }

    async fn get_users_with_role(&self, args: &TestArgs) -> anyhow::Result<()> {
        let role = args.str(0)?;
        let org_id = self.system.organization_id()?;
        let req = self
            .config
            .get(&format!("/organizations/{}/users", org_id))
            .query(&[("role", role)]);
        send_for_array(req).await?;
        Ok(())
    }

    async fn get_user(&self) -> anyhow::Result<()> {
        let org_id = self.system.organization_id()?;
        let user_id = self.system.user_id()?;
        get_object(&self.config, &format!("/organizations/{}/users/{}", org_id, user_id)).await?;
        Ok(())
    }

    async fn update_user(&self) -> anyhow::Result<()> {
        let org_id = self.system.organization_id()?;
        let user_id = self.system.user_id()?;
        let body = json!({
            "name": "Updated System User",
            "phoneNumber": "+1-555-UPDATED",
            "timezone": "America/New_York",
            "isActive": true,
        });
        let req = self
            .config
            .put(&format!("/organizations/{}/users/{}", org_id, user_id))
            .json(&body);
        send_for_object(req).await?;
        Ok(())
    }

    async fn create_temporary_user(&self) -> anyhow::Result<()> {
        let org_id = self.system.organization_id()?;
        let path = format!("/organizations/{}/users", org_id);
        let body = json!({
            "email": "temp@medicinetrack.test",
            "name": "Temporary Test User",
            "role": "USER",
            "phoneNumber": "+1-555-TEMP",
            "timezone": "UTC",
        });
        let created = send_expecting(self.config.post(&path).json(&body), StatusCode::CREATED).await?;

        // Cleanup problems are logged, never fail the test.
        match created_id(&created) {
            Some(user_id) => match delete(&self.config, &format!("{}/{}", path, user_id)).await {
                Ok(()) => info!(%user_id, "cleaned up temporary user"),
                Err(e) => warn!(%user_id, error = %e, "failed to clean up temporary user"),
            },
            None => warn!("created user response had no id, nothing to clean up"),
        }
        Ok(())
    }

    async fn create_temporary_organization(&self) -> anyhow::Result<()> {
        let body = json!({
            "name": "Temporary Test Organization",
            "description": "Organization for temporary testing",
            "contactEmail": "temp@medicinetrack.test",
            "address": "456 Temp St, Temp City, TC 67890",
            "phoneNumber": "+1-555-TEMP",
        });
        let req = self.config.post("/organizations").json(&body);
        let created = send_expecting(req, StatusCode::CREATED).await?;

        match created_id(&created) {
            Some(org_id) => match delete(&self.config, &format!("/organizations/{}", org_id)).await {
                Ok(()) => info!(%org_id, "cleaned up temporary organization"),
                Err(e) => warn!(%org_id, error = %e, "failed to clean up temporary organization"),
            },
            None => warn!("created organization response had no id, nothing to clean up"),
        }
        Ok(())
    }
}

fn created_id(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("id")
        .or_else(|| value.get("Id"))
        .and_then(|id| id.as_str())
        .map(str::to_string)
}
