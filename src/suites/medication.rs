//! Medication API: medications, dose logs, interaction checks and the
//! medication database search.

use std::sync::Arc;

use chrono::{Days, Utc};
use futures::FutureExt;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::system_user::SystemUser;
use super::{get_array, get_object, send_expecting, send_for_array, send_for_object};
use crate::args;
use crate::config::{API, CONFIG_SERVICE};
use crate::harness::assert::{expect_contains, expect_success};
use crate::harness::{Fixture, FixtureSpec, TestArgs, TestContext};
use crate::probes::ServiceClient;

pub struct MedicationApiTests {
    api: Arc<ServiceClient>,
    system: SystemUser,
}

#[async_trait::async_trait]
impl Fixture for MedicationApiTests {
    async fn initialize(&mut self) -> anyhow::Result<()> {
        self.system.bootstrap().await
    }

    async fn dispose(&mut self) -> anyhow::Result<()> {
        self.system.teardown().await
    }
}

pub fn fixture() -> FixtureSpec<MedicationApiTests> {
    FixtureSpec::new("MedicationApiTests", MedicationApiTests::new)
        .test("HealthCheck_Should_Return_OK", |f, _| f.health_check().boxed())
        .test("CreateMedication_Should_Return_Created", |f, _| f.create_medication().boxed())
        .test("GetMedications_Should_Return_List", |f, _| f.get_medications().boxed())
        .theory(
            "GetMedications_WithStatus_Should_Return_List",
            vec![args!["active"], args!["archived"]],
            |f, a| f.get_medications_with_status(a).boxed(),
        )
        .test("GetMedication_Should_Return_Medication", |f, _| f.get_medication().boxed())
        .test("UpdateMedication_Should_Return_Updated", |f, _| f.update_medication().boxed())
        .test("DeleteMedication_Should_Return_NoContent", |f, _| f.delete_medication().boxed())
        .test("SearchMedicationDatabase_Should_Return_Results", |f, _| {
            f.search_database("Lisinopril").boxed()
        })
        .test("LogMedication_Should_Return_Created", |f, _| f.log_medication().boxed())
        .test("GetMedicationLogs_Should_Return_List", |f, _| f.get_logs().boxed())
        .theory(
            "GetMedicationLogs_WithStatus_Should_Return_List",
            vec![args!["TAKEN"], args!["SKIPPED"]],
            |f, a| f.get_logs_with_status(a).boxed(),
        )
        .test("GetMedicationLogs_ForSpecificMedication_Should_Return_List", |f, _| {
            f.get_logs_for_medication().boxed()
        })
        .test("UpdateMedicationLog_Should_Return_Updated", |f, _| f.update_log().boxed())
        .test("DeleteMedicationLog_Should_Return_NoContent", |f, _| f.delete_log().boxed())
        .test("CheckMedicationInteractions_Should_Return_Warnings", |f, _| {
            f.check_interactions().boxed()
        })
        .test("CheckMedicationInteractions_WithNewMedication_Should_Return_Warnings", |f, _| {
            f.check_interactions_with_new_medication().boxed()
        })
        .test("CreateMedication_WithInvalidStrength_Should_Return_BadRequest", |f, _| {
            f.create_rejected(invalid_strength()).boxed()
        })
        .test("CreateMedication_WithEmptyName_Should_Return_BadRequest", |f, _| {
            f.create_rejected(empty_name()).boxed()
        })
        .test("CreateMedication_WithNoSchedules_Should_Return_BadRequest", |f, _| {
            f.create_rejected(no_schedules()).boxed()
        })
        .test("CreateMedication_WithEndDateBeforeStartDate_Should_Return_BadRequest", |f, _| {
            f.create_rejected(end_before_start()).boxed()
        })
        .test("SearchMedicationDatabase_WithEmptyQuery_Should_Return_EmptyArray", |f, _| {
            f.search_database("").boxed()
        })
}

impl MedicationApiTests {
    pub fn new(ctx: &TestContext) -> anyhow::Result<Self> {
        Ok(Self {
            api: ctx.service(API)?,
            system: SystemUser::new(ctx.service(CONFIG_SERVICE)?),
        })
    }

    fn user_path(&self, rest: &str) -> anyhow::Result<String> {
        Ok(format!("/users/{}{}", self.system.user_id()?, rest))
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        let body = expect_success(self.api.get("/health").send().await?)?.text().await?;
        info!(body = %body, "health check response");
        expect_contains(&body, "MedicineTrack API is OK")?;
        Ok(())
    }

    async fn create_medication(&self) -> anyhow::Result<()> {
        let body = json!({
            "name": "Test Medication",
            "genericName": "TestGeneric",
            "brandName": "TestBrand",
            "strength": "10 mg",
            "form": "Tablet",
            "shape": "Round",
            "color": "White",
            "notes": "Test medication for E2E testing",
            "startDate": today(),
            "endDate": null,
            "schedules": [{
                "frequencyType": "EVERY_X_DAYS",
                "interval": 1,
                "daysOfWeek": null,
                "timesOfDay": ["08:00"],
                "quantity": 1.0,
                "unit": "tablet",
            }],
        });
        let req = self.api.post(&self.user_path("/medications")?).json(&body);
        let created = send_expecting(req, StatusCode::CREATED).await?;
        info!(body = %created, "created medication");
        Ok(())
    }

    async fn get_medications(&self) -> anyhow::Result<()> {
        get_array(&self.api, &self.user_path("/medications")?).await?;
        Ok(())
    }

    async fn get_medications_with_status(&self, args: &TestArgs) -> anyhow::Result<()> {
        let status = args.str(0)?;
        let req = self
            .api
            .get(&self.user_path("/medications")?)
            .query(&[("status", status)]);
        send_for_array(req).await?;
        Ok(())
    }

    async fn get_medication(&self) -> anyhow::Result<()> {
        let path = self.user_path(&format!("/medications/{}", Uuid::new_v4()))?;
        get_object(&self.api, &path).await?;
        Ok(())
    }

    async fn update_medication(&self) -> anyhow::Result<()> {
        let body = json!({
            "name": "Updated Medication",
            "notes": "Updated notes",
            "isArchived": false,
        });
        let path = self.user_path(&format!("/medications/{}", Uuid::new_v4()))?;
        send_for_object(self.api.put(&path).json(&body)).await?;
        Ok(())
    }

    async fn delete_medication(&self) -> anyhow::Result<()> {
        let path = self.user_path(&format!("/medications/{}", Uuid::new_v4()))?;
        send_expecting(self.api.delete(&path), StatusCode::NO_CONTENT).await?;
        Ok(())
    }

    async fn search_database(&self, query: &str) -> anyhow::Result<()> {
        let req = self
            .api
            .get("/medication-database/search")
            .query(&[("query", query)]);
        send_for_array(req).await?;
        Ok(())
    }

    async fn log_medication(&self) -> anyhow::Result<()> {
        let body = json!({
            "scheduleId": Uuid::new_v4(),
            "takenAt": Utc::now(),
            "status": "TAKEN",
            "quantityTaken": 1.0,
            "notes": "Taken with breakfast",
        });
        let path = self.user_path(&format!("/medications/{}/logs", Uuid::new_v4()))?;
        send_expecting(self.api.post(&path).json(&body), StatusCode::CREATED).await?;
        Ok(())
    }

    async fn get_logs(&self) -> anyhow::Result<()> {
        get_array(&self.api, &self.user_path("/medication-logs")?).await?;
        Ok(())
    }

    async fn get_logs_with_status(&self, args: &TestArgs) -> anyhow::Result<()> {
        let status = args.str(0)?;
        let req = self
            .api
            .get(&self.user_path("/medication-logs")?)
            .query(&[("status", status)]);
        send_for_array(req).await?;
        Ok(())
    }

    async fn get_logs_for_medication(&self) -> anyhow::Result<()> {
        let path = self.user_path(&format!("/medications/{}/logs", Uuid::new_v4()))?;
        get_array(&self.api, &path).await?;
        Ok(())
    }

    async fn update_log(&self) -> anyhow::Result<()> {
        let body = json!({
            "takenAt": Utc::now(),
            "status": "TAKEN",
            "quantityTaken": 2.0,
            "notes": "Updated log notes",
        });
        let path = self.user_path(&format!("/medication-logs/{}", Uuid::new_v4()))?;
        send_for_object(self.api.put(&path).json(&body)).await?;
        Ok(())
    }

    async fn delete_log(&self) -> anyhow::Result<()> {
        let path = self.user_path(&format!("/medication-logs/{}", Uuid::new_v4()))?;
        send_expecting(self.api.delete(&path), StatusCode::NO_CONTENT).await?;
        Ok(())
    }

    async fn check_interactions(&self) -> anyhow::Result<()> {
        let body = json!({
            "medicationIds": [Uuid::new_v4(), Uuid::new_v4()],
            "newMedication": null,
            "existingMedicationIds": null,
        });
        self.post_interaction_check(&body).await
    }

    async fn check_interactions_with_new_medication(&self) -> anyhow::Result<()> {
        let body = json!({
            "medicationIds": null,
            "newMedication": {
                "ndcCode": "12345-678-90",
                "name": "New Test Medication",
                "genericName": "TestGeneric",
                "brandNames": ["TestBrand"],
                "availableForms": ["Tablet"],
                "availableStrengths": ["10mg"],
                "manufacturer": "Test Pharma",
            },
            "existingMedicationIds": [Uuid::new_v4()],
        });
        self.post_interaction_check(&body).await
    }

    async fn post_interaction_check(&self, body: &Value) -> anyhow::Result<()> {
        let path = self.user_path("/medication-interactions/check")?;
        send_for_array(self.api.post(&path).json(body)).await?;
        Ok(())
    }

    /// The API must refuse `body` with 400.
    async fn create_rejected(&self, body: Value) -> anyhow::Result<()> {
        let req = self.api.post(&self.user_path("/medications")?).json(&body);
        send_expecting(req, StatusCode::BAD_REQUEST).await?;
        Ok(())
    }
}

fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

fn daily_schedule() -> Value {
    json!([{
        "frequencyType": "DAILY",
        "timesOfDay": ["08:00"],
        "quantity": 1.0,
        "unit": "tablet",
    }])
}

fn invalid_strength() -> Value {
    // strength must be "<number> <unit>"
    json!({
        "name": "Test Medication",
        "strength": "invalid",
        "form": "Tablet",
        "startDate": today(),
        "schedules": daily_schedule(),
    })
}

fn empty_name() -> Value {
    json!({
        "name": "",
        "strength": "10 mg",
        "form": "Tablet",
        "startDate": today(),
        "schedules": daily_schedule(),
    })
}

fn no_schedules() -> Value {
    json!({
        "name": "Test Medication",
        "strength": "10 mg",
        "form": "Tablet",
        "startDate": today(),
        "schedules": [],
    })
}

fn end_before_start() -> Value {
    let today = Utc::now().date_naive();
    let start = today.checked_add_days(Days::new(10)).unwrap_or(today);
    json!({
        "name": "Test Medication",
        "strength": "10 mg",
        "form": "Tablet",
        "startDate": start.format("%Y-%m-%d").to_string(),
        "endDate": today.format("%Y-%m-%d").to_string(),
        "schedules": daily_schedule(),
    })
}
