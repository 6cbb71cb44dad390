//! Testing utilities for provider implementations.
//!
//! [`ProviderTester`] drives a [`ProviderService`] directly, without a gRPC
//! server, and turns error diagnostics into a [`TestError`].
//!
//! # Example
//!
//! ```ignore
//! use scaleway_provider::testing::ProviderTester;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_volume() {
//!     let tester = ProviderTester::new(provider);
//!     tester.configure(json!({"zone": "fr-par-1"})).await.unwrap();
//!
//!     let state = tester
//!         .lifecycle_create("scaleway_block_volume", json!({"name": "vol", "size_in_gb": 20}))
//!         .await
//!         .unwrap();
//!     assert_eq!(state["name"], "vol");
//! }
//! ```

use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ComponentKind, EphemeralResult, ImportedResource, PlanResult, Surface};

/// A test harness for provider implementations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
    terraform_version: String,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            terraform_version: "1.9.0".to_string(),
        }
    }

    /// Host version reported on configure.
    pub fn with_terraform_version(mut self, version: impl Into<String>) -> Self {
        self.terraform_version = version.into();
        self
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Names of the components of `kind`, sorted.
    pub fn component_names(&self, kind: ComponentKind) -> Vec<String> {
        self.provider
            .metadata()
            .components
            .into_iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.type_name)
            .collect()
    }

    /// Surface owning `name` under `kind`.
    pub fn surface_of(&self, kind: ComponentKind, name: &str) -> Option<Surface> {
        self.provider
            .metadata()
            .components
            .into_iter()
            .find(|c| c.kind == kind && c.type_name == name)
            .map(|c| c.surface)
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider block. Error diagnostics fail the call.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics).map(drop)
    }

    /// Configure the provider. Returns the warnings on success.
    pub async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, TestError> {
        let diagnostics = self
            .provider
            .configure(config, &self.terraform_version)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a component configuration.
    pub async fn validate_config(
        &self,
        kind: ComponentKind,
        type_name: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(kind, type_name, config)
            .await?;
        check_diagnostics(diagnostics).map(drop)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(&self, type_name: &str, proposed_state: Value) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(type_name, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        type_name: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(type_name, Some(prior_state), proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(&self, type_name: &str, prior_state: Value) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(type_name, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a resource.
    pub async fn create(&self, type_name: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(type_name, planned_state).await
    }

    /// Read a resource; `None` when it is gone.
    pub async fn read(&self, type_name: &str, current_state: Value) -> Result<Option<Value>, ProviderError> {
        self.provider.read(type_name, current_state).await
    }

    /// Update a resource.
    pub async fn update(
        &self,
        type_name: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.update(type_name, prior_state, planned_state).await
    }

    /// Delete a resource.
    pub async fn delete(&self, type_name: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(type_name, current_state).await
    }

    /// Import a resource.
    pub async fn import_resource(&self, type_name: &str, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(type_name, id).await
    }

    // =========================================================================
    // Data Sources, Ephemeral Resources & Actions
    // =========================================================================

    /// Read a data source.
    pub async fn read_data_source(&self, type_name: &str, config: Value) -> Result<Value, ProviderError> {
        self.provider.read_data_source(type_name, config).await
    }

    /// Open an ephemeral resource.
    pub async fn open_ephemeral(&self, type_name: &str, config: Value) -> Result<EphemeralResult, ProviderError> {
        self.provider.open_ephemeral_resource(type_name, config).await
    }

    /// Close an ephemeral resource.
    pub async fn close_ephemeral(&self, type_name: &str, private: Option<Value>) -> Result<(), ProviderError> {
        self.provider.close_ephemeral_resource(type_name, private).await
    }

    /// Invoke an action. Error diagnostics fail the call.
    pub async fn invoke_action(&self, type_name: &str, config: Value) -> Result<Vec<Diagnostic>, TestError> {
        let diagnostics = self.provider.invoke_action(type_name, config).await?;
        check_diagnostics(diagnostics)
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Plan, create and read back a resource.
    pub async fn lifecycle_create(&self, type_name: &str, config: Value) -> Result<Value, TestError> {
        let plan = self.plan_create(type_name, config).await?;
        let created = self.create(type_name, plan.planned_state).await?;
        self.read(type_name, created)
            .await?
            .ok_or_else(|| TestError::Gone(type_name.to_string()))
    }

    /// Plan, update and read back a resource.
    pub async fn lifecycle_update(
        &self,
        type_name: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, TestError> {
        let plan = self
            .plan_update(type_name, prior_state.clone(), proposed_state)
            .await?;
        let updated = self.update(type_name, prior_state, plan.planned_state).await?;
        self.read(type_name, updated)
            .await?
            .ok_or_else(|| TestError::Gone(type_name.to_string()))
    }

    /// Delete a resource and check that a following read reports it gone.
    pub async fn lifecycle_delete(&self, type_name: &str, current_state: Value) -> Result<(), TestError> {
        self.delete(type_name, current_state.clone()).await?;
        match self.read(type_name, current_state).await? {
            None => Ok(()),
            Some(_) => Err(TestError::StillPresent(type_name.to_string())),
        }
    }

    /// Create, update and delete a resource. Returns the updated state.
    pub async fn lifecycle_crud(
        &self,
        type_name: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, TestError> {
        let created = self.lifecycle_create(type_name, initial_config).await?;
        let updated = self
            .lifecycle_update(type_name, created, updated_config)
            .await?;
        self.lifecycle_delete(type_name, updated.clone()).await?;
        Ok(updated)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
    /// A read after create or update found nothing.
    Gone(String),
    /// A read after delete still found the resource.
    StillPresent(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
            TestError::Gone(name) => write!(f, "{name} disappeared after apply"),
            TestError::StillPresent(name) => write!(f, "{name} still exists after delete"),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

/// Fail on error diagnostics; pass the rest through.
fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<Vec<Diagnostic>, TestError> {
    if diagnostics.iter().any(Diagnostic::is_error) {
        Err(TestError::Diagnostics(
            diagnostics.into_iter().filter(Diagnostic::is_error).collect(),
        ))
    } else {
        Ok(diagnostics)
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(plan.requires_replace, "Expected plan to require replacement, but it does not");
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan does not have a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan has a change for the given path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !plan.changes.iter().any(|c| c.path == path),
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

/// Assert that diagnostics hold a warning with the given summary.
///
/// # Panics
///
/// Panics if no warning has that summary.
pub fn assert_warning(diagnostics: &[Diagnostic], summary: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Warning && d.summary == summary),
        "Expected a warning '{}', got {:?}",
        summary,
        diagnostics.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env;
    use crate::legacy::{LegacyResource, LegacySurface, ResourceData};
    use crate::meta::OpContext;
    use crate::mux::MuxProvider;
    use crate::schema::{Attribute, Schema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Keeps notes in memory, keyed by id.
    #[derive(Default)]
    struct NoteResource {
        notes: Mutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl LegacyResource for NoteResource {
        fn type_name(&self) -> &'static str {
            "test_note"
        }

        fn schema(&self) -> Schema {
            Schema::v0()
                .with_attribute("id", Attribute::computed_string())
                .with_attribute("text", Attribute::required_string())
                .with_attribute("zone", Attribute::optional_computed_string().with_force_new())
        }

        async fn create(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
            let zone = crate::meta::extract_zone(&data.to_value(), op.meta())?;
            let id = crate::locality::format_id(zone, "11111111-2222-3333-4444-555555555555");
            data.set("zone", zone.as_str());
            data.set_id(id.clone());
            self.notes.lock().unwrap().insert(id, data.to_value());
            Ok(())
        }

        async fn read(&self, _op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
            let id = data.id().unwrap_or_default().to_string();
            match self.notes.lock().unwrap().get(&id) {
                Some(stored) => *data = ResourceData::new(stored.clone()),
                None => data.clear_id(),
            }
            Ok(())
        }

        async fn update(&self, _op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
            let id = data.id().unwrap_or_default().to_string();
            self.notes.lock().unwrap().insert(id, data.to_value());
            Ok(())
        }

        async fn delete(&self, _op: &OpContext, data: &ResourceData) -> Result<(), ProviderError> {
            let id = data.id().unwrap_or_default().to_string();
            self.notes.lock().unwrap().remove(&id);
            Ok(())
        }
    }

    fn tester() -> ProviderTester<MuxProvider> {
        let env: HashMap<String, String> = [
            (env::CONFIG_PATH, "/nonexistent/scw/config.yaml"),
            (env::DEFAULT_ZONE, "nl-ams-1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let provider = MuxProvider::builder(Schema::v0())
            .legacy(LegacySurface::new().with_resource(NoteResource::default()))
            .env(env)
            .build()
            .unwrap();
        ProviderTester::new(provider)
    }

    #[tokio::test]
    async fn test_component_names() {
        let tester = tester();
        assert_eq!(tester.component_names(ComponentKind::Resource), ["test_note"]);
        assert_eq!(
            tester.surface_of(ComponentKind::Resource, "test_note"),
            Some(Surface::Legacy)
        );
        assert!(tester.component_names(ComponentKind::Action).is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_crud() {
        let tester = tester();
        assert!(tester.configure(json!({})).await.unwrap().is_empty());

        let state = tester
            .lifecycle_crud("test_note", json!({"text": "one"}), json!({"text": "two"}))
            .await
            .unwrap();
        assert_eq!(state["text"], "two");
        assert_eq!(state["zone"], "nl-ams-1");
        assert_eq!(state["id"], "nl-ams-1/11111111-2222-3333-4444-555555555555");
    }

    #[tokio::test]
    async fn test_plan_update_replaces_on_zone_change() {
        let tester = tester();
        let prior = json!({"id": "nl-ams-1/x", "text": "a", "zone": "nl-ams-1"});

        let plan = tester
            .plan_update("test_note", prior.clone(), json!({"text": "b", "zone": "nl-ams-1"}))
            .await
            .unwrap();
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "text");
        assert_plan_does_not_change_attribute(&plan, "zone");
        assert_eq!(plan.planned_state["id"], "nl-ams-1/x");

        let plan = tester
            .plan_update("test_note", prior, json!({"text": "a", "zone": "nl-ams-2"}))
            .await
            .unwrap();
        assert_plan_replaces(&plan);
    }

    #[tokio::test]
    async fn test_validate_config_reports_missing_text() {
        let tester = tester();
        match tester
            .validate_config(ComponentKind::Resource, "test_note", json!({}))
            .await
        {
            Err(TestError::Diagnostics(diags)) => assert_error_contains(&diags, "text"),
            other => panic!("expected diagnostics, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_operations_require_configure() {
        let tester = tester();
        let plan = tester.plan_create("test_note", json!({"text": "a"})).await.unwrap();
        assert_plan_creates(&plan);
        assert!(matches!(
            tester.create("test_note", plan.planned_state).await,
            Err(ProviderError::NotConfigured)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = TestError::Diagnostics(vec![Diagnostic::error("bad").with_attribute("zone")]);
        assert!(err.to_string().contains("bad (at zone)"));
        assert_eq!(
            TestError::Gone("test_note".into()).to_string(),
            "test_note disappeared after apply"
        );
    }

    #[test]
    fn test_assert_plan_no_changes() {
        assert_plan_no_changes(&PlanResult::no_change(json!({})));
    }
}
