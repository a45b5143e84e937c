//! Testing utilities for provider implementations.
//!
//! This module drives a `ProviderService` implementation through a real
//! [`ProviderSession`], so tests exercise the same checks an engine would
//! apply, without any engine around it.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_protocol::testing::ProviderTester;
//! use hemmer_provider_protocol::Value;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_resource() {
//!     let tester = ProviderTester::new(MyProvider::new());
//!
//!     // Configure the provider
//!     tester.configure(Value::from(json!({"api_key": "test"}))).await.unwrap();
//!
//!     // Plan, apply and read back
//!     let instance = tester
//!         .lifecycle_create("my_resource", Value::from(json!({"name": "test-resource"})))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(instance.state.attribute("name").as_str(), Some("test-resource"));
//! }
//! ```

use std::fmt;

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::ProviderError;
use crate::provider::ProviderService;
use crate::record::ResourceInstance;
use crate::schema::ProviderSchema;
use crate::session::{ProviderSession, SessionOptions};
use crate::types::{ApplyResponse, ImportedResource, PlanResponse, PrivateData};
use crate::value::Value;

/// A test harness for provider implementations.
///
/// Each tester owns one session; configure it once, as an engine would.
pub struct ProviderTester<P: ProviderService> {
    session: ProviderSession<P>,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self {
            session: ProviderSession::new(provider),
        }
    }

    /// Create a new tester with custom session options.
    pub fn with_options(provider: P, options: SessionOptions) -> Self {
        Self {
            session: ProviderSession::with_options(provider, options),
        }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        self.session.provider()
    }

    /// Get a reference to the session driving the provider.
    pub fn session(&self) -> &ProviderSession<P> {
        &self.session
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.session.get_schema().schema
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.session
            .registry()
            .resource_types()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Get the list of data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.session
            .registry()
            .data_source_types()
            .into_iter()
            .map(String::from)
            .collect()
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Ok(())` if validation passes (no error diagnostics).
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        check_diagnostics(self.session.validate_provider_config(&config).await)
    }

    /// Configure the provider.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        check_diagnostics(self.session.configure(&config).await)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), TestError> {
        Ok(self.session.stop().await?)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        check_diagnostics(
            self.session
                .validate_resource_config(resource_type, &config)
                .await,
        )
    }

    /// Upgrade resource state stored at `version` to the current version.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, TestError> {
        let response = self
            .session
            .upgrade_resource_state(resource_type, version, &state)
            .await;
        check_diagnostics(response.diagnostics)?;
        Ok(response.upgraded_state)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResponse, TestError> {
        self.plan(resource_type, Value::Null, proposed_state, PrivateData::empty())
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResponse, TestError> {
        self.plan(resource_type, prior_state, proposed_state, PrivateData::empty())
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_destroy(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResponse, TestError> {
        self.plan(resource_type, prior_state, Value::Null, PrivateData::empty())
            .await
    }

    /// Full plan operation with explicit private data.
    pub async fn plan(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
        prior_private: PrivateData,
    ) -> Result<PlanResponse, TestError> {
        let plan = self
            .session
            .plan_resource_change(resource_type, &prior_state, &proposed_state, &prior_private)
            .await;
        check_diagnostics(plan.diagnostics.clone())?;
        Ok(plan)
    }

    /// Apply a plan produced from `prior_state`.
    pub async fn apply(
        &self,
        resource_type: &str,
        prior_state: Value,
        plan: &PlanResponse,
    ) -> Result<ApplyResponse, TestError> {
        let response = self
            .session
            .apply_resource_change(
                resource_type,
                &prior_state,
                &plan.planned_state,
                &plan.planned_private,
            )
            .await;
        check_diagnostics(response.diagnostics.clone())?;
        Ok(response)
    }

    /// Read the current state of a resource. Null means it is gone.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, TestError> {
        let response = self
            .session
            .read_resource(resource_type, &current_state)
            .await;
        check_diagnostics(response.diagnostics)?;
        Ok(response.state)
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, TestError> {
        let response = self.session.import_resource_state(resource_type, id).await;
        check_diagnostics(response.diagnostics)?;
        Ok(response.imported)
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        check_diagnostics(
            self.session
                .validate_data_source_config(data_source_type, &config)
                .await,
        )
    }

    /// Read data from a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, TestError> {
        let response = self
            .session
            .read_data_source_with_config(data_source_type, &config)
            .await;
        check_diagnostics(response.diagnostics)?;
        Ok(response.state)
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan → apply → read.
    ///
    /// Returns the instance as an engine would record it.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<ResourceInstance, TestError> {
        let version = self
            .session
            .registry()
            .resource_version(resource_type)
            .unwrap_or_default();
        let mut instance = ResourceInstance::absent(resource_type, version);
        self.lifecycle_update(&mut instance, config).await?;
        Ok(instance)
    }

    /// Run a full update lifecycle: plan → apply → read.
    ///
    /// The instance is updated in place, private data included.
    pub async fn lifecycle_update(
        &self,
        instance: &mut ResourceInstance,
        proposed_state: Value,
    ) -> Result<(), TestError> {
        let plan = self
            .plan(
                &instance.resource_type,
                instance.state.clone(),
                proposed_state,
                instance.private.clone(),
            )
            .await?;

        let applied = self
            .apply(&instance.resource_type, instance.state.clone(), &plan)
            .await?;
        instance.record_apply(applied);

        let read = self
            .session
            .read_resource(&instance.resource_type, &instance.state)
            .await;
        check_diagnostics(instance.record_read(read))
    }

    /// Run a full delete lifecycle: plan → apply.
    pub async fn lifecycle_delete(&self, instance: &mut ResourceInstance) -> Result<(), TestError> {
        let plan = self
            .plan(
                &instance.resource_type,
                instance.state.clone(),
                Value::Null,
                instance.private.clone(),
            )
            .await?;

        let applied = self
            .apply(&instance.resource_type, instance.state.clone(), &plan)
            .await?;
        check_diagnostics(instance.record_apply(applied))
    }

    /// Run a full CRUD lifecycle: create → read → update → read → delete.
    ///
    /// Returns the instance as it was after the update (before delete).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<ResourceInstance, TestError> {
        let mut instance = self.lifecycle_create(resource_type, initial_config).await?;
        self.lifecycle_update(&mut instance, updated_config).await?;

        let updated = instance.clone();
        self.lifecycle_delete(&mut instance).await?;
        Ok(updated)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with error diagnostics.
    Diagnostics(Diagnostics),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

impl TestError {
    /// The error diagnostics, if the operation reported any.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            TestError::Diagnostics(diags) => Some(diags),
            TestError::Provider(_) => None,
        }
    }
}

/// Check diagnostics and return an error if there are any errors.
fn check_diagnostics(diagnostics: Diagnostics) -> Result<(), TestError> {
    let errors: Diagnostics = diagnostics
        .into_vec()
        .into_iter()
        .filter(|d| d.is_error())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

fn changed_paths(plan: &PlanResponse) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes, destroys, or requires replacement.
pub fn assert_plan_creates(plan: &PlanResponse) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.is_destroy(), "Expected plan to create, not destroy");
    assert!(
        !plan.requires_replacement(),
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan destroys the resource.
///
/// # Panics
///
/// Panics if the planned state is not null.
pub fn assert_plan_destroys(plan: &PlanResponse) {
    assert!(
        plan.is_destroy(),
        "Expected plan to destroy, but planned {}",
        plan.planned_state
    );
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResponse) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        changed_paths(plan)
    );
}

/// Assert that a plan result indicates changes are needed.
///
/// # Panics
///
/// Panics if the plan has no changes.
pub fn assert_plan_has_changes(plan: &PlanResponse) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes, but got no changes"
    );
}

/// Assert that a plan requires replacement because of `path`.
///
/// # Panics
///
/// Panics if `path` is not among the attributes requiring replacement.
pub fn assert_plan_replaces(plan: &PlanResponse, path: &str) {
    assert!(
        plan.requires_replace.iter().any(|p| p == path),
        "Expected '{}' to require replacement, but only {:?} do",
        path,
        plan.requires_replace
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResponse) {
    assert!(
        !plan.requires_replacement(),
        "Expected plan to update in place, but {:?} require replacement",
        plan.requires_replace
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResponse, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        changed_paths(plan)
    );
}

/// Assert that a plan does not have a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan has a change for the given path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResponse, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        !has_change,
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that a value contains no unknowns.
///
/// # Panics
///
/// Panics listing the paths of every unknown.
pub fn assert_wholly_known(value: &Value) {
    assert!(
        value.is_wholly_known(),
        "Expected a wholly known value, but found unknowns at {:?}",
        value.unknown_paths()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &Diagnostics) {
    let errors: Vec<_> = diagnostics.errors().collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &Diagnostics) {
    assert!(
        diagnostics.has_errors(),
        "Expected at least one error, but got none"
    );
}

/// Assert that diagnostics contain an error of the given kind.
///
/// # Panics
///
/// Panics if no error diagnostic has that kind.
pub fn assert_error_kind(diagnostics: &Diagnostics, kind: DiagnosticKind) {
    assert!(
        diagnostics.errors().any(|d| d.kind == kind),
        "Expected a {:?} error, but got {:?}",
        kind,
        diagnostics.errors().map(|d| d.kind).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &Diagnostics, substring: &str) {
    let has_matching_error = diagnostics
        .errors()
        .any(|d| d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics.errors().map(|d| &d.summary).collect::<Vec<_>>()
    );
}
