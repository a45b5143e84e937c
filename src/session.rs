//! The lifecycle protocol surface the engine drives.
//!
//! A [`ProviderSession`] wraps one [`ProviderService`] for one session. It
//! owns the cached schema registry, the configured client and the stop
//! signal, and it checks every value crossing the provider boundary:
//!
//! - lifecycle calls require a single successful `configure` first
//! - apply never acts on unknowns the caller should have resolved
//! - results the provider claims are final must be wholly known
//! - planned states stay faithful to the proposal
//! - private data from plan is handed to apply untouched
//!
//! Provider failures never escape as Rust errors; they come back as
//! diagnostics next to the best state the session can vouch for.
//!
//! # Example
//!
//! ```ignore
//! let session = Arc::new(ProviderSession::new(MyProvider::new()));
//!
//! let diagnostics = session.configure(&config).await;
//! assert!(!diagnostics.has_errors());
//!
//! let plan = session
//!     .plan_resource_change("example_resource", &Value::Null, &proposed, &PrivateData::empty())
//!     .await;
//! let applied = session
//!     .apply_resource_change(
//!         "example_resource",
//!         &Value::Null,
//!         &plan.planned_state,
//!         &plan.planned_private,
//!     )
//!     .await;
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

use crate::cancel::{StopSignal, StopToken};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::error::ProviderError;
use crate::plan::{attribute_changes, check_planned_state, replace_paths, unresolved_unknowns};
use crate::provider::{ApplyRequest, OperationContext, PlanRequest, ProviderService};
use crate::registry::SchemaRegistry;
use crate::schema::Schema;
use crate::types::{
    ApplyResponse, ImportResponse, PlanResponse, PrivateData, ProviderCapabilities, ReadResponse,
    SchemaResponse, UpgradeResponse,
};
use crate::upgrade::conform;
use crate::validation::validate;
use crate::value::Value;

/// Options for a [`ProviderSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long [`ProviderSession::stop`] waits for the provider's stop hook.
    /// Default: 5 seconds.
    pub stop_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionOptions {
    /// Create new session options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// One session of the lifecycle protocol against a provider.
///
/// All methods take `&self`; share the session as `Arc<ProviderSession<P>>`
/// to drive operations concurrently.
pub struct ProviderSession<P: ProviderService> {
    provider: Arc<P>,
    registry: SchemaRegistry,
    capabilities: ProviderCapabilities,
    client: OnceCell<Arc<P::Client>>,
    configure_started: AtomicBool,
    stop: StopSignal,
    options: SessionOptions,
}

impl<P: ProviderService> ProviderSession<P> {
    /// Start a session with default options.
    pub fn new(provider: P) -> Self {
        Self::with_options(provider, SessionOptions::default())
    }

    /// Start a session with custom options.
    ///
    /// The provider's schema is fetched and checked once, here.
    pub fn with_options(provider: P, options: SessionOptions) -> Self {
        let registry = SchemaRegistry::new(provider.schema());
        if !registry.is_valid() {
            error!(
                diagnostics = %registry.diagnostics(),
                "Provider schema is internally inconsistent"
            );
        }
        let capabilities = provider.capabilities();

        Self {
            provider: Arc::new(provider),
            registry,
            capabilities,
            client: OnceCell::new(),
            configure_started: AtomicBool::new(false),
            stop: StopSignal::new(),
            options,
        }
    }

    /// The provider this session drives.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The cached schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Whether `configure` has succeeded.
    pub fn is_configured(&self) -> bool {
        self.client.initialized()
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Return the provider schema and any inconsistencies found in it.
    ///
    /// Always answers, even after `stop`.
    #[instrument(skip(self), name = "provider.get_schema")]
    pub fn get_schema(&self) -> SchemaResponse {
        debug!("GetSchema called");
        let schema = self.registry.schema().clone();
        info!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetSchema completed"
        );
        SchemaResponse {
            schema,
            diagnostics: self.registry.diagnostics().clone(),
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate provider configuration against its schema and the provider's checks.
    #[instrument(skip(self, config), name = "provider.validate_provider_config")]
    pub async fn validate_provider_config(&self, config: &Value) -> Diagnostics {
        debug!("ValidateProviderConfig called");
        if let Err(diagnostics) = self.check_usable() {
            return diagnostics;
        }
        let diagnostics = self
            .validate_with(
                self.registry.provider(),
                config,
                self.provider.validate_provider_config(config),
            )
            .await;
        log_completion("ValidateProviderConfig", &diagnostics);
        diagnostics
    }

    /// Validate a resource's configuration.
    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: &Value,
    ) -> Diagnostics {
        debug!("ValidateResourceConfig called");
        let schema = match self.usable_resource(resource_type) {
            Ok(schema) => schema,
            Err(diagnostics) => return diagnostics,
        };
        let diagnostics = self
            .validate_with(
                schema,
                config,
                self.provider.validate_resource_config(resource_type, config),
            )
            .await;
        log_completion("ValidateResourceConfig", &diagnostics);
        diagnostics
    }

    /// Validate a data source's configuration.
    #[instrument(skip(self, config), name = "provider.validate_data_source_config")]
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: &Value,
    ) -> Diagnostics {
        debug!("ValidateDataSourceConfig called");
        let schema = match self.usable_data_source(data_source_type) {
            Ok(schema) => schema,
            Err(diagnostics) => return diagnostics,
        };
        let diagnostics = self
            .validate_with(
                schema,
                config,
                self.provider
                    .validate_data_source_config(data_source_type, config),
            )
            .await;
        log_completion("ValidateDataSourceConfig", &diagnostics);
        diagnostics
    }

    async fn validate_with(
        &self,
        schema: &Schema,
        config: &Value,
        hook: impl Future<Output = Result<Diagnostics, ProviderError>>,
    ) -> Diagnostics {
        let mut diagnostics = validate(schema, config);
        match self.until_stopped(hook).await {
            Some(Ok(provider_diagnostics)) => diagnostics.append(provider_diagnostics),
            Some(Err(e)) => {
                error!(error = %e, "Validation hook failed");
                diagnostics.append(e.into());
            },
            None => diagnostics.push(Diagnostic::cancelled()),
        }
        diagnostics
    }

    // =========================================================================
    // State Upgrade
    // =========================================================================

    /// Bring state stored at `stored_version` up to the current schema version.
    ///
    /// State at the current version is returned unchanged without asking the
    /// provider. State from a newer version is rejected. On any error the
    /// upgraded state is null and must not be used.
    #[instrument(skip(self, stored_state), name = "provider.upgrade_resource_state")]
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        stored_version: u64,
        stored_state: &Value,
    ) -> UpgradeResponse {
        debug!("UpgradeResourceState called");
        let schema = match self.usable_resource(resource_type) {
            Ok(schema) => schema,
            Err(diagnostics) => return upgrade_failed(diagnostics),
        };

        if stored_version > schema.version {
            let err = ProviderError::SchemaVersion {
                resource_type: resource_type.to_string(),
                stored: stored_version,
                current: schema.version,
            };
            error!(error = %err, "UpgradeResourceState rejected newer state");
            return upgrade_failed(err.into());
        }

        if stored_version == schema.version {
            info!("UpgradeResourceState completed, already at current version");
            return UpgradeResponse {
                upgraded_state: stored_state.clone(),
                diagnostics: Diagnostics::new(),
            };
        }

        let hook = self.provider.upgrade_resource_state(
            resource_type,
            stored_version,
            stored_state.clone(),
        );
        let upgraded = match self.until_stopped(hook).await {
            Some(Ok(upgraded)) => upgraded,
            Some(Err(e)) => {
                error!(error = %e, "UpgradeResourceState failed");
                return upgrade_failed(e.into());
            },
            None => return upgrade_failed(Diagnostic::cancelled().into()),
        };

        match conform(&schema.block, &upgraded) {
            Ok(conformed) if conformed.is_wholly_known() => {
                info!(
                    from_version = stored_version,
                    to_version = schema.version,
                    "UpgradeResourceState completed"
                );
                UpgradeResponse {
                    upgraded_state: conformed,
                    diagnostics: Diagnostics::new(),
                }
            },
            Ok(conformed) => {
                let diagnostics = unknown_result("UpgradeResourceState", &conformed);
                warn!(%diagnostics, "UpgradeResourceState produced unknown values");
                upgrade_failed(diagnostics)
            },
            Err(diagnostics) => {
                warn!(%diagnostics, "UpgradeResourceState could not conform state");
                upgrade_failed(diagnostics)
            },
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Configure the provider. Only one attempt is allowed per session.
    #[instrument(skip(self, config), name = "provider.configure")]
    pub async fn configure(&self, config: &Value) -> Diagnostics {
        debug!("Configure called");
        if let Err(diagnostics) = self.check_usable() {
            return diagnostics;
        }
        if self.configure_started.swap(true, Ordering::SeqCst) {
            warn!("Configure called more than once");
            return Diagnostic::error("Provider already configured")
                .with_detail("configure may only be attempted once per session")
                .with_kind(DiagnosticKind::ProtocolViolation)
                .into();
        }

        let token = self.stop.token();
        match self
            .until_stopped(self.provider.configure(config, &token))
            .await
        {
            Some(Ok(client)) => {
                // The swap above guarantees a single writer
                let _ = self.client.set(Arc::new(client));
                info!("Configure completed successfully");
                Diagnostics::new()
            },
            Some(Err(e)) => {
                error!(error = %e, "Configure failed");
                e.into()
            },
            None => Diagnostic::cancelled().into(),
        }
    }

    /// Ask the provider to stop.
    ///
    /// The stop signal fires immediately; in-flight operations observe it
    /// while the provider's stop hook runs, bounded by the configured
    /// timeout. An error means the provider may not have stopped.
    #[instrument(skip(self), name = "provider.stop")]
    pub async fn stop(&self) -> Result<(), ProviderError> {
        info!("Stop called");
        if !self.stop.trigger() {
            debug!("Stop was already requested");
        }

        match tokio::time::timeout(self.options.stop_timeout, self.provider.stop()).await {
            Ok(Ok(())) => {
                info!("Stop completed successfully");
                Ok(())
            },
            Ok(Err(e)) => {
                error!(error = %e, "Stop failed");
                Err(e)
            },
            Err(_) => {
                warn!(
                    timeout_ms = self.options.stop_timeout.as_millis() as u64,
                    "Stop hook timed out"
                );
                Err(ProviderError::DeadlineExceeded(format!(
                    "provider did not stop within {:?}",
                    self.options.stop_timeout
                )))
            },
        }
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Refresh a resource's state from the remote object.
    ///
    /// A null state means the object no longer exists. On error the prior
    /// state is returned alongside the diagnostics.
    #[instrument(skip(self, prior_state), name = "provider.read_resource")]
    pub async fn read_resource(&self, resource_type: &str, prior_state: &Value) -> ReadResponse {
        debug!("ReadResource called");
        let failed = |diagnostics: Diagnostics| ReadResponse {
            state: prior_state.clone(),
            diagnostics,
        };
        let (client, _) = match self.lifecycle_resource(resource_type) {
            Ok(found) => found,
            Err(diagnostics) => return failed(diagnostics),
        };

        if prior_state.is_null() {
            return ReadResponse::gone();
        }

        let token = self.stop.token();
        let ctx = OperationContext::new(client.as_ref(), &token);
        match self
            .until_stopped(self.provider.read(ctx, resource_type, prior_state))
            .await
        {
            Some(Ok(state)) if state.is_null() => {
                info!("ReadResource completed, resource is gone");
                ReadResponse::gone()
            },
            Some(Ok(state)) if !state.is_wholly_known() => {
                let diagnostics = unknown_result("ReadResource", &state);
                warn!(%diagnostics, "ReadResource returned unknown values");
                failed(diagnostics)
            },
            Some(Ok(state)) => {
                info!("ReadResource completed");
                ReadResponse::new(state)
            },
            Some(Err(ProviderError::NotFound(what))) => {
                info!(%what, "ReadResource completed, resource is gone");
                ReadResponse::gone()
            },
            Some(Err(e)) => {
                error!(error = %e, "ReadResource failed");
                failed(e.into())
            },
            None => failed(Diagnostic::cancelled().into()),
        }
    }

    /// Plan the change from `prior_state` to `proposed_state`.
    ///
    /// A null proposal plans a destroy. The planned state is checked against
    /// the proposal and the session fills in the attribute changes and the
    /// force-new attributes requiring replacement.
    #[instrument(
        skip(self, prior_state, proposed_state, prior_private),
        name = "provider.plan_resource_change"
    )]
    pub async fn plan_resource_change(
        &self,
        resource_type: &str,
        prior_state: &Value,
        proposed_state: &Value,
        prior_private: &PrivateData,
    ) -> PlanResponse {
        debug!("PlanResourceChange called");
        let (client, schema) = match self.lifecycle_resource(resource_type) {
            Ok(found) => found,
            Err(diagnostics) => return PlanResponse::failed(diagnostics),
        };

        let destroying = proposed_state.is_null();
        if destroying && (prior_state.is_null() || !self.capabilities.plan_destroy) {
            info!("PlanResourceChange completed, destroy");
            let mut plan = PlanResponse::destroy().with_private(prior_private.clone());
            plan.changes = attribute_changes(prior_state, &Value::Null);
            return plan;
        }

        let token = self.stop.token();
        let ctx = OperationContext::new(client.as_ref(), &token);
        let request = PlanRequest {
            resource_type,
            schema,
            prior_state,
            proposed_state,
            prior_private,
        };
        let mut plan = match self.until_stopped(self.provider.plan(ctx, request)).await {
            Some(Ok(plan)) => plan,
            Some(Err(e)) => {
                error!(error = %e, "PlanResourceChange failed");
                return PlanResponse::failed(e);
            },
            None => return PlanResponse::failed(Diagnostic::cancelled()),
        };

        if destroying {
            if !plan.planned_state.is_null() {
                plan.diagnostics.push(
                    Diagnostic::error("Provider planned a value for a destroy")
                        .with_detail("A destroy plan must be null; the planned value was discarded")
                        .with_kind(DiagnosticKind::ProtocolViolation),
                );
                plan.planned_state = Value::Null;
            }
        } else {
            plan.diagnostics.append(check_planned_state(
                &schema.block,
                proposed_state,
                &plan.planned_state,
            ));
            plan.requires_replace
                .extend(replace_paths(&schema.block, prior_state, &plan.planned_state));
            plan.requires_replace.sort();
            plan.requires_replace.dedup();
        }
        plan.changes = attribute_changes(prior_state, &plan.planned_state);

        log_completion("PlanResourceChange", &plan.diagnostics);
        plan
    }

    /// Apply a planned change.
    ///
    /// Dispatches to create, update or delete. Computed attributes may still
    /// be unknown for the provider to fill in; any other unknown in the
    /// planned state is refused without calling the provider. Apply is
    /// never abandoned on stop: the provider decides how to wind down and
    /// reports whatever progress it made.
    #[instrument(
        skip(self, prior_state, planned_state, planned_private),
        name = "provider.apply_resource_change"
    )]
    pub async fn apply_resource_change(
        &self,
        resource_type: &str,
        prior_state: &Value,
        planned_state: &Value,
        planned_private: &PrivateData,
    ) -> ApplyResponse {
        debug!("ApplyResourceChange called");
        let failed = |state: &Value, diagnostics: Diagnostics| ApplyResponse {
            new_state: state.clone(),
            private: planned_private.clone(),
            diagnostics,
        };
        let (client, schema) = match self.lifecycle_resource(resource_type) {
            Ok(found) => found,
            Err(diagnostics) => return failed(prior_state, diagnostics),
        };

        let unresolved = unresolved_unknowns(&schema.block, planned_state);
        if !unresolved.is_empty() {
            let diagnostics = unknown_input(unresolved);
            warn!(%diagnostics, "ApplyResourceChange refused unknown planned values");
            return failed(prior_state, diagnostics);
        }
        if prior_state.is_null() && planned_state.is_null() {
            return ApplyResponse::new(Value::Null);
        }

        let token = self.stop.token();
        let ctx = OperationContext::new(client.as_ref(), &token);
        let request = ApplyRequest {
            resource_type,
            prior_state,
            planned_state,
            planned_private,
        };

        if planned_state.is_null() {
            return match self.provider.delete(ctx, request).await {
                Ok(()) => {
                    info!("ApplyResourceChange completed, deleted");
                    ApplyResponse::new(Value::Null)
                },
                Err(ProviderError::NotFound(what)) => {
                    info!(%what, "ApplyResourceChange completed, already deleted");
                    ApplyResponse::new(Value::Null)
                },
                Err(e) => {
                    error!(error = %e, "ApplyResourceChange delete failed");
                    failed(prior_state, e.into())
                },
            };
        }

        let creating = prior_state.is_null();
        let result = if creating {
            self.provider.create(ctx, request).await
        } else {
            self.provider.update(ctx, request).await
        };

        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, creating, "ApplyResourceChange failed");
                // Nothing was created, or the prior object is untouched
                let state = if creating {
                    Value::Null
                } else {
                    prior_state.clone()
                };
                return failed(&state, e.into());
            },
        };

        if response.diagnostics.has_errors() {
            if !creating && response.new_state.is_null() {
                // A failed update never destroys; keep tracking the object
                response.new_state = prior_state.clone();
            } else if !response.new_state.is_null()
                && !response.diagnostics.has_kind(DiagnosticKind::PartialApply)
            {
                response.diagnostics.push(
                    Diagnostic::warning("Apply partially completed")
                        .with_detail("The returned state reflects progress made before the failure")
                        .with_kind(DiagnosticKind::PartialApply),
                );
            }
            warn!(
                diagnostics = response.diagnostics.len(),
                "ApplyResourceChange completed with errors"
            );
            return response;
        }

        if response.new_state.is_null() {
            response.diagnostics.push(
                Diagnostic::error("Provider returned null state after apply")
                    .with_detail("A successful create or update must return the resulting state")
                    .with_kind(DiagnosticKind::ProtocolViolation),
            );
        } else if !response.new_state.is_wholly_known() {
            response
                .diagnostics
                .append(unknown_result("ApplyResourceChange", &response.new_state));
        }

        log_completion("ApplyResourceChange", &response.diagnostics);
        response
    }

    /// Import existing infrastructure by id.
    ///
    /// An empty result without errors means nothing was found.
    #[instrument(skip(self), name = "provider.import_resource_state")]
    pub async fn import_resource_state(&self, resource_type: &str, id: &str) -> ImportResponse {
        debug!("ImportResourceState called");
        let failed = |diagnostics: Diagnostics| ImportResponse {
            imported: Vec::new(),
            diagnostics,
        };
        let (client, _) = match self.lifecycle_resource(resource_type) {
            Ok(found) => found,
            Err(diagnostics) => return failed(diagnostics),
        };

        let token = self.stop.token();
        let ctx = OperationContext::new(client.as_ref(), &token);
        let imported = match self
            .until_stopped(self.provider.import_resource(ctx, resource_type, id))
            .await
        {
            Some(Ok(imported)) => imported,
            Some(Err(ProviderError::NotFound(what))) => {
                info!(%what, "ImportResourceState completed, nothing found");
                return ImportResponse::default();
            },
            Some(Err(e)) => {
                error!(error = %e, "ImportResourceState failed");
                return failed(e.into());
            },
            None => return failed(Diagnostic::cancelled().into()),
        };

        let mut diagnostics = Diagnostics::new();
        for (i, resource) in imported.iter().enumerate() {
            if let Err(diagnostic) = self.registry.resource(&resource.resource_type) {
                diagnostics.push(diagnostic);
            } else if resource.state.is_null() {
                diagnostics.push(
                    Diagnostic::error(format!("Imported instance {} has no state", i))
                        .with_kind(DiagnosticKind::ProtocolViolation),
                );
            } else if !resource.state.is_wholly_known() {
                diagnostics.append(unknown_result("ImportResourceState", &resource.state));
            }
        }
        if diagnostics.has_errors() {
            warn!(%diagnostics, "ImportResourceState returned invalid instances");
            return failed(diagnostics);
        }

        info!(imported = imported.len(), "ImportResourceState completed");
        ImportResponse {
            imported,
            diagnostics,
        }
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Read a data source that takes no configuration.
    ///
    /// The data source is read with an empty configuration, so one that
    /// requires attributes reports them as missing. Use
    /// [`read_data_source_with_config`](Self::read_data_source_with_config)
    /// to supply them.
    pub async fn read_data_source(&self, data_source_type: &str) -> ReadResponse {
        self.read_data_source_with_config(data_source_type, &Value::Object(BTreeMap::new()))
            .await
    }

    /// Read a data source with its configuration. The config must be wholly known.
    #[instrument(skip(self, config), name = "provider.read_data_source")]
    pub async fn read_data_source_with_config(
        &self,
        data_source_type: &str,
        config: &Value,
    ) -> ReadResponse {
        debug!("ReadDataSource called");
        let failed = |diagnostics: Diagnostics| ReadResponse {
            state: Value::Null,
            diagnostics,
        };
        let client = match self.configured() {
            Ok(client) => client,
            Err(diagnostics) => return failed(diagnostics),
        };
        let schema = match self.registry.data_source(data_source_type) {
            Ok(schema) => schema,
            Err(diagnostic) => return failed(diagnostic.into()),
        };

        if !config.is_wholly_known() {
            return failed(unknown_input(config.unknown_paths()));
        }
        let diagnostics = validate(schema, config);
        if diagnostics.has_errors() {
            return failed(diagnostics);
        }

        let token = self.stop.token();
        let ctx = OperationContext::new(client.as_ref(), &token);
        match self
            .until_stopped(self.provider.read_data_source(ctx, data_source_type, config))
            .await
        {
            Some(Ok(state)) if state.is_null() || !state.is_wholly_known() => {
                let diagnostics = if state.is_null() {
                    Diagnostic::error("Provider returned null for a data source")
                        .with_kind(DiagnosticKind::ProtocolViolation)
                        .into()
                } else {
                    unknown_result("ReadDataSource", &state)
                };
                warn!(%diagnostics, "ReadDataSource returned an invalid result");
                failed(diagnostics)
            },
            Some(Ok(state)) => {
                info!("ReadDataSource completed");
                ReadResponse { state, diagnostics }
            },
            Some(Err(e)) => {
                error!(error = %e, "ReadDataSource failed");
                failed(e.into())
            },
            None => failed(Diagnostic::cancelled().into()),
        }
    }

    // =========================================================================
    // Guards
    // =========================================================================

    fn check_usable(&self) -> Result<(), Diagnostics> {
        if !self.registry.is_valid() {
            return Err(self.registry.diagnostics().clone());
        }
        if self.stop.is_stopped() {
            return Err(Diagnostic::cancelled().into());
        }
        Ok(())
    }

    fn usable_resource(&self, resource_type: &str) -> Result<&Schema, Diagnostics> {
        self.check_usable()?;
        self.registry
            .resource(resource_type)
            .map_err(Diagnostics::from)
    }

    fn usable_data_source(&self, data_source_type: &str) -> Result<&Schema, Diagnostics> {
        self.check_usable()?;
        self.registry
            .data_source(data_source_type)
            .map_err(Diagnostics::from)
    }

    fn configured(&self) -> Result<&Arc<P::Client>, Diagnostics> {
        self.check_usable()?;
        self.client.get().ok_or_else(|| {
            Diagnostic::error("Provider not configured")
                .with_detail("configure must succeed before any lifecycle call")
                .with_kind(DiagnosticKind::ProtocolViolation)
                .into()
        })
    }

    fn lifecycle_resource(
        &self,
        resource_type: &str,
    ) -> Result<(&Arc<P::Client>, &Schema), Diagnostics> {
        let client = self.configured()?;
        let schema = self.registry.resource(resource_type)?;
        Ok((client, schema))
    }

    /// Run `fut` unless a stop is requested first.
    async fn until_stopped<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        let token: StopToken = self.stop.token();
        tokio::select! {
            out = fut => Some(out),
            _ = token.stopped() => {
                warn!("Operation interrupted by stop");
                None
            }
        }
    }
}

fn upgrade_failed(diagnostics: Diagnostics) -> UpgradeResponse {
    UpgradeResponse {
        upgraded_state: Value::Null,
        diagnostics,
    }
}

fn unknown_input(paths: Vec<String>) -> Diagnostics {
    paths
        .into_iter()
        .map(|path| {
            Diagnostic::error("Value is not yet known")
                .with_detail("This operation needs wholly known values, which only apply resolves")
                .with_attribute_if_not_empty(&path)
                .with_kind(DiagnosticKind::UnknownInput)
        })
        .collect()
}

fn unknown_result(call: &str, value: &Value) -> Diagnostics {
    value
        .unknown_paths()
        .into_iter()
        .map(|path| {
            Diagnostic::error(format!("Provider returned an unknown value from {}", call))
                .with_detail("Results of this call must be wholly known")
                .with_attribute_if_not_empty(&path)
                .with_kind(DiagnosticKind::ProtocolViolation)
        })
        .collect()
}

fn log_completion(call: &str, diagnostics: &Diagnostics) {
    if diagnostics.has_errors() {
        warn!(
            diagnostics = diagnostics.len(),
            "{} completed with errors", call
        );
    } else {
        info!("{} completed successfully", call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_provider::{WidgetProvider, CLOCK, GADGET, LOOKUP, WIDGET};
    use tokio::sync::Barrier;
    use serde_json::json;

    fn widget(name: &str) -> Value {
        Value::object([
            ("name", Value::from(name)),
            ("size", Value::Null),
            ("region", Value::Null),
            ("id", Value::Null),
            ("tags", Value::Null),
        ])
    }

    async fn configured(provider: WidgetProvider) -> ProviderSession<WidgetProvider> {
        let session = ProviderSession::new(provider);
        let diagnostics = session
            .configure(&Value::from(json!({"endpoint": "http://api"})))
            .await;
        assert!(!diagnostics.has_errors(), "{}", diagnostics);
        session
    }

    async fn create(session: &ProviderSession<WidgetProvider>, config: &Value) -> ApplyResponse {
        let plan = session
            .plan_resource_change(WIDGET, &Value::Null, config, &PrivateData::empty())
            .await;
        assert!(!plan.diagnostics.has_errors(), "{}", plan.diagnostics);
        session
            .apply_resource_change(WIDGET, &Value::Null, &plan.planned_state, &plan.planned_private)
            .await
    }

    fn last_private(session: &ProviderSession<WidgetProvider>) -> Option<PrivateData> {
        session.client.get().unwrap().last_private.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_get_schema_answers_after_stop() {
        let session = ProviderSession::new(WidgetProvider::new());
        session.stop().await.unwrap();

        let response = session.get_schema();
        assert!(response.diagnostics.is_empty());
        assert!(response.schema.resources.contains_key(WIDGET));
        assert!(response.schema.data_sources.contains_key(LOOKUP));
    }

    #[tokio::test]
    async fn test_inconsistent_schema_fails_calls() {
        let provider = WidgetProvider {
            duplicate_kind: true,
            ..Default::default()
        };
        let session = ProviderSession::new(provider);

        assert!(!session.registry().is_valid());
        assert!(session.get_schema().diagnostics.has_errors());

        let diagnostics = session.validate_provider_config(&Value::from(json!({}))).await;
        assert!(diagnostics.has_kind(DiagnosticKind::ProtocolViolation));
        let diagnostics = session.configure(&Value::from(json!({}))).await;
        assert!(diagnostics.has_errors());
        assert!(session.provider().calls().is_empty());
    }

    #[tokio::test]
    async fn test_validation_runs_schema_checks_then_provider_checks() {
        let session = ProviderSession::new(WidgetProvider::new());
        let config = widget("forbidden").with_attribute("bogus", Value::from(1i64));

        let diagnostics = session.validate_resource_config(WIDGET, &config).await;
        let summaries: Vec<&str> = diagnostics.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(
            summaries,
            vec!["Unsupported attribute 'bogus'", "Name is reserved"]
        );
        assert!(diagnostics.iter().all(|d| d.kind == DiagnosticKind::Validation));
    }

    #[tokio::test]
    async fn test_validation_warnings_are_not_errors() {
        let session = ProviderSession::new(WidgetProvider::new());

        let config = widget("big").with_attribute("size", Value::from(500i64));
        let diagnostics = session.validate_resource_config(WIDGET, &config).await;
        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.warnings().count(), 1);

        let config = Value::from(json!({"endpoint": "http://insecure"}));
        let diagnostics = session.validate_provider_config(&config).await;
        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.warnings().count(), 1);
    }

    #[tokio::test]
    async fn test_validation_accepts_unknowns() {
        let session = ProviderSession::new(WidgetProvider::new());
        let config = widget("a").with_attribute("size", Value::Unknown);
        assert!(session.validate_resource_config(WIDGET, &config).await.is_empty());

        let config = Value::from(json!({"name": "a"})).with_attribute("length", Value::Unknown);
        assert!(!session
            .validate_data_source_config(LOOKUP, &config)
            .await
            .has_errors());
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let session = configured(WidgetProvider::new()).await;

        let diagnostics = session.validate_resource_config("nope", &Value::Null).await;
        assert!(diagnostics.has_kind(DiagnosticKind::ProtocolViolation));

        let plan = session
            .plan_resource_change("nope", &Value::Null, &widget("a"), &PrivateData::empty())
            .await;
        assert!(plan.diagnostics.has_kind(DiagnosticKind::ProtocolViolation));
    }

    #[tokio::test]
    async fn test_lifecycle_calls_require_configure() {
        let session = ProviderSession::new(WidgetProvider::new());

        let plan = session
            .plan_resource_change(WIDGET, &Value::Null, &widget("a"), &PrivateData::empty())
            .await;
        assert!(plan.diagnostics.has_kind(DiagnosticKind::ProtocolViolation));

        let read = session
            .read_resource(WIDGET, &Value::from(json!({"id": "w-1"})))
            .await;
        assert!(read.diagnostics.has_kind(DiagnosticKind::ProtocolViolation));

        let data = session
            .read_data_source_with_config(LOOKUP, &Value::from(json!({"name": "a"})))
            .await;
        assert!(data.diagnostics.has_kind(DiagnosticKind::ProtocolViolation));
        assert!(session.provider().calls().is_empty());
    }

    #[tokio::test]
    async fn test_configure_tolerates_unknown() {
        let session = ProviderSession::new(WidgetProvider::new());
        let config = Value::object([("endpoint", Value::Unknown)]);

        let diagnostics = session.configure(&config).await;
        assert!(diagnostics.is_empty(), "{}", diagnostics);
        assert!(session.is_configured());
        assert!(session.provider().calls().contains(&"configure"));
    }

    #[tokio::test]
    async fn test_configure_only_once() {
        let session = configured(WidgetProvider::new()).await;
        assert!(session.is_configured());

        let diagnostics = session.configure(&Value::from(json!({}))).await;
        assert!(diagnostics.has_kind(DiagnosticKind::ProtocolViolation));
        assert_eq!(session.provider().calls(), vec!["configure"]);
    }

    #[tokio::test]
    async fn test_failed_configure_is_final() {
        let session = ProviderSession::new(WidgetProvider::new());

        let diagnostics = session
            .configure(&Value::from(json!({"token": "bad"})))
            .await;
        assert!(diagnostics.has_errors());
        assert!(!session.is_configured());

        let diagnostics = session.configure(&Value::from(json!({}))).await;
        assert!(diagnostics.has_kind(DiagnosticKind::ProtocolViolation));
        assert!(!session.is_configured());
    }

    #[tokio::test]
    async fn test_upgrade_at_current_version_is_identity() {
        let session = ProviderSession::new(WidgetProvider::new());
        let state = widget("a").with_attribute("id", Value::from("w-1"));

        let response = session.upgrade_resource_state(WIDGET, 2, &state).await;
        assert!(response.diagnostics.is_empty());
        assert_eq!(response.upgraded_state, state);
        assert!(session.provider().calls().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_coerces_changed_types() {
        let session = ProviderSession::new(WidgetProvider::new());
        let stored = Value::from(json!({"name": "a", "size": "10"}));

        let response = session.upgrade_resource_state(WIDGET, 1, &stored).await;
        assert!(response.diagnostics.is_empty(), "{}", response.diagnostics);
        assert_eq!(response.upgraded_state.attribute("size").as_i64(), Some(10));
        assert!(response.upgraded_state.get("id").is_some_and(Value::is_null));
        assert_eq!(session.provider().calls(), vec!["upgrade_resource_state"]);
    }

    #[tokio::test]
    async fn test_upgrade_runs_provider_steps() {
        let session = ProviderSession::new(WidgetProvider::new());
        let stored = Value::from(json!({"name": "a", "capacity": 5, "id": "w-1"}));

        let response = session.upgrade_resource_state(WIDGET, 0, &stored).await;
        assert!(response.diagnostics.is_empty(), "{}", response.diagnostics);
        assert_eq!(response.upgraded_state.attribute("size").as_i64(), Some(5));
        assert!(response.upgraded_state.get("capacity").is_none());
    }

    #[tokio::test]
    async fn test_upgrade_from_newer_version_fails() {
        let session = ProviderSession::new(WidgetProvider::new());
        let stored = widget("a");

        let response = session.upgrade_resource_state(WIDGET, 3, &stored).await;
        assert!(response.diagnostics.has_kind(DiagnosticKind::SchemaVersion));
        assert!(response.upgraded_state.is_null());
    }

    #[tokio::test]
    async fn test_upgrade_rejects_unconvertible_state() {
        let session = ProviderSession::new(WidgetProvider::new());
        let stored = Value::from(json!({"name": "a", "size": "ten"}));

        let response = session.upgrade_resource_state(WIDGET, 1, &stored).await;
        assert!(response.diagnostics.has_kind(DiagnosticKind::SchemaVersion));
        assert!(response.upgraded_state.is_null());
    }

    #[tokio::test]
    async fn test_plan_keeps_unknown_computed_from_prior() {
        let session = configured(WidgetProvider::new()).await;
        let prior = Value::object([("name", Value::from("a")), ("id", Value::Unknown)]);
        let proposed = Value::object([("name", Value::from("b"))]);

        let plan = session
            .plan_resource_change(WIDGET, &prior, &proposed, &PrivateData::empty())
            .await;
        assert!(plan.diagnostics.is_empty(), "{}", plan.diagnostics);
        assert_eq!(plan.planned_state.attribute("name").as_str(), Some("b"));
        assert!(plan.planned_state.attribute("id").is_unknown());
        assert!(plan.requires_replace.is_empty());
    }

    #[tokio::test]
    async fn test_plan_for_create() {
        let session = configured(WidgetProvider::new()).await;

        let plan = session
            .plan_resource_change(WIDGET, &Value::Null, &widget("a"), &PrivateData::empty())
            .await;
        assert!(plan.diagnostics.is_empty());
        assert_eq!(plan.planned_state.attribute("name").as_str(), Some("a"));
        assert!(plan.planned_state.attribute("id").is_unknown());
        assert_eq!(plan.planned_private.as_bytes(), b"plan:a");

        let changed: Vec<&str> = plan.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(changed, vec!["id", "name"]);
    }

    #[tokio::test]
    async fn test_plan_rejects_rewritten_configuration() {
        let session = configured(WidgetProvider::new()).await;

        let plan = session
            .plan_resource_change(
                WIDGET,
                &Value::Null,
                &widget("rogue-plan"),
                &PrivateData::empty(),
            )
            .await;
        assert!(plan.diagnostics.has_kind(DiagnosticKind::ProtocolViolation));
        assert!(plan
            .diagnostics
            .errors()
            .any(|d| d.attribute.as_deref() == Some("name")));
    }

    #[tokio::test]
    async fn test_plan_reports_force_new_changes() {
        let session = configured(WidgetProvider::new()).await;
        let config = widget("a").with_attribute("region", Value::from("us"));
        let created = create(&session, &config).await;
        assert!(!created.diagnostics.has_errors());

        let moved = config.with_attribute("region", Value::from("eu"));
        let plan = session
            .plan_resource_change(WIDGET, &created.new_state, &moved, &created.private)
            .await;
        assert!(plan.diagnostics.is_empty(), "{}", plan.diagnostics);
        assert_eq!(plan.requires_replace, vec!["region".to_string()]);
        assert!(plan.requires_replacement());
        assert_eq!(plan.planned_state.attribute("id"), created.new_state.attribute("id"));
    }

    #[tokio::test]
    async fn test_destroy_plan_without_capability_skips_provider() {
        let session = configured(WidgetProvider::new()).await;
        let prior = widget("a").with_attribute("id", Value::from("w-1"));

        let plan = session
            .plan_resource_change(WIDGET, &prior, &Value::Null, &PrivateData::from("keep"))
            .await;
        assert!(plan.is_destroy());
        assert!(plan.diagnostics.is_empty());
        assert_eq!(plan.planned_private.as_bytes(), b"keep");
        assert!(!session.provider().calls().contains(&"plan"));
    }

    #[tokio::test]
    async fn test_destroy_plan_with_capability_must_be_null() {
        let provider = WidgetProvider {
            plan_destroy: true,
            ..Default::default()
        };
        let session = configured(provider).await;
        let prior = widget("a").with_attribute("id", Value::from("w-1"));

        let plan = session
            .plan_resource_change(WIDGET, &prior, &Value::Null, &PrivateData::empty())
            .await;
        assert!(session.provider().calls().contains(&"plan"));
        assert!(plan.planned_state.is_null());
        assert!(plan.diagnostics.has_kind(DiagnosticKind::ProtocolViolation));
    }

    #[tokio::test]
    async fn test_crud_cycle_round_trips_private_data() {
        let session = configured(WidgetProvider::new()).await;

        let created = create(&session, &widget("alpha")).await;
        assert!(created.diagnostics.is_empty(), "{}", created.diagnostics);
        assert_eq!(created.new_state.attribute("id").as_str(), Some("w-1"));
        assert_eq!(created.private.as_bytes(), b"applied");
        assert_eq!(last_private(&session).unwrap().as_bytes(), b"plan:alpha");

        let read = session.read_resource(WIDGET, &created.new_state).await;
        assert!(read.diagnostics.is_empty());
        assert_eq!(read.state, created.new_state);

        let plan = session
            .plan_resource_change(WIDGET, &read.state, &widget("beta"), &created.private)
            .await;
        assert!(plan.diagnostics.is_empty(), "{}", plan.diagnostics);
        assert_eq!(plan.planned_state.attribute("id").as_str(), Some("w-1"));
        let updated = session
            .apply_resource_change(WIDGET, &read.state, &plan.planned_state, &plan.planned_private)
            .await;
        assert!(updated.diagnostics.is_empty(), "{}", updated.diagnostics);
        assert_eq!(updated.new_state.attribute("name").as_str(), Some("beta"));
        assert_eq!(last_private(&session).unwrap().as_bytes(), b"plan:beta");

        let plan = session
            .plan_resource_change(WIDGET, &updated.new_state, &Value::Null, &updated.private)
            .await;
        let deleted = session
            .apply_resource_change(
                WIDGET,
                &updated.new_state,
                &plan.planned_state,
                &plan.planned_private,
            )
            .await;
        assert!(deleted.diagnostics.is_empty());
        assert!(deleted.new_state.is_null());

        let read = session.read_resource(WIDGET, &updated.new_state).await;
        assert!(read.is_gone());
        assert!(read.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_apply_refuses_unknown_configuration() {
        let session = configured(WidgetProvider::new()).await;
        let planned = widget("a")
            .with_attribute("name", Value::Unknown)
            .with_attribute("id", Value::Unknown);

        let response = session
            .apply_resource_change(WIDGET, &Value::Null, &planned, &PrivateData::empty())
            .await;
        assert!(response.diagnostics.has_kind(DiagnosticKind::UnknownInput));
        assert_eq!(
            response.diagnostics.as_slice()[0].attribute.as_deref(),
            Some("name")
        );
        assert!(response.new_state.is_null());
        assert!(!session.provider().calls().contains(&"create"));
    }

    #[tokio::test]
    async fn test_apply_accepts_unknown_computed_attributes() {
        let session = configured(WidgetProvider::new()).await;
        let planned = widget("a").with_attribute("id", Value::Unknown);

        let response = session
            .apply_resource_change(WIDGET, &Value::Null, &planned, &PrivateData::empty())
            .await;
        assert!(response.diagnostics.is_empty(), "{}", response.diagnostics);
        assert!(session.provider().calls().contains(&"create"));
        assert!(response.new_state.is_wholly_known());
        assert_eq!(response.new_state.attribute("id").as_str(), Some("w-1"));
    }

    #[tokio::test]
    async fn test_apply_null_to_null_is_a_no_op() {
        let session = configured(WidgetProvider::new()).await;
        let response = session
            .apply_resource_change(WIDGET, &Value::Null, &Value::Null, &PrivateData::empty())
            .await;
        assert!(response.diagnostics.is_empty());
        assert!(response.new_state.is_null());
        assert_eq!(session.provider().calls(), vec!["configure"]);
    }

    #[tokio::test]
    async fn test_apply_rejects_unknown_results() {
        let session = configured(WidgetProvider::new()).await;

        let response = create(&session, &widget("unknown-after-apply")).await;
        assert!(response.diagnostics.has_kind(DiagnosticKind::ProtocolViolation));
        assert!(response
            .diagnostics
            .errors()
            .any(|d| d.attribute.as_deref() == Some("id")));
    }

    #[tokio::test]
    async fn test_partial_apply_keeps_progress() {
        let session = configured(WidgetProvider::new()).await;

        let response = create(&session, &widget("partial")).await;
        assert!(response.diagnostics.has_errors());
        assert!(response.diagnostics.has_kind(DiagnosticKind::PartialApply));
        assert_eq!(response.new_state.attribute("id").as_str(), Some("w-1"));
        assert_eq!(
            response
                .diagnostics
                .iter()
                .filter(|d| d.kind == DiagnosticKind::PartialApply)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_create_returns_null() {
        let session = configured(WidgetProvider::new()).await;

        let response = create(&session, &widget("fail")).await;
        assert!(response.diagnostics.has_errors());
        assert!(response.new_state.is_null());
    }

    #[tokio::test]
    async fn test_failed_update_returns_prior() {
        let session = configured(WidgetProvider::new()).await;
        let created = create(&session, &widget("alpha")).await;

        let plan = session
            .plan_resource_change(WIDGET, &created.new_state, &widget("fail"), &created.private)
            .await;
        let response = session
            .apply_resource_change(
                WIDGET,
                &created.new_state,
                &plan.planned_state,
                &plan.planned_private,
            )
            .await;
        assert!(response.diagnostics.has_errors());
        assert_eq!(response.new_state, created.new_state);
    }

    #[tokio::test]
    async fn test_update_reporting_no_state_keeps_prior() {
        let session = configured(WidgetProvider::new()).await;
        let created = create(&session, &widget("alpha")).await;

        let plan = session
            .plan_resource_change(
                WIDGET,
                &created.new_state,
                &widget("null-on-fail"),
                &created.private,
            )
            .await;
        assert!(!plan.diagnostics.has_errors(), "{}", plan.diagnostics);
        let response = session
            .apply_resource_change(
                WIDGET,
                &created.new_state,
                &plan.planned_state,
                &plan.planned_private,
            )
            .await;
        assert!(session.provider().calls().contains(&"update"));
        assert!(response.diagnostics.has_errors());
        assert!(!response.diagnostics.has_kind(DiagnosticKind::PartialApply));
        assert_eq!(response.new_state, created.new_state);
    }

    #[tokio::test]
    async fn test_delete_of_missing_object_succeeds() {
        let session = configured(WidgetProvider::new()).await;
        let prior = widget("a").with_attribute("id", Value::from("w-404"));

        let response = session
            .apply_resource_change(WIDGET, &prior, &Value::Null, &PrivateData::empty())
            .await;
        assert!(response.diagnostics.is_empty());
        assert!(response.new_state.is_null());
    }

    #[tokio::test]
    async fn test_read_vanished_resource() {
        let session = configured(WidgetProvider::new()).await;

        let prior = widget("a").with_attribute("id", Value::from("w-404"));
        let read = session.read_resource(WIDGET, &prior).await;
        assert!(read.is_gone());
        assert!(read.diagnostics.is_empty());

        let read = session.read_resource(WIDGET, &Value::Null).await;
        assert!(read.is_gone());
        assert_eq!(session.provider().calls(), vec!["configure", "read"]);
    }

    #[tokio::test]
    async fn test_failed_read_returns_prior() {
        let session = configured(WidgetProvider::new()).await;

        let prior = widget("a");
        let read = session.read_resource(WIDGET, &prior).await;
        assert!(read.diagnostics.has_errors());
        assert_eq!(read.state, prior);
    }

    #[tokio::test]
    async fn test_import_existing_resource() {
        let session = configured(WidgetProvider::new()).await;
        let created = create(&session, &widget("alpha")).await;

        let response = session.import_resource_state(WIDGET, "w-1").await;
        assert!(response.diagnostics.is_empty());
        assert_eq!(response.imported.len(), 1);
        assert_eq!(response.imported[0].state, created.new_state);
        assert_eq!(response.imported[0].private.as_bytes(), b"imported");
    }

    #[tokio::test]
    async fn test_import_nothing_found() {
        let session = configured(WidgetProvider::new()).await;

        for id in ["w-404", "vanished"] {
            let response = session.import_resource_state(WIDGET, id).await;
            assert!(response.diagnostics.is_empty(), "{}", id);
            assert!(response.imported.is_empty(), "{}", id);
        }
    }

    #[tokio::test]
    async fn test_import_multiple_types() {
        let session = configured(WidgetProvider::new()).await;

        let response = session.import_resource_state(WIDGET, "bundle").await;
        assert!(response.diagnostics.is_empty(), "{}", response.diagnostics);
        let kinds: Vec<&str> = response
            .imported
            .iter()
            .map(|r| r.resource_type.as_str())
            .collect();
        assert_eq!(kinds, vec![WIDGET, GADGET]);
    }

    #[tokio::test]
    async fn test_import_rejects_unknown_state() {
        let session = configured(WidgetProvider::new()).await;

        let response = session.import_resource_state(WIDGET, "half-known").await;
        assert!(response.imported.is_empty());
        assert!(response.diagnostics.has_kind(DiagnosticKind::ProtocolViolation));
    }

    #[tokio::test]
    async fn test_read_data_source() {
        let session = configured(WidgetProvider::new()).await;

        let response = session
            .read_data_source_with_config(
                LOOKUP,
                &Value::from(json!({"name": "abc", "length": null})),
            )
            .await;
        assert!(response.diagnostics.is_empty(), "{}", response.diagnostics);
        assert_eq!(response.state.attribute("length").as_i64(), Some(3));

        let response = session
            .read_data_source_with_config("nope", &Value::from(json!({"name": "abc"})))
            .await;
        assert!(response.diagnostics.has_kind(DiagnosticKind::ProtocolViolation));
    }

    #[tokio::test]
    async fn test_read_data_source_by_name() {
        let session = configured(WidgetProvider::new()).await;

        let response = session.read_data_source(CLOCK).await;
        assert!(response.diagnostics.is_empty(), "{}", response.diagnostics);
        assert_eq!(
            response.state.attribute("now").as_str(),
            Some("2026-01-01T00:00:00Z")
        );

        let response = session.read_data_source(LOOKUP).await;
        assert!(response.diagnostics.has_kind(DiagnosticKind::Validation));
        assert!(response.state.is_null());
        let reads = session
            .provider()
            .calls()
            .into_iter()
            .filter(|call| *call == "read_data_source")
            .count();
        assert_eq!(reads, 1);
    }

    #[tokio::test]
    async fn test_read_data_source_requires_known_config() {
        let session = configured(WidgetProvider::new()).await;
        let config = Value::object([("name", Value::Unknown)]);

        let response = session.read_data_source_with_config(LOOKUP, &config).await;
        assert!(response.diagnostics.has_kind(DiagnosticKind::UnknownInput));
        assert!(response.state.is_null());
        assert!(!session.provider().calls().contains(&"read_data_source"));
    }

    #[tokio::test]
    async fn test_calls_after_stop_are_cancelled() {
        let session = configured(WidgetProvider::new()).await;
        session.stop().await.unwrap();
        assert!(session.is_stopped());
        assert!(session.provider().stop_called.load(Ordering::SeqCst));

        let diagnostics = session.validate_provider_config(&Value::from(json!({}))).await;
        assert!(diagnostics.has_kind(DiagnosticKind::Cancelled));

        let plan = session
            .plan_resource_change(WIDGET, &Value::Null, &widget("a"), &PrivateData::empty())
            .await;
        assert!(plan.diagnostics.has_kind(DiagnosticKind::Cancelled));
        assert!(!session.provider().calls().contains(&"plan"));
    }

    #[tokio::test]
    async fn test_stop_cancels_blocked_reads_and_plans() {
        let session = Arc::new(configured(WidgetProvider::new()).await);
        let prior = widget("a").with_attribute("id", Value::from("blocking"));

        let read = {
            let session = Arc::clone(&session);
            let prior = prior.clone();
            tokio::spawn(async move { session.read_resource(WIDGET, &prior).await })
        };
        let plan = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .plan_resource_change(
                        WIDGET,
                        &Value::Null,
                        &widget("blocking"),
                        &PrivateData::empty(),
                    )
                    .await
            })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let calls = session.provider().calls();
                if calls.contains(&"read") && calls.contains(&"plan") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        session.stop().await.unwrap();

        let read = tokio::time::timeout(Duration::from_secs(1), read)
            .await
            .unwrap()
            .unwrap();
        assert!(read.diagnostics.has_kind(DiagnosticKind::Cancelled));
        assert_eq!(read.state, prior);

        let plan = tokio::time::timeout(Duration::from_secs(1), plan)
            .await
            .unwrap()
            .unwrap();
        assert!(plan.diagnostics.has_kind(DiagnosticKind::Cancelled));
        assert!(plan.planned_state.is_null());
    }

    #[tokio::test]
    async fn test_concurrent_calls_on_distinct_instances() {
        let provider = WidgetProvider {
            rendezvous: Some(Barrier::new(2)),
            ..Default::default()
        };
        let session = configured(provider).await;
        let alpha = create(&session, &widget("alpha")).await;
        let beta = create(&session, &widget("beta")).await;

        // Each validation waits at the barrier for the other one
        let rendezvous_first = widget("rendezvous");
        let rendezvous_second = widget("rendezvous");
        let alpha_2 = widget("alpha-2");
        let beta_2 = widget("beta-2");
        let (first, second, read_alpha, read_beta, plan_alpha, plan_beta) =
            tokio::time::timeout(Duration::from_secs(5), async {
                tokio::join!(
                    session.validate_resource_config(WIDGET, &rendezvous_first),
                    session.validate_resource_config(WIDGET, &rendezvous_second),
                    session.read_resource(WIDGET, &alpha.new_state),
                    session.read_resource(WIDGET, &beta.new_state),
                    session.plan_resource_change(
                        WIDGET,
                        &alpha.new_state,
                        &alpha_2,
                        &alpha.private
                    ),
                    session.plan_resource_change(
                        WIDGET,
                        &beta.new_state,
                        &beta_2,
                        &beta.private
                    ),
                )
            })
            .await
            .unwrap();

        assert!(!first.has_errors(), "{}", first);
        assert!(!second.has_errors(), "{}", second);
        assert_eq!(read_alpha.state, alpha.new_state);
        assert_eq!(read_beta.state, beta.new_state);
        assert_ne!(read_alpha.state, read_beta.state);
        assert!(!plan_alpha.diagnostics.has_errors(), "{}", plan_alpha.diagnostics);
        assert!(!plan_beta.diagnostics.has_errors(), "{}", plan_beta.diagnostics);
        assert_eq!(
            plan_alpha.planned_state.attribute("id"),
            alpha.new_state.attribute("id")
        );
        assert_eq!(
            plan_beta.planned_state.attribute("id"),
            beta.new_state.attribute("id")
        );
    }

    #[tokio::test]
    async fn test_stop_hook_timeout() {
        let provider = WidgetProvider {
            hang_on_stop: true,
            ..Default::default()
        };
        let options = SessionOptions::new().with_stop_timeout(Duration::from_millis(20));
        let session = ProviderSession::with_options(provider, options);

        let result = session.stop().await;
        assert!(matches!(result, Err(ProviderError::DeadlineExceeded(_))));
        assert!(session.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_winds_down_in_flight_applies() {
        let session = Arc::new(configured(WidgetProvider::new()).await);
        let plan = session
            .plan_resource_change(WIDGET, &Value::Null, &widget("slow"), &PrivateData::empty())
            .await;

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let session = Arc::clone(&session);
                let planned = plan.planned_state.clone();
                let private = plan.planned_private.clone();
                tokio::spawn(async move {
                    session
                        .apply_resource_change(WIDGET, &Value::Null, &planned, &private)
                        .await
                })
            })
            .collect();

        tokio::time::timeout(Duration::from_secs(5), async {
            while session.provider().slow_started.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        session.stop().await.unwrap();
        for handle in handles {
            let response = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
            assert!(response.new_state.is_null());
            assert!(response.diagnostics.has_kind(DiagnosticKind::Cancelled));
        }
    }
}
