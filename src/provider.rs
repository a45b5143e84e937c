//! The trait provider implementations fill in.
//!
//! A [`ProviderService`] only supplies behavior. Ordering, value checks and
//! the private-data round trip are enforced by the
//! [`ProviderSession`](crate::ProviderSession) that drives it, so hooks can
//! assume they are called with a known resource type and, for lifecycle
//! hooks, a configured client.

use crate::cancel::StopToken;
use crate::diagnostics::Diagnostics;
use crate::error::ProviderError;
use crate::plan::proposed_new_state;
use crate::schema::{ProviderSchema, Schema};
use crate::types::{
    ApplyResponse, ImportedResource, PlanResponse, PrivateData, ProviderCapabilities,
};
use crate::value::Value;

/// What a lifecycle hook gets besides its request.
pub struct OperationContext<'a, C> {
    /// The client returned by [`ProviderService::configure`].
    pub client: &'a C,
    /// Fires when the session is asked to stop.
    pub stop: &'a StopToken,
}

impl<'a, C> OperationContext<'a, C> {
    /// Create a context.
    pub fn new(client: &'a C, stop: &'a StopToken) -> Self {
        Self { client, stop }
    }

    /// Fail with [`ProviderError::Cancelled`] if a stop has been requested.
    pub fn check_stopped(&self) -> Result<(), ProviderError> {
        if self.stop.is_stopped() {
            Err(ProviderError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl<C> Clone for OperationContext<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for OperationContext<'_, C> {}

/// Inputs to [`ProviderService::plan`].
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    /// The resource type being planned.
    pub resource_type: &'a str,
    /// The current schema of the resource type.
    pub schema: &'a Schema,
    /// The state before the change. Null when creating.
    pub prior_state: &'a Value,
    /// The configuration the caller wants. Null when destroying.
    pub proposed_state: &'a Value,
    /// Private data stored with the prior state.
    pub prior_private: &'a PrivateData,
}

impl PlanRequest<'_> {
    /// Whether this plans a new resource.
    pub fn is_create(&self) -> bool {
        self.prior_state.is_null()
    }

    /// Whether this plans a destroy.
    pub fn is_destroy(&self) -> bool {
        self.proposed_state.is_null()
    }
}

/// Inputs to [`ProviderService::create`], [`ProviderService::update`] and
/// [`ProviderService::delete`].
#[derive(Debug, Clone, Copy)]
pub struct ApplyRequest<'a> {
    /// The resource type being applied.
    pub resource_type: &'a str,
    /// The state before the change. Null when creating.
    pub prior_state: &'a Value,
    /// The wholly known planned state. Null when deleting.
    pub planned_state: &'a Value,
    /// Private data returned by the plan.
    pub planned_private: &'a PrivateData,
}

/// Trait that provider implementations must implement.
///
/// # Example
///
/// ```
/// use hemmer_provider_protocol::{
///     ApplyRequest, ApplyResponse, OperationContext, ProviderError, ProviderSchema,
///     ProviderService, StopToken, Value,
/// };
/// use hemmer_provider_protocol::schema::{Attribute, Schema};
///
/// struct MyProvider;
///
/// #[async_trait::async_trait]
/// impl ProviderService for MyProvider {
///     type Client = ();
///
///     fn schema(&self) -> ProviderSchema {
///         ProviderSchema::new().with_resource(
///             "example_resource",
///             Schema::v0()
///                 .with_attribute("name", Attribute::required_string())
///                 .with_attribute("id", Attribute::computed_string()),
///         )
///     }
///
///     async fn configure(&self, _config: &Value, _stop: &StopToken) -> Result<(), ProviderError> {
///         Ok(())
///     }
///
///     async fn create(
///         &self,
///         _ctx: OperationContext<'_, ()>,
///         request: ApplyRequest<'_>,
///     ) -> Result<ApplyResponse, ProviderError> {
///         let state = request.planned_state.with_attribute("id", Value::from("example-1"));
///         Ok(ApplyResponse::new(state))
///     }
///
///     async fn read(
///         &self,
///         _ctx: OperationContext<'_, ()>,
///         _resource_type: &str,
///         state: &Value,
///     ) -> Result<Value, ProviderError> {
///         Ok(state.clone())
///     }
///
///     async fn update(
///         &self,
///         _ctx: OperationContext<'_, ()>,
///         request: ApplyRequest<'_>,
///     ) -> Result<ApplyResponse, ProviderError> {
///         Ok(ApplyResponse::new(request.planned_state.clone()))
///     }
///
///     async fn delete(
///         &self,
///         _ctx: OperationContext<'_, ()>,
///         _request: ApplyRequest<'_>,
///     ) -> Result<(), ProviderError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// The per-session client produced by [`ProviderService::configure`].
    type Client: Send + Sync + 'static;

    // =========================================================================
    // Schema
    // =========================================================================

    /// Return the provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Optional protocol features this provider supports.
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    ///
    /// Called after schema validation passed or failed; the config may still
    /// contain unknown values.
    async fn validate_provider_config(&self, config: &Value) -> Result<Diagnostics, ProviderError> {
        let _ = config;
        Ok(Diagnostics::new())
    }

    /// Configure the provider with credentials and settings, returning the
    /// client every lifecycle hook will receive.
    async fn configure(
        &self,
        config: &Value,
        stop: &StopToken,
    ) -> Result<Self::Client, ProviderError>;

    /// Release whatever in-flight work can be released promptly.
    ///
    /// The stop token has already fired when this runs.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: &Value,
    ) -> Result<Diagnostics, ProviderError> {
        let _ = (resource_type, config);
        Ok(Diagnostics::new())
    }

    /// Rewrite state stored at `version` into the current schema's shape.
    ///
    /// Only called for versions older than the current one. The result is
    /// conformed to the current schema afterwards, so attributes whose type
    /// changed in a coercible way need no handling here.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource.
    ///
    /// The default plans the proposed new state and passes prior private
    /// data through.
    async fn plan(
        &self,
        ctx: OperationContext<'_, Self::Client>,
        request: PlanRequest<'_>,
    ) -> Result<PlanResponse, ProviderError> {
        let _ = ctx;
        let planned = proposed_new_state(
            &request.schema.block,
            request.prior_state,
            request.proposed_state,
        );
        Ok(PlanResponse::new(planned).with_private(request.prior_private.clone()))
    }

    /// Create a new resource.
    ///
    /// Return error diagnostics alongside the best-known state to report a
    /// partially created resource.
    async fn create(
        &self,
        ctx: OperationContext<'_, Self::Client>,
        request: ApplyRequest<'_>,
    ) -> Result<ApplyResponse, ProviderError>;

    /// Read the current state of a resource.
    ///
    /// Return null or [`ProviderError::NotFound`] when the remote object is gone.
    async fn read(
        &self,
        ctx: OperationContext<'_, Self::Client>,
        resource_type: &str,
        state: &Value,
    ) -> Result<Value, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        ctx: OperationContext<'_, Self::Client>,
        request: ApplyRequest<'_>,
    ) -> Result<ApplyResponse, ProviderError>;

    /// Delete a resource.
    async fn delete(
        &self,
        ctx: OperationContext<'_, Self::Client>,
        request: ApplyRequest<'_>,
    ) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    ///
    /// One id may yield several instances, possibly of different types.
    async fn import_resource(
        &self,
        ctx: OperationContext<'_, Self::Client>,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = (ctx, id);
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: &Value,
    ) -> Result<Diagnostics, ProviderError> {
        let _ = (data_source_type, config);
        Ok(Diagnostics::new())
    }

    /// Read data from an external source.
    async fn read_data_source(
        &self,
        ctx: OperationContext<'_, Self::Client>,
        data_source_type: &str,
        config: &Value,
    ) -> Result<Value, ProviderError> {
        let _ = (ctx, config);
        Err(ProviderError::UnknownResource(format!(
            "Unknown data source type: {}",
            data_source_type
        )))
    }
}
