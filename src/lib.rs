//! Hemmer Provider Protocol
//!
//! This crate implements the lifecycle protocol between an infrastructure
//! engine and its providers. It follows the model established by
//! [terraform-plugin-go](https://github.com/hashicorp/terraform-plugin-go):
//! the engine owns desired configuration and recorded state, the provider
//! owns the mapping onto remote objects, and every exchange between them is
//! checked.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Value**: The typed value model, including the `Unknown` placeholder
//! - **Schema types**: Types for describing provider, resource, and data source schemas
//! - **ProviderService trait**: A high-level trait that providers implement
//! - **ProviderSession**: The protocol surface that drives a provider and
//!   enforces ordering, value and plan rules
//! - **State upgrade**: Migration of state stored by older schema versions
//! - **Diagnostics**: The uniform warning/error channel of every call
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_provider_protocol::{PrivateData, ProviderSession, Value};
//! use serde_json::json;
//!
//! let session = ProviderSession::new(MyProvider::new());
//! let diagnostics = session.configure(&Value::from(json!({"region": "eu"}))).await;
//! assert!(!diagnostics.has_errors());
//!
//! let proposed = Value::from(json!({"name": "example"}));
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
//! assert!(applied.new_state.is_wholly_known());
//! ```
//!
//! # Provider Protocol
//!
//! - **GetSchema**: Returns full schema for provider config, resources, and data sources
//! - **ValidateProviderConfig**: Validates provider configuration
//! - **Configure**: Configures the provider once per session
//! - **Stop**: Signals in-flight operations to wind down
//! - **ValidateResourceConfig**: Validates resource configuration
//! - **UpgradeResourceState**: Migrates state from older schema versions
//! - **ReadResource**: Refreshes state from the remote object
//! - **PlanResourceChange**: Calculates required changes
//! - **ApplyResourceChange**: Creates, updates or deletes the remote object
//! - **ImportResourceState**: Imports existing infrastructure
//! - **ValidateDataSourceConfig**: Validates data source configuration
//! - **ReadDataSource**: Reads data from external sources

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod record;
pub mod registry;
pub mod schema;
pub mod session;
pub mod testing;
pub mod types;
pub mod upgrade;
pub mod validation;
pub mod value;

#[cfg(test)]
mod test_provider;

// Re-export main types at crate root
pub use cancel::{StopSignal, StopToken};
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSeverity, Diagnostics};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{ApplyRequest, OperationContext, PlanRequest, ProviderService};
pub use record::{InstanceStatus, ResourceInstance};
pub use registry::SchemaRegistry;
pub use schema::{Attribute, ProviderSchema, Schema};
pub use session::{ProviderSession, SessionOptions};
pub use types::{
    ApplyResponse, AttributeChange, ImportResponse, ImportedResource, PlanResponse, PrivateData,
    ProviderCapabilities, ReadResponse, SchemaResponse, UpgradeResponse,
};
pub use upgrade::StateUpgrader;
pub use validation::{is_valid, validate, validate_result};
pub use value::Value;

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
