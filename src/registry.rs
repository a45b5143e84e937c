//! The session's cached view of a provider schema.

use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::schema::{ProviderSchema, Schema};

/// A provider schema checked once for internal consistency.
///
/// Lookups of unregistered kinds fail with an error diagnostic that can be
/// returned to the caller as is.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schema: ProviderSchema,
    diagnostics: Diagnostics,
}

impl SchemaRegistry {
    /// Register a provider schema, recording any inconsistencies in it.
    pub fn new(schema: ProviderSchema) -> Self {
        let diagnostics = schema.internal_validate();
        Self {
            schema,
            diagnostics,
        }
    }

    /// The registered schema.
    pub fn schema(&self) -> &ProviderSchema {
        &self.schema
    }

    /// Inconsistencies found at registration.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Whether the schema is internally consistent.
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.has_errors()
    }

    /// The provider configuration schema.
    pub fn provider(&self) -> &Schema {
        &self.schema.provider
    }

    /// Look up a resource kind.
    pub fn resource(&self, kind: &str) -> Result<&Schema, Diagnostic> {
        self.schema
            .resource(kind)
            .ok_or_else(|| unknown_kind("resource", kind))
    }

    /// Look up a data source kind.
    pub fn data_source(&self, kind: &str) -> Result<&Schema, Diagnostic> {
        self.schema
            .data_source(kind)
            .ok_or_else(|| unknown_kind("data source", kind))
    }

    /// The current schema version of a resource kind.
    pub fn resource_version(&self, kind: &str) -> Option<u64> {
        self.schema.resource(kind).map(|schema| schema.version)
    }

    /// Registered resource kinds, sorted.
    pub fn resource_types(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.schema.resources.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Registered data source kinds, sorted.
    pub fn data_source_types(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self
            .schema
            .data_sources
            .keys()
            .map(String::as_str)
            .collect();
        kinds.sort_unstable();
        kinds
    }
}

fn unknown_kind(section: &str, kind: &str) -> Diagnostic {
    Diagnostic::error(format!("Unknown {} type: {}", section, kind))
        .with_detail("The provider does not declare this type in its schema")
        .with_kind(DiagnosticKind::ProtocolViolation)
}
