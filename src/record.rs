//! Caller-side record of one managed resource instance.
//!
//! The record is what an engine persists between sessions. Persisting is
//! the caller's concern; this type only absorbs operation results in the
//! order the protocol expects.

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::types::{ApplyResponse, ImportedResource, PrivateData, ReadResponse, UpgradeResponse};
use crate::value::Value;

/// Whether a remote object currently backs an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// No remote object; the state is null.
    Absent,
    /// A remote object exists.
    Present,
}

/// A stored resource instance.
///
/// Serializing fails if the state contains unknown values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstance {
    /// The resource type.
    pub resource_type: String,
    /// The schema version the state conforms to.
    pub schema_version: u64,
    /// The last known state.
    pub state: Value,
    /// Provider-private data stored with the state.
    #[serde(default)]
    pub private: PrivateData,
}

impl ResourceInstance {
    /// An instance with no remote object yet.
    pub fn absent(resource_type: impl Into<String>, schema_version: u64) -> Self {
        Self {
            resource_type: resource_type.into(),
            schema_version,
            state: Value::Null,
            private: PrivateData::empty(),
        }
    }

    /// Record an imported instance.
    pub fn from_import(imported: ImportedResource, schema_version: u64) -> Self {
        Self {
            resource_type: imported.resource_type,
            schema_version,
            state: imported.state,
            private: imported.private,
        }
    }

    /// Whether a remote object backs this instance.
    pub fn status(&self) -> InstanceStatus {
        if self.state.is_null() {
            InstanceStatus::Absent
        } else {
            InstanceStatus::Present
        }
    }

    /// Whether the state must be upgraded before use with `current_version`.
    pub fn needs_upgrade(&self, current_version: u64) -> bool {
        self.schema_version < current_version
    }

    /// Absorb the result of an apply, returning its diagnostics.
    ///
    /// The returned state is recorded even when apply failed, since it
    /// reflects whatever progress was made.
    pub fn record_apply(&mut self, response: ApplyResponse) -> Diagnostics {
        self.state = response.new_state;
        self.private = response.private;
        response.diagnostics
    }

    /// Absorb the result of a read, returning its diagnostics.
    ///
    /// A failed read leaves the record untouched.
    pub fn record_read(&mut self, response: ReadResponse) -> Diagnostics {
        if !response.diagnostics.has_errors() {
            self.state = response.state;
        }
        response.diagnostics
    }

    /// Absorb the result of upgrading to `current_version`.
    ///
    /// A failed upgrade leaves the record untouched and returns the errors;
    /// the state must not be used until the problem is resolved.
    pub fn record_upgrade(
        &mut self,
        current_version: u64,
        response: UpgradeResponse,
    ) -> Result<Diagnostics, Diagnostics> {
        if response.diagnostics.has_errors() {
            return Err(response.diagnostics);
        }
        self.state = response.upgraded_state;
        self.schema_version = current_version;
        Ok(response.diagnostics)
    }
}
