//! Request and response types of the lifecycle protocol.
//!
//! Every response carries its [`Diagnostics`] next to the result value so
//! that partial failures can be reported without discarding progress.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::schema::ProviderSchema;
use crate::value::Value;

/// Opaque provider-private bytes carried alongside a resource's state.
///
/// The engine never inspects these. Plan output is handed back unmodified
/// to apply, and apply's output replaces whatever was stored before.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateData(Vec<u8>);

impl PrivateData {
    /// Empty private data.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for PrivateData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for PrivateData {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for PrivateData {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<Value>,
    /// The value after the change (None if deleting).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }

    /// Whether the new value will only be known after apply.
    pub fn is_unknown_after(&self) -> bool {
        self.after.as_ref().is_some_and(|v| !v.is_wholly_known())
    }
}

/// The result of planning a resource change.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResponse {
    /// The planned state after the operation. Null plans a destroy.
    pub planned_state: Value,
    /// Private data to hand back to apply.
    pub planned_private: PrivateData,
    /// The attribute changes between prior and planned state.
    pub changes: Vec<AttributeChange>,
    /// Attribute paths whose change forces replacement.
    pub requires_replace: Vec<String>,
    /// Diagnostics from planning.
    pub diagnostics: Diagnostics,
}

impl PlanResponse {
    /// A plan that moves the resource to `planned_state`.
    pub fn new(planned_state: Value) -> Self {
        Self {
            planned_state,
            planned_private: PrivateData::empty(),
            changes: Vec::new(),
            requires_replace: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// A plan that destroys the resource.
    pub fn destroy() -> Self {
        Self::new(Value::Null)
    }

    /// A plan that only reports diagnostics.
    pub fn failed(diagnostics: impl Into<Diagnostics>) -> Self {
        Self {
            diagnostics: diagnostics.into(),
            ..Self::new(Value::Null)
        }
    }

    /// Attach private data for apply.
    pub fn with_private(mut self, private: impl Into<PrivateData>) -> Self {
        self.planned_private = private.into();
        self
    }

    /// Mark an attribute path as forcing replacement.
    pub fn with_requires_replace(mut self, path: impl Into<String>) -> Self {
        self.requires_replace.push(path.into());
        self
    }

    /// Attach a diagnostic.
    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }

    /// Whether this plan destroys the resource.
    pub fn is_destroy(&self) -> bool {
        self.planned_state.is_null()
    }

    /// Whether applying this plan replaces the resource.
    pub fn requires_replacement(&self) -> bool {
        !self.requires_replace.is_empty()
    }
}

/// The result of applying a planned change.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResponse {
    /// The state after apply. Null after a destroy.
    pub new_state: Value,
    /// Private data replacing whatever was stored.
    pub private: PrivateData,
    /// Diagnostics from apply. Errors alongside a state report partial progress.
    pub diagnostics: Diagnostics,
}

impl ApplyResponse {
    /// A successful apply producing `new_state`.
    pub fn new(new_state: Value) -> Self {
        Self {
            new_state,
            private: PrivateData::empty(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Attach private data.
    pub fn with_private(mut self, private: impl Into<PrivateData>) -> Self {
        self.private = private.into();
        self
    }

    /// Attach a diagnostic.
    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

/// The result of reading a resource or a data source.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    /// The refreshed state. Null means the remote object is gone.
    pub state: Value,
    /// Diagnostics from the read.
    pub diagnostics: Diagnostics,
}

impl ReadResponse {
    /// A read that found the object.
    pub fn new(state: Value) -> Self {
        Self {
            state,
            diagnostics: Diagnostics::new(),
        }
    }

    /// A read that found the object no longer exists.
    pub fn gone() -> Self {
        Self::new(Value::Null)
    }

    /// Whether the object no longer exists.
    pub fn is_gone(&self) -> bool {
        self.state.is_null()
    }
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
    /// Private data to store with the state.
    pub private: PrivateData,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
            private: PrivateData::empty(),
        }
    }

    /// Attach private data.
    pub fn with_private(mut self, private: impl Into<PrivateData>) -> Self {
        self.private = private.into();
        self
    }
}

/// The result of importing existing infrastructure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportResponse {
    /// The imported instances. Empty means nothing was found.
    pub imported: Vec<ImportedResource>,
    /// Diagnostics from the import.
    pub diagnostics: Diagnostics,
}

/// The result of upgrading stored state.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeResponse {
    /// The state in the current schema's shape. Null when upgrade failed.
    pub upgraded_state: Value,
    /// Diagnostics from upgrading.
    pub diagnostics: Diagnostics,
}

/// The provider's schema together with any inconsistencies found in it.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaResponse {
    /// The full provider schema.
    pub schema: ProviderSchema,
    /// Errors describing an internally inconsistent schema.
    pub diagnostics: Diagnostics,
}

/// Optional protocol features a provider opts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderCapabilities {
    /// Whether the provider plans destroy operations itself.
    pub plan_destroy: bool,
}
