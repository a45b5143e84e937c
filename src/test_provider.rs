//! An in-memory provider used by the crate's tests.
//!
//! Widgets whose name is one of the knobs below misbehave on purpose:
//!
//! - `partial`: create fails half way and reports the partial state
//! - `unknown-after-apply`: create returns a state with unknowns
//! - `rogue-plan`: plan rewrites the configured name
//! - `slow`: create blocks until the session is stopped
//! - `fail`: create and update fail outright
//! - `null-on-fail`: update reports an error and no state
//! - `blocking`: validate, read, plan, import and lookup never complete
//! - `rendezvous`: validation waits for a second concurrent validation

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Barrier;

use crate::cancel::StopToken;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::error::ProviderError;
use crate::plan::proposed_new_state;
use crate::provider::{ApplyRequest, OperationContext, PlanRequest, ProviderService};
use crate::schema::{Attribute, AttributeFlags, AttributeType, ProviderSchema, Schema};
use crate::types::{
    ApplyResponse, ImportedResource, PlanResponse, PrivateData, ProviderCapabilities,
};
use crate::upgrade::StateUpgrader;
use crate::value::Value;

pub(crate) const WIDGET: &str = "test_widget";
pub(crate) const GADGET: &str = "test_gadget";
pub(crate) const LOOKUP: &str = "test_lookup";
pub(crate) const CLOCK: &str = "test_clock";

pub(crate) fn widget_schema() -> Schema {
    Schema::new(2)
        .with_attribute("name", Attribute::required_string())
        .with_attribute("size", Attribute::optional_int64())
        .with_attribute("region", Attribute::optional_string().with_force_new())
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "tags",
            Attribute::new(
                AttributeType::map(AttributeType::String),
                AttributeFlags::optional(),
            ),
        )
}

/// Per-session state created by `configure`.
#[derive(Default)]
pub(crate) struct WidgetClient {
    objects: Mutex<BTreeMap<String, Value>>,
    next_id: AtomicU64,
    pub(crate) last_private: Mutex<Option<PrivateData>>,
}

impl WidgetClient {
    fn allocate_id(&self) -> String {
        format!("w-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn put(&self, id: &str, state: Value) {
        self.objects.lock().unwrap().insert(id.to_string(), state);
    }

    fn get(&self, id: &str) -> Option<Value> {
        self.objects.lock().unwrap().get(id).cloned()
    }

    fn remove(&self, id: &str) -> Option<Value> {
        self.objects.lock().unwrap().remove(id)
    }
}

#[derive(Default)]
pub(crate) struct WidgetProvider {
    pub(crate) plan_destroy: bool,
    pub(crate) hang_on_stop: bool,
    pub(crate) duplicate_kind: bool,
    pub(crate) calls: Mutex<Vec<&'static str>>,
    pub(crate) stop_called: AtomicBool,
    pub(crate) slow_started: AtomicUsize,
    pub(crate) rendezvous: Option<Barrier>,
}

impl WidgetProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn upgrader() -> StateUpgrader {
        // Version 0 called the size "capacity"; version 1 stored it as a string
        StateUpgrader::new().with_step(0, |state| {
            let capacity = state.attribute("capacity").clone();
            Ok(state
                .without_attribute("capacity")
                .with_attribute("size", capacity))
        })
    }
}

// Never completes; the session has to give up on the call
async fn block() {
    std::future::pending::<()>().await
}

fn name_of(state: &Value) -> &str {
    state.attribute("name").as_str().unwrap_or_default()
}

fn id_of(state: &Value) -> Result<&str, ProviderError> {
    state
        .attribute("id")
        .as_str()
        .ok_or_else(|| ProviderError::InvalidRequest("state has no id".to_string()))
}

#[async_trait::async_trait]
impl ProviderService for WidgetProvider {
    type Client = WidgetClient;

    fn schema(&self) -> ProviderSchema {
        let schema = ProviderSchema::new()
            .with_provider_config(
                Schema::v0()
                    .with_attribute("endpoint", Attribute::optional_string())
                    .with_attribute("token", Attribute::optional_string().sensitive()),
            )
            .with_resource(WIDGET, widget_schema())
            .with_resource(
                GADGET,
                Schema::v0()
                    .with_attribute("label", Attribute::required_string())
                    .with_attribute("id", Attribute::computed_string()),
            )
            .with_data_source(
                LOOKUP,
                Schema::v0()
                    .with_attribute("name", Attribute::required_string())
                    .with_attribute("length", Attribute::computed_int64()),
            )
            .with_data_source(
                CLOCK,
                Schema::v0().with_attribute("now", Attribute::computed_string()),
            );
        if self.duplicate_kind {
            schema.with_resource(WIDGET, widget_schema())
        } else {
            schema
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            plan_destroy: self.plan_destroy,
        }
    }

    async fn validate_provider_config(&self, config: &Value) -> Result<Diagnostics, ProviderError> {
        self.record("validate_provider_config");
        let mut diagnostics = Diagnostics::new();
        if config.attribute("endpoint").as_str() == Some("http://insecure") {
            diagnostics.push(
                Diagnostic::warning("Endpoint is not using TLS").with_attribute("endpoint"),
            );
        }
        Ok(diagnostics)
    }

    async fn configure(
        &self,
        config: &Value,
        _stop: &StopToken,
    ) -> Result<WidgetClient, ProviderError> {
        self.record("configure");
        if config.attribute("token").as_str() == Some("bad") {
            return Err(ProviderError::PermissionDenied("token rejected".to_string()));
        }
        Ok(WidgetClient::default())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.record("stop");
        self.stop_called.store(true, Ordering::SeqCst);
        if self.hang_on_stop {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: &Value,
    ) -> Result<Diagnostics, ProviderError> {
        self.record("validate_resource_config");
        let mut diagnostics = Diagnostics::new();
        if resource_type == WIDGET {
            match (name_of(config), &self.rendezvous) {
                ("blocking", _) => block().await,
                ("rendezvous", Some(barrier)) => {
                    barrier.wait().await;
                },
                _ => {},
            }
            if name_of(config) == "forbidden" {
                diagnostics.push(
                    Diagnostic::error("Name is reserved")
                        .with_attribute("name")
                        .with_kind(DiagnosticKind::Validation),
                );
            }
            if config.attribute("size").as_i64().is_some_and(|size| size > 100) {
                diagnostics.push(
                    Diagnostic::warning("Large widgets are slow to create").with_attribute("size"),
                );
            }
        }
        Ok(diagnostics)
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.record("upgrade_resource_state");
        match resource_type {
            WIDGET => Self::upgrader().upgrade(version, widget_schema().version, state),
            _ => Ok(state),
        }
    }

    async fn plan(
        &self,
        _ctx: OperationContext<'_, WidgetClient>,
        request: PlanRequest<'_>,
    ) -> Result<PlanResponse, ProviderError> {
        self.record("plan");
        if name_of(request.proposed_state) == "blocking" {
            block().await;
        }
        if request.is_destroy() {
            // Misbehaves on purpose when destroy planning is enabled
            return Ok(PlanResponse::new(request.prior_state.clone()));
        }

        let mut planned = proposed_new_state(
            &request.schema.block,
            request.prior_state,
            request.proposed_state,
        );
        if name_of(request.proposed_state) == "rogue-plan" {
            planned = planned.with_attribute("name", Value::from("rogue"));
        }
        let private = format!("plan:{}", name_of(request.proposed_state));
        Ok(PlanResponse::new(planned).with_private(private.as_str()))
    }

    async fn create(
        &self,
        ctx: OperationContext<'_, WidgetClient>,
        request: ApplyRequest<'_>,
    ) -> Result<ApplyResponse, ProviderError> {
        self.record("create");
        *ctx.client.last_private.lock().unwrap() = Some(request.planned_private.clone());
        let planned = request.planned_state;

        match name_of(planned) {
            "slow" => {
                self.slow_started.fetch_add(1, Ordering::SeqCst);
                tokio::select! {
                    _ = ctx.stop.stopped() => return Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                }
            },
            "partial" => {
                let id = ctx.client.allocate_id();
                let state = planned.with_attribute("id", Value::from(id.as_str()));
                ctx.client.put(&id, state.clone());
                return Ok(ApplyResponse::new(state).with_diagnostic(
                    Diagnostic::error("Widget created but tagging failed")
                        .with_attribute("tags")
                        .with_kind(DiagnosticKind::PartialApply),
                ));
            },
            "unknown-after-apply" => {
                return Ok(ApplyResponse::new(planned.with_attribute("id", Value::Unknown)));
            },
            "fail" => return Err(ProviderError::Unavailable("widget api down".to_string())),
            _ => {},
        }

        let id = ctx.client.allocate_id();
        let state = planned.with_attribute("id", Value::from(id.as_str()));
        ctx.client.put(&id, state.clone());
        Ok(ApplyResponse::new(state).with_private("applied"))
    }

    async fn read(
        &self,
        ctx: OperationContext<'_, WidgetClient>,
        _resource_type: &str,
        state: &Value,
    ) -> Result<Value, ProviderError> {
        self.record("read");
        let id = id_of(state)?;
        if id == "blocking" {
            block().await;
        }
        ctx.client
            .get(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn update(
        &self,
        ctx: OperationContext<'_, WidgetClient>,
        request: ApplyRequest<'_>,
    ) -> Result<ApplyResponse, ProviderError> {
        self.record("update");
        *ctx.client.last_private.lock().unwrap() = Some(request.planned_private.clone());
        match name_of(request.planned_state) {
            "fail" => return Err(ProviderError::Unavailable("widget api down".to_string())),
            "null-on-fail" => {
                return Ok(ApplyResponse::new(Value::Null)
                    .with_diagnostic(Diagnostic::error("Widget update failed")));
            },
            _ => {},
        }
        let id = id_of(request.prior_state)?;
        let state = request.planned_state.with_attribute("id", Value::from(id));
        ctx.client.put(id, state.clone());
        Ok(ApplyResponse::new(state).with_private("updated"))
    }

    async fn delete(
        &self,
        ctx: OperationContext<'_, WidgetClient>,
        request: ApplyRequest<'_>,
    ) -> Result<(), ProviderError> {
        self.record("delete");
        let id = id_of(request.prior_state)?;
        ctx.client
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn import_resource(
        &self,
        ctx: OperationContext<'_, WidgetClient>,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.record("import_resource");
        match id {
            "vanished" => Err(ProviderError::NotFound(id.to_string())),
            "blocking" => {
                block().await;
                Ok(Vec::new())
            },
            "bundle" => Ok(vec![
                ImportedResource::new(
                    WIDGET,
                    Value::object([
                        ("name", Value::from("bundled")),
                        ("size", Value::Null),
                        ("region", Value::Null),
                        ("id", Value::from("w-bundle")),
                        ("tags", Value::Null),
                    ]),
                ),
                ImportedResource::new(
                    GADGET,
                    Value::object([("label", Value::from("g")), ("id", Value::from("g-1"))]),
                ),
            ]),
            "half-known" => Ok(vec![ImportedResource::new(
                resource_type,
                Value::object([("id", Value::Unknown)]),
            )]),
            _ => Ok(ctx
                .client
                .get(id)
                .map(|state| ImportedResource::new(resource_type, state).with_private("imported"))
                .into_iter()
                .collect()),
        }
    }

    async fn read_data_source(
        &self,
        _ctx: OperationContext<'_, WidgetClient>,
        data_source_type: &str,
        config: &Value,
    ) -> Result<Value, ProviderError> {
        self.record("read_data_source");
        match data_source_type {
            LOOKUP => {
                let name = name_of(config);
                if name == "blocking" {
                    block().await;
                }
                Ok(config.with_attribute("length", Value::from(name.len() as u64)))
            },
            CLOCK => Ok(config.with_attribute("now", Value::from("2026-01-01T00:00:00Z"))),
            other => Err(ProviderError::UnknownResource(other.to_string())),
        }
    }
}
