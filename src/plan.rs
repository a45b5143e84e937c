//! Planning support: the default plan and the planned-state checker.
//!
//! Providers may plan however they like, but the result has to stay
//! faithful to what the caller proposed. [`check_planned_state`] enforces
//! that, and [`proposed_new_state`] is the plan a provider gets when it
//! does not override planning.

use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::schema::{Block, BlockNestingMode, NestedBlock};
use crate::types::AttributeChange;
use crate::value::{join_path, Value};

/// Compute the default planned state from the prior and proposed states.
///
/// Proposed values are kept. A computed attribute left null takes its prior
/// value, or becomes unknown when there is no prior state. Attributes left
/// null that declare a default take the default. A null proposal plans a
/// destroy and yields null.
pub fn proposed_new_state(block: &Block, prior: &Value, proposed: &Value) -> Value {
    let entries = match proposed {
        Value::Object(entries) | Value::Map(entries) => entries,
        other => return other.clone(),
    };

    let mut planned = entries.clone();
    let creating = prior.is_null();

    for (name, attr) in &block.attributes {
        let proposed_value = proposed.attribute(name);
        if !proposed_value.is_null() {
            continue;
        }

        let value = if attr.is_computed() {
            if creating {
                Value::Unknown
            } else {
                prior.attribute(name).clone()
            }
        } else if let Some(default) = &attr.default {
            default.clone()
        } else {
            continue;
        };
        planned.insert(name.clone(), value);
    }

    for (name, nested) in &block.blocks {
        let proposed_value = proposed.attribute(name);
        if proposed_value.is_null() {
            continue;
        }
        let value = nested_proposed_new_state(nested, prior.attribute(name), proposed_value);
        planned.insert(name.clone(), value);
    }

    Value::Object(planned)
}

fn nested_proposed_new_state(nested: &NestedBlock, prior: &Value, proposed: &Value) -> Value {
    match (nested.nesting_mode, proposed) {
        (BlockNestingMode::Single, _) => proposed_new_state(&nested.block, prior, proposed),
        (BlockNestingMode::List, Value::List(items)) => {
            let prior_items = prior.as_elements().unwrap_or_default();
            Value::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let prior_item = prior_items.get(i).unwrap_or(&Value::Null);
                        proposed_new_state(&nested.block, prior_item, item)
                    })
                    .collect(),
            )
        },
        (BlockNestingMode::Map, Value::Map(entries) | Value::Object(entries)) => Value::Map(
            entries
                .iter()
                .map(|(key, item)| {
                    let prior_item = prior.attribute(key);
                    (key.clone(), proposed_new_state(&nested.block, prior_item, item))
                })
                .collect(),
        ),
        // Set elements have no identity to correlate with prior state
        (BlockNestingMode::Set, Value::Set(items) | Value::List(items)) => Value::Set(
            items
                .iter()
                .map(|item| proposed_new_state(&nested.block, &Value::Null, item))
                .collect(),
        ),
        (_, other) => other.clone(),
    }
}

/// Check a provider's planned state against the proposed state.
///
/// Every violation is an error of kind [`DiagnosticKind::ProtocolViolation`]:
///
/// - a non-null proposal must not be planned as null
/// - a concretely proposed value must not become unknown
/// - a non-computed attribute must keep its proposed value
/// - a non-computed attribute proposed as null stays null or takes its default
/// - optional computed attributes that were set keep their proposed value
///
/// Computed-only attributes are owned by the provider and are not checked.
/// The rules apply recursively through single, list and map blocks.
pub fn check_planned_state(block: &Block, proposed: &Value, planned: &Value) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    if !proposed.is_null() && planned.is_null() {
        diagnostics.push(plan_error(
            "Provider planned null for a resource that is not being destroyed",
            "",
        ));
        return diagnostics;
    }
    check_block(block, proposed, planned, "", &mut diagnostics);
    diagnostics
}

fn check_block(
    block: &Block,
    proposed: &Value,
    planned: &Value,
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    if proposed.is_unknown() || planned.is_unknown() {
        if proposed.is_known() && !proposed.is_null() {
            diagnostics.push(plan_error(
                "Provider planned an unknown value for a known block",
                path,
            ));
        }
        return;
    }

    for (name, attr) in &block.attributes {
        if attr.flags.is_computed_only() {
            continue;
        }

        let attr_path = join_path(path, name);
        let proposed_value = proposed.attribute(name);
        let planned_value = planned.attribute(name);

        if proposed_value.is_null() {
            if attr.flags.computed {
                continue;
            }
            let is_default = attr.default.as_ref() == Some(planned_value);
            if !planned_value.is_null() && !is_default {
                diagnostics.push(
                    plan_error(
                        format!("Provider set unconfigured attribute '{}'", attr_path),
                        &attr_path,
                    )
                    .with_detail(format!("Planned {} where null was proposed", planned_value)),
                );
            }
            continue;
        }

        if proposed_value.is_wholly_known() {
            if !planned_value.is_wholly_known() {
                diagnostics.push(plan_error(
                    format!(
                        "Provider planned an unknown value for known attribute '{}'",
                        attr_path
                    ),
                    &attr_path,
                ));
            } else if planned_value != proposed_value {
                diagnostics.push(
                    plan_error(
                        format!("Provider changed the proposed value of '{}'", attr_path),
                        &attr_path,
                    )
                    .with_detail(format!(
                        "Proposed {}, planned {}",
                        proposed_value, planned_value
                    )),
                );
            }
        } else if planned_value.is_null() {
            diagnostics.push(plan_error(
                format!("Provider planned null for configured attribute '{}'", attr_path),
                &attr_path,
            ));
        }
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        check_nested(
            nested,
            proposed.attribute(name),
            planned.attribute(name),
            &block_path,
            diagnostics,
        );
    }
}

fn check_nested(
    nested: &NestedBlock,
    proposed: &Value,
    planned: &Value,
    path: &str,
    diagnostics: &mut Diagnostics,
) {
    if proposed.is_null() {
        if !planned.is_null() && !nested.block.has_computed() {
            diagnostics.push(plan_error(
                format!("Provider added unconfigured block '{}'", path),
                path,
            ));
        }
        return;
    }

    match nested.nesting_mode {
        BlockNestingMode::Single => {
            check_block(&nested.block, proposed, planned, path, diagnostics)
        },
        BlockNestingMode::List => match (proposed.as_elements(), planned.as_elements()) {
            (Some(proposed_items), Some(planned_items)) => {
                if proposed_items.len() != planned_items.len() {
                    diagnostics.push(block_count_error(
                        path,
                        proposed_items.len(),
                        planned_items.len(),
                    ));
                    return;
                }
                for (i, (p, q)) in proposed_items.iter().zip(planned_items).enumerate() {
                    let item_path = join_path(path, &i.to_string());
                    check_block(&nested.block, p, q, &item_path, diagnostics);
                }
            },
            _ => check_block_shape(proposed, planned, path, diagnostics),
        },
        BlockNestingMode::Map => match (proposed.as_entries(), planned.as_entries()) {
            (Some(proposed_entries), Some(planned_entries)) => {
                for (key, item) in proposed_entries {
                    let item_path = join_path(path, key);
                    match planned_entries.get(key) {
                        Some(planned_item) => {
                            check_block(&nested.block, item, planned_item, &item_path, diagnostics)
                        },
                        None => diagnostics.push(plan_error(
                            format!("Provider dropped block '{}'", item_path),
                            &item_path,
                        )),
                    }
                }
                for key in planned_entries.keys() {
                    if !proposed_entries.contains_key(key) {
                        let item_path = join_path(path, key);
                        diagnostics.push(plan_error(
                            format!("Provider added unconfigured block '{}'", item_path),
                            &item_path,
                        ));
                    }
                }
            },
            _ => check_block_shape(proposed, planned, path, diagnostics),
        },
        BlockNestingMode::Set => match (proposed.as_elements(), planned.as_elements()) {
            (Some(proposed_items), Some(planned_items))
                if proposed_items.len() != planned_items.len() =>
            {
                diagnostics.push(block_count_error(
                    path,
                    proposed_items.len(),
                    planned_items.len(),
                ));
            },
            (Some(_), Some(_)) => {},
            _ => check_block_shape(proposed, planned, path, diagnostics),
        },
    }
}

fn check_block_shape(proposed: &Value, planned: &Value, path: &str, diagnostics: &mut Diagnostics) {
    if proposed.is_known() && planned.is_unknown() {
        diagnostics.push(plan_error(
            format!("Provider planned an unknown value for known block '{}'", path),
            path,
        ));
    } else if planned.is_null() {
        diagnostics.push(plan_error(
            format!("Provider dropped block '{}'", path),
            path,
        ));
    }
}

fn block_count_error(path: &str, proposed: usize, planned: usize) -> Diagnostic {
    plan_error(
        format!("Provider changed the number of '{}' blocks", path),
        path,
    )
    .with_detail(format!("Proposed {}, planned {}", proposed, planned))
}

fn plan_error(summary: impl Into<String>, path: &str) -> Diagnostic {
    Diagnostic::error(summary)
        .with_attribute_if_not_empty(path)
        .with_kind(DiagnosticKind::ProtocolViolation)
}

/// Paths of unknowns in a planned state that apply cannot act on.
///
/// Computed attributes may still be unknown when apply runs; the provider
/// determines them. Anything else that is unknown came from the caller's
/// configuration and should have been resolved before apply.
pub fn unresolved_unknowns(block: &Block, planned: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    collect_unresolved(block, planned, "", &mut paths);
    paths
}

fn collect_unresolved(block: &Block, value: &Value, path: &str, paths: &mut Vec<String>) {
    if value.is_unknown() {
        paths.push(path.to_string());
        return;
    }
    let entries = match value.as_entries() {
        Some(entries) => entries,
        None => return,
    };

    for (name, item) in entries {
        let item_path = join_path(path, name);
        if let Some(nested) = block.blocks.get(name) {
            collect_unresolved_nested(nested, item, &item_path, paths);
        } else if !block.attribute(name).is_some_and(|attr| attr.is_computed()) {
            paths.extend(
                item.unknown_paths()
                    .into_iter()
                    .map(|inner| within(&item_path, &inner)),
            );
        }
    }
}

fn within(base: &str, inner: &str) -> String {
    if inner.is_empty() {
        base.to_string()
    } else {
        join_path(base, inner)
    }
}

fn collect_unresolved_nested(
    nested: &NestedBlock,
    value: &Value,
    path: &str,
    paths: &mut Vec<String>,
) {
    if value.is_unknown() {
        paths.push(path.to_string());
        return;
    }
    match nested.nesting_mode {
        BlockNestingMode::Single => collect_unresolved(&nested.block, value, path, paths),
        BlockNestingMode::List | BlockNestingMode::Set => {
            for (i, item) in value.as_elements().unwrap_or_default().iter().enumerate() {
                collect_unresolved(&nested.block, item, &join_path(path, &i.to_string()), paths);
            }
        },
        BlockNestingMode::Map => {
            for (key, item) in value.as_entries().into_iter().flatten() {
                collect_unresolved(&nested.block, item, &join_path(path, key), paths);
            }
        },
    }
}

/// The top-level attribute changes between a prior and a planned state.
///
/// Null counts as absent, so creating reports every attribute as added and
/// destroying reports every attribute as removed. Unknown planned values
/// always count as a modification.
pub fn attribute_changes(prior: &Value, planned: &Value) -> Vec<AttributeChange> {
    let empty = Default::default();
    let before = prior.as_entries().unwrap_or(&empty);
    let after = planned.as_entries().unwrap_or(&empty);

    let mut names: Vec<&String> = before.keys().chain(after.keys()).collect();
    names.sort();
    names.dedup();

    names
        .into_iter()
        .filter_map(|name| {
            let old = before.get(name).filter(|v| !v.is_null());
            let new = after.get(name).filter(|v| !v.is_null());
            match (old, new) {
                (None, None) => None,
                (None, Some(new)) => Some(AttributeChange::added(name.as_str(), new.clone())),
                (Some(old), None) => Some(AttributeChange::removed(name.as_str(), old.clone())),
                (Some(old), Some(new)) if old != new => Some(AttributeChange::modified(
                    name.as_str(),
                    old.clone(),
                    new.clone(),
                )),
                _ => None,
            }
        })
        .collect()
}

/// Attributes marked `force_new` whose value changes between prior and planned.
///
/// Only updates can require replacement, so this is empty when either state
/// is null. The result is sorted.
pub fn replace_paths(block: &Block, prior: &Value, planned: &Value) -> Vec<String> {
    if prior.is_null() || planned.is_null() {
        return Vec::new();
    }

    let mut paths: Vec<String> = block
        .attributes
        .iter()
        .filter(|(name, attr)| {
            attr.force_new && prior.attribute(name) != planned.attribute(name)
        })
        .map(|(name, _)| name.clone())
        .collect();
    paths.sort();
    paths
}
