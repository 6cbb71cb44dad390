//! Diff suppressors and the attribute planner.
//!
//! A suppressor decides that two different values of an attribute describe
//! the same remote setting, so the planner keeps the prior value instead of
//! reporting a change.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coercion;
use crate::locality;
use crate::schema::Schema;
use crate::types::{AttributeChange, PlanResult};

/// Equivalence attached to an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffSuppress {
    /// `Foo` == `foo`.
    CaseInsensitive,
    /// `fr-par/<uuid>` == `<uuid>`.
    Locality,
    /// `https://api/` == `https://api`.
    TrailingSlash,
    /// `90m` == `1h30m`.
    Duration,
}

impl DiffSuppress {
    /// Whether `old` and `new` are equivalent under this suppressor.
    pub fn suppresses(self, old: &Value, new: &Value) -> bool {
        let (Some(old), Some(new)) = (old.as_str(), new.as_str()) else {
            return old == new;
        };
        match self {
            Self::CaseInsensitive => old.eq_ignore_ascii_case(new),
            Self::Locality => locality::strip_locality(old) == locality::strip_locality(new),
            Self::TrailingSlash => old.trim_end_matches('/') == new.trim_end_matches('/'),
            Self::Duration => {
                match (coercion::expand_duration(old), coercion::expand_duration(new)) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => old == new,
                }
            },
        }
    }
}

/// Plan the transition from `prior` to `proposed` for a resource.
///
/// With no prior state the resource is being created: defaults are filled in
/// and every configured attribute is reported as added. Otherwise each root
/// attribute is compared; unset computed attributes carry their prior value
/// forward, suppressed differences keep the prior value, and a change to a
/// force-new attribute marks the plan as requiring replacement.
pub fn plan_resource(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let empty = Map::new();
    let proposed_obj = proposed.as_object().unwrap_or(&empty);
    let mut planned = proposed_obj.clone();

    for (name, attr) in &schema.block.attributes {
        let unset = planned.get(name).map_or(true, Value::is_null);
        if unset {
            if let Some(default) = &attr.default {
                planned.insert(name.clone(), default.clone());
            }
        }
    }

    let Some(prior_obj) = prior.and_then(Value::as_object) else {
        let mut changes: Vec<AttributeChange> = planned
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| AttributeChange::added(k.clone(), v.clone()))
            .collect();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        return PlanResult::with_changes(Value::Object(planned), changes, false);
    };

    let mut changes = Vec::new();
    let mut requires_replace = false;

    let mut names: Vec<&String> = schema
        .block
        .attributes
        .keys()
        .chain(schema.block.blocks.keys())
        .collect();
    names.sort();

    for name in names {
        let before = prior_obj.get(name).cloned().unwrap_or(Value::Null);
        let after = planned.get(name).cloned().unwrap_or(Value::Null);

        if let Some(attr) = schema.block.attributes.get(name) {
            if after.is_null() && attr.flags.computed {
                planned.insert(name.clone(), before);
                continue;
            }
            if let Some(suppress) = attr.diff_suppress {
                if suppress.suppresses(&before, &after) {
                    planned.insert(name.clone(), before);
                    continue;
                }
            }
            if before != after {
                requires_replace |= attr.force_new;
                changes.push(change(name, before, after));
            }
        } else if before != after {
            changes.push(change(name, before, after));
        }
    }

    PlanResult::with_changes(Value::Object(planned), changes, requires_replace)
}

fn change(path: &str, before: Value, after: Value) -> AttributeChange {
    match (before.is_null(), after.is_null()) {
        (true, _) => AttributeChange::added(path, after),
        (false, true) => AttributeChange::removed(path, before),
        (false, false) => AttributeChange::modified(path, before, after),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::optional_computed_string())
            .with_attribute("zone", Attribute::optional_computed_string().with_force_new())
            .with_attribute(
                "snapshot_id",
                Attribute::optional_string()
                    .with_force_new()
                    .with_diff_suppress(DiffSuppress::Locality),
            )
            .with_attribute("perf_iops", Attribute::optional_int64().with_default(json!(5000)))
            .with_attribute("status", Attribute::computed_string())
    }

    #[test]
    fn test_suppressors() {
        let uuid = "11111111-2222-3333-4444-555555555555";
        assert!(DiffSuppress::Locality.suppresses(&json!(format!("fr-par-1/{uuid}")), &json!(uuid)));
        assert!(DiffSuppress::CaseInsensitive.suppresses(&json!("SBS_5K"), &json!("sbs_5k")));
        assert!(DiffSuppress::TrailingSlash.suppresses(&json!("https://api/"), &json!("https://api")));
        assert!(DiffSuppress::Duration.suppresses(&json!("90m"), &json!("1h30m")));
        assert!(!DiffSuppress::Duration.suppresses(&json!("90m"), &json!("1h")));
        assert!(!DiffSuppress::CaseInsensitive.suppresses(&json!("a"), &Value::Null));
    }

    #[test]
    fn test_plan_create_applies_defaults() {
        let plan = plan_resource(&schema(), None, &json!({"name": "data", "zone": null}));
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["perf_iops"], json!(5000));
        let paths: Vec<_> = plan.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["name", "perf_iops"]);
    }

    #[test]
    fn test_plan_no_change_keeps_computed() {
        let prior = json!({"name": "data", "zone": "fr-par-1", "perf_iops": 5000, "status": "available"});
        let proposed = json!({"name": "data", "zone": null, "perf_iops": 5000, "status": null});
        let plan = plan_resource(&schema(), Some(&prior), &proposed);
        assert!(plan.changes.is_empty());
        assert_eq!(plan.planned_state["zone"], json!("fr-par-1"));
        assert_eq!(plan.planned_state["status"], json!("available"));
    }

    #[test]
    fn test_plan_update_in_place() {
        let prior = json!({"name": "data", "zone": "fr-par-1", "perf_iops": 5000});
        let proposed = json!({"name": "logs", "zone": "fr-par-1", "perf_iops": 15000});
        let plan = plan_resource(&schema(), Some(&prior), &proposed);
        assert!(!plan.requires_replace);
        assert_eq!(plan.changes.len(), 2);
        assert_eq!(plan.changes[0], AttributeChange::modified("name", json!("data"), json!("logs")));
    }

    #[test]
    fn test_plan_force_new_and_suppression() {
        let uuid = "11111111-2222-3333-4444-555555555555";
        let prior = json!({"zone": "fr-par-1", "snapshot_id": format!("fr-par-1/{uuid}"), "perf_iops": 5000});

        let same = json!({"zone": "fr-par-1", "snapshot_id": uuid, "perf_iops": 5000});
        let plan = plan_resource(&schema(), Some(&prior), &same);
        assert!(plan.changes.is_empty());
        assert_eq!(plan.planned_state["snapshot_id"], prior["snapshot_id"]);

        let moved = json!({"zone": "fr-par-2", "snapshot_id": uuid, "perf_iops": 5000});
        let plan = plan_resource(&schema(), Some(&prior), &moved);
        assert!(plan.requires_replace);
        assert_eq!(plan.changes.len(), 1);
    }
}
