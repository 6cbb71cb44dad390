//! The schema-driven (legacy) surface.
//!
//! Components on this surface declare a [`Schema`] and work on a dynamic
//! [`ResourceData`]: a JSON object holding the planned or current values,
//! plus the prior state so callbacks can ask what changed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::meta::OpContext;
use crate::schema::Schema;
use crate::types::Timeouts;

/// Attribute holding the resource identifier.
pub const ID_KEY: &str = "id";

/// Dynamic values of one resource instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceData {
    values: Map<String, Value>,
    prior: Map<String, Value>,
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl ResourceData {
    /// Wrap a state or config object. Anything but an object is empty.
    pub fn new(values: Value) -> Self {
        Self {
            values: into_object(values),
            prior: Map::new(),
        }
    }

    /// Wrap planned values together with the prior state.
    pub fn with_prior(values: Value, prior: Value) -> Self {
        Self {
            values: into_object(values),
            prior: into_object(prior),
        }
    }

    /// Data carrying only an identifier, as produced by import.
    pub fn from_id(id: impl Into<String>) -> Self {
        let mut data = Self::default();
        data.set_id(id);
        data
    }

    /// Identifier, if set and non-empty.
    pub fn id(&self) -> Option<&str> {
        self.get_str(ID_KEY)
    }

    /// Set the identifier.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.values.insert(ID_KEY.to_string(), Value::String(id.into()));
    }

    /// Forget the identifier: the resource no longer exists remotely.
    pub fn clear_id(&mut self) {
        self.values.remove(ID_KEY);
    }

    /// Value of `key`; null counts as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// Non-empty string value of `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Integer value of `key`.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Boolean value of `key`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Prior value of `key`.
    pub fn prior(&self, key: &str) -> Option<&Value> {
        self.prior.get(key).filter(|v| !v.is_null())
    }

    /// Set `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Whether `key` differs from the prior state. Always true on create
    /// for attributes that carry a value.
    pub fn has_change(&self, key: &str) -> bool {
        self.get(key) != self.prior(key)
    }

    /// Whether `key` was explicitly set to null after holding a value.
    pub fn is_cleared(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(Value::Null)) && self.prior(key).is_some()
    }

    /// Whether there is no prior state.
    pub fn is_new(&self) -> bool {
        self.prior.is_empty()
    }

    /// Current values as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Final state, or `None` once the identifier is gone.
    pub fn into_state(self) -> Option<Value> {
        if self.id().is_some() {
            Some(Value::Object(self.values))
        } else {
            None
        }
    }
}

/// A managed resource on the legacy surface.
#[async_trait]
pub trait LegacyResource: Send + Sync {
    /// Type name, e.g. `scaleway_block_volume`.
    fn type_name(&self) -> &'static str;

    /// Schema.
    fn schema(&self) -> Schema;

    /// Per-operation timeouts.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Registered only when beta components are enabled.
    fn beta(&self) -> bool {
        false
    }

    /// Create the resource. Must set the identifier.
    async fn create(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError>;

    /// Refresh `data`. Clearing the identifier reports the resource gone.
    async fn read(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError>;

    /// Apply the planned values in `data`; [`ResourceData::has_change`]
    /// tells what differs from the prior state.
    async fn update(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError>;

    /// Delete the resource.
    async fn delete(&self, op: &OpContext, data: &ResourceData) -> Result<(), ProviderError>;

    /// Prepare imported data before the following read. The default keeps
    /// the identifier as given.
    async fn import(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let _ = (op, data);
        Ok(())
    }
}

/// A data source on the legacy surface.
#[async_trait]
pub trait LegacyDataSource: Send + Sync {
    /// Type name.
    fn type_name(&self) -> &'static str;

    /// Schema.
    fn schema(&self) -> Schema;

    /// Per-operation timeouts; only the read bound applies.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Registered only when beta components are enabled.
    fn beta(&self) -> bool {
        false
    }

    /// Fill `data` from its lookup attributes.
    async fn read(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError>;
}

/// Every component of the legacy surface.
#[derive(Default, Clone)]
pub struct LegacySurface {
    pub(crate) resources: Vec<Arc<dyn LegacyResource>>,
    pub(crate) data_sources: Vec<Arc<dyn LegacyDataSource>>,
}

impl LegacySurface {
    /// Create an empty surface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource.
    pub fn with_resource(mut self, resource: impl LegacyResource + 'static) -> Self {
        self.resources.push(Arc::new(resource));
        self
    }

    /// Register a data source.
    pub fn with_data_source(mut self, data_source: impl LegacyDataSource + 'static) -> Self {
        self.data_sources.push(Arc::new(data_source));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_data_accessors() {
        let data = ResourceData::new(json!({
            "id": "fr-par-1/11111111-2222-3333-4444-555555555555",
            "name": "vol",
            "size_in_gb": 20,
            "encrypted": true,
            "project_id": "",
            "tags": null,
        }));
        assert_eq!(data.id(), Some("fr-par-1/11111111-2222-3333-4444-555555555555"));
        assert_eq!(data.get_str("name"), Some("vol"));
        assert_eq!(data.get_i64("size_in_gb"), Some(20));
        assert_eq!(data.get_bool("encrypted"), Some(true));
        assert_eq!(data.get_str("project_id"), None);
        assert!(data.get("tags").is_none());
        assert!(data.is_new());
    }

    #[test]
    fn test_resource_data_changes() {
        let data = ResourceData::with_prior(
            json!({"id": "x", "name": "new", "size_in_gb": 20, "tags": null}),
            json!({"id": "x", "name": "old", "size_in_gb": 20, "tags": ["a"]}),
        );
        assert!(data.has_change("name"));
        assert!(!data.has_change("size_in_gb"));
        assert!(data.has_change("tags"));
        assert!(data.is_cleared("tags"));
        assert!(!data.is_cleared("name"));
        assert!(!data.is_new());
    }

    #[test]
    fn test_into_state() {
        let mut data = ResourceData::from_id("fr-par-1/abc");
        data.set("name", "vol");
        assert_eq!(data.clone().into_state(), Some(json!({"id": "fr-par-1/abc", "name": "vol"})));

        data.clear_id();
        assert_eq!(data.into_state(), None);
        assert_eq!(ResourceData::new(json!("not an object")).to_value(), json!({}));
    }
}
