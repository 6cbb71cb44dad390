//! The framework surface.
//!
//! Components implement typed traits over serde models. The mux sees them
//! through the object-safe `Any*` traits, which decode and encode JSON at
//! the boundary.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProviderError;
use crate::meta::OpContext;
use crate::schema::{Diagnostic, Schema};
use crate::types::{EphemeralResult, Timeouts};

/// Bound for the typed model of a framework component.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> Model for T {}

fn decode<T: Model>(value: Value) -> Result<T, ProviderError> {
    Ok(serde_json::from_value(value)?)
}

fn encode<T: Model>(model: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(model)?)
}

/// A managed resource.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// State and configuration model.
    type Model: Model;

    /// Type name.
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

    /// Create from the plan.
    async fn create(&self, op: &OpContext, plan: Self::Model) -> Result<Self::Model, ProviderError>;

    /// Refresh; `None` when the resource is gone.
    async fn read(&self, op: &OpContext, state: Self::Model) -> Result<Option<Self::Model>, ProviderError>;

    /// Apply the plan over the prior state.
    async fn update(
        &self,
        op: &OpContext,
        prior: Self::Model,
        plan: Self::Model,
    ) -> Result<Self::Model, ProviderError>;

    /// Delete.
    async fn delete(&self, op: &OpContext, state: Self::Model) -> Result<(), ProviderError>;

    /// Build the state to read after importing `id`.
    async fn import(&self, op: &OpContext, id: &str) -> Result<Self::Model, ProviderError> {
        let _ = (op, id);
        Err(ProviderError::Unimplemented(format!("import of {}", self.type_name())))
    }
}

/// A data source.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Configuration and result model.
    type Model: Model;

    /// Type name.
    fn type_name(&self) -> &'static str;

    /// Schema.
    fn schema(&self) -> Schema;

    /// Timeouts; only the read bound applies.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Registered only when beta components are enabled.
    fn beta(&self) -> bool {
        false
    }

    /// Read from the configuration.
    async fn read(&self, op: &OpContext, config: Self::Model) -> Result<Self::Model, ProviderError>;
}

/// An ephemeral resource. Its result is handed to the host once and is
/// never written to state.
#[async_trait]
pub trait EphemeralResource: Send + Sync + 'static {
    /// Configuration and result model.
    type Model: Model;
    /// Data kept between open and close.
    type Private: Model;

    /// Type name.
    fn type_name(&self) -> &'static str;

    /// Schema.
    fn schema(&self) -> Schema;

    /// Timeouts; only the read bound applies.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Registered only when beta components are enabled.
    fn beta(&self) -> bool {
        false
    }

    /// Produce the value.
    async fn open(
        &self,
        op: &OpContext,
        config: Self::Model,
    ) -> Result<(Self::Model, Option<Self::Private>), ProviderError>;

    /// Release whatever `open` acquired.
    async fn close(&self, op: &OpContext, private: Self::Private) -> Result<(), ProviderError> {
        let _ = (op, private);
        Ok(())
    }
}

/// A one-shot action. It produces diagnostics only.
#[async_trait]
pub trait Action: Send + Sync + 'static {
    /// Configuration model.
    type Model: Model;

    /// Type name.
    fn type_name(&self) -> &'static str;

    /// Schema.
    fn schema(&self) -> Schema;

    /// Timeouts; the create bound applies.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Registered only when beta components are enabled.
    fn beta(&self) -> bool {
        false
    }

    /// Run the action.
    async fn invoke(&self, op: &OpContext, config: Self::Model) -> Result<Vec<Diagnostic>, ProviderError>;
}

/// Object-safe view of a [`Resource`].
#[async_trait]
pub trait AnyResource: Send + Sync {
    /// Type name.
    fn type_name(&self) -> &'static str;
    /// Schema.
    fn schema(&self) -> Schema;
    /// Timeouts.
    fn timeouts(&self) -> Timeouts;
    /// Beta flag.
    fn beta(&self) -> bool;
    /// Create.
    async fn create(&self, op: &OpContext, plan: Value) -> Result<Value, ProviderError>;
    /// Read.
    async fn read(&self, op: &OpContext, state: Value) -> Result<Option<Value>, ProviderError>;
    /// Update.
    async fn update(&self, op: &OpContext, prior: Value, plan: Value) -> Result<Value, ProviderError>;
    /// Delete.
    async fn delete(&self, op: &OpContext, state: Value) -> Result<(), ProviderError>;
    /// Import.
    async fn import(&self, op: &OpContext, id: &str) -> Result<Value, ProviderError>;
}

#[async_trait]
impl<R: Resource> AnyResource for R {
    fn type_name(&self) -> &'static str {
        Resource::type_name(self)
    }

    fn schema(&self) -> Schema {
        Resource::schema(self)
    }

    fn timeouts(&self) -> Timeouts {
        Resource::timeouts(self)
    }

    fn beta(&self) -> bool {
        Resource::beta(self)
    }

    async fn create(&self, op: &OpContext, plan: Value) -> Result<Value, ProviderError> {
        encode(&Resource::create(self, op, decode(plan)?).await?)
    }

    async fn read(&self, op: &OpContext, state: Value) -> Result<Option<Value>, ProviderError> {
        match Resource::read(self, op, decode(state)?).await? {
            Some(model) => Ok(Some(encode(&model)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, op: &OpContext, prior: Value, plan: Value) -> Result<Value, ProviderError> {
        encode(&Resource::update(self, op, decode(prior)?, decode(plan)?).await?)
    }

    async fn delete(&self, op: &OpContext, state: Value) -> Result<(), ProviderError> {
        Resource::delete(self, op, decode(state)?).await
    }

    async fn import(&self, op: &OpContext, id: &str) -> Result<Value, ProviderError> {
        encode(&Resource::import(self, op, id).await?)
    }
}

/// Object-safe view of a [`DataSource`].
#[async_trait]
pub trait AnyDataSource: Send + Sync {
    /// Type name.
    fn type_name(&self) -> &'static str;
    /// Schema.
    fn schema(&self) -> Schema;
    /// Timeouts.
    fn timeouts(&self) -> Timeouts;
    /// Beta flag.
    fn beta(&self) -> bool;
    /// Read.
    async fn read(&self, op: &OpContext, config: Value) -> Result<Value, ProviderError>;
}

#[async_trait]
impl<D: DataSource> AnyDataSource for D {
    fn type_name(&self) -> &'static str {
        DataSource::type_name(self)
    }

    fn schema(&self) -> Schema {
        DataSource::schema(self)
    }

    fn timeouts(&self) -> Timeouts {
        DataSource::timeouts(self)
    }

    fn beta(&self) -> bool {
        DataSource::beta(self)
    }

    async fn read(&self, op: &OpContext, config: Value) -> Result<Value, ProviderError> {
        encode(&DataSource::read(self, op, decode(config)?).await?)
    }
}

/// Object-safe view of an [`EphemeralResource`].
#[async_trait]
pub trait AnyEphemeralResource: Send + Sync {
    /// Type name.
    fn type_name(&self) -> &'static str;
    /// Schema.
    fn schema(&self) -> Schema;
    /// Timeouts.
    fn timeouts(&self) -> Timeouts;
    /// Beta flag.
    fn beta(&self) -> bool;
    /// Open.
    async fn open(&self, op: &OpContext, config: Value) -> Result<EphemeralResult, ProviderError>;
    /// Close. Nothing to do without private data.
    async fn close(&self, op: &OpContext, private: Option<Value>) -> Result<(), ProviderError>;
}

#[async_trait]
impl<E: EphemeralResource> AnyEphemeralResource for E {
    fn type_name(&self) -> &'static str {
        EphemeralResource::type_name(self)
    }

    fn schema(&self) -> Schema {
        EphemeralResource::schema(self)
    }

    fn timeouts(&self) -> Timeouts {
        EphemeralResource::timeouts(self)
    }

    fn beta(&self) -> bool {
        EphemeralResource::beta(self)
    }

    async fn open(&self, op: &OpContext, config: Value) -> Result<EphemeralResult, ProviderError> {
        let (result, private) = EphemeralResource::open(self, op, decode(config)?).await?;
        Ok(EphemeralResult {
            result: encode(&result)?,
            private: private.as_ref().map(encode).transpose()?,
        })
    }

    async fn close(&self, op: &OpContext, private: Option<Value>) -> Result<(), ProviderError> {
        match private {
            Some(private) => EphemeralResource::close(self, op, decode(private)?).await,
            None => Ok(()),
        }
    }
}

/// Object-safe view of an [`Action`].
#[async_trait]
pub trait AnyAction: Send + Sync {
    /// Type name.
    fn type_name(&self) -> &'static str;
    /// Schema.
    fn schema(&self) -> Schema;
    /// Timeouts.
    fn timeouts(&self) -> Timeouts;
    /// Beta flag.
    fn beta(&self) -> bool;
    /// Invoke.
    async fn invoke(&self, op: &OpContext, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;
}

#[async_trait]
impl<A: Action> AnyAction for A {
    fn type_name(&self) -> &'static str {
        Action::type_name(self)
    }

    fn schema(&self) -> Schema {
        Action::schema(self)
    }

    fn timeouts(&self) -> Timeouts {
        Action::timeouts(self)
    }

    fn beta(&self) -> bool {
        Action::beta(self)
    }

    async fn invoke(&self, op: &OpContext, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Action::invoke(self, op, decode(config)?).await
    }
}

/// Every component of the framework surface.
#[derive(Default, Clone)]
pub struct FrameworkSurface {
    pub(crate) resources: Vec<Arc<dyn AnyResource>>,
    pub(crate) data_sources: Vec<Arc<dyn AnyDataSource>>,
    pub(crate) ephemeral_resources: Vec<Arc<dyn AnyEphemeralResource>>,
    pub(crate) actions: Vec<Arc<dyn AnyAction>>,
}

impl FrameworkSurface {
    /// Create an empty surface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource.
    pub fn with_resource(mut self, resource: impl Resource) -> Self {
        self.resources.push(Arc::new(resource));
        self
    }

    /// Register a data source.
    pub fn with_data_source(mut self, data_source: impl DataSource) -> Self {
        self.data_sources.push(Arc::new(data_source));
        self
    }

    /// Register an ephemeral resource.
    pub fn with_ephemeral_resource(mut self, resource: impl EphemeralResource) -> Self {
        self.ephemeral_resources.push(Arc::new(resource));
        self
    }

    /// Register an action.
    pub fn with_action(mut self, action: impl Action) -> Self {
        self.actions.push(Arc::new(action));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::meta::tests::context_with;
    use crate::schema::Attribute;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: Option<String>,
        value: i64,
    }

    struct CounterResource;

    #[async_trait]
    impl Resource for CounterResource {
        type Model = Counter;

        fn type_name(&self) -> &'static str {
            "test_counter"
        }

        fn schema(&self) -> Schema {
            Schema::v0()
                .with_attribute("id", Attribute::computed_string())
                .with_attribute("value", Attribute::optional_int64())
        }

        async fn create(&self, _op: &OpContext, plan: Counter) -> Result<Counter, ProviderError> {
            Ok(Counter {
                id: Some("c1".into()),
                ..plan
            })
        }

        async fn read(&self, _op: &OpContext, state: Counter) -> Result<Option<Counter>, ProviderError> {
            Ok((state.value >= 0).then_some(state))
        }

        async fn update(&self, _op: &OpContext, prior: Counter, plan: Counter) -> Result<Counter, ProviderError> {
            Ok(Counter {
                id: prior.id,
                value: plan.value,
            })
        }

        async fn delete(&self, _op: &OpContext, _state: Counter) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct Lease;

    #[async_trait]
    impl EphemeralResource for Lease {
        type Model = Counter;
        type Private = String;

        fn type_name(&self) -> &'static str {
            "test_lease"
        }

        fn schema(&self) -> Schema {
            Schema::v0()
        }

        async fn open(&self, _op: &OpContext, config: Counter) -> Result<(Counter, Option<String>), ProviderError> {
            Ok((config, Some("lease-1".into())))
        }

        async fn close(&self, _op: &OpContext, private: String) -> Result<(), ProviderError> {
            if private == "lease-1" {
                Ok(())
            } else {
                Err(ProviderError::InvalidRequest(private))
            }
        }
    }

    fn op() -> OpContext {
        let ctx = context_with(ProviderConfig::default(), &[]);
        OpContext::new(Arc::new(ctx), CancellationToken::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_resource_erasure() {
        let erased: Arc<dyn AnyResource> = Arc::new(CounterResource);
        let op = op();

        let created = erased.create(&op, json!({"id": null, "value": 3})).await.unwrap();
        assert_eq!(created, json!({"id": "c1", "value": 3}));

        let updated = erased
            .update(&op, created.clone(), json!({"id": null, "value": 4}))
            .await
            .unwrap();
        assert_eq!(updated, json!({"id": "c1", "value": 4}));

        assert_eq!(erased.read(&op, json!({"id": "c1", "value": -1})).await.unwrap(), None);
        assert!(matches!(
            erased.import(&op, "c1").await,
            Err(ProviderError::Unimplemented(_))
        ));
        assert!(!erased.beta());
        assert_eq!(erased.timeouts(), Timeouts::default());
    }

    #[tokio::test]
    async fn test_model_mismatch_is_serialization_error() {
        let erased: Arc<dyn AnyResource> = Arc::new(CounterResource);
        let err = erased.create(&op(), json!({"value": "three"})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_ephemeral_private_round_trip() {
        let erased: Arc<dyn AnyEphemeralResource> = Arc::new(Lease);
        let op = op();

        let opened = erased.open(&op, json!({"id": null, "value": 1})).await.unwrap();
        assert_eq!(opened.private, Some(json!("lease-1")));
        erased.close(&op, opened.private).await.unwrap();
        erased.close(&op, None).await.unwrap();
        assert!(erased.close(&op, Some(json!("other"))).await.is_err());
    }

    #[test]
    fn test_surface_builders() {
        let surface = FrameworkSurface::new()
            .with_resource(CounterResource)
            .with_ephemeral_resource(Lease);
        assert_eq!(surface.resources.len(), 1);
        assert_eq!(surface.ephemeral_resources[0].type_name(), "test_lease");
        assert!(surface.actions.is_empty());
    }
}
