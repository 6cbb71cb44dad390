//! One endpoint in front of both surfaces.
//!
//! The mux builds a routing table keyed by component kind and type name,
//! each entry tagged with its owning surface. A name registered twice for
//! the same kind is rejected when the table is built. `Configure` stores a
//! single [`CredentialContext`] shared by every callback; each RPC runs
//! under a child of the root cancellation token and the component's
//! timeout.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{self, env, EnvSource, ProcessEnv, ProviderConfig};
use crate::diff;
use crate::error::ProviderError;
use crate::framework::{AnyAction, AnyDataSource, AnyEphemeralResource, AnyResource, FrameworkSurface};
use crate::legacy::{LegacyDataSource, LegacyResource, LegacySurface, ResourceData, ID_KEY};
use crate::meta::{CredentialContext, OpContext};
use crate::schema::{Diagnostic, ProviderSchema, Schema};
use crate::server::ProviderService;
use crate::types::{
    ComponentInfo, ComponentKind, EphemeralResult, ImportedResource, Operation, PlanResult,
    ProviderMetadata, Surface, Timeouts,
};
use crate::validation;

#[derive(Clone)]
enum Handler {
    LegacyResource(Arc<dyn LegacyResource>),
    LegacyDataSource(Arc<dyn LegacyDataSource>),
    Resource(Arc<dyn AnyResource>),
    DataSource(Arc<dyn AnyDataSource>),
    EphemeralResource(Arc<dyn AnyEphemeralResource>),
    Action(Arc<dyn AnyAction>),
}

impl Handler {
    fn surface(&self) -> Surface {
        match self {
            Self::LegacyResource(_) | Self::LegacyDataSource(_) => Surface::Legacy,
            _ => Surface::Framework,
        }
    }

    fn kind(&self) -> ComponentKind {
        match self {
            Self::LegacyResource(_) | Self::Resource(_) => ComponentKind::Resource,
            Self::LegacyDataSource(_) | Self::DataSource(_) => ComponentKind::DataSource,
            Self::EphemeralResource(_) => ComponentKind::EphemeralResource,
            Self::Action(_) => ComponentKind::Action,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::LegacyResource(h) => h.type_name(),
            Self::LegacyDataSource(h) => h.type_name(),
            Self::Resource(h) => h.type_name(),
            Self::DataSource(h) => h.type_name(),
            Self::EphemeralResource(h) => h.type_name(),
            Self::Action(h) => h.type_name(),
        }
    }

    fn schema(&self) -> Schema {
        match self {
            Self::LegacyResource(h) => h.schema(),
            Self::LegacyDataSource(h) => h.schema(),
            Self::Resource(h) => h.schema(),
            Self::DataSource(h) => h.schema(),
            Self::EphemeralResource(h) => h.schema(),
            Self::Action(h) => h.schema(),
        }
    }

    fn timeouts(&self) -> Timeouts {
        match self {
            Self::LegacyResource(h) => h.timeouts(),
            Self::LegacyDataSource(h) => h.timeouts(),
            Self::Resource(h) => h.timeouts(),
            Self::DataSource(h) => h.timeouts(),
            Self::EphemeralResource(h) => h.timeouts(),
            Self::Action(h) => h.timeouts(),
        }
    }

    fn beta(&self) -> bool {
        match self {
            Self::LegacyResource(h) => h.beta(),
            Self::LegacyDataSource(h) => h.beta(),
            Self::Resource(h) => h.beta(),
            Self::DataSource(h) => h.beta(),
            Self::EphemeralResource(h) => h.beta(),
            Self::Action(h) => h.beta(),
        }
    }
}

struct Route {
    handler: Handler,
    schema: Schema,
    timeouts: Timeouts,
}

/// Builder for [`MuxProvider`].
pub struct MuxBuilder {
    provider_schema: Schema,
    legacy: LegacySurface,
    framework: FrameworkSurface,
    env: Arc<dyn EnvSource>,
    http: Option<reqwest::Client>,
    waiter_interval: Option<Duration>,
}

impl MuxBuilder {
    /// Set the legacy surface.
    pub fn legacy(mut self, surface: LegacySurface) -> Self {
        self.legacy = surface;
        self
    }

    /// Set the framework surface.
    pub fn framework(mut self, surface: FrameworkSurface) -> Self {
        self.framework = surface;
        self
    }

    /// Read environment variables from `env` instead of the process.
    pub fn env(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Use `http` for every API call.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Override the waiter polling interval.
    pub fn waiter_interval(mut self, interval: Duration) -> Self {
        self.waiter_interval = Some(interval);
        self
    }

    /// Build the routing table.
    ///
    /// Beta components are skipped unless `SCW_ENABLE_BETA` is set. Fails
    /// with [`ProviderError::DuplicateComponent`] when a kind and name pair
    /// is registered twice.
    pub fn build(self) -> Result<MuxProvider, ProviderError> {
        let beta_enabled = self.env.var(env::ENABLE_BETA).is_some();

        let handlers = self
            .legacy
            .resources
            .into_iter()
            .map(Handler::LegacyResource)
            .chain(self.legacy.data_sources.into_iter().map(Handler::LegacyDataSource))
            .chain(self.framework.resources.into_iter().map(Handler::Resource))
            .chain(self.framework.data_sources.into_iter().map(Handler::DataSource))
            .chain(
                self.framework
                    .ephemeral_resources
                    .into_iter()
                    .map(Handler::EphemeralResource),
            )
            .chain(self.framework.actions.into_iter().map(Handler::Action));

        let mut routes: BTreeMap<(ComponentKind, String), Route> = BTreeMap::new();
        for handler in handlers {
            let name = handler.type_name().to_string();
            if handler.beta() && !beta_enabled {
                debug!(type_name = %name, kind = %handler.kind(), "skipping beta component");
                continue;
            }
            let key = (handler.kind(), name);
            if let Some(existing) = routes.get(&key) {
                return Err(ProviderError::DuplicateComponent {
                    name: key.1,
                    first: existing.handler.surface().to_string(),
                    second: handler.surface().to_string(),
                });
            }
            routes.insert(
                key,
                Route {
                    schema: handler.schema(),
                    timeouts: handler.timeouts(),
                    handler,
                },
            );
        }

        info!(components = routes.len(), beta_enabled, "component table built");
        Ok(MuxProvider {
            provider_schema: self.provider_schema,
            routes,
            context: OnceLock::new(),
            root: CancellationToken::new(),
            env: self.env,
            http: self.http,
            waiter_interval: self.waiter_interval,
        })
    }
}

/// Routes every RPC to the surface that owns the component.
pub struct MuxProvider {
    provider_schema: Schema,
    routes: BTreeMap<(ComponentKind, String), Route>,
    context: OnceLock<Arc<CredentialContext>>,
    root: CancellationToken,
    env: Arc<dyn EnvSource>,
    http: Option<reqwest::Client>,
    waiter_interval: Option<Duration>,
}

impl MuxProvider {
    /// Start building a mux around the provider block schema.
    pub fn builder(provider_schema: Schema) -> MuxBuilder {
        MuxBuilder {
            provider_schema,
            legacy: LegacySurface::default(),
            framework: FrameworkSurface::default(),
            env: Arc::new(ProcessEnv),
            http: None,
            waiter_interval: None,
        }
    }

    /// The credential context, once configured.
    pub fn context(&self) -> Option<&Arc<CredentialContext>> {
        self.context.get()
    }

    /// Surface owning `name` under `kind`.
    pub fn surface_of(&self, kind: ComponentKind, name: &str) -> Option<Surface> {
        self.routes
            .get(&(kind, name.to_string()))
            .map(|r| r.handler.surface())
    }

    fn route(&self, kind: ComponentKind, name: &str) -> Result<&Route, ProviderError> {
        self.routes
            .get(&(kind, name.to_string()))
            .ok_or_else(|| ProviderError::UnknownResource(format!("{kind} {name}")))
    }

    fn schemas_of(&self, kind: ComponentKind) -> std::collections::HashMap<String, Schema> {
        self.routes
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, name), route)| (name.clone(), route.schema.clone()))
            .collect()
    }

    /// Run `call` under a child cancellation token and the timeout that
    /// `route` declares for `op`.
    async fn run<T, F, Fut>(&self, route: &Route, op: Operation, call: F) -> Result<T, ProviderError>
    where
        F: FnOnce(OpContext) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let meta = self.context.get().cloned().ok_or(ProviderError::NotConfigured)?;
        let timeout = route.timeouts.get(op);
        let cancel = self.root.child_token();
        let _guard = cancel.clone().drop_guard();
        let name = route.handler.type_name();
        debug!(type_name = name, operation = %op, ?timeout, "running operation");

        let ctx = OpContext::new(meta, cancel.clone(), timeout);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = tokio::time::timeout(timeout, call(ctx)) => match result {
                Ok(result) => result,
                Err(_) => {
                    warn!(type_name = name, operation = %op, ?timeout, "operation timed out");
                    Err(ProviderError::DeadlineExceeded(format!(
                        "{op} of {name} did not finish within {}",
                        humantime::format_duration(timeout)
                    )))
                },
            },
        }
    }
}

fn missing_id(name: &str, op: Operation) -> ProviderError {
    ProviderError::InvalidRequest(format!("{op} of {name} returned no identifier"))
}

/// Keep the identifier of an existing resource in its plan.
fn carry_id(plan: &mut PlanResult, prior: Option<&Value>) {
    let Some(id) = prior.and_then(|p| p.get(ID_KEY)).filter(|v| !v.is_null()) else {
        return;
    };
    if let Some(planned) = plan.planned_state.as_object_mut() {
        let missing = planned.get(ID_KEY).map_or(true, Value::is_null);
        if missing {
            planned.insert(ID_KEY.to_string(), id.clone());
        }
    }
}

#[async_trait::async_trait]
impl ProviderService for MuxProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema {
            provider: self.provider_schema.clone(),
            resources: self.schemas_of(ComponentKind::Resource),
            data_sources: self.schemas_of(ComponentKind::DataSource),
            ephemeral_resources: self.schemas_of(ComponentKind::EphemeralResource),
            actions: self.schemas_of(ComponentKind::Action),
        }
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            components: self
                .routes
                .iter()
                .map(|((kind, name), route)| ComponentInfo {
                    type_name: name.clone(),
                    kind: *kind,
                    surface: route.handler.surface(),
                })
                .collect(),
            capabilities: Default::default(),
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validation::validate(&self.provider_schema, &config))
    }

    async fn configure(
        &self,
        config: Value,
        terraform_version: &str,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        if self.context.get().is_some() {
            return Err(ProviderError::InvalidRequest("provider is already configured".to_string()));
        }

        let diagnostics = validation::validate(&self.provider_schema, &config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Ok(diagnostics);
        }

        let block: ProviderConfig = if config.is_null() {
            ProviderConfig::default()
        } else {
            serde_json::from_value(config)?
        };
        let resolution = config::resolve(&block, self.env.as_ref())?;

        let mut ctx = CredentialContext::new(
            resolution.profile,
            terraform_version,
            self.http.clone(),
            self.env.as_ref(),
        )?;
        if let Some(interval) = self.waiter_interval {
            ctx = ctx.with_waiter_interval(interval);
        }
        info!(
            region = ?ctx.default_region(),
            zone = ?ctx.default_zone(),
            profile = ?ctx.profile().profile_name,
            "provider configured"
        );

        if self.context.set(Arc::new(ctx)).is_err() {
            return Err(ProviderError::InvalidRequest("provider is already configured".to_string()));
        }

        let mut out = diagnostics;
        if let Some(warning) = resolution.report.to_diagnostic() {
            warn!(fields = resolution.report.entries.len(), "multiple credential sources");
            out.push(warning);
        }
        Ok(out)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("cancelling running operations");
        self.root.cancel();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        kind: ComponentKind,
        type_name: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let route = self.route(kind, type_name)?;
        Ok(validation::validate(&route.schema, &config))
    }

    async fn plan(
        &self,
        type_name: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let route = self.route(ComponentKind::Resource, type_name)?;
        if proposed_state.is_null() {
            return Ok(PlanResult::no_change(Value::Null));
        }
        let mut plan = diff::plan_resource(&route.schema, prior_state.as_ref(), &proposed_state);
        carry_id(&mut plan, prior_state.as_ref());
        Ok(plan)
    }

    async fn create(&self, type_name: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let route = self.route(ComponentKind::Resource, type_name)?;
        match &route.handler {
            Handler::LegacyResource(h) => {
                let h = Arc::clone(h);
                // Shared so the identifier survives a failure, timeout or
                // cancellation once the remote object exists.
                let data = Arc::new(tokio::sync::Mutex::new(ResourceData::new(planned_state)));
                let shared = Arc::clone(&data);
                let result = self
                    .run(route, Operation::Create, |op| async move {
                        let mut data = shared.lock().await;
                        h.create(&op, &mut data).await
                    })
                    .await;

                let data = data.lock().await;
                match (result, data.id()) {
                    (Ok(()), Some(_)) => Ok(data.to_value()),
                    (Ok(()), None) => Err(missing_id(type_name, Operation::Create)),
                    (Err(e), Some(id)) => {
                        warn!(type_name, id, error = %e, "create failed after the remote object was created");
                        Err(ProviderError::with_partial_state(data.to_value(), e))
                    },
                    (Err(e), None) => Err(e),
                }
            },
            Handler::Resource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Create, |op| async move {
                    h.create(&op, planned_state).await
                })
                .await
            },
            _ => Err(ProviderError::UnknownResource(type_name.to_string())),
        }
    }

    async fn read(&self, type_name: &str, current_state: Value) -> Result<Option<Value>, ProviderError> {
        let route = self.route(ComponentKind::Resource, type_name)?;
        match &route.handler {
            Handler::LegacyResource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Read, |op| async move {
                    let mut data = ResourceData::new(current_state);
                    h.read(&op, &mut data).await?;
                    Ok(data.into_state())
                })
                .await
            },
            Handler::Resource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Read, |op| async move {
                    h.read(&op, current_state).await
                })
                .await
            },
            _ => Err(ProviderError::UnknownResource(type_name.to_string())),
        }
    }

    async fn update(
        &self,
        type_name: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let route = self.route(ComponentKind::Resource, type_name)?;
        match &route.handler {
            Handler::LegacyResource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Update, |op| async move {
                    let mut data = ResourceData::with_prior(planned_state, prior_state);
                    h.update(&op, &mut data).await?;
                    data.into_state().ok_or_else(|| missing_id(type_name, Operation::Update))
                })
                .await
            },
            Handler::Resource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Update, |op| async move {
                    h.update(&op, prior_state, planned_state).await
                })
                .await
            },
            _ => Err(ProviderError::UnknownResource(type_name.to_string())),
        }
    }

    async fn delete(&self, type_name: &str, current_state: Value) -> Result<(), ProviderError> {
        let route = self.route(ComponentKind::Resource, type_name)?;
        match &route.handler {
            Handler::LegacyResource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Delete, |op| async move {
                    h.delete(&op, &ResourceData::new(current_state)).await
                })
                .await
            },
            Handler::Resource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Delete, |op| async move {
                    h.delete(&op, current_state).await
                })
                .await
            },
            _ => Err(ProviderError::UnknownResource(type_name.to_string())),
        }
    }

    async fn import_resource(&self, type_name: &str, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
        let route = self.route(ComponentKind::Resource, type_name)?;
        let state = match &route.handler {
            Handler::LegacyResource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Import, |op| async move {
                    let mut data = ResourceData::from_id(id);
                    h.import(&op, &mut data).await?;
                    data.into_state().ok_or_else(|| missing_id(type_name, Operation::Import))
                })
                .await?
            },
            Handler::Resource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Import, |op| async move { h.import(&op, id).await })
                    .await?
            },
            _ => return Err(ProviderError::UnknownResource(type_name.to_string())),
        };
        Ok(vec![ImportedResource::new(type_name, state)])
    }

    async fn read_data_source(&self, type_name: &str, config: Value) -> Result<Value, ProviderError> {
        let route = self.route(ComponentKind::DataSource, type_name)?;
        match &route.handler {
            Handler::LegacyDataSource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Read, |op| async move {
                    let mut data = ResourceData::new(config);
                    h.read(&op, &mut data).await?;
                    Ok(data.to_value())
                })
                .await
            },
            Handler::DataSource(h) => {
                let h = Arc::clone(h);
                self.run(route, Operation::Read, |op| async move { h.read(&op, config).await })
                    .await
            },
            _ => Err(ProviderError::UnknownResource(type_name.to_string())),
        }
    }

    async fn open_ephemeral_resource(
        &self,
        type_name: &str,
        config: Value,
    ) -> Result<EphemeralResult, ProviderError> {
        let route = self.route(ComponentKind::EphemeralResource, type_name)?;
        let Handler::EphemeralResource(h) = &route.handler else {
            return Err(ProviderError::UnknownResource(type_name.to_string()));
        };
        let h = Arc::clone(h);
        self.run(route, Operation::Read, |op| async move { h.open(&op, config).await })
            .await
    }

    async fn close_ephemeral_resource(
        &self,
        type_name: &str,
        private: Option<Value>,
    ) -> Result<(), ProviderError> {
        let route = self.route(ComponentKind::EphemeralResource, type_name)?;
        let Handler::EphemeralResource(h) = &route.handler else {
            return Err(ProviderError::UnknownResource(type_name.to_string()));
        };
        let h = Arc::clone(h);
        self.run(route, Operation::Read, |op| async move { h.close(&op, private).await })
            .await
    }

    async fn invoke_action(&self, type_name: &str, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let route = self.route(ComponentKind::Action, type_name)?;
        let Handler::Action(h) = &route.handler else {
            return Err(ProviderError::UnknownResource(type_name.to_string()));
        };
        let h = Arc::clone(h);
        self.run(route, Operation::Invoke, |op| async move { h.invoke(&op, config).await })
            .await
    }
}
