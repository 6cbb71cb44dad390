//! Serving a provider over gRPC.
//!
//! [`ProviderService`] is the plain-Rust provider interface; a private
//! wrapper adapts it to the generated tonic trait. [`serve`] binds a port,
//! prints the handshake and runs until SIGTERM/SIGINT.
//!
//! # Signal Handling
//!
//! When a signal arrives the server stops accepting connections, waits for
//! in-flight requests up to [`ServeOptions::shutdown_timeout`] and then
//! calls [`ProviderService::stop`], which cancels every running operation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated;
use crate::schema::{Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{
    ComponentKind, EphemeralResult, ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX,
    PROTOCOL_VERSIONS,
};

/// The provider as seen by the server.
///
/// Every method takes and returns JSON values; the server decodes requests
/// and encodes responses. Errors are reported to the host as diagnostics.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Schemas of the provider block and every component.
    fn schema(&self) -> ProviderSchema;

    /// Every component with its kind and owning surface.
    fn metadata(&self) -> ProviderMetadata;

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider block before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Build the credential context. Warnings are returned as diagnostics.
    async fn configure(
        &self,
        config: Value,
        terraform_version: &str,
    ) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Cancel every running operation.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate the configuration of any component kind.
    async fn validate_resource_config(
        &self,
        kind: ComponentKind,
        type_name: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (kind, type_name, config);
        Ok(vec![])
    }

    /// Plan a resource change. `prior_state` is `None` on create.
    async fn plan(
        &self,
        type_name: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a resource.
    ///
    /// A failure after the remote object exists should be returned as
    /// [`ProviderError::PartialState`] so the identifier reaches the host.
    async fn create(&self, type_name: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Refresh a resource; `None` when it no longer exists.
    async fn read(&self, type_name: &str, current_state: Value) -> Result<Option<Value>, ProviderError>;

    /// Update a resource.
    async fn update(
        &self,
        type_name: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, type_name: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing infrastructure by identifier.
    async fn import_resource(&self, type_name: &str, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!("import of {type_name}")))
    }

    // =========================================================================
    // Data Sources, Ephemeral Resources & Actions
    // =========================================================================

    /// Read a data source.
    async fn read_data_source(&self, type_name: &str, config: Value) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!("data source {type_name}")))
    }

    /// Open an ephemeral resource.
    async fn open_ephemeral_resource(
        &self,
        type_name: &str,
        config: Value,
    ) -> Result<EphemeralResult, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!("ephemeral resource {type_name}")))
    }

    /// Close an ephemeral resource.
    async fn close_ephemeral_resource(
        &self,
        type_name: &str,
        private: Option<Value>,
    ) -> Result<(), ProviderError> {
        let _ = (type_name, private);
        Ok(())
    }

    /// Invoke an action.
    async fn invoke_action(&self, type_name: &str, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!("action {type_name}")))
    }
}

/// Wrapper that implements the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

pub(crate) fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<generated::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| generated::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => generated::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => generated::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

/// A failed operation as a single error diagnostic naming the component.
pub(crate) fn error_to_diagnostics(type_name: &str, err: &ProviderError) -> Vec<generated::Diagnostic> {
    let mut diagnostic = Diagnostic::from(err);
    if !type_name.is_empty() && diagnostic.detail.is_none() {
        diagnostic = diagnostic.with_detail(format!("while handling {type_name}"));
    }
    diagnostics_to_proto(vec![diagnostic])
}

fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

fn decode(bytes: &[u8]) -> Result<Value, ProviderError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(bytes)?)
}

fn encode(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

pub(crate) fn schema_to_proto(schema: &Schema) -> generated::Schema {
    generated::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &Block) -> generated::Block {
    let mut attributes: Vec<generated::Attribute> = block
        .attributes
        .iter()
        .map(|(name, attr)| generated::Attribute {
            name: name.clone(),
            r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
            required: attr.flags.required,
            optional: attr.flags.optional,
            computed: attr.flags.computed,
            sensitive: attr.flags.sensitive,
            description: attr.description.clone().unwrap_or_default(),
            force_new: attr.force_new,
            default_value: attr.default.as_ref().map(encode).unwrap_or_default(),
        })
        .collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut block_types: Vec<generated::NestedBlock> = block
        .blocks
        .iter()
        .map(|(name, nested)| generated::NestedBlock {
            type_name: name.clone(),
            block: Some(block_to_proto(&nested.block)),
            nesting_mode: match nested.nesting_mode {
                BlockNestingMode::Single => generated::nested_block::NestingMode::Single as i32,
                BlockNestingMode::List => generated::nested_block::NestingMode::List as i32,
                BlockNestingMode::Set => generated::nested_block::NestingMode::Set as i32,
                BlockNestingMode::Map => generated::nested_block::NestingMode::Map as i32,
            },
            min_items: nested.min_items as i32,
            max_items: nested.max_items as i32,
        })
        .collect();
    block_types.sort_by(|a, b| a.type_name.cmp(&b.type_name));

    generated::Block {
        attributes,
        block_types,
        description: block.description.clone().unwrap_or_default(),
    }
}

fn schemas_to_proto(
    schemas: &std::collections::HashMap<String, Schema>,
) -> std::collections::HashMap<String, generated::Schema> {
    schemas
        .iter()
        .map(|(k, v)| (k.clone(), schema_to_proto(v)))
        .collect()
}

#[tonic::async_trait]
impl<P: ProviderService> generated::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip(self, _request), name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: tonic::Request<generated::GetMetadataRequest>,
    ) -> Result<tonic::Response<generated::GetMetadataResponse>, tonic::Status> {
        debug!("GetMetadata called");
        let metadata = self.provider.metadata();
        info!(components = metadata.components.len(), "GetMetadata completed");
        Ok(tonic::Response::new(generated::GetMetadataResponse {
            server_capabilities: Some(generated::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            components: metadata.components.into_iter().map(Into::into).collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: tonic::Request<generated::GetSchemaRequest>,
    ) -> Result<tonic::Response<generated::GetSchemaResponse>, tonic::Status> {
        debug!("GetSchema called");
        let schema = self.provider.schema();
        info!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            ephemeral_resources = schema.ephemeral_resources.len(),
            actions = schema.actions.len(),
            "GetSchema completed"
        );
        Ok(tonic::Response::new(generated::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schemas_to_proto(&schema.resources),
            data_sources: schemas_to_proto(&schema.data_sources),
            ephemeral_resources: schemas_to_proto(&schema.ephemeral_resources),
            actions: schemas_to_proto(&schema.actions),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<generated::ValidateProviderConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateProviderConfigResponse>, tonic::Status> {
        debug!("ValidateProviderConfig called");
        let req = request.into_inner();
        let result = match decode(&req.config) {
            Ok(config) => self.provider.validate_provider_config(config).await,
            Err(e) => Err(e),
        };

        let diagnostics = match result {
            Ok(diagnostics) => {
                if has_errors(&diagnostics) {
                    warn!(diagnostics = diagnostics.len(), "ValidateProviderConfig completed with errors");
                } else {
                    info!("ValidateProviderConfig completed successfully");
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "ValidateProviderConfig failed");
                error_to_diagnostics("", &e)
            },
        };
        Ok(tonic::Response::new(generated::ValidateProviderConfigResponse { diagnostics }))
    }

    #[instrument(skip(self, request), name = "grpc.configure")]
    async fn configure(
        &self,
        request: tonic::Request<generated::ConfigureRequest>,
    ) -> Result<tonic::Response<generated::ConfigureResponse>, tonic::Status> {
        debug!("Configure called");
        let req = request.into_inner();
        let result = match decode(&req.config) {
            Ok(config) => self.provider.configure(config, &req.terraform_version).await,
            Err(e) => Err(e),
        };

        let diagnostics = match result {
            Ok(diagnostics) => {
                if has_errors(&diagnostics) {
                    warn!(diagnostics = diagnostics.len(), "Configure completed with errors");
                } else {
                    info!(warnings = diagnostics.len(), "Configure completed successfully");
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "Configure failed");
                error_to_diagnostics("", &e)
            },
        };
        Ok(tonic::Response::new(generated::ConfigureResponse { diagnostics }))
    }

    #[instrument(skip(self, _request), name = "grpc.stop")]
    async fn stop(
        &self,
        _request: tonic::Request<generated::StopRequest>,
    ) -> Result<tonic::Response<generated::StopResponse>, tonic::Status> {
        info!("Stop called");
        match self.provider.stop().await {
            Ok(()) => {
                info!("Stop completed successfully");
                Ok(tonic::Response::new(generated::StopResponse { error: String::new() }))
            },
            Err(e) => {
                error!(error = %e, "Stop failed");
                Ok(tonic::Response::new(generated::StopResponse { error: e.to_string() }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<generated::ValidateResourceConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateResourceConfigResponse>, tonic::Status> {
        let req = request.into_inner();
        let kind = ComponentKind::from_proto(req.kind);
        debug!(type_name = %req.resource_type, %kind, "ValidateResourceConfig called");
        let result = match decode(&req.config) {
            Ok(config) => {
                self.provider
                    .validate_resource_config(kind, &req.resource_type, config)
                    .await
            },
            Err(e) => Err(e),
        };

        let diagnostics = match result {
            Ok(diagnostics) => {
                if has_errors(&diagnostics) {
                    warn!(type_name = %req.resource_type, diagnostics = diagnostics.len(), "ValidateResourceConfig completed with errors");
                } else {
                    info!(type_name = %req.resource_type, "ValidateResourceConfig completed successfully");
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(type_name = %req.resource_type, error = %e, "ValidateResourceConfig failed");
                error_to_diagnostics(&req.resource_type, &e)
            },
        };
        Ok(tonic::Response::new(generated::ValidateResourceConfigResponse { diagnostics }))
    }

    #[instrument(skip(self, request), name = "grpc.plan")]
    async fn plan(
        &self,
        request: tonic::Request<generated::PlanRequest>,
    ) -> Result<tonic::Response<generated::PlanResponse>, tonic::Status> {
        let req = request.into_inner();
        let is_create = req.prior_state.is_empty();
        debug!(type_name = %req.resource_type, is_create, "Plan called");

        let result = async {
            let prior_state = if is_create { None } else { Some(decode(&req.prior_state)?) };
            let proposed_state = decode(&req.proposed_state)?;
            let config = decode(&req.config)?;
            self.provider
                .plan(&req.resource_type, prior_state, proposed_state, config)
                .await
        }
        .await;

        match result {
            Ok(result) => {
                info!(
                    type_name = %req.resource_type,
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "Plan completed"
                );
                Ok(tonic::Response::new(generated::PlanResponse {
                    planned_state: encode(&result.planned_state),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(type_name = %req.resource_type, error = %e, "Plan failed");
                Ok(tonic::Response::new(generated::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_diagnostics(&req.resource_type, &e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.create")]
    async fn create(
        &self,
        request: tonic::Request<generated::CreateRequest>,
    ) -> Result<tonic::Response<generated::CreateResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(type_name = %req.resource_type, "Create called");
        let result = match decode(&req.planned_state) {
            Ok(planned) => self.provider.create(&req.resource_type, planned).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(state) => {
                info!(type_name = %req.resource_type, "Create completed successfully");
                Ok(tonic::Response::new(generated::CreateResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(type_name = %req.resource_type, error = %e, "Create failed");
                let (partial, e) = e.into_parts();
                Ok(tonic::Response::new(generated::CreateResponse {
                    state: partial.as_ref().map(encode).unwrap_or_default(),
                    diagnostics: error_to_diagnostics(&req.resource_type, &e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.read")]
    async fn read(
        &self,
        request: tonic::Request<generated::ReadRequest>,
    ) -> Result<tonic::Response<generated::ReadResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.resource_type, "Read called");
        let result = match decode(&req.current_state) {
            Ok(current) => self.provider.read(&req.resource_type, current).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(state) => {
                debug!(type_name = %req.resource_type, gone = state.is_none(), "Read completed successfully");
                Ok(tonic::Response::new(generated::ReadResponse {
                    state: state.as_ref().map(encode).unwrap_or_default(),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(type_name = %req.resource_type, error = %e, "Read failed");
                Ok(tonic::Response::new(generated::ReadResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(&req.resource_type, &e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.update")]
    async fn update(
        &self,
        request: tonic::Request<generated::UpdateRequest>,
    ) -> Result<tonic::Response<generated::UpdateResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(type_name = %req.resource_type, "Update called");
        let result = async {
            let prior = decode(&req.prior_state)?;
            let planned = decode(&req.planned_state)?;
            self.provider.update(&req.resource_type, prior, planned).await
        }
        .await;

        match result {
            Ok(state) => {
                info!(type_name = %req.resource_type, "Update completed successfully");
                Ok(tonic::Response::new(generated::UpdateResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(type_name = %req.resource_type, error = %e, "Update failed");
                Ok(tonic::Response::new(generated::UpdateResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(&req.resource_type, &e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.delete")]
    async fn delete(
        &self,
        request: tonic::Request<generated::DeleteRequest>,
    ) -> Result<tonic::Response<generated::DeleteResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(type_name = %req.resource_type, "Delete called");
        let result = match decode(&req.current_state) {
            Ok(current) => self.provider.delete(&req.resource_type, current).await,
            Err(e) => Err(e),
        };

        let diagnostics = match result {
            Ok(()) => {
                info!(type_name = %req.resource_type, "Delete completed successfully");
                vec![]
            },
            Err(e) => {
                error!(type_name = %req.resource_type, error = %e, "Delete failed");
                error_to_diagnostics(&req.resource_type, &e)
            },
        };
        Ok(tonic::Response::new(generated::DeleteResponse { diagnostics }))
    }

    #[instrument(skip(self, request), name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: tonic::Request<generated::ImportResourceStateRequest>,
    ) -> Result<tonic::Response<generated::ImportResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(type_name = %req.resource_type, id = %req.id, "ImportResourceState called");

        match self.provider.import_resource(&req.resource_type, &req.id).await {
            Ok(imported) => {
                info!(
                    type_name = %req.resource_type,
                    id = %req.id,
                    imported_count = imported.len(),
                    "ImportResourceState completed"
                );
                Ok(tonic::Response::new(generated::ImportResourceStateResponse {
                    imported: imported
                        .into_iter()
                        .map(|r| generated::ImportedResource {
                            resource_type: r.resource_type,
                            state: encode(&r.state),
                        })
                        .collect(),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(type_name = %req.resource_type, id = %req.id, error = %e, "ImportResourceState failed");
                Ok(tonic::Response::new(generated::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: error_to_diagnostics(&req.resource_type, &e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: tonic::Request<generated::ReadDataSourceRequest>,
    ) -> Result<tonic::Response<generated::ReadDataSourceResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.data_source_type, "ReadDataSource called");
        let result = match decode(&req.config) {
            Ok(config) => self.provider.read_data_source(&req.data_source_type, config).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(state) => {
                info!(type_name = %req.data_source_type, "ReadDataSource completed successfully");
                Ok(tonic::Response::new(generated::ReadDataSourceResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(type_name = %req.data_source_type, error = %e, "ReadDataSource failed");
                Ok(tonic::Response::new(generated::ReadDataSourceResponse {
                    state: vec![],
                    diagnostics: error_to_diagnostics(&req.data_source_type, &e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.open_ephemeral_resource")]
    async fn open_ephemeral_resource(
        &self,
        request: tonic::Request<generated::OpenEphemeralResourceRequest>,
    ) -> Result<tonic::Response<generated::OpenEphemeralResourceResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "OpenEphemeralResource called");
        let result = match decode(&req.config) {
            Ok(config) => self.provider.open_ephemeral_resource(&req.type_name, config).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(opened) => {
                info!(type_name = %req.type_name, "OpenEphemeralResource completed successfully");
                Ok(tonic::Response::new(generated::OpenEphemeralResourceResponse {
                    result: encode(&opened.result),
                    private: opened.private.as_ref().map(encode).unwrap_or_default(),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "OpenEphemeralResource failed");
                Ok(tonic::Response::new(generated::OpenEphemeralResourceResponse {
                    result: vec![],
                    private: vec![],
                    diagnostics: error_to_diagnostics(&req.type_name, &e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.close_ephemeral_resource")]
    async fn close_ephemeral_resource(
        &self,
        request: tonic::Request<generated::CloseEphemeralResourceRequest>,
    ) -> Result<tonic::Response<generated::CloseEphemeralResourceResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "CloseEphemeralResource called");
        let result = async {
            let private = if req.private.is_empty() {
                None
            } else {
                Some(decode(&req.private)?)
            };
            self.provider.close_ephemeral_resource(&req.type_name, private).await
        }
        .await;

        let diagnostics = match result {
            Ok(()) => {
                info!(type_name = %req.type_name, "CloseEphemeralResource completed successfully");
                vec![]
            },
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "CloseEphemeralResource failed");
                error_to_diagnostics(&req.type_name, &e)
            },
        };
        Ok(tonic::Response::new(generated::CloseEphemeralResourceResponse { diagnostics }))
    }

    #[instrument(skip(self, request), name = "grpc.invoke_action")]
    async fn invoke_action(
        &self,
        request: tonic::Request<generated::InvokeActionRequest>,
    ) -> Result<tonic::Response<generated::InvokeActionResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(type_name = %req.action_type, "InvokeAction called");
        let result = match decode(&req.config) {
            Ok(config) => self.provider.invoke_action(&req.action_type, config).await,
            Err(e) => Err(e),
        };

        let diagnostics = match result {
            Ok(diagnostics) => {
                if has_errors(&diagnostics) {
                    warn!(type_name = %req.action_type, diagnostics = diagnostics.len(), "InvokeAction completed with errors");
                } else {
                    info!(type_name = %req.action_type, "InvokeAction completed successfully");
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(type_name = %req.action_type, error = %e, "InvokeAction failed");
                error_to_diagnostics(&req.action_type, &e)
            },
        };
        Ok(tonic::Response::new(generated::InvokeActionResponse { diagnostics }))
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Timeout for graceful shutdown. After receiving a shutdown signal,
    /// the server will wait this long for in-flight requests to complete.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// The handshake line: `SCW_PROVIDER|5,6|<address>`.
pub fn handshake_line(addr: SocketAddr) -> String {
    let versions: Vec<String> = PROTOCOL_VERSIONS.iter().map(u32::to_string).collect();
    format!("{}|{}|{}", HANDSHAKE_PREFIX, versions.join(","), addr)
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// On Unix, this waits for SIGTERM or SIGINT.
/// On Windows, this waits for CTRL+C.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
        info!("Received CTRL+C, initiating graceful shutdown");
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::future::pending::<()>().await;
    }
}

/// Serve a provider on an ephemeral local port.
///
/// Prints the handshake to stdout, then serves until a shutdown signal.
/// For custom configuration, use [`serve_with_options`].
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    serve_on_listener(provider, listener, addr, options).await
}

/// Serve a provider on a specific address.
pub async fn serve_on<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

/// Serve a provider on a specific address with custom options.
pub async fn serve_on_with_options<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    serve_on_listener(provider, listener, actual_addr, options).await
}

async fn serve_on_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries only the handshake; logs go to stderr
    println!("{}", handshake_line(addr));

    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let provider_for_shutdown = Arc::clone(&provider);

    let grpc_service = ProviderGrpcService { provider };
    let server = generated::provider_server::ProviderServer::new(grpc_service);

    let server_future = Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            wait_for_shutdown_signal(),
        );

    match tokio::time::timeout(options.shutdown_timeout, server_future).await {
        Ok(Ok(())) => {
            info!("Server shutdown complete");
        },
        Ok(Err(e)) => {
            error!(error = %e, "Server error during shutdown");
            return Err(e.into());
        },
        Err(_) => {
            warn!(
                timeout = ?options.shutdown_timeout,
                "Shutdown timeout exceeded, forcing shutdown"
            );
        },
    }

    debug!("Calling provider stop()");
    if let Err(e) = provider_for_shutdown.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }

    info!("Provider shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, NestedBlock};
    use serde_json::json;

    #[test]
    fn test_handshake_line() {
        let addr: SocketAddr = "127.0.0.1:50051".parse().unwrap();
        assert_eq!(handshake_line(addr), "SCW_PROVIDER|5,6|127.0.0.1:50051");
    }

    #[test]
    fn test_schema_to_proto_is_sorted() {
        let schema = Schema::v0()
            .with_attribute("zone", Attribute::optional_computed_string().with_force_new())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("size_in_gb", Attribute::optional_int64().with_default(json!(20)))
            .with_block(
                "snapshot",
                NestedBlock::single(Block::new().with_attribute("id", Attribute::required_string())),
            );

        let proto = schema_to_proto(&schema);
        let block = proto.block.unwrap();
        let names: Vec<&str> = block.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["name", "size_in_gb", "zone"]);
        assert!(block.attributes[2].force_new);
        assert_eq!(block.attributes[1].default_value, b"20".to_vec());
        assert_eq!(block.block_types[0].max_items, 1);
        assert_eq!(
            block.block_types[0].nesting_mode,
            generated::nested_block::NestingMode::Single as i32
        );
    }

    #[test]
    fn test_error_to_diagnostics() {
        let diags = error_to_diagnostics("scaleway_block_volume", &ProviderError::NoDefaultZone);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, generated::diagnostic::Severity::Error as i32);
        assert_eq!(diags[0].attribute, "zone");
        assert_eq!(diags[0].detail, "while handling scaleway_block_volume");
    }

    struct FailingCreate;

    #[async_trait::async_trait]
    impl ProviderService for FailingCreate {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new()
        }

        fn metadata(&self) -> ProviderMetadata {
            ProviderMetadata::default()
        }

        async fn configure(&self, _config: Value, _version: &str) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(vec![])
        }

        async fn plan(
            &self,
            _type_name: &str,
            _prior: Option<Value>,
            proposed: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            Ok(PlanResult::no_change(proposed))
        }

        async fn create(&self, _type_name: &str, planned: Value) -> Result<Value, ProviderError> {
            let mut state = planned;
            state["id"] = json!("fr-par-1/abc");
            Err(ProviderError::with_partial_state(state, ProviderError::Cancelled))
        }

        async fn read(&self, _type_name: &str, state: Value) -> Result<Option<Value>, ProviderError> {
            Ok(Some(state))
        }

        async fn update(&self, _type_name: &str, _prior: Value, planned: Value) -> Result<Value, ProviderError> {
            Ok(planned)
        }

        async fn delete(&self, _type_name: &str, _state: Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_create_failure_keeps_partial_state() {
        use generated::provider_server::Provider;

        let service = ProviderGrpcService {
            provider: Arc::new(FailingCreate),
        };
        let response = service
            .create(tonic::Request::new(generated::CreateRequest {
                resource_type: "scaleway_block_volume".into(),
                planned_state: br#"{"name":"vol"}"#.to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(decode(&response.state).unwrap(), json!({"name": "vol", "id": "fr-par-1/abc"}));
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(response.diagnostics[0].summary, "operation cancelled");
    }

    #[test]
    fn test_decode_empty_is_null() {
        assert_eq!(decode(b"").unwrap(), Value::Null);
        assert_eq!(decode(br#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(decode(b"{").is_err());
    }
}
