//! Error types for the Scaleway provider.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::client::ApiError;
use crate::config::ConfigError;
use crate::locality::IdError;

/// Errors that can occur while serving a provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An identifier could not be parsed.
    #[error(transparent)]
    Id(#[from] IdError),

    /// The remote API rejected or failed a call.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A resource needs a region and none is configured.
    #[error("no default region configured: set `region` on the resource, the provider block or SCW_DEFAULT_REGION")]
    NoDefaultRegion,

    /// A resource needs a zone and none is configured.
    #[error("no default zone configured: set `zone` on the resource, the provider block or SCW_DEFAULT_ZONE")]
    NoDefaultZone,

    /// A resource needs a project and none is configured.
    #[error("no default project configured: set `project_id` on the resource, the provider block or SCW_DEFAULT_PROJECT_ID")]
    NoDefaultProject,

    /// A user supplied value failed validation.
    #[error("Validation error at '{path}': {message}")]
    Validation {
        /// Attribute path of the offending value.
        path: String,
        /// Human readable message.
        message: String,
    },

    /// The waiter gave up before the resource reached a terminal state.
    #[error("timeout after {elapsed:?} waiting for {resource}; last observed state: {last_state}")]
    WaiterTimeout {
        /// Identifier of the observed resource.
        resource: String,
        /// Time spent waiting.
        elapsed: Duration,
        /// Last state reported by the API.
        last_state: String,
    },

    /// The resource reached a failed terminal state.
    #[error("{resource} reached terminal failure state '{state}': {reason}")]
    TerminalFailure {
        /// Identifier of the observed resource.
        resource: String,
        /// State reported by the API.
        state: String,
        /// Reason given by the classifier.
        reason: String,
    },

    /// The host cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation exceeded its declared timeout.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The provider has not been configured yet.
    #[error("provider is not configured: Configure must be called first")]
    NotConfigured,

    /// The requested component type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// Two surfaces registered the same component name.
    #[error("component '{name}' is registered by both the {first} and {second} surfaces")]
    DuplicateComponent {
        /// Component type name.
        name: String,
        /// Surface that registered it first.
        first: String,
        /// Surface that registered it again.
        second: String,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The component does not implement this operation.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from the host.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The operation failed after the remote object was created. `state`
    /// carries its identifier so the host keeps tracking it.
    #[error("{error}")]
    PartialState {
        /// State recorded before the failure.
        state: Box<Value>,
        /// The failure itself.
        error: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Build a validation error bound to an attribute path.
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Attach the state recorded before `error`.
    pub fn with_partial_state(state: Value, error: ProviderError) -> Self {
        Self::PartialState {
            state: Box::new(state),
            error: Box::new(error),
        }
    }

    /// Split into the partial state, if any, and the underlying error.
    pub fn into_parts(self) -> (Option<Value>, ProviderError) {
        match self {
            Self::PartialState { state, error } => (Some(*state), *error),
            other => (None, other),
        }
    }

    /// Whether the remote answered 404 for this call.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api(e) => e.is_not_found(),
            Self::PartialState { error, .. } => error.is_not_found(),
            _ => false,
        }
    }

    /// Whether the remote rejected the call because the resource is busy.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api(e) => e.is_transient(),
            Self::PartialState { error, .. } => error.is_transient(),
            _ => false,
        }
    }

    /// Attribute path this error is bound to, if any.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Self::PartialState { error, .. } => error.attribute(),
            Self::Validation { path, .. } => Some(path),
            Self::Id(_) => Some("id"),
            Self::NoDefaultRegion => Some("region"),
            Self::NoDefaultZone => Some("zone"),
            Self::NoDefaultProject => Some("project_id"),
            _ => None,
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Config(e) => tonic::Status::failed_precondition(e.to_string()),
            ProviderError::Id(e) => tonic::Status::invalid_argument(e.to_string()),
            ProviderError::Api(e) => match e.status() {
                Some(404) => tonic::Status::not_found(e.to_string()),
                Some(409) => tonic::Status::aborted(e.to_string()),
                Some(412) => tonic::Status::failed_precondition(e.to_string()),
                Some(401) | Some(403) => tonic::Status::permission_denied(e.to_string()),
                Some(429) => tonic::Status::resource_exhausted(e.to_string()),
                _ => tonic::Status::unavailable(e.to_string()),
            },
            ProviderError::NoDefaultRegion
            | ProviderError::NoDefaultZone
            | ProviderError::NoDefaultProject
            | ProviderError::NotConfigured => tonic::Status::failed_precondition(err.to_string()),
            ProviderError::Validation { .. } | ProviderError::InvalidRequest(_) => {
                tonic::Status::invalid_argument(err.to_string())
            },
            ProviderError::WaiterTimeout { .. } | ProviderError::DeadlineExceeded(_) => {
                tonic::Status::deadline_exceeded(err.to_string())
            },
            ProviderError::TerminalFailure { .. } => tonic::Status::aborted(err.to_string()),
            ProviderError::Cancelled => tonic::Status::cancelled(err.to_string()),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::DuplicateComponent { .. } => tonic::Status::internal(err.to_string()),
            ProviderError::Serialization(e) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", e))
            },
            ProviderError::Transport(e) => {
                tonic::Status::unavailable(format!("Transport error: {}", e))
            },
            ProviderError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
            ProviderError::PartialState { error, .. } => (*error).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::UnknownResource("scaleway_foo".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: scaleway_foo");

        let err = ProviderError::validation("zone", "unknown zone");
        assert_eq!(format!("{}", err), "Validation error at 'zone': unknown zone");

        let err = ProviderError::WaiterTimeout {
            resource: "fr-par-1/11111111-2222-3333-4444-555555555555".to_string(),
            elapsed: Duration::from_secs(300),
            last_state: "creating".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fr-par-1/11111111-2222-3333-4444-555555555555"));
        assert!(msg.contains("creating"));
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::NoDefaultZone.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status: tonic::Status = ProviderError::validation("x", "y").into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = ProviderError::Cancelled.into();
        assert_eq!(status.code(), tonic::Code::Cancelled);

        let status: tonic::Status = ProviderError::DeadlineExceeded("create".into()).into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);

        let status: tonic::Status = ProviderError::Unimplemented("import".into()).into();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }

    #[test]
    fn test_api_error_status_mapping() {
        let err: ProviderError = ApiError::http(404, "not found", "volume").into();
        assert!(err.is_not_found());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let err: ProviderError = ApiError::http(412, "precondition", "").into();
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[test]
    fn test_attribute_binding() {
        assert_eq!(ProviderError::NoDefaultProject.attribute(), Some("project_id"));
        assert_eq!(
            ProviderError::validation("tags.0", "empty").attribute(),
            Some("tags.0")
        );
        assert_eq!(ProviderError::Cancelled.attribute(), None);
    }

    #[test]
    fn test_partial_state_delegates() {
        let state = serde_json::json!({"id": "fr-par-1/abc"});
        let err = ProviderError::with_partial_state(state.clone(), ProviderError::NoDefaultZone);
        assert_eq!(err.to_string(), ProviderError::NoDefaultZone.to_string());
        assert_eq!(err.attribute(), Some("zone"));

        let (kept, inner) = err.into_parts();
        assert_eq!(kept, Some(state));
        assert!(matches!(inner, ProviderError::NoDefaultZone));
        assert!(ProviderError::Cancelled.into_parts().0.is_none());

        let status: tonic::Status =
            ProviderError::with_partial_state(serde_json::json!({}), ProviderError::Cancelled).into();
        assert_eq!(status.code(), tonic::Code::Cancelled);
    }
}
