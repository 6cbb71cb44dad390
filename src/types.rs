//! Plain Rust types exchanged between the surfaces, the mux and the server.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::generated;

/// The handshake prefix written to stdout on startup.
pub const HANDSHAKE_PREFIX: &str = "SCW_PROVIDER";

/// Protocol generations served on the single endpoint.
///
/// 5 is the legacy schema-driven surface, 6 the framework surface.
pub const PROTOCOL_VERSIONS: [u32; 2] = [5, 6];

/// The surface generation that owns a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    /// Schema-driven callbacks over dynamic resource data.
    Legacy,
    /// Typed components, including ephemeral resources and actions.
    Framework,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Legacy => "legacy",
            Self::Framework => "framework",
        })
    }
}

impl From<Surface> for generated::Surface {
    fn from(surface: Surface) -> Self {
        match surface {
            Surface::Legacy => generated::Surface::Legacy,
            Surface::Framework => generated::Surface::Framework,
        }
    }
}

/// The kind of a component. Each kind is its own name space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Managed resource.
    Resource,
    /// Data source.
    DataSource,
    /// Ephemeral resource.
    EphemeralResource,
    /// Action.
    Action,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resource => "resource",
            Self::DataSource => "data source",
            Self::EphemeralResource => "ephemeral resource",
            Self::Action => "action",
        })
    }
}

impl From<ComponentKind> for generated::ComponentKind {
    fn from(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Resource => generated::ComponentKind::Resource,
            ComponentKind::DataSource => generated::ComponentKind::DataSource,
            ComponentKind::EphemeralResource => generated::ComponentKind::EphemeralResource,
            ComponentKind::Action => generated::ComponentKind::Action,
        }
    }
}

impl ComponentKind {
    /// Kind carried by a request; unspecified or unknown means a resource.
    pub fn from_proto(value: i32) -> Self {
        match generated::ComponentKind::try_from(value) {
            Ok(generated::ComponentKind::DataSource) => Self::DataSource,
            Ok(generated::ComponentKind::EphemeralResource) => Self::EphemeralResource,
            Ok(generated::ComponentKind::Action) => Self::Action,
            _ => Self::Resource,
        }
    }
}

/// A registered component as reported by `GetMetadata`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Type name, e.g. `scaleway_block_volume`.
    pub type_name: String,
    /// Kind.
    pub kind: ComponentKind,
    /// Owning surface.
    pub surface: Surface,
}

impl From<ComponentInfo> for generated::ComponentMetadata {
    fn from(info: ComponentInfo) -> Self {
        Self {
            type_name: info.type_name,
            kind: generated::ComponentKind::from(info.kind) as i32,
            surface: generated::Surface::from(info.surface) as i32,
        }
    }
}

/// Provider metadata returned by `GetMetadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Every registered component, sorted by kind then name.
    pub components: Vec<ComponentInfo>,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
}

/// Server capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// The host may call `Plan` for destroy operations.
    pub plan_destroy: bool,
}

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute path.
    pub path: String,
    /// Value before the change, `None` when added.
    pub before: Option<Value>,
    /// Value after the change, `None` when removed.
    pub after: Option<Value>,
}

impl AttributeChange {
    /// An attribute that gains a value.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: None,
            after: Some(value),
        }
    }

    /// An attribute that loses its value.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(value),
            after: None,
        }
    }

    /// An attribute whose value changes.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(before),
            after: Some(after),
        }
    }
}

fn encode(value: Option<Value>) -> Vec<u8> {
    value
        .and_then(|v| serde_json::to_vec(&v).ok())
        .unwrap_or_default()
}

fn decode(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(bytes).ok()
    }
}

impl From<generated::AttributeChange> for AttributeChange {
    fn from(proto: generated::AttributeChange) -> Self {
        Self {
            path: proto.path,
            before: decode(&proto.before),
            after: decode(&proto.after),
        }
    }
}

impl From<AttributeChange> for generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: encode(change.before),
            after: encode(change.after),
        }
    }
}

/// The result of planning a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// State the resource will have after apply.
    pub planned_state: Value,
    /// Per-attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether apply replaces the resource.
    pub requires_replace: bool,
}

impl PlanResult {
    /// A plan with no changes.
    pub fn no_change(state: Value) -> Self {
        Self::with_changes(state, Vec::new(), false)
    }

    /// A plan with changes.
    pub fn with_changes(planned_state: Value, changes: Vec<AttributeChange>, requires_replace: bool) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether anything changes.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// A resource produced by `ImportResourceState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// Resource type.
    pub resource_type: String,
    /// State to hand to the following `Read`.
    pub state: Value,
}

impl ImportedResource {
    /// Create an imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Result of opening an ephemeral resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemeralResult {
    /// Value handed to the host once and never persisted.
    pub result: Value,
    /// Opaque data handed back on close.
    pub private: Option<Value>,
}

/// Default bound of a component operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Bound for slow, gateway-class components.
pub const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// A component operation, used to pick its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create.
    Create,
    /// Read, data source read and ephemeral open/close.
    Read,
    /// Update.
    Update,
    /// Delete.
    Delete,
    /// Import.
    Import,
    /// Action invocation.
    Invoke,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Import => "import",
            Self::Invoke => "invoke",
        })
    }
}

/// Per-operation timeouts declared by a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Create and invoke.
    pub create: Duration,
    /// Read and import.
    pub read: Duration,
    /// Update.
    pub update: Duration,
    /// Delete.
    pub delete: Duration,
}

impl Timeouts {
    /// The same bound for every operation.
    pub const fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            read: timeout,
            update: timeout,
            delete: timeout,
        }
    }

    /// Timeouts of gateway-class components.
    pub const fn gateway() -> Self {
        Self::uniform(GATEWAY_TIMEOUT)
    }

    /// Bound of `op`. Import and invoke share the read and create bounds.
    pub fn get(&self, op: Operation) -> Duration {
        match op {
            Operation::Create | Operation::Invoke => self.create,
            Operation::Read | Operation::Import => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_change_conversion() {
        let change = AttributeChange::modified("size_in_gb", json!(20), json!(40));
        let proto: generated::AttributeChange = change.clone().into();
        assert_eq!(proto.path, "size_in_gb");
        assert_eq!(AttributeChange::from(proto), change);

        let added: generated::AttributeChange = AttributeChange::added("name", json!("vol")).into();
        assert!(added.before.is_empty());
        assert_eq!(AttributeChange::from(added).before, None);
    }

    #[test]
    fn test_plan_result() {
        assert!(!PlanResult::no_change(json!({})).has_changes());
        let plan = PlanResult::with_changes(
            json!({"name": "b"}),
            vec![AttributeChange::modified("name", json!("a"), json!("b"))],
            true,
        );
        assert!(plan.has_changes());
        assert!(plan.requires_replace);
    }

    #[test]
    fn test_component_metadata_conversion() {
        let info = ComponentInfo {
            type_name: "scaleway_config".to_string(),
            kind: ComponentKind::EphemeralResource,
            surface: Surface::Framework,
        };
        let proto: generated::ComponentMetadata = info.into();
        assert_eq!(proto.kind, generated::ComponentKind::EphemeralResource as i32);
        assert_eq!(proto.surface, generated::Surface::Framework as i32);
    }

    #[test]
    fn test_display() {
        assert_eq!(Surface::Legacy.to_string(), "legacy");
        assert_eq!(ComponentKind::DataSource.to_string(), "data source");
        assert_eq!(HANDSHAKE_PREFIX, "SCW_PROVIDER");
        assert_eq!(PROTOCOL_VERSIONS, [5, 6]);
    }

    #[test]
    fn test_component_kind_from_proto() {
        assert_eq!(
            ComponentKind::from_proto(generated::ComponentKind::Action as i32),
            ComponentKind::Action
        );
        assert_eq!(ComponentKind::from_proto(0), ComponentKind::Resource);
        assert_eq!(ComponentKind::from_proto(42), ComponentKind::Resource);
    }

    #[test]
    fn test_timeouts() {
        let defaults = Timeouts::default();
        assert_eq!(defaults.get(Operation::Delete), Duration::from_secs(300));

        let gateway = Timeouts {
            read: Duration::from_secs(30),
            ..Timeouts::gateway()
        };
        assert_eq!(gateway.get(Operation::Create), Duration::from_secs(600));
        assert_eq!(gateway.get(Operation::Import), Duration::from_secs(30));
    }
}
