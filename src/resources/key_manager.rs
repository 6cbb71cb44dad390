//! `scaleway_key_manager_rotate_key`: rotate a key manager key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::client::ApiClient;
use crate::error::ProviderError;
use crate::framework::Action;
use crate::locality::{Region, RegionalId};
use crate::meta::OpContext;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::validators::Validator;
use crate::waiter::{retry_on_transient_state_error, Poll};

const RESOURCE: &str = "key";

/// Action configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotateKeyModel {
    /// Key identifier, plain or `region/uuid`.
    pub key_id: String,
    /// Region of the key when `key_id` carries none.
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Key {
    id: String,
    state: String,
    rotation_count: u32,
}

fn key_path(key: &RegionalId) -> String {
    format!("key-manager/v1alpha1/regions/{}/keys/{}", key.region, key.id)
}

fn classify(key: &Key) -> Poll {
    match key.state.as_str() {
        "enabled" => Poll::Ready,
        "scheduled_for_deletion" => Poll::Failed("key is scheduled for deletion".to_string()),
        _ => Poll::Pending,
    }
}

async fn fetch(api: &ApiClient, path: &str) -> Result<Key, ProviderError> {
    Ok(api.get(RESOURCE, path).await?)
}

/// The action. Beta.
#[derive(Debug, Default)]
pub struct RotateKey;

#[async_trait]
impl Action for RotateKey {
    type Model = RotateKeyModel;

    fn type_name(&self) -> &'static str {
        "scaleway_key_manager_rotate_key"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Rotate a key manager key.")
            .with_attribute(
                "key_id",
                Attribute::required_string().with_validator(Validator::UuidOrLocalizedUuid),
            )
            .with_attribute("region", Attribute::optional_string().with_validator(Validator::region()))
    }

    fn beta(&self) -> bool {
        true
    }

    async fn invoke(&self, op: &OpContext, config: RotateKeyModel) -> Result<Vec<Diagnostic>, ProviderError> {
        let default_region: Region = match config.region.as_deref().filter(|r| !r.is_empty()) {
            Some(r) => r.parse()?,
            None => op.meta().default_region().ok_or(ProviderError::NoDefaultRegion)?,
        };
        let key = RegionalId::parse_or_default(&config.key_id, default_region)?;

        let api = op.api();
        let path = key_path(&key);
        let rotate_path = format!("{path}/rotate");
        let (path, rotate_path) = (path.as_str(), rotate_path.as_str());
        let resource = key.to_string();
        let resource = resource.as_str();

        let rotated: Key = retry_on_transient_state_error(
            move || async move { Ok::<Key, ProviderError>(api.post(RESOURCE, rotate_path, &json!({})).await?) },
            move || async move {
                op.waiter(resource)
                    .wait(move || fetch(api, path), classify, |k: &Key| k.state.clone())
                    .await?;
                Ok::<(), ProviderError>(())
            },
        )
        .await?;

        info!(key = %key, rotations = rotated.rotation_count, "key rotated");
        let mut diagnostics = Vec::new();
        if rotated.state != "enabled" {
            diagnostics.push(
                Diagnostic::warning(format!("key {} is {} after rotation", rotated.id, rotated.state))
                    .with_attribute("key_id"),
            );
        }
        Ok(diagnostics)
    }
}
