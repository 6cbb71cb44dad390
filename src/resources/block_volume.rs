//! `scaleway_block_volume`: a zoned block storage volume.
//!
//! Volumes are created through the block API. Reads and deletes fall back to
//! the instance API when the block API answers 412, which it does for
//! volumes still owned by the older generation. Both shapes are normalized
//! into [`Volume`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{with_generation_fallback, ApiClient, ApiGeneration};
use crate::coercion::{expand_tags, expand_updatable_string, flatten_tags, Patch};
use crate::datasource::{add_optional_fields, datasource_schema_from_resource_schema};
use crate::error::ProviderError;
use crate::legacy::{LegacyDataSource, LegacyResource, ResourceData};
use crate::locality::{format_id, parse_zoned_id, strip_locality, Zone, ZonedId};
use crate::meta::{extract_project_id, extract_zone, OpContext};
use crate::schema::{Attribute, Schema};
use crate::validators::Validator;
use crate::waiter::{retry_on_transient_state_error, NotFound, Poll};

const TYPE_NAME: &str = "scaleway_block_volume";
const RESOURCE: &str = "volume";
const GB: u64 = 1_000_000_000;

fn volume_path(generation: ApiGeneration, zone: Zone, id: &str) -> String {
    match generation {
        ApiGeneration::Newer => format!("block/v1alpha1/zones/{zone}/volumes/{id}"),
        ApiGeneration::Older => format!("instance/v1/zones/{zone}/volumes/{id}"),
    }
}

fn collection_path(zone: Zone) -> String {
    format!("block/v1alpha1/zones/{zone}/volumes")
}

/// A volume as seen by either API generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// UUID, without locality.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owning project.
    pub project_id: String,
    /// Size in bytes.
    pub size: u64,
    /// Provisioned IOPS; the older generation has none.
    pub iops: Option<u32>,
    /// Lifecycle status.
    pub status: String,
    /// Tags.
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BlockSpecs {
    perf_iops: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BlockApiVolume {
    id: String,
    name: String,
    project_id: String,
    size: u64,
    specs: Option<BlockSpecs>,
    status: String,
    tags: Vec<String>,
}

impl From<BlockApiVolume> for Volume {
    fn from(v: BlockApiVolume) -> Self {
        Self {
            id: v.id,
            name: v.name,
            project_id: v.project_id,
            size: v.size,
            iops: v.specs.and_then(|s| s.perf_iops),
            status: v.status,
            tags: v.tags,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InstanceVolume {
    id: String,
    name: String,
    project: String,
    size: u64,
    state: String,
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InstanceEnvelope {
    volume: InstanceVolume,
}

impl From<InstanceVolume> for Volume {
    fn from(v: InstanceVolume) -> Self {
        Self {
            id: v.id,
            name: v.name,
            project_id: v.project,
            size: v.size,
            iops: None,
            status: v.state,
            tags: v.tags,
        }
    }
}

#[derive(Debug, Serialize)]
struct FromEmpty {
    size: u64,
}

#[derive(Debug, Serialize)]
struct FromSnapshot {
    snapshot_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CreateRequest {
    name: String,
    project_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    perf_iops: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_empty: Option<FromEmpty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_snapshot: Option<FromSnapshot>,
}

#[derive(Debug, Default, Serialize)]
struct UpdateRequest {
    #[serde(skip_serializing_if = "Patch::is_unset")]
    name: Patch<String>,
    #[serde(skip_serializing_if = "Patch::is_unset")]
    size: Patch<u64>,
    #[serde(skip_serializing_if = "Patch::is_unset")]
    perf_iops: Patch<u32>,
    #[serde(skip_serializing_if = "Patch::is_unset")]
    tags: Patch<Vec<String>>,
}

impl UpdateRequest {
    fn is_empty(&self) -> bool {
        self.name.is_unset() && self.size.is_unset() && self.perf_iops.is_unset() && self.tags.is_unset()
    }
}

/// Ready once available or attached.
pub fn classify(volume: &Volume) -> Poll {
    match volume.status.as_str() {
        "available" | "in_use" => Poll::Ready,
        "error" => Poll::Failed("volume is in error state".to_string()),
        _ => Poll::Pending,
    }
}

fn classify_deleting(volume: &Volume) -> Poll {
    match volume.status.as_str() {
        "error" => Poll::Failed("volume failed while deleting".to_string()),
        _ => Poll::Pending,
    }
}

fn status_of(volume: &Volume) -> String {
    volume.status.clone()
}

async fn fetch(api: &ApiClient, zone: Zone, id: &str) -> Result<Volume, ProviderError> {
    let volume = with_generation_fallback("get volume", move |generation| async move {
        let path = volume_path(generation, zone, id);
        match generation {
            ApiGeneration::Newer => api.get::<BlockApiVolume>(RESOURCE, &path).await.map(Volume::from),
            ApiGeneration::Older => api
                .get::<InstanceEnvelope>(RESOURCE, &path)
                .await
                .map(|envelope| envelope.volume.into()),
        }
    })
    .await?;
    Ok(volume)
}

async fn wait_ready(op: &OpContext, zone: Zone, id: &str) -> Result<Option<Volume>, ProviderError> {
    let api = op.api();
    let settled = op
        .waiter(format_id(zone, id))
        .wait(move || fetch(api, zone, id), classify, status_of)
        .await?;
    Ok(settled.into_inner())
}

fn gb_to_bytes(gb: i64) -> Result<u64, ProviderError> {
    u64::try_from(gb)
        .ok()
        .and_then(|gb| gb.checked_mul(GB))
        .ok_or_else(|| ProviderError::validation("size_in_gb", format!("invalid size {gb}")))
}

fn iops(value: i64) -> Result<u32, ProviderError> {
    u32::try_from(value).map_err(|_| ProviderError::validation("iops", format!("invalid iops {value}")))
}

fn locate(data: &ResourceData) -> Result<(Zone, String), ProviderError> {
    let id = data
        .id()
        .ok_or_else(|| ProviderError::InvalidRequest(format!("{TYPE_NAME} has no identifier")))?;
    Ok(parse_zoned_id(id)?)
}

fn flatten(data: &mut ResourceData, zone: Zone, volume: &Volume) {
    data.set("name", volume.name.clone());
    data.set("size_in_gb", volume.size / GB);
    data.set("iops", volume.iops);
    data.set("project_id", volume.project_id.clone());
    data.set("zone", zone.to_string());
    data.set("status", volume.status.clone());
    data.set("tags", flatten_tags(&volume.tags));
}

fn generated_name() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("tf-volume-{}", &suffix[..8])
}

/// Resource schema; the data source derives from it.
pub fn resource_schema() -> Schema {
    Schema::v0()
        .with_description("A block storage volume.")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("name", Attribute::optional_computed_string())
        .with_attribute(
            "size_in_gb",
            Attribute::optional_computed_int64().with_description("Size in GB (10^9 bytes)."),
        )
        .with_attribute(
            "snapshot_id",
            Attribute::optional_string()
                .with_force_new()
                .with_validator(Validator::UuidOrLocalizedUuid)
                .with_diff_suppress(crate::diff::DiffSuppress::Locality),
        )
        .with_attribute("iops", Attribute::optional_computed_int64())
        .with_attribute(
            "project_id",
            Attribute::optional_computed_string()
                .with_force_new()
                .with_validator(Validator::Uuid),
        )
        .with_attribute(
            "zone",
            Attribute::optional_computed_string()
                .with_force_new()
                .with_validator(Validator::zone()),
        )
        .with_attribute("status", Attribute::computed_string())
        .with_attribute("tags", Attribute::optional_string_list())
}

/// The resource.
#[derive(Debug, Default)]
pub struct BlockVolume;

#[async_trait]
impl LegacyResource for BlockVolume {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        resource_schema()
    }

    async fn create(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let values = data.to_value();
        let zone = extract_zone(&values, op.meta())?;
        let (project_id, _) = extract_project_id(&values, op.meta())?;
        let size = data.get_i64("size_in_gb").map(gb_to_bytes).transpose()?;

        let (from_empty, from_snapshot) = match data.get_str("snapshot_id") {
            Some(snapshot) => (
                None,
                Some(FromSnapshot {
                    snapshot_id: strip_locality(snapshot).to_string(),
                    size,
                }),
            ),
            None => {
                let size = size.ok_or_else(|| {
                    ProviderError::validation("size_in_gb", "size_in_gb is required without snapshot_id")
                })?;
                (Some(FromEmpty { size }), None)
            },
        };

        let request = CreateRequest {
            name: data.get_str("name").map_or_else(generated_name, str::to_string),
            project_id,
            tags: expand_tags(data.get("tags")),
            perf_iops: data.get_i64("iops").map(iops).transpose()?,
            from_empty,
            from_snapshot,
        };

        let created: BlockApiVolume = op.api().post(RESOURCE, &collection_path(zone), &request).await?;
        debug!(zone = %zone, id = %created.id, "volume created");
        data.set_id(format_id(zone, &created.id));

        let volume = match wait_ready(op, zone, &created.id).await? {
            Some(volume) => volume,
            None => Volume::from(created),
        };
        flatten(data, zone, &volume);
        Ok(())
    }

    async fn read(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let (zone, id) = locate(data)?;
        match fetch(op.api(), zone, &id).await {
            Ok(volume) => {
                flatten(data, zone, &volume);
                Ok(())
            },
            Err(e) if e.is_not_found() => {
                warn!(id = %format_id(zone, &id), "volume not found, removing from state");
                data.clear_id();
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    async fn update(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let (zone, id) = locate(data)?;
        let mut request = UpdateRequest::default();

        if data.has_change("name") {
            // A null name keeps the remote one.
            request.name = expand_updatable_string(data.get("name"));
        }
        if data.has_change("size_in_gb") {
            if let Some(new) = data.get_i64("size_in_gb") {
                let old = data.prior("size_in_gb").and_then(Value::as_i64).unwrap_or(0);
                if new < old {
                    return Err(ProviderError::validation(
                        "size_in_gb",
                        format!("volumes cannot be shrunk ({old} GB to {new} GB)"),
                    ));
                }
                request.size = Patch::Set(gb_to_bytes(new)?);
            }
        }
        if data.has_change("iops") {
            if let Some(value) = data.get_i64("iops") {
                request.perf_iops = Patch::Set(iops(value)?);
            }
        }
        if data.has_change("tags") {
            // Removing every tag must reach the API as an empty list.
            request.tags = Patch::Set(expand_tags(data.get("tags")));
        }

        if !request.is_empty() {
            let api = op.api();
            let path = volume_path(ApiGeneration::Newer, zone, &id);
            let (path, request, id) = (path.as_str(), &request, id.as_str());
            retry_on_transient_state_error(
                move || async move {
                    api.patch::<Value, _>(RESOURCE, path, request).await?;
                    Ok::<(), ProviderError>(())
                },
                move || async move { wait_ready(op, zone, id).await.map(|_| ()) },
            )
            .await?;
        }

        if let Some(volume) = wait_ready(op, zone, &id).await? {
            flatten(data, zone, &volume);
        }
        Ok(())
    }

    async fn delete(&self, op: &OpContext, data: &ResourceData) -> Result<(), ProviderError> {
        let (zone, id) = locate(data)?;
        let api = op.api();
        let id = id.as_str();

        let deleted = with_generation_fallback("delete volume", move |generation| async move {
            api.delete(RESOURCE, &volume_path(generation, zone, id)).await
        })
        .await;
        match deleted {
            Err(e) if e.is_not_found() => return Ok(()),
            other => other?,
        }

        op.waiter(format_id(zone, id))
            .not_found(NotFound::IsSuccess)
            .wait(move || fetch(api, zone, id), classify_deleting, status_of)
            .await?;
        Ok(())
    }

    async fn import(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let raw = data
            .id()
            .ok_or_else(|| ProviderError::InvalidRequest("import needs an identifier".to_string()))?;
        let default_zone = op.meta().default_zone().ok_or(ProviderError::NoDefaultZone)?;
        let id = ZonedId::parse_or_default(raw, default_zone)?;
        data.set_id(id.to_string());
        data.set("zone", id.zone.to_string());
        Ok(())
    }
}

/// Looks up an existing volume by `volume_id` or by exact `name`.
#[derive(Debug, Default)]
pub struct BlockVolumeDataSource;

#[async_trait]
impl LegacyDataSource for BlockVolumeDataSource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        let mut schema = datasource_schema_from_resource_schema(&resource_schema());
        add_optional_fields(&mut schema, &["name", "zone", "project_id"]);
        schema.with_attribute(
            "volume_id",
            Attribute::optional_string().with_validator(Validator::UuidOrLocalizedUuid),
        )
    }

    async fn read(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let zone = extract_zone(&data.to_value(), op.meta())?;
        let volume_id = data.get_str("volume_id").map(|id| strip_locality(id).to_string());
        let name = data.get_str("name").map(str::to_string);

        let id = match (volume_id, name) {
            (Some(id), _) => id,
            (None, Some(name)) => {
                let mut params = vec![("name", name.clone())];
                if let Some(project) = data.get_str("project_id") {
                    params.push(("project_id", project.to_string()));
                }
                let found: Vec<BlockApiVolume> = op
                    .api()
                    .list_all(RESOURCE, &collection_path(zone), "volumes", &params)
                    .await?;
                let mut matching: Vec<BlockApiVolume> = found.into_iter().filter(|v| v.name == name).collect();
                match matching.len() {
                    1 => matching.remove(0).id,
                    0 => {
                        return Err(ProviderError::validation(
                            "name",
                            format!("no volume found with the name {name}"),
                        ))
                    },
                    n => {
                        return Err(ProviderError::validation(
                            "name",
                            format!("{n} volumes found with the same name {name}"),
                        ))
                    },
                }
            },
            (None, None) => {
                return Err(ProviderError::validation("volume_id", "one of volume_id or name must be set"));
            },
        };

        let volume = fetch(op.api(), zone, &id).await?;
        let full_id = format_id(zone, &id);
        data.set_id(full_id.clone());
        data.set("volume_id", full_id);
        flatten(data, zone, &volume);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn volume(status: &str) -> Volume {
        Volume {
            id: "11111111-2222-3333-4444-555555555555".into(),
            name: "data".into(),
            project_id: "p".into(),
            size: 20 * GB,
            iops: Some(5000),
            status: status.into(),
            tags: vec![],
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&volume("available")), Poll::Ready);
        assert_eq!(classify(&volume("in_use")), Poll::Ready);
        assert_eq!(classify(&volume("creating")), Poll::Pending);
        assert!(matches!(classify(&volume("error")), Poll::Failed(_)));
        assert_eq!(classify_deleting(&volume("available")), Poll::Pending);
    }

    #[test]
    fn test_generations_normalize() {
        let block: BlockApiVolume = serde_json::from_value(json!({
            "id": "a", "name": "n", "project_id": "p", "size": 10_000_000_000u64,
            "specs": {"perf_iops": 15000}, "status": "available", "tags": ["x"],
        }))
        .unwrap();
        let block = Volume::from(block);
        assert_eq!(block.iops, Some(15000));

        let instance: InstanceEnvelope = serde_json::from_value(json!({
            "volume": {"id": "a", "name": "n", "project": "p", "size": 10_000_000_000u64,
                       "state": "available", "tags": ["x"], "volume_type": "b_ssd"},
        }))
        .unwrap();
        let instance = Volume::from(instance.volume);
        assert_eq!(instance.iops, None);
        assert_eq!(Volume { iops: Some(15000), ..instance }, block);
    }

    #[test]
    fn test_update_body_omits_unset_fields() {
        let request = UpdateRequest {
            name: Patch::Set("logs".into()),
            tags: Patch::Set(vec![]),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"name": "logs", "tags": []}));

        let cleared = UpdateRequest {
            name: Patch::Clear,
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&cleared).unwrap(), json!({"name": null}));
        assert!(UpdateRequest::default().is_empty());
    }

    #[test]
    fn test_flatten_sizes() {
        let mut data = ResourceData::from_id("fr-par-1/x");
        flatten(&mut data, Zone::FrPar2, &volume("available"));
        assert_eq!(data.get_i64("size_in_gb"), Some(20));
        assert_eq!(data.get_i64("iops"), Some(5000));
        assert_eq!(data.get_str("zone"), Some("fr-par-2"));
        assert_eq!(data.get("tags"), Some(&json!([])));
        assert_eq!(gb_to_bytes(3).unwrap(), 3 * GB);
        assert!(gb_to_bytes(-1).is_err());
    }

    #[test]
    fn test_data_source_schema() {
        let schema = BlockVolumeDataSource.schema();
        let name = schema.attribute("name").unwrap();
        assert!(name.flags.optional && name.flags.computed);
        let size = schema.attribute("size_in_gb").unwrap();
        assert!(size.flags.computed && !size.flags.optional);
        assert!(schema.attribute("volume_id").unwrap().flags.optional);
        assert!(!schema.attribute("zone").unwrap().force_new);
    }

    #[test]
    fn test_generated_name() {
        let name = generated_name();
        assert!(name.starts_with("tf-volume-"));
        assert_eq!(name.len(), "tf-volume-".len() + 8);
    }
}
