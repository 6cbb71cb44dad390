//! `scaleway_config`: the effective credentials and where each came from.
//!
//! Served twice: as a legacy data source, whose result is persisted and so
//! carries a redacted secret key, and as a framework ephemeral resource,
//! whose result never reaches state and so carries the real one.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::{Field, ResolvedProfile};
use crate::error::ProviderError;
use crate::framework::EphemeralResource;
use crate::legacy::{LegacyDataSource, ResourceData};
use crate::meta::OpContext;
use crate::schema::{Attribute, Schema};

const TYPE_NAME: &str = "scaleway_config";

/// Keep the first eight characters, mask the rest.
pub fn redact(secret: &str) -> String {
    secret
        .chars()
        .enumerate()
        .map(|(i, c)| if i < 8 || c == '-' { c } else { 'x' })
        .collect()
}

fn source_key(field: Field) -> String {
    format!("{}_source", field.as_str())
}

fn schema() -> Schema {
    let mut schema = Schema::v0().with_description("Effective provider credentials and their sources.");
    for field in Field::ALL {
        let value = match field {
            Field::SecretKey => Attribute::computed_string().sensitive(),
            _ => Attribute::computed_string(),
        };
        schema = schema
            .with_attribute(field.as_str(), value)
            .with_attribute(
                source_key(field),
                Attribute::computed_string()
                    .with_description(format!("Where {} comes from.", field.as_str())),
            );
    }
    schema.with_attribute("id", Attribute::computed_string())
}

/// Field values of a profile; the secret is passed in separately so each
/// caller decides whether to redact it.
fn field_value(profile: &ResolvedProfile, field: Field, secret: Option<String>) -> Option<String> {
    match field {
        Field::AccessKey => profile.access_key.clone(),
        Field::SecretKey => secret,
        Field::ProjectId => profile.project_id.clone(),
        Field::OrganizationId => profile.organization_id.clone(),
        Field::Region => profile.region.map(|r| r.to_string()),
        Field::Zone => profile.zone.map(|z| z.to_string()),
        Field::ApiUrl => Some(profile.api_url.to_string()),
    }
}

/// The legacy data source.
#[derive(Debug, Default)]
pub struct ConfigDataSource;

#[async_trait]
impl LegacyDataSource for ConfigDataSource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        schema()
    }

    async fn read(&self, op: &OpContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let profile = op.meta().profile();
        let secret = profile
            .secret_key
            .as_ref()
            .map(|s| redact(s.expose_secret()));

        for field in Field::ALL {
            let value = field_value(profile, field, secret.clone());
            data.set(field.as_str(), value);
            data.set(source_key(field), profile.source_of(field).as_str());
        }
        data.set_id(profile.profile_name.clone().unwrap_or_else(|| "default".to_string()));
        Ok(())
    }
}

/// Model of the ephemeral resource; fields mirror the schema.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigModel {
    pub access_key: Option<String>,
    pub access_key_source: Option<String>,
    pub secret_key: Option<String>,
    pub secret_key_source: Option<String>,
    pub project_id: Option<String>,
    pub project_id_source: Option<String>,
    pub organization_id: Option<String>,
    pub organization_id_source: Option<String>,
    pub region: Option<String>,
    pub region_source: Option<String>,
    pub zone: Option<String>,
    pub zone_source: Option<String>,
    pub api_url: Option<String>,
    pub api_url_source: Option<String>,
    pub id: Option<String>,
}

/// The framework ephemeral resource.
#[derive(Debug, Default)]
pub struct ConfigEphemeral;

#[async_trait]
impl EphemeralResource for ConfigEphemeral {
    type Model = ConfigModel;
    type Private = ();

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        schema()
    }

    async fn open(&self, op: &OpContext, _config: ConfigModel) -> Result<(ConfigModel, Option<()>), ProviderError> {
        let profile = op.meta().profile();
        let secret = profile.secret_key.as_ref().map(|s| s.expose_secret().to_string());
        let value = |field| field_value(profile, field, secret.clone());
        let source = |field| Some(profile.source_of(field).as_str().to_string());

        let model = ConfigModel {
            access_key: value(Field::AccessKey),
            access_key_source: source(Field::AccessKey),
            secret_key: value(Field::SecretKey),
            secret_key_source: source(Field::SecretKey),
            project_id: value(Field::ProjectId),
            project_id_source: source(Field::ProjectId),
            organization_id: value(Field::OrganizationId),
            organization_id_source: source(Field::OrganizationId),
            region: value(Field::Region),
            region_source: source(Field::Region),
            zone: value(Field::Zone),
            zone_source: source(Field::Zone),
            api_url: value(Field::ApiUrl),
            api_url_source: source(Field::ApiUrl),
            id: Some(profile.profile_name.clone().unwrap_or_else(|| "default".to_string())),
        };
        Ok((model, None))
    }
}
