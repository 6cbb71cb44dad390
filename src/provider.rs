//! The Scaleway provider: its block schema and every registered component.

use crate::error::ProviderError;
use crate::framework::FrameworkSurface;
use crate::legacy::LegacySurface;
use crate::mux::{MuxBuilder, MuxProvider};
use crate::resources::{
    AvailabilityZones, BlockVolume, BlockVolumeDataSource, ConfigDataSource, ConfigEphemeral, RotateKey,
};
use crate::schema::{Attribute, Schema};
use crate::validators::Validator;

/// Schema of the provider block. Every attribute is optional; unset ones
/// fall back to the environment and the config file.
pub fn provider_schema() -> Schema {
    Schema::v0()
        .with_description("Scaleway provider configuration.")
        .with_attribute(
            "access_key",
            Attribute::optional_string().with_description("Access key (SCW_ACCESS_KEY)."),
        )
        .with_attribute(
            "secret_key",
            Attribute::optional_string()
                .sensitive()
                .with_validator(Validator::Uuid)
                .with_description("Secret key (SCW_SECRET_KEY)."),
        )
        .with_attribute(
            "profile",
            Attribute::optional_string().with_description("Config file profile (SCW_PROFILE)."),
        )
        .with_attribute(
            "project_id",
            Attribute::optional_string()
                .with_validator(Validator::Uuid)
                .with_description("Default project (SCW_DEFAULT_PROJECT_ID)."),
        )
        .with_attribute(
            "organization_id",
            Attribute::optional_string()
                .with_validator(Validator::Uuid)
                .with_description("Default organization (SCW_DEFAULT_ORGANIZATION_ID)."),
        )
        .with_attribute(
            "region",
            Attribute::optional_string()
                .with_validator(Validator::region())
                .with_description("Default region (SCW_DEFAULT_REGION)."),
        )
        .with_attribute(
            "zone",
            Attribute::optional_string()
                .with_validator(Validator::zone())
                .with_description("Default zone (SCW_DEFAULT_ZONE)."),
        )
        .with_attribute(
            "api_url",
            Attribute::optional_string().with_description("API endpoint (SCW_API_URL)."),
        )
}

/// Components served through the schema-driven surface.
pub fn legacy_surface() -> LegacySurface {
    LegacySurface::new()
        .with_resource(BlockVolume)
        .with_data_source(BlockVolumeDataSource)
        .with_data_source(ConfigDataSource)
}

/// Components served through the typed surface.
pub fn framework_surface() -> FrameworkSurface {
    FrameworkSurface::new()
        .with_data_source(AvailabilityZones)
        .with_ephemeral_resource(ConfigEphemeral)
        .with_action(RotateKey)
}

/// A builder carrying both surfaces, for callers that override the
/// environment, HTTP client or waiter interval.
pub fn builder() -> MuxBuilder {
    MuxProvider::builder(provider_schema())
        .legacy(legacy_surface())
        .framework(framework_surface())
}

/// The provider as served by the binary.
pub fn new() -> Result<MuxProvider, ProviderError> {
    builder().build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ProviderService;
    use crate::types::{ComponentKind, Surface};
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_component_table() {
        let provider = builder().env(env(&[])).build().unwrap();
        assert_eq!(
            provider.surface_of(ComponentKind::Resource, "scaleway_block_volume"),
            Some(Surface::Legacy)
        );
        assert_eq!(
            provider.surface_of(ComponentKind::DataSource, "scaleway_config"),
            Some(Surface::Legacy)
        );
        assert_eq!(
            provider.surface_of(ComponentKind::EphemeralResource, "scaleway_config"),
            Some(Surface::Framework)
        );
        assert_eq!(
            provider.surface_of(ComponentKind::DataSource, "scaleway_availability_zones"),
            Some(Surface::Framework)
        );
        assert_eq!(provider.surface_of(ComponentKind::Action, "scaleway_key_manager_rotate_key"), None);
    }

    #[test]
    fn test_beta_components() {
        let provider = builder().env(env(&[("SCW_ENABLE_BETA", "1")])).build().unwrap();
        assert_eq!(
            provider.surface_of(ComponentKind::Action, "scaleway_key_manager_rotate_key"),
            Some(Surface::Framework)
        );
        assert!(provider.schema().actions.contains_key("scaleway_key_manager_rotate_key"));
    }

    #[test]
    fn test_provider_schema() {
        let schema = provider_schema();
        assert!(schema.attribute("secret_key").unwrap().flags.sensitive);
        assert!(schema.block.attributes.values().all(|a| a.flags.optional));
        assert_eq!(schema.block.attributes.len(), 8);
    }
}
