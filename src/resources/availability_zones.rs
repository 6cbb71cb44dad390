//! `scaleway_availability_zones`: the zones of a region.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::framework::DataSource;
use crate::locality::Region;
use crate::meta::OpContext;
use crate::schema::{Attribute, Schema};
use crate::validators::Validator;

/// Configuration and result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityZonesModel {
    /// Region to list; the provider default when unset.
    pub region: Option<String>,
    /// Same as the region.
    pub id: Option<String>,
    /// Zones in ascending order.
    pub zones: Option<Vec<String>>,
}

/// The data source.
#[derive(Debug, Default)]
pub struct AvailabilityZones;

#[async_trait]
impl DataSource for AvailabilityZones {
    type Model = AvailabilityZonesModel;

    fn type_name(&self) -> &'static str {
        "scaleway_availability_zones"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Availability zones of a region.")
            .with_attribute(
                "region",
                Attribute::optional_computed_string().with_validator(Validator::region()),
            )
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("zones", Attribute::computed_string_list())
    }

    async fn read(
        &self,
        op: &OpContext,
        config: AvailabilityZonesModel,
    ) -> Result<AvailabilityZonesModel, ProviderError> {
        let region: Region = match config.region.as_deref().filter(|r| !r.is_empty()) {
            Some(r) => r.parse()?,
            None => op.meta().default_region().ok_or(ProviderError::NoDefaultRegion)?,
        };

        Ok(AvailabilityZonesModel {
            region: Some(region.to_string()),
            id: Some(region.to_string()),
            zones: Some(region.zones().iter().map(|z| z.to_string()).collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::meta::tests::context_with;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn op(vars: &[(&str, &str)]) -> OpContext {
        let ctx = context_with(ProviderConfig::default(), vars);
        OpContext::new(Arc::new(ctx), CancellationToken::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_explicit_region() {
        let out = AvailabilityZones
            .read(
                &op(&[]),
                AvailabilityZonesModel {
                    region: Some("pl-waw".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(out.id.as_deref(), Some("pl-waw"));
        assert_eq!(
            out.zones.unwrap(),
            vec!["pl-waw-1".to_string(), "pl-waw-2".into(), "pl-waw-3".into()]
        );
    }

    #[tokio::test]
    async fn test_default_region() {
        let out = AvailabilityZones
            .read(&op(&[("SCW_DEFAULT_ZONE", "nl-ams-2")]), AvailabilityZonesModel::default())
            .await
            .unwrap();
        assert_eq!(out.region.as_deref(), Some("nl-ams"));
        assert_eq!(out.zones.unwrap()[0], "nl-ams-1");
    }

    #[tokio::test]
    async fn test_unknown_region() {
        let err = AvailabilityZones
            .read(
                &op(&[]),
                AvailabilityZonesModel {
                    region: Some("us-east".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Id(_)));
    }
}
