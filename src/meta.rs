//! The credential context shared by every component callback.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::config::{env, EnvSource, Field, ResolvedProfile, SourceTag};
use crate::error::ProviderError;
use crate::locality::{Region, Zone};
use crate::waiter::{Waiter, DEFAULT_INTERVAL};

/// Timeout applied to every HTTP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolved credentials, locality defaults and the prepared API client.
///
/// Built once by `Configure` and shared read-only by every callback.
#[derive(Debug)]
pub struct CredentialContext {
    profile: ResolvedProfile,
    http: reqwest::Client,
    api: ApiClient,
    user_agent: String,
    waiter_interval: Duration,
}

impl CredentialContext {
    /// Build the context from a resolved profile.
    ///
    /// `http_override` replaces the HTTP client built here; tests use it to
    /// point at a mock server with their own settings.
    pub fn new(
        profile: ResolvedProfile,
        terraform_version: &str,
        http_override: Option<reqwest::Client>,
        env: &dyn EnvSource,
    ) -> Result<Self, ProviderError> {
        let user_agent = user_agent(terraform_version, env.var(env::APPEND_USER_AGENT).as_deref());
        let http = match http_override {
            Some(client) => client,
            None => reqwest::Client::builder()
                .user_agent(user_agent.clone())
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(crate::client::ApiError::from)?,
        };
        let api = ApiClient::new(http.clone(), &profile.api_url, profile.secret_key.as_ref(), &user_agent)?;

        Ok(Self {
            profile,
            http,
            api,
            user_agent,
            waiter_interval: DEFAULT_INTERVAL,
        })
    }

    /// Override the polling interval used by waiters.
    pub fn with_waiter_interval(mut self, interval: Duration) -> Self {
        self.waiter_interval = interval;
        self
    }

    /// The resolved profile.
    pub fn profile(&self) -> &ResolvedProfile {
        &self.profile
    }

    /// Default zone.
    pub fn default_zone(&self) -> Option<Zone> {
        self.profile.zone
    }

    /// Default region.
    pub fn default_region(&self) -> Option<Region> {
        self.profile.region
    }

    /// Default project.
    pub fn default_project_id(&self) -> Option<&str> {
        self.profile.project_id.as_deref()
    }

    /// Default organization.
    pub fn default_organization_id(&self) -> Option<&str> {
        self.profile.organization_id.as_deref()
    }

    /// Source of a profile field.
    pub fn source_of(&self, field: Field) -> SourceTag {
        self.profile.source_of(field)
    }

    /// Raw HTTP client.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Authenticated API client.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// User agent sent with every request.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Interval between waiter polls.
    pub fn waiter_interval(&self) -> Duration {
        self.waiter_interval
    }
}

/// What a component callback receives: the shared context, the RPC's
/// cancellation token and the operation's timeout.
#[derive(Debug, Clone)]
pub struct OpContext {
    meta: Arc<CredentialContext>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl OpContext {
    /// Create an operation context.
    pub fn new(meta: Arc<CredentialContext>, cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            meta,
            cancel,
            timeout,
        }
    }

    /// The shared credential context.
    pub fn meta(&self) -> &CredentialContext {
        &self.meta
    }

    /// Authenticated API client.
    pub fn api(&self) -> &ApiClient {
        self.meta.api()
    }

    /// Cancellation token of this RPC.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Timeout of this operation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A waiter for `resource` bounded by this operation's timeout and
    /// cancellation, polling at the context's interval.
    pub fn waiter(&self, resource: impl Into<String>) -> Waiter {
        Waiter::new(resource, self.timeout, self.cancel.clone()).interval(self.meta.waiter_interval())
    }
}

/// `scaleway-provider/<version> terraform/<host>`, plus the appended text.
pub fn user_agent(terraform_version: &str, append: Option<&str>) -> String {
    let host = if terraform_version.is_empty() {
        "unknown"
    } else {
        terraform_version
    };
    let mut ua = format!("scaleway-provider/{} terraform/{}", env!("CARGO_PKG_VERSION"), host);
    if let Some(extra) = append.filter(|s| !s.is_empty()) {
        ua.push(' ');
        ua.push_str(extra);
    }
    ua
}

fn attribute<'a>(data: &'a Value, name: &str) -> Option<&'a str> {
    data.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Zone of a resource: its `zone` attribute, else the default zone.
pub fn extract_zone(data: &Value, ctx: &CredentialContext) -> Result<Zone, ProviderError> {
    match attribute(data, "zone") {
        Some(z) => Ok(z.parse()?),
        None => ctx.default_zone().ok_or(ProviderError::NoDefaultZone),
    }
}

/// Region of a resource: its `region` attribute, else the default region.
pub fn extract_region(data: &Value, ctx: &CredentialContext) -> Result<Region, ProviderError> {
    match attribute(data, "region") {
        Some(r) => Ok(r.parse()?),
        None => ctx.default_region().ok_or(ProviderError::NoDefaultRegion),
    }
}

/// Like [`extract_region`], falling back to `default` before the context.
pub fn extract_region_with_default(
    data: &Value,
    ctx: &CredentialContext,
    default: Option<Region>,
) -> Result<Region, ProviderError> {
    match attribute(data, "region") {
        Some(r) => Ok(r.parse()?),
        None => default
            .or_else(|| ctx.default_region())
            .ok_or(ProviderError::NoDefaultRegion),
    }
}

/// Project of a resource and whether it came from the default.
pub fn extract_project_id(data: &Value, ctx: &CredentialContext) -> Result<(String, bool), ProviderError> {
    match attribute(data, "project_id") {
        Some(p) => Ok((p.to_string(), false)),
        None => ctx
            .default_project_id()
            .map(|p| (p.to_string(), true))
            .ok_or(ProviderError::NoDefaultProject),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{resolve_with_file, ProviderConfig};
    use serde_json::json;
    use std::collections::HashMap;

    pub(crate) fn context_with(block: ProviderConfig, vars: &[(&str, &str)]) -> CredentialContext {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let resolved = resolve_with_file(&block, &env, None).unwrap();
        CredentialContext::new(resolved.profile, "1.9.0", None, &env).unwrap()
    }

    #[test]
    fn test_user_agent() {
        let version = env!("CARGO_PKG_VERSION");
        assert_eq!(
            user_agent("1.9.0", None),
            format!("scaleway-provider/{version} terraform/1.9.0")
        );
        assert_eq!(
            user_agent("1.9.0", Some("ci/42")),
            format!("scaleway-provider/{version} terraform/1.9.0 ci/42")
        );
        assert!(user_agent("", Some("")).ends_with("terraform/unknown"));
    }

    #[test]
    fn test_context_lookups() {
        let ctx = context_with(
            ProviderConfig {
                project_id: Some("11111111-2222-3333-4444-555555555555".into()),
                ..Default::default()
            },
            &[("TF_APPEND_USER_AGENT", "extra"), ("SCW_DEFAULT_ZONE", "nl-ams-3")],
        );
        assert_eq!(ctx.default_zone(), Some(Zone::NlAms3));
        assert_eq!(ctx.default_region(), Some(Region::NlAms));
        assert_eq!(ctx.source_of(Field::Region), SourceTag::Derived);
        assert_eq!(ctx.source_of(Field::ProjectId), SourceTag::ProviderBlock);
        assert!(ctx.default_organization_id().is_none());
        assert!(ctx.user_agent().ends_with(" extra"));
        assert_eq!(ctx.waiter_interval(), DEFAULT_INTERVAL);
        assert_eq!(ctx.api().base_url().as_str(), "https://api.scaleway.com/");
    }

    #[tokio::test]
    async fn test_user_agent_with_http_override() {
        use wiremock::matchers::{header, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let block = ProviderConfig {
            api_url: Some(server.uri()),
            ..Default::default()
        };
        let env: HashMap<String, String> = HashMap::new();
        let resolved = resolve_with_file(&block, &env, None).unwrap();
        let ctx = CredentialContext::new(resolved.profile, "1.9.0", Some(reqwest::Client::new()), &env).unwrap();

        Mock::given(method("GET"))
            .and(header("user-agent", ctx.user_agent()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
            .expect(1)
            .mount(&server)
            .await;

        let body: serde_json::Value = ctx.api().get("volume", "block/v1alpha1/zones/fr-par-1/volumes/x").await.unwrap();
        assert_eq!(body["id"], "x");
    }

    #[test]
    fn test_extractors() {
        let ctx = context_with(ProviderConfig::default(), &[]);

        assert_eq!(extract_zone(&json!({"zone": "pl-waw-2"}), &ctx).unwrap(), Zone::PlWaw2);
        assert_eq!(extract_zone(&json!({"zone": ""}), &ctx).unwrap(), Zone::FrPar1);
        assert!(matches!(
            extract_zone(&json!({"zone": "fr-par"}), &ctx),
            Err(ProviderError::Id(_))
        ));

        assert_eq!(extract_region(&json!({}), &ctx).unwrap(), Region::FrPar);
        assert_eq!(
            extract_region_with_default(&json!({}), &ctx, Some(Region::PlWaw)).unwrap(),
            Region::PlWaw
        );

        assert!(matches!(
            extract_project_id(&json!({}), &ctx),
            Err(ProviderError::NoDefaultProject)
        ));
        assert_eq!(
            extract_project_id(&json!({"project_id": "p"}), &ctx).unwrap(),
            ("p".to_string(), false)
        );
    }
}
