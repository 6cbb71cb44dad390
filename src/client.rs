//! HTTP client for the Scaleway REST APIs.
//!
//! Authentication is the `X-Auth-Token` header carrying the secret key.
//! There is no retry logic here: transient failures surface as
//! [`ApiError`] and the caller decides.

use std::future::Future;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

const AUTH_HEADER: &str = "X-Auth-Token";
const PAGE_SIZE: u32 = 100;
const BODY_PREVIEW_CHARS: usize = 200;

/// Errors returned by API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API answered with a non-success status.
    #[error("{resource} request failed with HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Message from the error body, or the status text.
        message: String,
        /// Kind of resource the call targeted.
        resource: String,
        /// Error type from the body, e.g. `transient_state`.
        error_type: Option<String>,
        /// Current state of the resource when the body reports it.
        current_state: Option<String>,
    },

    /// The request could not be sent or the response not received.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body did not match the expected shape.
    #[error("unexpected response body: {message}")]
    Decode {
        /// What went wrong.
        message: String,
    },

    /// A request URL could not be built.
    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),

    /// The secret key cannot be sent as a header.
    #[error("secret key is not a valid header value")]
    InvalidCredentials,

    /// The user agent cannot be sent as a header.
    #[error("user agent is not a valid header value: {0:?}")]
    InvalidUserAgent(String),
}

impl ApiError {
    /// Build an HTTP error without a parsed body.
    pub fn http(status: u16, message: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            resource: resource.into(),
            error_type: None,
            current_state: None,
        }
    }

    /// HTTP status, if the API answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// 409.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// 412.
    pub fn is_precondition_failed(&self) -> bool {
        self.status() == Some(412)
    }

    /// The resource is in a transient state and rejected the mutation.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http {
                status: 409,
                error_type,
                message,
                ..
            } => {
                error_type.as_deref() == Some("transient_state")
                    || message.to_lowercase().contains("transient state")
            },
            _ => false,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    current_state: Option<String>,
}

/// Which generation of an API family serves a call.
///
/// Some resources are reachable through a newer dedicated API and an older
/// one. Both agree on identifiers and terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiGeneration {
    /// Current API.
    Newer,
    /// Previous API, used when the newer one refuses the resource.
    Older,
}

/// Run `call` against the newer generation, and once more against the older
/// one when the newer answers 412.
pub async fn with_generation_fallback<T, F, Fut>(operation: &str, call: F) -> Result<T, ApiError>
where
    F: Fn(ApiGeneration) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    match call(ApiGeneration::Newer).await {
        Err(e) if e.is_precondition_failed() => {
            debug!(operation, error = %e, "falling back to older API generation");
            call(ApiGeneration::Older).await
        },
        result => result,
    }
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    total_count: Option<u64>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

/// A prepared API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    auth: Option<HeaderValue>,
    user_agent: HeaderValue,
}

impl ApiClient {
    /// Wrap `http`, sending requests to `base_url` with the secret key.
    ///
    /// `user_agent` goes on every request, whatever defaults `http` carries.
    pub fn new(
        http: reqwest::Client,
        base_url: &Url,
        secret_key: Option<&SecretString>,
        user_agent: &str,
    ) -> Result<Self, ApiError> {
        let user_agent =
            HeaderValue::from_str(user_agent).map_err(|_| ApiError::InvalidUserAgent(user_agent.to_string()))?;
        let auth = match secret_key {
            Some(secret) => {
                let mut value = HeaderValue::from_str(secret.expose_secret())
                    .map_err(|_| ApiError::InvalidCredentials)?;
                value.set_sensitive(true);
                Some(value)
            },
            None => None,
        };

        let mut base_url = base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http,
            base_url,
            auth,
            user_agent,
        })
    }

    /// Base URL all paths are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, self.user_agent.clone());
        if let Some(auth) = &self.auth {
            headers.insert(AUTH_HEADER, auth.clone());
        }
        headers
    }

    /// GET `path`.
    pub async fn get<T: DeserializeOwned>(&self, resource: &str, path: &str) -> Result<T, ApiError> {
        self.get_with_params(resource, path, &[]).await
    }

    /// GET `path` with query parameters.
    pub async fn get_with_params<T: DeserializeOwned>(
        &self,
        resource: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = self.url(path)?;
        debug!("GET {url} params={params:?}");
        let resp = self.http.get(url).headers(self.headers()).query(params).send().await?;
        handle_response(resource, resp).await
    }

    /// POST a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        resource: &str,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path)?;
        debug!("POST {url}");
        let resp = self.http.post(url).headers(self.headers()).json(body).send().await?;
        handle_response(resource, resp).await
    }

    /// PATCH a JSON body.
    pub async fn patch<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        resource: &str,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path)?;
        debug!("PATCH {url}");
        let resp = self.http.patch(url).headers(self.headers()).json(body).send().await?;
        handle_response(resource, resp).await
    }

    /// DELETE `path`, ignoring any response body.
    pub async fn delete(&self, resource: &str, path: &str) -> Result<(), ApiError> {
        let url = self.url(path)?;
        debug!("DELETE {url}");
        let resp = self.http.delete(url).headers(self.headers()).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(parse_error(resource, status, resp).await)
        }
    }

    /// Collect every page of a list endpoint. `items_key` names the array
    /// in each page (`volumes`, `keys`).
    pub async fn list_all<T: DeserializeOwned>(
        &self,
        resource: &str,
        path: &str,
        items_key: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, ApiError> {
        let mut all = Vec::new();
        let mut page_number = 1u32;
        loop {
            let mut query = params.to_vec();
            query.push(("page", page_number.to_string()));
            query.push(("page_size", PAGE_SIZE.to_string()));

            let mut page: Page = self.get_with_params(resource, path, &query).await?;
            let items = match page.rest.remove(items_key) {
                Some(value) => serde_json::from_value::<Vec<T>>(value).map_err(|e| ApiError::Decode {
                    message: format!("{items_key}: {e}"),
                })?,
                None => Vec::new(),
            };
            let received = items.len();
            all.extend(items);

            let total = page.total_count.unwrap_or(all.len() as u64);
            if received < PAGE_SIZE as usize || all.len() as u64 >= total {
                break;
            }
            page_number += 1;
        }
        Ok(all)
    }
}

async fn handle_response<T: DeserializeOwned>(resource: &str, resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(parse_error(resource, status, resp).await);
    }
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        ApiError::Decode {
            message: format!("{e} (body preview: {preview:?})"),
        }
    })
}

async fn parse_error(resource: &str, status: StatusCode, resp: reqwest::Response) -> ApiError {
    let raw = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&raw) {
        Ok(body) => ApiError::Http {
            status: status.as_u16(),
            message: body.message.unwrap_or_else(|| status.to_string()),
            resource: body.resource.unwrap_or_else(|| resource.to_string()),
            error_type: body.error_type,
            current_state: body.current_state,
        },
        Err(_) => ApiError::http(
            status.as_u16(),
            if raw.is_empty() { status.to_string() } else { raw },
            resource,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> ApiClient {
        let url = Url::parse(&server.uri()).unwrap();
        let secret = SecretString::from("secret-token".to_string());
        ApiClient::new(reqwest::Client::new(), &url, Some(&secret), "scaleway-provider/test").unwrap()
    }

    #[test]
    fn test_error_classification() {
        assert!(ApiError::http(404, "gone", "volume").is_not_found());
        assert!(ApiError::http(412, "use instance API", "volume").is_precondition_failed());
        assert!(ApiError::http(409, "resource is in a transient state", "volume").is_transient());
        assert!(!ApiError::http(409, "already exists", "volume").is_transient());
        let typed = ApiError::Http {
            status: 409,
            message: "busy".into(),
            resource: "key".into(),
            error_type: Some("transient_state".into()),
            current_state: Some("rotating".into()),
        };
        assert!(typed.is_transient());
        assert!(typed.is_conflict());
    }

    #[tokio::test]
    async fn test_get_sends_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/block/v1alpha1/zones/fr-par-1/volumes/abc"))
            .and(header("X-Auth-Token", "secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "abc"})))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server).await;
        let v: serde_json::Value = c
            .get("volume", "block/v1alpha1/zones/fr-par-1/volumes/abc")
            .await
            .unwrap();
        assert_eq!(v["id"], "abc");
    }

    #[tokio::test]
    async fn test_user_agent_sent_with_caller_client() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "scaleway-provider/test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let v: serde_json::Value = client(&server).await.get("volume", "anything").await.unwrap();
        assert_eq!(v, json!({}));

        let url = Url::parse(&server.uri()).unwrap();
        let err = ApiClient::new(reqwest::Client::new(), &url, None, "bad\nagent").unwrap_err();
        assert!(matches!(err, ApiError::InvalidUserAgent(_)));
    }

    #[tokio::test]
    async fn test_decode_preview_keeps_multibyte_text() {
        let server = MockServer::start().await;
        let body = format!("a{}", "é".repeat(250));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .get::<serde_json::Value>("volume", "anything")
            .await
            .unwrap_err();
        match err {
            ApiError::Decode { message } => {
                let preview = format!("(body preview: {:?})", format!("a{}", "é".repeat(199)));
                assert!(message.contains(&preview), "{message}");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_error_body_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": "resource is busy",
                "type": "transient_state",
                "resource": "volume",
                "current_state": "updating",
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .patch::<serde_json::Value, _>("volume", "x", &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, ApiError::Http { current_state: Some(ref s), .. } if s == "updating"));
    }

    #[tokio::test]
    async fn test_list_all_pages() {
        let server = MockServer::start().await;
        let first: Vec<_> = (0..100).map(|i| json!({"id": i})).collect();
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"volumes": first, "total_count": 101})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"volumes": [{"id": 100}], "total_count": 101})))
            .mount(&server)
            .await;

        let items: Vec<serde_json::Value> = client(&server)
            .await
            .list_all("volume", "volumes", "volumes", &[])
            .await
            .unwrap();
        assert_eq!(items.len(), 101);
    }

    #[tokio::test]
    async fn test_generation_fallback() {
        let calls = std::sync::Mutex::new(Vec::new());
        let result = with_generation_fallback("read", |generation| {
            calls.lock().unwrap().push(generation);
            async move {
                match generation {
                    ApiGeneration::Newer => Err(ApiError::http(412, "precondition", "volume")),
                    ApiGeneration::Older => Ok(7),
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(*calls.lock().unwrap(), vec![ApiGeneration::Newer, ApiGeneration::Older]);

        let result: Result<(), _> =
            with_generation_fallback("read", |_| async { Err(ApiError::http(404, "nope", "volume")) }).await;
        assert!(result.unwrap_err().is_not_found());
    }
}
