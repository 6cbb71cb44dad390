#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use scaleway_provider::testing::ProviderTester;
use scaleway_provider::{provider, MuxProvider};
use serde_json::json;
use wiremock::MockServer;

pub const SECRET: &str = "11111111-1111-1111-1111-111111111111";
pub const PROJECT_ID: &str = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";
pub const VOLUME_ID: &str = "22222222-3333-4444-5555-666666666666";
pub const KEY_ID: &str = "33333333-4444-5555-6666-777777777777";

pub fn env(extra: &[(&str, &str)]) -> HashMap<String, String> {
    [("SCW_CONFIG_PATH", "/nonexistent/scw/config.yaml")]
        .iter()
        .chain(extra)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A provider configured against `server`, with fast waiters.
pub async fn configured(server: &MockServer, extra_env: &[(&str, &str)]) -> ProviderTester<MuxProvider> {
    let provider = provider::builder()
        .env(env(extra_env))
        .waiter_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    let tester = ProviderTester::new(provider);
    let warnings = tester
        .configure(json!({
            "api_url": server.uri(),
            "secret_key": SECRET,
            "project_id": PROJECT_ID,
            "zone": "fr-par-1",
        }))
        .await
        .unwrap();
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    tester
}

pub fn block_volume(status: &str) -> serde_json::Value {
    json!({
        "id": VOLUME_ID,
        "name": "data",
        "project_id": PROJECT_ID,
        "zone": "fr-par-1",
        "size": 20_000_000_000u64,
        "specs": {"perf_iops": 5000, "class": "sbs"},
        "status": status,
        "tags": [],
    })
}
