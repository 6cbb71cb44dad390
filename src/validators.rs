//! Catalog of attribute validators.
//!
//! Validators are attached to schema attributes and run on configured
//! values during `ValidateResourceConfig` and `ValidateProviderConfig`.
//! A null value is never checked; presence is the schema walk's concern.

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coercion;
use crate::locality;
use crate::schema::Diagnostic;

/// A value check attached to an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    /// Canonical hyphenated UUID.
    Uuid,
    /// UUID, optionally prefixed with a known zone or region.
    UuidOrLocalizedUuid,
    /// Email address.
    Email,
    /// `address/prefix` network.
    Cidr,
    /// IPv4 or IPv6 address.
    IpAddress,
    /// Colon separated MAC address.
    MacAddress,
    /// One of a fixed set of strings.
    OneOf(Vec<String>),
    /// Integer in 0..=65535.
    Port,
    /// Duration such as `1h30m`.
    Duration,
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$")
            .expect("email pattern compiles")
    })
}

fn mac_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$")
            .expect("MAC pattern compiles")
    })
}

impl Validator {
    /// One of the known region tokens.
    pub fn region() -> Self {
        Self::OneOf(locality::Region::ALL.iter().map(|r| r.to_string()).collect())
    }

    /// One of the known zone tokens.
    pub fn zone() -> Self {
        Self::OneOf(locality::Zone::ALL.iter().map(|z| z.to_string()).collect())
    }

    /// Check `value` found at `path`. Returns `None` when it is accepted.
    pub fn check(&self, path: &str, value: &Value) -> Option<Diagnostic> {
        if value.is_null() {
            return None;
        }
        let problem = match self {
            Self::Port => match value.as_i64() {
                Some(port) if (0..=65535).contains(&port) => None,
                Some(port) => Some(format!("port {port} is outside 0-65535")),
                None => Some("expected an integer port".to_string()),
            },
            _ => match value.as_str() {
                Some(s) => self.check_str(s),
                None => Some("expected a string".to_string()),
            },
        };

        problem.map(|detail| {
            Diagnostic::error(format!("Invalid value for '{}'", path))
                .with_detail(detail)
                .with_attribute(path)
        })
    }

    fn check_str(&self, s: &str) -> Option<String> {
        match self {
            Self::Uuid => (!locality::is_uuid(s)).then(|| format!("'{s}' is not a UUID")),
            Self::UuidOrLocalizedUuid => {
                if locality::is_uuid(s) || locality::parse_id(s).is_ok() {
                    None
                } else {
                    Some(format!("'{s}' is neither a UUID nor a localized UUID"))
                }
            },
            Self::Email => {
                (!email_regex().is_match(s)).then(|| format!("'{s}' is not an email address"))
            },
            Self::Cidr => coercion::expand_ip_net(s).err().map(|e| e.to_string()),
            Self::IpAddress => s
                .parse::<IpAddr>()
                .err()
                .map(|_| format!("'{s}' is not an IP address")),
            Self::MacAddress => {
                (!mac_regex().is_match(s)).then(|| format!("'{s}' is not a MAC address"))
            },
            Self::OneOf(allowed) => (!allowed.iter().any(|a| a == s))
                .then(|| format!("'{s}' must be one of: {}", allowed.join(", "))),
            Self::Duration => coercion::expand_duration(s).err().map(|e| e.to_string()),
            Self::Port => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const UUID: &str = "11111111-2222-3333-4444-555555555555";

    fn accepts(v: &Validator, value: Value) -> bool {
        v.check("attr", &value).is_none()
    }

    #[test]
    fn test_uuid_validators() {
        assert!(accepts(&Validator::Uuid, json!(UUID)));
        assert!(!accepts(&Validator::Uuid, json!("fr-par-1/11111111-2222-3333-4444-555555555555")));
        assert!(accepts(&Validator::UuidOrLocalizedUuid, json!(UUID)));
        assert!(accepts(
            &Validator::UuidOrLocalizedUuid,
            json!(format!("fr-par/{UUID}"))
        ));
        assert!(!accepts(
            &Validator::UuidOrLocalizedUuid,
            json!(format!("mars-1/{UUID}"))
        ));
    }

    #[test]
    fn test_network_validators() {
        assert!(accepts(&Validator::Cidr, json!("192.168.0.0/16")));
        assert!(!accepts(&Validator::Cidr, json!("192.168.0.0")));
        assert!(accepts(&Validator::IpAddress, json!("::1")));
        assert!(!accepts(&Validator::IpAddress, json!("300.0.0.1")));
        assert!(accepts(&Validator::MacAddress, json!("02:00:00:aa:BB:cc")));
        assert!(!accepts(&Validator::MacAddress, json!("02-00-00-aa-bb-cc")));
    }

    #[test]
    fn test_scalar_validators() {
        assert!(accepts(&Validator::Email, json!("ops@example.com")));
        assert!(!accepts(&Validator::Email, json!("ops@")));
        assert!(accepts(&Validator::Port, json!(443)));
        assert!(!accepts(&Validator::Port, json!(70000)));
        assert!(!accepts(&Validator::Port, json!("443")));
        assert!(accepts(&Validator::Duration, json!("1h30m")));
        assert!(!accepts(&Validator::Duration, json!("later")));
    }

    #[test]
    fn test_one_of() {
        let v = Validator::OneOf(vec!["sbs_5k".into(), "sbs_15k".into()]);
        assert!(accepts(&v, json!("sbs_5k")));
        let diag = v.check("perf_iops", &json!("fast")).unwrap();
        assert_eq!(diag.attribute.as_deref(), Some("perf_iops"));
        assert!(diag.detail.unwrap().contains("sbs_5k, sbs_15k"));
    }

    #[test]
    fn test_locality_validators() {
        assert!(accepts(&Validator::region(), json!("pl-waw")));
        assert!(!accepts(&Validator::region(), json!("pl-waw-1")));
        assert!(accepts(&Validator::zone(), json!("nl-ams-3")));
        assert!(!accepts(&Validator::zone(), json!("us-east-1")));
    }

    #[test]
    fn test_null_is_accepted() {
        assert!(accepts(&Validator::Uuid, Value::Null));
    }
}
