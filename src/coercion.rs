//! Conversions between schema values and API values.
//!
//! *Expand* functions turn state/config values (`serde_json::Value`, which
//! may be null or absent) into the typed inputs the API expects. *Flatten*
//! functions go the other way. Expanders never fail on unset input: they
//! return `None` / [`Patch::Unset`].

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// A value that failed to coerce.
#[derive(Debug, Error)]
pub enum CoercionError {
    /// Not an `address/prefix` network.
    #[error("invalid CIDR '{0}'")]
    Cidr(String),

    /// Not an RFC 3339 timestamp.
    #[error("invalid RFC 3339 timestamp '{value}': {source}")]
    Time {
        /// The offending input.
        value: String,
        /// Underlying parse error.
        source: chrono::ParseError,
    },

    /// Not a duration such as `1h30m`.
    #[error("invalid duration '{value}': {source}")]
    Duration {
        /// The offending input.
        value: String,
        /// Underlying parse error.
        source: humantime::DurationError,
    },
}

/// A field of a partial-update payload.
///
/// `Unset` leaves the remote value untouched and is skipped when
/// serializing (pair it with `#[serde(skip_serializing_if = "Patch::is_unset")]`),
/// `Clear` asks the API to clear the field and serializes as `null`,
/// `Set` carries the new value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Patch<T> {
    /// Not part of the update.
    #[default]
    Unset,
    /// Explicitly cleared.
    Clear,
    /// Set to a value.
    Set(T),
}

impl<T> Patch<T> {
    /// Whether the field is omitted from the update.
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// The new value, if one is set.
    pub fn as_set(&self) -> Option<&T> {
        match self {
            Self::Set(v) => Some(v),
            _ => None,
        }
    }

    /// Map the carried value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Patch<U> {
        match self {
            Self::Unset => Patch::Unset,
            Self::Clear => Patch::Clear,
            Self::Set(v) => Patch::Set(f(v)),
        }
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unset | Self::Clear => serializer.serialize_none(),
            Self::Set(v) => v.serialize(serializer),
        }
    }
}

/// An IP network in `address/prefix` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNet {
    /// Network address as written.
    pub addr: IpAddr,
    /// Prefix length.
    pub prefix: u8,
}

impl FromStr for IpNet {
    type Err = CoercionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoercionError::Cidr(s.to_string());
        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl Serialize for IpNet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// =========================================================================
// Expand
// =========================================================================

/// String to optional string; null and `""` both mean "not provided".
pub fn expand_string_ptr(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// String for an update payload; `""` is an explicit clear.
pub fn expand_updatable_string(value: Option<&Value>) -> Patch<String> {
    match value {
        None | Some(Value::Null) => Patch::Unset,
        Some(Value::String(s)) if s.is_empty() => Patch::Clear,
        Some(Value::String(s)) => Patch::Set(s.clone()),
        Some(other) => Patch::Set(other.to_string()),
    }
}

/// List of strings; non-string elements are skipped.
pub fn expand_strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// List of strings for an update payload; an empty list is kept as an
/// explicit empty value, distinct from an absent one.
pub fn expand_updatable_strings(value: Option<&Value>) -> Patch<Vec<String>> {
    match value {
        None | Some(Value::Null) => Patch::Unset,
        Some(v) => Patch::Set(expand_strings(Some(v))),
    }
}

/// Tags; empty entries are dropped.
pub fn expand_tags(value: Option<&Value>) -> Vec<String> {
    expand_strings(value)
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect()
}

/// Integer to optional integer.
pub fn expand_i64_ptr(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_i64)
}

/// Boolean to optional boolean.
pub fn expand_bool_ptr(value: Option<&Value>) -> Option<bool> {
    value.and_then(Value::as_bool)
}

/// CIDR string to network.
pub fn expand_ip_net(value: &str) -> Result<IpNet, CoercionError> {
    value.parse()
}

/// RFC 3339 string to timestamp.
pub fn expand_time(value: &str) -> Result<DateTime<Utc>, CoercionError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| CoercionError::Time {
            value: value.to_string(),
            source,
        })
}

/// Duration string (`90s`, `1h30m`) to duration.
pub fn expand_duration(value: &str) -> Result<Duration, CoercionError> {
    humantime::parse_duration(value).map_err(|source| CoercionError::Duration {
        value: value.to_string(),
        source,
    })
}

// =========================================================================
// Flatten
// =========================================================================

/// Optional string to a state string; `None` becomes `""`.
pub fn flatten_string_ptr(value: Option<&str>) -> Value {
    Value::String(value.unwrap_or_default().to_string())
}

/// Timestamp to RFC 3339 (second precision, `Z` suffix); `None` becomes `""`.
pub fn flatten_time(value: Option<&DateTime<Utc>>) -> Value {
    match value {
        Some(t) => Value::String(t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => Value::String(String::new()),
    }
}

/// Canonical text of a duration, e.g. `1h30m`, `0s`.
pub fn canonical_duration(value: Duration) -> String {
    if value.is_zero() {
        return "0s".to_string();
    }
    humantime::format_duration(value).to_string().replace(' ', "")
}

/// Duration to its canonical string; `None` becomes `""`.
pub fn flatten_duration(value: Option<Duration>) -> Value {
    Value::String(value.map(canonical_duration).unwrap_or_default())
}

/// Enum token to its lowercase state form.
pub fn flatten_enum(token: impl AsRef<str>) -> Value {
    Value::String(token.as_ref().to_lowercase())
}

/// Tags to a state list.
pub fn flatten_tags(tags: &[String]) -> Value {
    Value::Array(tags.iter().cloned().map(Value::String).collect())
}

/// Network to its `address/prefix` form; `None` becomes `""`.
pub fn flatten_ip_net(value: Option<&IpNet>) -> Value {
    Value::String(value.map(IpNet::to_string).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_expand_string_ptr() {
        assert_eq!(expand_string_ptr(None), None);
        assert_eq!(expand_string_ptr(Some(&Value::Null)), None);
        assert_eq!(expand_string_ptr(Some(&json!(""))), None);
        assert_eq!(expand_string_ptr(Some(&json!("abc"))), Some("abc".to_string()));
    }

    #[test]
    fn test_expand_updatable_string() {
        assert_eq!(expand_updatable_string(None), Patch::Unset);
        assert_eq!(expand_updatable_string(Some(&json!(""))), Patch::Clear);
        assert_eq!(
            expand_updatable_string(Some(&json!("x"))),
            Patch::Set("x".to_string())
        );
    }

    #[test]
    fn test_expand_updatable_strings_distinguishes_empty() {
        assert_eq!(expand_updatable_strings(None), Patch::Unset);
        assert_eq!(expand_updatable_strings(Some(&json!([]))), Patch::Set(vec![]));
        assert_eq!(
            expand_updatable_strings(Some(&json!(["a", "b"]))),
            Patch::Set(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_patch_serialization() {
        #[derive(Serialize)]
        struct Body {
            #[serde(skip_serializing_if = "Patch::is_unset")]
            name: Patch<String>,
            #[serde(skip_serializing_if = "Patch::is_unset")]
            tags: Patch<Vec<String>>,
            #[serde(skip_serializing_if = "Patch::is_unset")]
            description: Patch<String>,
        }

        let body = Body {
            name: Patch::Set("vol".to_string()),
            tags: Patch::Unset,
            description: Patch::Clear,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"name": "vol", "description": null})
        );
    }

    #[test]
    fn test_expand_scalars() {
        assert_eq!(expand_i64_ptr(Some(&json!(42))), Some(42));
        assert_eq!(expand_i64_ptr(Some(&json!("42"))), None);
        assert_eq!(expand_bool_ptr(Some(&json!(false))), Some(false));
        assert_eq!(expand_bool_ptr(None), None);
        assert_eq!(expand_tags(Some(&json!(["a", "", "b"]))), vec!["a", "b"]);
    }

    #[test]
    fn test_ip_net() {
        let net = expand_ip_net("10.0.0.0/24").unwrap();
        assert_eq!(net.prefix, 24);
        assert_eq!(flatten_ip_net(Some(&net)), json!("10.0.0.0/24"));

        let net = expand_ip_net("fd00::/64").unwrap();
        assert_eq!(net.to_string(), "fd00::/64");

        assert!(expand_ip_net("10.0.0.0").is_err());
        assert!(expand_ip_net("10.0.0.0/33").is_err());
        assert!(expand_ip_net("nope/8").is_err());
    }

    #[test]
    fn test_time_round_trip() {
        let t = expand_time("2024-03-01T10:20:30Z").unwrap();
        assert_eq!(flatten_time(Some(&t)), json!("2024-03-01T10:20:30Z"));

        let t = expand_time("2024-03-01T12:20:30+02:00").unwrap();
        assert_eq!(flatten_time(Some(&t)), json!("2024-03-01T10:20:30Z"));

        assert_eq!(flatten_time(None), json!(""));
        assert!(expand_time("yesterday").is_err());
    }

    #[test]
    fn test_duration_round_trip() {
        for canonical in ["1h30m", "10s", "0s", "2m5s"] {
            let d = expand_duration(canonical).unwrap();
            assert_eq!(flatten_duration(Some(d)), json!(canonical));
        }
        assert_eq!(canonical_duration(expand_duration("90m").unwrap()), "1h30m");
        assert!(expand_duration("soon").is_err());
    }

    #[test]
    fn test_flatten_helpers() {
        assert_eq!(flatten_string_ptr(None), json!(""));
        assert_eq!(flatten_string_ptr(Some("x")), json!("x"));
        assert_eq!(flatten_enum("SBS_5K"), json!("sbs_5k"));
        assert_eq!(
            flatten_tags(&["a".to_string(), "b".to_string()]),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_string_round_trip() {
        for s in ["a", "hello world"] {
            let expanded = expand_string_ptr(Some(&json!(s)));
            assert_eq!(flatten_string_ptr(expanded.as_deref()), json!(s));
        }
        let expanded = expand_string_ptr(Some(&json!("")));
        assert_eq!(flatten_string_ptr(expanded.as_deref()), json!(""));
    }

    proptest! {
        #[test]
        fn prop_duration_canonical_round_trip(secs in 0u64..86_400) {
            let canonical = canonical_duration(Duration::from_secs(secs));
            prop_assert_eq!(expand_duration(&canonical).unwrap(), Duration::from_secs(secs));
            prop_assert!(!canonical.contains(' '));
        }

        #[test]
        fn prop_tags_round_trip(tags in proptest::collection::vec("[a-z0-9=_-]{1,12}", 0..6)) {
            let flattened = flatten_tags(&tags);
            prop_assert_eq!(expand_tags(Some(&flattened)), tags);
        }
    }
}
