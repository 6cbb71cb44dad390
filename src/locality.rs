//! Zones, regions and locality-qualified identifiers.
//!
//! Every Scaleway resource lives in a zone (`fr-par-1`) or a region
//! (`fr-par`). The provider keeps that locality inside the resource ID so
//! that state round-trips and imports never lose it:
//!
//! ```text
//! <locality>/<uuid>            top-level resource
//! <locality>/<uuid>/<child>    nested resource (child is a revision or sub-id)
//! <uuid>                       unqualified input, defaulted to the current scope
//! ```
//!
//! # Example
//!
//! ```
//! use scaleway_provider::locality::{format_id, parse_id, Locality, Zone};
//!
//! let id = format_id(Zone::FrPar1, "11111111-2222-3333-4444-555555555555");
//! assert_eq!(id, "fr-par-1/11111111-2222-3333-4444-555555555555");
//!
//! let (locality, uuid) = parse_id(&id).unwrap();
//! assert_eq!(locality, Locality::Zone(Zone::FrPar1));
//! assert_eq!(uuid, "11111111-2222-3333-4444-555555555555");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors raised while parsing localities and identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The identifier does not have the expected shape.
    #[error("malformed id '{id}': {reason}")]
    MalformedId {
        /// The offending input.
        id: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The locality token is neither a known zone nor a known region.
    #[error("unknown locality '{0}'")]
    UnknownLocality(String),
}

impl IdError {
    fn malformed(id: &str, reason: &'static str) -> Self {
        Self::MalformedId {
            id: id.to_string(),
            reason,
        }
    }
}

/// A Scaleway region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// Paris.
    FrPar,
    /// Amsterdam.
    NlAms,
    /// Warsaw.
    PlWaw,
}

impl Region {
    /// All regions, in declaration order.
    pub const ALL: [Region; 3] = [Region::FrPar, Region::NlAms, Region::PlWaw];

    /// The region token, e.g. `fr-par`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrPar => "fr-par",
            Self::NlAms => "nl-ams",
            Self::PlWaw => "pl-waw",
        }
    }

    /// Zones of this region, ordered by ascending zone number.
    ///
    /// The order is stable and is the order data sources emit.
    pub fn zones(&self) -> &'static [Zone] {
        match self {
            Self::FrPar => &[Zone::FrPar1, Zone::FrPar2, Zone::FrPar3],
            Self::NlAms => &[Zone::NlAms1, Zone::NlAms2, Zone::NlAms3],
            Self::PlWaw => &[Zone::PlWaw1, Zone::PlWaw2, Zone::PlWaw3],
        }
    }

    /// The first zone of the region, used when a zone must be derived.
    pub fn first_zone(&self) -> Zone {
        self.zones()[0]
    }
}

/// A Scaleway availability zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Zone {
    /// Paris 1.
    FrPar1,
    /// Paris 2.
    FrPar2,
    /// Paris 3.
    FrPar3,
    /// Amsterdam 1.
    NlAms1,
    /// Amsterdam 2.
    NlAms2,
    /// Amsterdam 3.
    NlAms3,
    /// Warsaw 1.
    PlWaw1,
    /// Warsaw 2.
    PlWaw2,
    /// Warsaw 3.
    PlWaw3,
}

impl Zone {
    /// All zones, grouped by region.
    pub const ALL: [Zone; 9] = [
        Zone::FrPar1,
        Zone::FrPar2,
        Zone::FrPar3,
        Zone::NlAms1,
        Zone::NlAms2,
        Zone::NlAms3,
        Zone::PlWaw1,
        Zone::PlWaw2,
        Zone::PlWaw3,
    ];

    /// The zone token, e.g. `fr-par-1`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrPar1 => "fr-par-1",
            Self::FrPar2 => "fr-par-2",
            Self::FrPar3 => "fr-par-3",
            Self::NlAms1 => "nl-ams-1",
            Self::NlAms2 => "nl-ams-2",
            Self::NlAms3 => "nl-ams-3",
            Self::PlWaw1 => "pl-waw-1",
            Self::PlWaw2 => "pl-waw-2",
            Self::PlWaw3 => "pl-waw-3",
        }
    }

    /// The region this zone belongs to.
    pub fn region(&self) -> Region {
        match self {
            Self::FrPar1 | Self::FrPar2 | Self::FrPar3 => Region::FrPar,
            Self::NlAms1 | Self::NlAms2 | Self::NlAms3 => Region::NlAms,
            Self::PlWaw1 | Self::PlWaw2 | Self::PlWaw3 => Region::PlWaw,
        }
    }
}

impl FromStr for Region {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(region) = Region::ALL.into_iter().find(|r| r.as_str() == s) {
            return Ok(region);
        }
        if Zone::ALL.iter().any(|z| z.as_str() == s) {
            return Err(IdError::malformed(s, "expected a region, got a zone"));
        }
        Err(IdError::UnknownLocality(s.to_string()))
    }
}

impl FromStr for Zone {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(zone) = Zone::ALL.into_iter().find(|z| z.as_str() == s) {
            return Ok(zone);
        }
        if Region::ALL.iter().any(|r| r.as_str() == s) {
            return Err(IdError::malformed(s, "expected a zone, got a region"));
        }
        Err(IdError::UnknownLocality(s.to_string()))
    }
}

/// Either a zone or a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locality {
    /// Zone scope.
    Zone(Zone),
    /// Region scope.
    Region(Region),
}

impl Locality {
    /// The locality token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zone(z) => z.as_str(),
            Self::Region(r) => r.as_str(),
        }
    }

    /// The region of this locality; a zone resolves to its parent region.
    pub fn region(&self) -> Region {
        match self {
            Self::Zone(z) => z.region(),
            Self::Region(r) => *r,
        }
    }
}

impl FromStr for Locality {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(zone) = s.parse::<Zone>() {
            return Ok(Self::Zone(zone));
        }
        if let Ok(region) = s.parse::<Region>() {
            return Ok(Self::Region(region));
        }
        Err(IdError::UnknownLocality(s.to_string()))
    }
}

impl From<Zone> for Locality {
    fn from(zone: Zone) -> Self {
        Self::Zone(zone)
    }
}

impl From<Region> for Locality {
    fn from(region: Region) -> Self {
        Self::Region(region)
    }
}

macro_rules! string_like {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    )*};
}

string_like!(Region, Zone, Locality);

/// Whether `s` is a canonical hyphenated UUID in lowercase.
pub fn is_uuid(s: &str) -> bool {
    s.len() == 36 && !s.bytes().any(|b| b.is_ascii_uppercase()) && uuid::Uuid::try_parse(s).is_ok()
}

/// Format a top-level identifier: `{locality}/{id}`.
pub fn format_id(locality: impl Into<Locality>, id: &str) -> String {
    format!("{}/{}", locality.into(), id)
}

/// Format a nested identifier: `{locality}/{parent}/{child}`.
pub fn format_nested_id(locality: impl Into<Locality>, parent: &str, child: &str) -> String {
    format!("{}/{}/{}", locality.into(), parent, child)
}

/// Parse a `locality/uuid` identifier.
pub fn parse_id(s: &str) -> Result<(Locality, String), IdError> {
    let (token, id) = s
        .split_once('/')
        .ok_or_else(|| IdError::malformed(s, "expected <locality>/<uuid>"))?;
    if id.contains('/') {
        return Err(IdError::malformed(s, "too many segments for <locality>/<uuid>"));
    }
    let locality = token.parse::<Locality>()?;
    if !is_uuid(id) {
        return Err(IdError::malformed(s, "id part is not a canonical UUID"));
    }
    Ok((locality, id.to_string()))
}

/// Parse a `zone/uuid` identifier. A region prefix is rejected.
pub fn parse_zoned_id(s: &str) -> Result<(Zone, String), IdError> {
    match parse_id(s)? {
        (Locality::Zone(zone), id) => Ok((zone, id)),
        (Locality::Region(_), _) => Err(IdError::malformed(s, "expected a zone prefix")),
    }
}

/// Parse a `region/uuid` identifier. A zone prefix is rejected.
pub fn parse_regional_id(s: &str) -> Result<(Region, String), IdError> {
    match parse_id(s)? {
        (Locality::Region(region), id) => Ok((region, id)),
        (Locality::Zone(_), _) => Err(IdError::malformed(s, "expected a region prefix")),
    }
}

/// Parse a `locality/parent/child` identifier. Exactly three segments.
pub fn parse_nested_id(s: &str) -> Result<(Locality, String, String), IdError> {
    let parts: Vec<&str> = s.split('/').collect();
    let [token, parent, child] = parts.as_slice() else {
        return Err(IdError::malformed(s, "expected <locality>/<parent>/<child>"));
    };
    let locality = token.parse::<Locality>()?;
    if !is_uuid(parent) {
        return Err(IdError::malformed(s, "parent part is not a canonical UUID"));
    }
    if child.is_empty() {
        return Err(IdError::malformed(s, "child part is empty"));
    }
    Ok((locality, parent.to_string(), child.to_string()))
}

/// Return the trailing segment of an identifier, with or without a
/// locality prefix. Idempotent; the empty string maps to itself.
pub fn strip_locality(s: &str) -> &str {
    s.rsplit_once('/').map_or(s, |(_, id)| id)
}

/// A zone-scoped identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZonedId {
    /// Zone of the resource.
    pub zone: Zone,
    /// Resource UUID.
    pub id: String,
}

impl ZonedId {
    /// Create a zoned identifier.
    pub fn new(zone: Zone, id: impl Into<String>) -> Self {
        Self { zone, id: id.into() }
    }

    /// Parse `zone/uuid`, or a plain `uuid` that is placed in `default_zone`.
    pub fn parse_or_default(s: &str, default_zone: Zone) -> Result<Self, IdError> {
        if s.contains('/') {
            return s.parse();
        }
        if !is_uuid(s) {
            return Err(IdError::malformed(s, "not a canonical UUID"));
        }
        Ok(Self::new(default_zone, s))
    }
}

impl fmt::Display for ZonedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone, self.id)
    }
}

impl FromStr for ZonedId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (zone, id) = parse_zoned_id(s)?;
        Ok(Self { zone, id })
    }
}

/// A region-scoped identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionalId {
    /// Region of the resource.
    pub region: Region,
    /// Resource UUID.
    pub id: String,
}

impl RegionalId {
    /// Create a regional identifier.
    pub fn new(region: Region, id: impl Into<String>) -> Self {
        Self {
            region,
            id: id.into(),
        }
    }

    /// Parse `region/uuid`, or a plain `uuid` that is placed in `default_region`.
    pub fn parse_or_default(s: &str, default_region: Region) -> Result<Self, IdError> {
        if s.contains('/') {
            return s.parse();
        }
        if !is_uuid(s) {
            return Err(IdError::malformed(s, "not a canonical UUID"));
        }
        Ok(Self::new(default_region, s))
    }
}

impl fmt::Display for RegionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.id)
    }
}

impl FromStr for RegionalId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (region, id) = parse_regional_id(s)?;
        Ok(Self { region, id })
    }
}
