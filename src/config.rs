//! Configuration resolution and credential provenance.
//!
//! The effective profile is merged field by field from four sources, lowest
//! precedence first:
//!
//! 1. built-in defaults (`fr-par`, `fr-par-1`, the public API URL)
//! 2. the active profile of the YAML config file
//! 3. the provider block
//! 4. `SCW_*` environment variables
//!
//! Every populated field remembers which source won ([`SourceTag`]). Fields
//! carried by more than one source are listed in a [`MultiSourceReport`],
//! which `Configure` turns into a warning.
//!
//! Missing region, zone or project is not an error here. Resources that need
//! one raise it through the extractors in [`crate::meta`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::locality::{IdError, Region, Zone};
use crate::schema::Diagnostic;

/// Public API endpoint used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "https://api.scaleway.com";

/// Environment variable names.
pub mod env {
    /// Access key.
    pub const ACCESS_KEY: &str = "SCW_ACCESS_KEY";
    /// Secret key.
    pub const SECRET_KEY: &str = "SCW_SECRET_KEY";
    /// Default project.
    pub const DEFAULT_PROJECT_ID: &str = "SCW_DEFAULT_PROJECT_ID";
    /// Default organization.
    pub const DEFAULT_ORGANIZATION_ID: &str = "SCW_DEFAULT_ORGANIZATION_ID";
    /// Default region.
    pub const DEFAULT_REGION: &str = "SCW_DEFAULT_REGION";
    /// Default zone.
    pub const DEFAULT_ZONE: &str = "SCW_DEFAULT_ZONE";
    /// API URL override.
    pub const API_URL: &str = "SCW_API_URL";
    /// Profile to select in the config file.
    pub const PROFILE: &str = "SCW_PROFILE";
    /// Config file location.
    pub const CONFIG_PATH: &str = "SCW_CONFIG_PATH";
    /// Registers beta components when non-empty.
    pub const ENABLE_BETA: &str = "SCW_ENABLE_BETA";
    /// Appended to the user agent.
    pub const APPEND_USER_AGENT: &str = "TF_APPEND_USER_AGENT";
}

/// Errors raised while resolving the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("cannot read config file {path}: {source}")]
    ConfigFileUnreadable {
        /// File location.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid YAML for a profile file.
    #[error("invalid config file {path}: {source}")]
    ConfigFileInvalid {
        /// File location.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_yaml::Error,
    },

    /// The selected profile does not exist in the config file.
    #[error("profile '{0}' not found in config file")]
    UnknownActiveProfile(String),

    /// A field carries an unusable value.
    #[error("invalid {field} '{value}' from {source_tag}: {reason}")]
    InvalidValue {
        /// Field name.
        field: Field,
        /// Offending value.
        value: String,
        /// Where it came from.
        source_tag: SourceTag,
        /// What is wrong with it.
        reason: String,
    },
}

/// Where the effective value of a field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// Built-in default.
    Default,
    /// Active profile of the config file.
    ActiveProfile,
    /// Provider block.
    ProviderBlock,
    /// Environment variable.
    Environment,
    /// Computed from another field.
    Derived,
    /// No source supplied a value.
    Unset,
}

impl SourceTag {
    /// Text form used in diagnostics and data-source outputs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::ActiveProfile => "active_profile",
            Self::ProviderBlock => "provider_block",
            Self::Environment => "environment",
            Self::Derived => "derived",
            Self::Unset => "unset",
        }
    }

    // Derived ranks highest: a derived value already agrees with the field
    // it came from, so re-running derivation leaves it alone.
    fn rank(self) -> u8 {
        match self {
            Self::Unset => 0,
            Self::Default => 1,
            Self::ActiveProfile => 2,
            Self::ProviderBlock => 3,
            Self::Environment => 4,
            Self::Derived => 5,
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field of the effective profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Access key.
    AccessKey,
    /// Secret key.
    SecretKey,
    /// Default project.
    ProjectId,
    /// Default organization.
    OrganizationId,
    /// Default region.
    Region,
    /// Default zone.
    Zone,
    /// API URL.
    ApiUrl,
}

impl Field {
    /// Every tracked field.
    pub const ALL: [Field; 7] = [
        Field::AccessKey,
        Field::SecretKey,
        Field::ProjectId,
        Field::OrganizationId,
        Field::Region,
        Field::Zone,
        Field::ApiUrl,
    ];

    /// Fields checked for multi-source overlap.
    pub const SENSITIVE: [Field; 3] = [Field::AccessKey, Field::SecretKey, Field::ProjectId];

    /// Attribute-style name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessKey => "access_key",
            Self::SecretKey => "secret_key",
            Self::ProjectId => "project_id",
            Self::OrganizationId => "organization_id",
            Self::Region => "region",
            Self::Zone => "zone",
            Self::ApiUrl => "api_url",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where environment variables are read from.
pub trait EnvSource: Send + Sync {
    /// Value of `key`; empty values count as unset.
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// One profile of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileProfile {
    /// Access key.
    pub access_key: Option<String>,
    /// Secret key.
    pub secret_key: Option<String>,
    /// Default project.
    pub default_project_id: Option<String>,
    /// Default organization.
    pub default_organization_id: Option<String>,
    /// Default region.
    pub default_region: Option<String>,
    /// Default zone.
    pub default_zone: Option<String>,
    /// API URL.
    pub api_url: Option<String>,
}

impl FileProfile {
    fn overlay(&self, named: &FileProfile) -> FileProfile {
        fn pick(base: &Option<String>, over: &Option<String>) -> Option<String> {
            over.clone().or_else(|| base.clone())
        }
        FileProfile {
            access_key: pick(&self.access_key, &named.access_key),
            secret_key: pick(&self.secret_key, &named.secret_key),
            default_project_id: pick(&self.default_project_id, &named.default_project_id),
            default_organization_id: pick(
                &self.default_organization_id,
                &named.default_organization_id,
            ),
            default_region: pick(&self.default_region, &named.default_region),
            default_zone: pick(&self.default_zone, &named.default_zone),
            api_url: pick(&self.api_url, &named.api_url),
        }
    }
}

/// The YAML config file: the top level is the default profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigFile {
    /// Top-level (default) profile.
    #[serde(flatten)]
    pub default: FileProfile,
    /// Profile selected when neither the provider block nor `SCW_PROFILE`
    /// names one.
    pub active_profile: Option<String>,
    /// Named profiles.
    #[serde(default)]
    pub profiles: HashMap<String, FileProfile>,
}

impl ConfigFile {
    /// Parse a config file.
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        // An empty file is a valid, empty config.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|source| ConfigError::ConfigFileInvalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a config file. A missing file yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(path, &text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file");
                Ok(None)
            },
            Err(source) => Err(ConfigError::ConfigFileUnreadable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// The profile called `name`, layered over the top-level profile.
    pub fn profile(&self, name: &str) -> Result<FileProfile, ConfigError> {
        if name == "default" && !self.profiles.contains_key(name) {
            return Ok(self.default.clone());
        }
        self.profiles
            .get(name)
            .map(|named| self.default.overlay(named))
            .ok_or_else(|| ConfigError::UnknownActiveProfile(name.to_string()))
    }
}

/// Default config file location: `SCW_CONFIG_PATH`, else
/// `~/.config/scw/config.yaml`.
pub fn config_path(env: &dyn EnvSource) -> Option<PathBuf> {
    if let Some(path) = env.var(env::CONFIG_PATH) {
        return Some(PathBuf::from(path));
    }
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".config/scw/config.yaml"))
}

/// The provider block as configured by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Access key.
    pub access_key: Option<String>,
    /// Secret key.
    pub secret_key: Option<String>,
    /// Config file profile to use.
    pub profile: Option<String>,
    /// Default project.
    pub project_id: Option<String>,
    /// Default organization.
    pub organization_id: Option<String>,
    /// Default region.
    pub region: Option<String>,
    /// Default zone.
    pub zone: Option<String>,
    /// API URL.
    pub api_url: Option<String>,
}

/// A field populated by more than one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiSourceEntry {
    /// The field.
    pub field: Field,
    /// Every source that carried a value, lowest precedence first.
    pub sources: Vec<SourceTag>,
    /// The source whose value is used.
    pub winner: SourceTag,
}

/// Overlapping sources for sensitive fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultiSourceReport {
    /// One entry per overlapping field.
    pub entries: Vec<MultiSourceEntry>,
}

impl MultiSourceReport {
    /// Whether no field overlaps.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Warning describing the overlap, if any.
    pub fn to_diagnostic(&self) -> Option<Diagnostic> {
        if self.is_empty() {
            return None;
        }
        let detail = self
            .entries
            .iter()
            .map(|e| {
                let sources: Vec<&str> = e.sources.iter().map(|s| s.as_str()).collect();
                format!("{} is set by {} (using {})", e.field, sources.join(", "), e.winner)
            })
            .collect::<Vec<_>>()
            .join("; ");
        Some(
            Diagnostic::warning("Multiple variable sources detected")
                .with_detail(format!("{detail}. Make sure the right credentials are used.")),
        )
    }
}

/// The merged profile with per-field provenance.
#[derive(Debug)]
pub struct ResolvedProfile {
    /// Access key.
    pub access_key: Option<String>,
    /// Secret key.
    pub secret_key: Option<SecretString>,
    /// Default project.
    pub project_id: Option<String>,
    /// Default organization.
    pub organization_id: Option<String>,
    /// Default region.
    pub region: Option<Region>,
    /// Default zone.
    pub zone: Option<Zone>,
    /// API URL.
    pub api_url: Url,
    /// Name of the selected config file profile.
    pub profile_name: Option<String>,
    sources: BTreeMap<Field, SourceTag>,
}

impl ResolvedProfile {
    /// Which source supplied `field`.
    pub fn source_of(&self, field: Field) -> SourceTag {
        self.sources.get(&field).copied().unwrap_or(SourceTag::Unset)
    }

    /// Every field with its source.
    pub fn sources(&self) -> impl Iterator<Item = (Field, SourceTag)> + '_ {
        Field::ALL.into_iter().map(|f| (f, self.source_of(f)))
    }
}

/// Output of [`resolve`].
#[derive(Debug)]
pub struct Resolution {
    /// The merged profile.
    pub profile: ResolvedProfile,
    /// Overlapping sources to warn about.
    pub report: MultiSourceReport,
}

/// A field's candidates, lowest precedence first.
struct Candidates {
    values: Vec<(SourceTag, String)>,
}

impl Candidates {
    fn new(layers: [(SourceTag, Option<String>); 4]) -> Self {
        Self {
            values: layers
                .into_iter()
                .filter_map(|(tag, v)| v.filter(|v| !v.is_empty()).map(|v| (tag, v)))
                .collect(),
        }
    }

    fn winner(&self) -> Option<&(SourceTag, String)> {
        self.values.last()
    }

    fn overlap(&self, field: Field) -> Option<MultiSourceEntry> {
        let (winner, _) = self.winner()?;
        (self.values.len() > 1).then(|| MultiSourceEntry {
            field,
            sources: self.values.iter().map(|(t, _)| *t).collect(),
            winner: *winner,
        })
    }
}

/// Resolve the effective profile from the config file at
/// [`config_path`], the provider block and the environment.
pub fn resolve(block: &ProviderConfig, env: &dyn EnvSource) -> Result<Resolution, ConfigError> {
    let file = match config_path(env) {
        Some(path) => ConfigFile::load(&path)?,
        None => None,
    };
    resolve_with_file(block, env, file.as_ref())
}

/// Resolve with an already loaded config file.
pub fn resolve_with_file(
    block: &ProviderConfig,
    env: &dyn EnvSource,
    file: Option<&ConfigFile>,
) -> Result<Resolution, ConfigError> {
    let selected = block
        .profile
        .clone()
        .filter(|p| !p.is_empty())
        .or_else(|| env.var(env::PROFILE))
        .or_else(|| file.and_then(|f| f.active_profile.clone()));

    let profile = match (&selected, file) {
        (Some(name), Some(file)) => file.profile(name)?,
        (Some(name), None) if name != "default" => {
            return Err(ConfigError::UnknownActiveProfile(name.clone()))
        },
        (None, Some(file)) => file.default.clone(),
        _ => FileProfile::default(),
    };
    debug!(profile = ?selected, "resolving provider configuration");

    let layers = |default: Option<&str>,
                  file: &Option<String>,
                  block: &Option<String>,
                  var: &str| {
        Candidates::new([
            (SourceTag::Default, default.map(str::to_string)),
            (SourceTag::ActiveProfile, file.clone()),
            (SourceTag::ProviderBlock, block.clone()),
            (SourceTag::Environment, env.var(var)),
        ])
    };

    let fields = [
        (Field::AccessKey, layers(None, &profile.access_key, &block.access_key, env::ACCESS_KEY)),
        (Field::SecretKey, layers(None, &profile.secret_key, &block.secret_key, env::SECRET_KEY)),
        (
            Field::ProjectId,
            layers(None, &profile.default_project_id, &block.project_id, env::DEFAULT_PROJECT_ID),
        ),
        (
            Field::OrganizationId,
            layers(
                None,
                &profile.default_organization_id,
                &block.organization_id,
                env::DEFAULT_ORGANIZATION_ID,
            ),
        ),
        (
            Field::Region,
            layers(
                Some(Region::FrPar.as_str()),
                &profile.default_region,
                &block.region,
                env::DEFAULT_REGION,
            ),
        ),
        (
            Field::Zone,
            layers(
                Some(Zone::FrPar1.as_str()),
                &profile.default_zone,
                &block.zone,
                env::DEFAULT_ZONE,
            ),
        ),
        (
            Field::ApiUrl,
            layers(Some(DEFAULT_API_URL), &profile.api_url, &block.api_url, env::API_URL),
        ),
    ];

    let mut report = MultiSourceReport::default();
    let mut sources = BTreeMap::new();
    let mut values: BTreeMap<Field, String> = BTreeMap::new();
    for (field, candidates) in &fields {
        if Field::SENSITIVE.contains(field) {
            report.entries.extend(candidates.overlap(*field));
        }
        if let Some((tag, value)) = candidates.winner() {
            sources.insert(*field, *tag);
            values.insert(*field, value.clone());
        }
    }

    let invalid = |field: Field, value: &str, sources: &BTreeMap<Field, SourceTag>, reason: String| {
        ConfigError::InvalidValue {
            field,
            value: value.to_string(),
            source_tag: sources.get(&field).copied().unwrap_or(SourceTag::Unset),
            reason,
        }
    };
    let region = match values.get(&Field::Region) {
        Some(v) => Some(
            v.parse::<Region>()
                .map_err(|e: IdError| invalid(Field::Region, v, &sources, e.to_string()))?,
        ),
        None => None,
    };
    let zone = match values.get(&Field::Zone) {
        Some(v) => Some(
            v.parse::<Zone>()
                .map_err(|e: IdError| invalid(Field::Zone, v, &sources, e.to_string()))?,
        ),
        None => None,
    };
    let api_url_text = values
        .get(&Field::ApiUrl)
        .cloned()
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let api_url = Url::parse(&api_url_text)
        .map_err(|e| invalid(Field::ApiUrl, &api_url_text, &sources, e.to_string()))?;

    let mut profile = ResolvedProfile {
        access_key: values.remove(&Field::AccessKey),
        secret_key: values.remove(&Field::SecretKey).map(SecretString::from),
        project_id: values.remove(&Field::ProjectId),
        organization_id: values.remove(&Field::OrganizationId),
        region,
        zone,
        api_url,
        profile_name: selected,
        sources,
    };
    derive_locality(&mut profile);

    Ok(Resolution { profile, report })
}

/// Reconcile region and zone: the field from the higher-precedence source
/// wins and the other one is derived from it.
pub fn derive_locality(profile: &mut ResolvedProfile) {
    let (Some(region), Some(zone)) = (profile.region, profile.zone) else {
        if let (None, Some(zone)) = (profile.region, profile.zone) {
            profile.region = Some(zone.region());
            profile.sources.insert(Field::Region, SourceTag::Derived);
        }
        return;
    };

    let region_source = profile.source_of(Field::Region);
    let zone_source = profile.source_of(Field::Zone);

    if zone_source.rank() > region_source.rank() {
        if region_source == SourceTag::Default || zone.region() != region {
            profile.region = Some(zone.region());
            profile.sources.insert(Field::Region, SourceTag::Derived);
        }
    } else if region_source.rank() > zone_source.rank() && zone.region() != region {
        profile.zone = Some(region.first_zone());
        profile.sources.insert(Field::Zone, SourceTag::Derived);
    }
}
