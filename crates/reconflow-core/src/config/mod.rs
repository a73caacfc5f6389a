use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::debug;

use crate::{error::ConfigError, model::Target};

pub mod capability;

pub use capability::{
    evaluate, Capability, CapabilityName, LookupSettings, Requirement, SkipReason,
    PLACEHOLDER_CREDENTIAL,
};

/// Prefix for environment overrides of the global file, e.g.
/// `RECONFLOW_APIS__SHODAN__ENABLED=false`.
pub const ENV_PREFIX: &str = "RECONFLOW";

/// Typed global configuration. Credentials are resolved from the environment
/// once, when this value is built, and never looked up again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfig {
    pub amass: Option<Capability>,
    pub subfinder: Option<Capability>,
    pub naabu: Option<Capability>,
    pub httpx: Option<Capability>,
    pub nuclei: Option<Capability>,
    pub hibp: Option<Capability>,
    pub github: Option<Capability>,
    pub ipinfo: Option<Capability>,
    pub shodan: Option<Capability>,
}

impl GlobalConfig {
    pub fn capability(&self, name: CapabilityName) -> Option<&Capability> {
        match name {
            CapabilityName::Amass => self.amass.as_ref(),
            CapabilityName::Subfinder => self.subfinder.as_ref(),
            CapabilityName::Naabu => self.naabu.as_ref(),
            CapabilityName::Httpx => self.httpx.as_ref(),
            CapabilityName::Nuclei => self.nuclei.as_ref(),
            CapabilityName::Hibp => self.hibp.as_ref(),
            CapabilityName::Github => self.github.as_ref(),
            CapabilityName::Ipinfo => self.ipinfo.as_ref(),
            CapabilityName::Shodan => self.shodan.as_ref(),
        }
    }

    fn slot(&mut self, name: CapabilityName) -> &mut Option<Capability> {
        match name {
            CapabilityName::Amass => &mut self.amass,
            CapabilityName::Subfinder => &mut self.subfinder,
            CapabilityName::Naabu => &mut self.naabu,
            CapabilityName::Httpx => &mut self.httpx,
            CapabilityName::Nuclei => &mut self.nuclei,
            CapabilityName::Hibp => &mut self.hibp,
            CapabilityName::Github => &mut self.github,
            CapabilityName::Ipinfo => &mut self.ipinfo,
            CapabilityName::Shodan => &mut self.shodan,
        }
    }

    pub fn with(mut self, name: CapabilityName, capability: Capability) -> Self {
        *self.slot(name) = Some(capability);
        self
    }

    /// Enablement decision for a capability under the current configuration.
    pub fn enablement(&self, name: CapabilityName) -> Result<(), SkipReason> {
        evaluate(name, self.capability(name))
    }

    /// Load the global YAML file, apply `RECONFLOW_*` overrides and resolve credentials.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingGlobal(path.to_path_buf()));
        }
        let to_error = |source| ConfigError::Global {
            path: path.to_path_buf(),
            source,
        };
        let raw: RawGlobalConfig = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(to_error)?
            .try_deserialize()
            .map_err(to_error)?;
        Ok(Self::resolve(raw, &std::env::vars().collect()))
    }

    fn resolve(raw: RawGlobalConfig, env: &HashMap<String, String>) -> Self {
        let mut resolved = Self::default();
        for name in CapabilityName::ALL {
            let capability = match name.requirement() {
                Requirement::Executable => raw
                    .tool_paths
                    .get(name.as_str())
                    .filter(|path| !path.trim().is_empty())
                    .map(|path| Capability::tool(name, PathBuf::from(path))),
                Requirement::Credential => raw
                    .apis
                    .get(name.as_str())
                    .map(|entry| entry.resolve(name, env)),
            };
            debug!(capability = %name, configured = capability.is_some(), "resolved capability");
            *resolved.slot(name) = capability;
        }
        resolved
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawGlobalConfig {
    #[serde(default)]
    tool_paths: BTreeMap<String, String>,
    #[serde(default)]
    apis: BTreeMap<String, RawProvider>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProvider {
    #[serde(default)]
    enabled: bool,
    #[serde(default, alias = "token")]
    key: Option<String>,
    #[serde(default, alias = "token_env")]
    key_env: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    concurrency: Option<usize>,
    #[serde(default)]
    delay_ms: Option<u64>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

impl RawProvider {
    fn resolve(&self, name: CapabilityName, env: &HashMap<String, String>) -> Capability {
        let from_env = self
            .key_env
            .as_deref()
            .and_then(|var| env.get(var))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let credential = from_env.or_else(|| {
            self.key
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        });
        let mut capability = Capability::provider(name, self.enabled, credential);
        let lookup = &mut capability.lookup;
        lookup.base_url = self.base_url.clone().filter(|url| !url.trim().is_empty());
        if let Some(concurrency) = self.concurrency {
            lookup.concurrency = concurrency.max(1);
        }
        if let Some(delay_ms) = self.delay_ms {
            lookup.delay = Duration::from_millis(delay_ms);
        }
        if let Some(timeout_secs) = self.timeout_secs {
            lookup.timeout = Duration::from_secs(timeout_secs.max(1));
        }
        capability
    }
}

/// Load `<targets_dir>/<identity>.yml` (or `.yaml`). The identity doubles as
/// the display name when the file does not set one.
pub fn load_target(targets_dir: &Path, identity: &str) -> Result<Target, ConfigError> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(ConfigError::BlankTarget);
    }
    if matches!(identity, "." | "..") || identity.contains(['/', '\\']) {
        return Err(ConfigError::UnsafeTarget(identity.to_string()));
    }
    let candidates = [
        targets_dir.join(format!("{identity}.yml")),
        targets_dir.join(format!("{identity}.yaml")),
    ];
    let path = candidates
        .iter()
        .find(|path| path.exists())
        .ok_or_else(|| ConfigError::MissingTarget(candidates[0].clone()))?;
    let raw = fs::read_to_string(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ConfigError::MissingTarget(path.clone()),
        _ => ConfigError::ReadTarget {
            path: path.clone(),
            source,
        },
    })?;
    parse_target(&raw, identity).map_err(|err| match err {
        TargetParseError::Yaml(source) => ConfigError::ParseTarget {
            path: path.clone(),
            source,
        },
        TargetParseError::Invalid(err) => err,
    })
}

enum TargetParseError {
    Yaml(serde_yaml::Error),
    Invalid(ConfigError),
}

fn parse_target(raw: &str, identity: &str) -> Result<Target, TargetParseError> {
    let mut doc: serde_yaml::Value = serde_yaml::from_str(raw).map_err(TargetParseError::Yaml)?;
    if doc.is_null() {
        doc = serde_yaml::Value::Mapping(Default::default());
    }
    let mut target: Target = serde_yaml::from_value(doc).map_err(TargetParseError::Yaml)?;
    if target.name.trim().is_empty() {
        target.name = identity.to_string();
    }
    if target.domains.iter().any(|d| d.trim().is_empty()) {
        return Err(TargetParseError::Invalid(ConfigError::BlankDomain {
            target: target.name,
        }));
    }
    Ok(target)
}
