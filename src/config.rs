use crate::error::DiscoveryError;
use crate::homekit::{HomeKitModel, HomeKitModels};
use crate::matcher::{MatchRule, MatchTable, RuleFilters};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{io::Read, path::Path, str::FromStr, time::Duration};

/// Represents the top-level configuration loaded from a TOML file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ZeroConfig {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub homekit: HomeKitConfig,
    #[serde(rename = "match_rule", default)]
    pub match_rules: Vec<MatchRuleConfig>,
    #[serde(rename = "homekit_model", default)]
    pub homekit_models: Vec<HomeKitModelConfig>,
}

/// How the mDNS listener binds and how long a resolution may take.
#[derive(Deserialize, Debug, Clone)]
pub struct ListenerConfig {
    #[serde(default = "default_ipv6")]
    pub ipv6: bool,
    /// Interface names or addresses to listen on. Empty means all.
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct HomeKitConfig {
    /// Skip generic matching for HomeKit accessories that are not paired yet
    /// and already got a HomeKit flow.
    #[serde(default)]
    pub suppress_unpaired_generic: bool,
}

/// Routes records of `service_type` to `domain`. Filters are optional globs.
#[derive(Deserialize, Debug, Clone)]
pub struct MatchRuleConfig {
    pub service_type: String,
    pub domain: String,
    pub macaddress: Option<String>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct HomeKitModelConfig {
    pub model: String,
    pub domain: String,
}

fn default_ipv6() -> bool {
    true
}

fn default_resolve_timeout_ms() -> u64 {
    3000
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ipv6: default_ipv6(),
            interfaces: Vec::new(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
        }
    }
}

impl ListenerConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

impl ZeroConfig {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("read config from {:?}", path.as_ref()))?;
        content.parse::<Self>()
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut buf = String::new();
        let mut rdr = reader;
        rdr.read_to_string(&mut buf)?;
        buf.parse::<Self>()
            .context("parse zeromatch config from reader")
    }

    /// Compiles the match rules, validating every pattern.
    pub fn match_table(&self) -> Result<MatchTable, DiscoveryError> {
        self.match_rules
            .iter()
            .map(|rule| {
                MatchRule::new(
                    rule.service_type.as_str(),
                    rule.domain.as_str(),
                    RuleFilters {
                        macaddress: rule.macaddress.clone(),
                        name: rule.name.clone(),
                        manufacturer: rule.manufacturer.clone(),
                        model: rule.model.clone(),
                    },
                )
            })
            .collect()
    }

    /// Compiles the HomeKit model table, keeping file order.
    pub fn homekit_models(&self) -> Result<HomeKitModels, DiscoveryError> {
        self.homekit_models
            .iter()
            .map(|entry| HomeKitModel::new(entry.model.as_str(), entry.domain.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map(HomeKitModels::new)
    }
}

impl FromStr for ZeroConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parse zeromatch config")
    }
}
