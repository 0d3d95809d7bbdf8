//! HomeKit accessory classification.
//!
//! HomeKit records carry the accessory model in `md` and the pairing status
//! in `sf`. The model decides which consumer gets the initial pairing flow.

use crate::error::DiscoveryError;
use crate::glob::GlobPattern;
use crate::models::ServiceInfo;
use serde::Serialize;
use tracing::debug;

/// Service types browsed for HomeKit accessories (IP and Thread based).
pub const HOMEKIT_TYPES: [&str; 2] = ["_hap._tcp.local.", "_hap._udp.local."];

pub const HOMEKIT_MODEL: &str = "md";
pub const HOMEKIT_PAIRED_STATUS_FLAG: &str = "sf";

pub fn is_homekit_type(service_type: &str) -> bool {
    HOMEKIT_TYPES.contains(&service_type)
}

/// Pairing state advertised in the `sf` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStatus {
    /// `sf` is 0: paired, no longer offered to iOS clients.
    Paired,
    /// `sf` is anything but zero, unparseable values included.
    Unpaired,
    /// `sf` is absent.
    Unknown,
}

impl PairingStatus {
    pub fn is_paired(self) -> bool {
        self == PairingStatus::Paired
    }
}

/// One model entry: records whose model matches are routed to `domain`.
#[derive(Debug, Clone)]
pub struct HomeKitModel {
    pub model: String,
    pub domain: String,
    pattern: GlobPattern,
}

impl HomeKitModel {
    pub fn new(
        model: impl Into<String>,
        domain: impl Into<String>,
    ) -> Result<Self, DiscoveryError> {
        let model = model.into();
        let pattern = GlobPattern::new(&model)?;
        Ok(Self {
            model,
            domain: domain.into(),
            pattern,
        })
    }

    /// Exact, prefix followed by a space or hyphen, or glob.
    pub fn matches(&self, advertised: &str) -> bool {
        if advertised == self.model {
            return true;
        }
        advertised
            .strip_prefix(self.model.as_str())
            .is_some_and(|rest| rest.starts_with([' ', '-']))
            || self.pattern.is_match(advertised)
    }
}

/// Model table in registration order; earlier entries win.
#[derive(Debug, Clone, Default)]
pub struct HomeKitModels {
    models: Vec<HomeKitModel>,
}

impl HomeKitModels {
    pub fn new(models: Vec<HomeKitModel>) -> Self {
        Self { models }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Domain of the first entry matching `model`.
    pub fn domain_for(&self, model: &str) -> Option<&str> {
        self.models
            .iter()
            .find(|entry| entry.matches(model))
            .map(|entry| entry.domain.as_str())
    }
}

/// Result of classifying a HomeKit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeKitMatch {
    pub domain: String,
    pub pairing: PairingStatus,
}

/// Resolves the consumer domain for a HomeKit record, if its model is known.
pub fn classify(models: &HomeKitModels, info: &ServiceInfo) -> Option<HomeKitMatch> {
    let model = advertised_model(info)?;
    let domain = models.domain_for(model)?;
    Some(HomeKitMatch {
        domain: domain.to_string(),
        pairing: pairing_status(info),
    })
}

/// Value of the model marker, looked up case-insensitively. The first key
/// whose lowercased form matches wins.
pub fn advertised_model(info: &ServiceInfo) -> Option<&str> {
    info.properties
        .iter()
        .find(|(key, _)| key.to_lowercase() == HOMEKIT_MODEL)
        .map(|(_, value)| value.as_str())
}

pub fn pairing_status(info: &ServiceInfo) -> PairingStatus {
    let Some(flag) = info.properties.get(HOMEKIT_PAIRED_STATUS_FLAG) else {
        return PairingStatus::Unknown;
    };
    match flag_is_zero(flag) {
        Some(true) => PairingStatus::Paired,
        Some(false) => PairingStatus::Unpaired,
        None => {
            let err = DiscoveryError::HomeKitPairingFlagUnparseable {
                name: info.name.clone(),
                value: flag.clone(),
            };
            debug!("Treating HomeKit accessory as unpaired: {}", err);
            PairingStatus::Unpaired
        }
    }
}

/// Parses an integer literal of any width: surrounding whitespace, an
/// optional sign, and digits optionally grouped by single underscores.
/// Returns whether it is zero, or `None` if it is not an integer.
fn flag_is_zero(flag: &str) -> Option<bool> {
    let flag = flag.trim();
    let digits = flag.strip_prefix(['+', '-']).unwrap_or(flag);
    let valid = !digits.is_empty()
        && !digits.starts_with('_')
        && !digits.ends_with('_')
        && !digits.contains("__")
        && digits.chars().all(|c| c.is_ascii_digit() || c == '_');
    valid.then(|| digits.chars().all(|c| c == '0' || c == '_'))
}
