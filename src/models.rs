use crate::homekit::PairingStatus;
use serde::Serialize;
use std::net::IpAddr;

/// A service record as handed over by the network listener, before any
/// validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub service_type: String,
    pub name: String,
    pub server: String,
    pub port: Option<u16>,
    /// Candidate addresses in advertisement order.
    pub addresses: Vec<IpAddr>,
    /// TXT entries as `(key, value)`; a key without `=` has no value.
    pub properties: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl RawRecord {
    /// An empty record for `name`, which is what an unanswered resolution
    /// looks like.
    pub fn unresolved(service_type: &str, name: &str) -> Self {
        Self {
            service_type: service_type.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Ordered key/value bag. Lookups are exact; insertion order is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties<V> {
    entries: Vec<(String, V)>,
}

impl<V> Properties<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts `value`, replacing the value of an existing key in place.
    pub fn insert(&mut self, key: String, value: V) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Serialize> Serialize for Properties<V> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(k, v)| (k, v)))
    }
}

impl<V> FromIterator<(String, V)> for Properties<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

/// A validated service record, ready to be handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    /// Never empty.
    pub host: String,
    pub port: Option<u16>,
    pub hostname: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub name: String,
    /// Properties whose value decoded as UTF-8.
    pub properties: Properties<String>,
    /// Every property with an ASCII key, value as received.
    #[serde(rename = "_raw")]
    pub raw_properties: Properties<Option<Vec<u8>>>,
}

/// What the listener observed about a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Added,
    Updated,
    Removed,
}

/// A raw notification from the network listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUpdate {
    pub service_type: String,
    pub name: String,
    pub change: StateChange,
}

/// Which path produced a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowSource {
    /// Initial HomeKit pairing candidate, routed by model.
    HomeKit,
    /// Generic match against the zeroconf rule table.
    Zeroconf,
}

/// A request to start a discovery flow for `domain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryFlow {
    pub domain: String,
    pub source: FlowSource,
    pub info: ServiceInfo,
    /// Only set for `FlowSource::HomeKit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing: Option<PairingStatus>,
}
