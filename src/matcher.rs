//! Generic zeroconf matching.
//!
//! Every service type owns an ordered list of rules. A rule without filters
//! matches any record of its type; otherwise every filter it carries must
//! match the corresponding, case-normalized field of the record.

use crate::error::DiscoveryError;
use crate::glob::GlobPattern;
use crate::models::ServiceInfo;
use std::collections::HashMap;

/// Filter fields as written in configuration. Patterns are case-normalized
/// when compiled: the MAC filter to upper case, the others to lower case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilters {
    pub macaddress: Option<String>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

/// A compiled rule routing matching records to `domain`.
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub service_type: String,
    pub domain: String,
    macaddress: Option<GlobPattern>,
    name: Option<GlobPattern>,
    manufacturer: Option<GlobPattern>,
    model: Option<GlobPattern>,
}

impl MatchRule {
    pub fn new(
        service_type: impl Into<String>,
        domain: impl Into<String>,
        filters: RuleFilters,
    ) -> Result<Self, DiscoveryError> {
        let upper = |p: Option<String>| p.map(|p| GlobPattern::new(&p.to_uppercase())).transpose();
        let lower = |p: Option<String>| p.map(|p| GlobPattern::new(&p.to_lowercase())).transpose();

        Ok(Self {
            service_type: service_type.into(),
            domain: domain.into(),
            macaddress: upper(filters.macaddress)?,
            name: lower(filters.name)?,
            manufacturer: lower(filters.manufacturer)?,
            model: lower(filters.model)?,
        })
    }

    /// A rule without filters matches every record of its type.
    pub fn is_unconditional(&self) -> bool {
        self.macaddress.is_none()
            && self.name.is_none()
            && self.manufacturer.is_none()
            && self.model.is_none()
    }

    pub fn matches(&self, fields: &MatchFields) -> bool {
        filter_matches(&self.macaddress, fields.macaddress.as_deref())
            && filter_matches(&self.name, fields.name.as_deref())
            && filter_matches(&self.manufacturer, fields.manufacturer.as_deref())
            && filter_matches(&self.model, fields.model.as_deref())
    }
}

/// An absent field fails any filter on it.
fn filter_matches(pattern: &Option<GlobPattern>, field: Option<&str>) -> bool {
    match (pattern, field) {
        (None, _) => true,
        (Some(pattern), Some(value)) => pattern.is_match(value),
        (Some(_), None) => false,
    }
}

/// The record fields rules are evaluated against, already case-normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchFields {
    pub macaddress: Option<String>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

impl From<&ServiceInfo> for MatchFields {
    fn from(info: &ServiceInfo) -> Self {
        let prop = |key: &str| info.properties.get(key);
        Self {
            macaddress: prop("macaddress").map(|v| v.to_uppercase()),
            name: Some(info.name.to_lowercase()),
            manufacturer: prop("manufacturer").map(|v| v.to_lowercase()),
            model: prop("model").map(|v| v.to_lowercase()),
        }
    }
}

/// Rules keyed by service type, each list in registration order.
#[derive(Debug, Clone, Default)]
pub struct MatchTable {
    rules: HashMap<String, Vec<MatchRule>>,
    // Service types in first-registration order.
    order: Vec<String>,
}

impl MatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule: MatchRule) {
        if !self.rules.contains_key(&rule.service_type) {
            self.order.push(rule.service_type.clone());
        }
        self.rules
            .entry(rule.service_type.clone())
            .or_default()
            .push(rule);
    }

    /// Service types that have at least one rule.
    pub fn service_types(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn rules_for(&self, service_type: &str) -> &[MatchRule] {
        self.rules
            .get(service_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Domains of every rule matching `info`, in rule order. A domain
    /// appears once per matching rule.
    pub fn matching_domains(&self, info: &ServiceInfo) -> Vec<String> {
        let rules = self.rules_for(&info.service_type);
        if rules.is_empty() {
            return Vec::new();
        }
        let fields = MatchFields::from(info);
        rules
            .iter()
            .filter(|rule| rule.matches(&fields))
            .map(|rule| rule.domain.clone())
            .collect()
    }
}

impl FromIterator<MatchRule> for MatchTable {
    fn from_iter<I: IntoIterator<Item = MatchRule>>(iter: I) -> Self {
        let mut table = MatchTable::new();
        for rule in iter {
            table.add(rule);
        }
        table
    }
}
