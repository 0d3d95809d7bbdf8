use crate::error::DiscoveryError;
use crate::models::{Properties, RawRecord, ServiceInfo};
use std::net::IpAddr;
use tracing::debug;

/// Builds a [`ServiceInfo`] from a raw record.
///
/// Fails only when no candidate address is usable. Individual properties
/// with a non-ASCII key are dropped; values that are not UTF-8 stay in the
/// raw bag only.
pub fn info_from_record(record: &RawRecord) -> Result<ServiceInfo, DiscoveryError> {
    let mut properties = Properties::new();
    let mut raw_properties = Properties::new();

    for (key, value) in &record.properties {
        let key = match ascii_key(key) {
            Some(key) => key,
            None => {
                let err = DiscoveryError::MalformedProperty {
                    name: record.name.clone(),
                    key: key.clone(),
                };
                debug!("Ignoring invalid key: {}", err);
                continue;
            }
        };

        raw_properties.insert(key.clone(), value.clone());

        if let Some(decoded) = value
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
        {
            properties.insert(key, decoded.to_string());
        }
    }

    let host = first_usable_address(&record.addresses).ok_or_else(|| {
        DiscoveryError::UnresolvedRecord {
            name: record.name.clone(),
        }
    })?;

    Ok(ServiceInfo {
        host: host.to_string(),
        port: record.port,
        hostname: record.server.clone(),
        service_type: record.service_type.clone(),
        name: record.name.clone(),
        properties,
        raw_properties,
    })
}

/// First address that is IPv6 or a non link-local IPv4, in order.
///
/// Link-local IPv6 is accepted since it is reachable on the segment.
pub fn first_usable_address(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses.iter().copied().find(|addr| match addr {
        IpAddr::V4(v4) => !v4.is_link_local(),
        IpAddr::V6(_) => true,
    })
}

fn ascii_key(key: &[u8]) -> Option<String> {
    if key.is_ascii() {
        // ASCII is valid UTF-8.
        String::from_utf8(key.to_vec()).ok()
    } else {
        None
    }
}
