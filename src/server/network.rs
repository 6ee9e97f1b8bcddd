//! Local interface discovery for choosing the broker address handed out
//! during pairing.

use std::net::{IpAddr, Ipv4Addr};

use local_ip_address::list_afinet_netifas;
use serde::{Deserialize, Serialize};

/// One candidate address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub address: String,
    pub name: String,
    /// Lower is better. 0 is reserved for an explicit host override.
    pub priority: u8,
    pub recommended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceList {
    pub interfaces: Vec<NetworkInterface>,
}

/// Candidate addresses, best first.
///
/// A configured `host_ip` short-circuits discovery.
pub fn discover(host_ip: Option<&str>) -> InterfaceList {
    if let Some(ip) = host_ip {
        tracing::debug!(ip, "Using HOST_IP for interface listing");
        return InterfaceList {
            interfaces: vec![NetworkInterface {
                address: ip.to_string(),
                name: "Host (Environment)".to_string(),
                priority: 0,
                recommended: true,
            }],
        };
    }

    let netifas = match list_afinet_netifas() {
        Ok(ifaces) => ifaces,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to enumerate network interfaces");
            Vec::new()
        }
    };

    let interfaces = rank(netifas);
    tracing::debug!(count = interfaces.len(), "Detected network interfaces");
    InterfaceList { interfaces }
}

/// Filter and order raw `(name, address)` pairs.
pub fn rank(netifas: impl IntoIterator<Item = (String, IpAddr)>) -> Vec<NetworkInterface> {
    let mut interfaces: Vec<NetworkInterface> = netifas
        .into_iter()
        .filter_map(|(name, ip)| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() && !is_docker_bridge(v4) => {
                let priority = priority(v4);
                Some(NetworkInterface {
                    address: v4.to_string(),
                    name,
                    priority,
                    recommended: priority == 1,
                })
            }
            _ => None,
        })
        .collect();

    // Stable sort keeps enumeration order within a priority.
    interfaces.sort_by_key(|iface| iface.priority);
    interfaces
}

fn priority(ip: Ipv4Addr) -> u8 {
    match ip.octets() {
        [192, 168, ..] => 1,
        [10, ..] => 2,
        _ => 3,
    }
}

/// Docker bridge networks: 172.17.0.0 through 172.32.255.255.
fn is_docker_bridge(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 172 && (17..=32).contains(&octets[1])
}
