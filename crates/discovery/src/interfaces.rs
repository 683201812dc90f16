//! Local IPv4 interface enumeration and subnet broadcast computation.

use std::net::Ipv4Addr;

use {
    if_addrs::IfAddr,
    ipnet::Ipv4Net,
    tracing::{debug, warn},
};

/// Interface-name fragments of adapters that never reach the LAN: hypervisor
/// bridges, container networks, tunnels and overlay VPNs.
const VIRTUAL_PATTERNS: &[&str] = &[
    "loopback",
    "vethernet",
    "virtualbox",
    "vbox",
    "vmware",
    "vmnet",
    "hyper-v",
    "docker",
    "veth",
    "br-",
    "virbr",
    "tun",
    "tap",
    "utun",
    "wsl",
    "zerotier",
    "tailscale",
    "npcap",
    "isatap",
    "teredo",
];

/// A local IPv4 interface and the broadcast address of its subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>, ip: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            ip,
            netmask,
            broadcast: subnet_broadcast(ip, netmask),
        }
    }

    /// Stand-in used when no real interface survives filtering, so a server
    /// on the same machine can still be found. Probes go straight to
    /// `127.0.0.1`.
    pub fn loopback() -> Self {
        Self {
            name: "lo".into(),
            ip: Ipv4Addr::LOCALHOST,
            netmask: Ipv4Addr::new(255, 0, 0, 0),
            broadcast: Ipv4Addr::LOCALHOST,
        }
    }

    pub fn is_loopback(&self) -> bool {
        self.ip.is_loopback()
    }
}

/// Broadcast address of the subnet `ip`/`netmask`. A non-contiguous mask
/// falls back to the universal broadcast address.
pub fn subnet_broadcast(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    match Ipv4Net::with_netmask(ip, netmask) {
        Ok(net) => net.broadcast(),
        Err(_) => Ipv4Addr::BROADCAST,
    }
}

/// Whether an interface name looks like a loopback or virtual adapter.
pub fn is_virtual(name: &str, extra_patterns: &[String]) -> bool {
    let lower = name.to_lowercase();
    if lower == "lo" || lower.starts_with("lo0") {
        return true;
    }
    VIRTUAL_PATTERNS.iter().any(|p| lower.contains(p))
        || extra_patterns
            .iter()
            .any(|p| !p.is_empty() && lower.contains(&p.to_lowercase()))
}

/// Drop loopback and virtual interfaces. Falls back to a single loopback
/// interface when nothing is left.
pub fn select(candidates: Vec<NetworkInterface>, extra_patterns: &[String]) -> Vec<NetworkInterface> {
    let mut selected: Vec<NetworkInterface> = candidates
        .into_iter()
        .filter(|iface| !iface.is_loopback() && !is_virtual(&iface.name, extra_patterns))
        .collect();

    if selected.is_empty() {
        debug!("no usable network interface, falling back to loopback");
        selected.push(NetworkInterface::loopback());
    }
    selected
}

/// Enumerate local IPv4 interfaces suitable for broadcast discovery.
pub fn enumerate(extra_patterns: &[String]) -> Vec<NetworkInterface> {
    let raw = match if_addrs::get_if_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!(error = %e, "failed to enumerate network interfaces");
            Vec::new()
        },
    };

    let candidates = raw
        .into_iter()
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(v4) => Some(NetworkInterface::new(iface.name, v4.ip, v4.netmask)),
            IfAddr::V6(_) => None,
        })
        .collect();

    let selected = select(candidates, extra_patterns);
    for iface in &selected {
        debug!(
            interface = %iface.name,
            ip = %iface.ip,
            broadcast = %iface.broadcast,
            "discovery interface"
        );
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_subnet_broadcast() {
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(192, 168, 1, 37), Ipv4Addr::new(255, 255, 255, 0)),
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(10, 4, 7, 9), Ipv4Addr::new(255, 255, 240, 0)),
            Ipv4Addr::new(10, 4, 15, 255)
        );
    }

    #[test]
    fn bad_netmask_uses_universal_broadcast() {
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 0, 255, 0)),
            Ipv4Addr::BROADCAST
        );
    }

    #[test]
    fn recognizes_virtual_adapters() {
        assert!(is_virtual("lo", &[]));
        assert!(is_virtual("lo0", &[]));
        assert!(is_virtual("docker0", &[]));
        assert!(is_virtual("vEthernet (WSL)", &[]));
        assert!(is_virtual("VirtualBox Host-Only Network", &[]));
        assert!(is_virtual("tailscale0", &[]));
        assert!(!is_virtual("eth0", &[]));
        assert!(!is_virtual("Ethernet 2", &[]));
        assert!(!is_virtual("wlan0", &[]));
        assert!(is_virtual("wlan0", &["WLAN".to_string()]));
    }

    #[test]
    fn select_filters_and_keeps_real_interfaces() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let picked = select(
            vec![
                NetworkInterface::new("lo", Ipv4Addr::LOCALHOST, Ipv4Addr::new(255, 0, 0, 0)),
                NetworkInterface::new("docker0", Ipv4Addr::new(172, 17, 0, 1), mask),
                NetworkInterface::new("eth0", Ipv4Addr::new(192, 168, 0, 12), mask),
            ],
            &[],
        );
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "eth0");
        assert_eq!(picked[0].broadcast, Ipv4Addr::new(192, 168, 0, 255));
    }

    #[test]
    fn select_falls_back_to_loopback() {
        let picked = select(
            vec![NetworkInterface::new(
                "vmnet8",
                Ipv4Addr::new(192, 168, 56, 1),
                Ipv4Addr::new(255, 255, 255, 0),
            )],
            &[],
        );
        assert_eq!(picked, vec![NetworkInterface::loopback()]);
        assert_eq!(picked[0].broadcast, Ipv4Addr::LOCALHOST);
    }
}
