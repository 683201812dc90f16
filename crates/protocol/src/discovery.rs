use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// JSON envelope a server sends back in answer to a discovery probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReply {
    pub protocol: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DiscoveryReply {
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Canonical base URL: the replying peer's address plus the announced port.
    pub fn base_url(&self, peer: IpAddr) -> String {
        match peer {
            IpAddr::V4(ip) => format!("{}://{}:{}", self.protocol, ip, self.port),
            IpAddr::V6(ip) => format!("{}://[{}]:{}", self.protocol, ip, self.port),
        }
    }
}
