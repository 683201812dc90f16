use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4},
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use {
    futures::{
        Stream, StreamExt,
        stream::{self, FuturesUnordered},
    },
    nexus_config::DiscoveryConfig,
    nexus_protocol::DiscoveryReply,
    tokio::{
        net::UdpSocket,
        time::{Instant, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
};

use crate::{
    api::ServerApi,
    candidates::ServerCandidate,
    error::DiscoveryError,
    interfaces::{self, NetworkInterface},
};

const RECV_BUFFER_SIZE: usize = 2048;
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(200);

type Inbound = Pin<Box<dyn Stream<Item = (usize, io::Result<(Vec<u8>, SocketAddr)>)> + Send>>;

/// Runtime knobs for a discovery scan.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub server_port: u16,
    /// Interface `n` binds `probe_base_port + n`; `0` lets the OS pick.
    pub probe_base_port: u16,
    pub token: String,
    pub settle: Duration,
    pub ceiling: Duration,
    pub resend: Duration,
    pub localhost_ports: Vec<u16>,
    pub virtual_patterns: Vec<String>,
    pub http_timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

impl From<&DiscoveryConfig> for ProbeOptions {
    fn from(cfg: &DiscoveryConfig) -> Self {
        Self {
            server_port: cfg.server_port,
            probe_base_port: cfg.probe_base_port,
            token: cfg.token.clone(),
            settle: Duration::from_millis(cfg.settle_ms),
            ceiling: Duration::from_millis(cfg.ceiling_ms),
            resend: Duration::from_millis(cfg.resend_ms.max(1)),
            localhost_ports: cfg.localhost_ports.clone(),
            virtual_patterns: cfg.virtual_patterns.clone(),
            http_timeout: Duration::from_millis(cfg.http_timeout_ms),
        }
    }
}

/// One bounded broadcast-and-collect attempt per call.
#[derive(Debug, Clone)]
pub struct DiscoveryProbe {
    opts: ProbeOptions,
    api: ServerApi,
    interfaces: Option<Vec<NetworkInterface>>,
}

struct ProbeSocket {
    iface: NetworkInterface,
    socket: Arc<UdpSocket>,
}

impl DiscoveryProbe {
    pub fn new(opts: ProbeOptions) -> Self {
        let api = ServerApi::new(opts.http_timeout);
        Self {
            opts,
            api,
            interfaces: None,
        }
    }

    /// Pin the interface list instead of enumerating on every scan.
    pub fn with_interfaces(mut self, interfaces: Vec<NetworkInterface>) -> Self {
        self.interfaces = Some(interfaces);
        self
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.opts
    }

    pub fn api(&self) -> &ServerApi {
        &self.api
    }

    /// Scan the LAN. An empty result means no server answered, which is a
    /// normal outcome.
    pub async fn discover(&self, cancel: &CancellationToken) -> Vec<ServerCandidate> {
        let interfaces = match &self.interfaces {
            Some(pinned) => pinned.clone(),
            None => interfaces::enumerate(&self.opts.virtual_patterns),
        };
        self.scan(&interfaces, cancel).await
    }

    /// Scan and pick one server: the remembered address when it answered,
    /// otherwise the first reply.
    pub async fn discover_preferred(
        &self,
        remembered: Option<&str>,
        cancel: &CancellationToken,
    ) -> Option<ServerCandidate> {
        pick_preferred(self.discover(cancel).await, remembered)
    }

    /// Broadcast on each interface and collect distinct replies, in the order
    /// they arrive. Every socket is closed before this returns.
    pub async fn scan(
        &self,
        interfaces: &[NetworkInterface],
        cancel: &CancellationToken,
    ) -> Vec<ServerCandidate> {
        let mut sockets = Vec::with_capacity(interfaces.len());
        for (index, iface) in interfaces.iter().enumerate() {
            match self.bind(iface, index) {
                Ok(socket) => sockets.push(socket),
                Err(e) => warn!(
                    interface = %iface.name,
                    ip = %iface.ip,
                    error = %e,
                    "failed to open probe socket, skipping interface"
                ),
            }
        }

        let mut inbound = stream::select_all(
            sockets
                .iter()
                .enumerate()
                .map(|(index, s)| receive(index, Arc::clone(&s.socket))),
        );
        let mut local_probes: FuturesUnordered<_> = self
            .opts
            .localhost_ports
            .iter()
            .map(|&port| self.api.probe_localhost(port))
            .collect();

        let mut resend = tokio::time::interval(self.opts.resend.max(Duration::from_millis(1)));
        resend.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut deadline = Instant::now() + self.opts.ceiling;
        let mut found: Vec<ServerCandidate> = Vec::new();

        debug!(
            interfaces = sockets.len(),
            localhost_ports = self.opts.localhost_ports.len(),
            "discovery scan started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("discovery scan cancelled");
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => break,
                _ = resend.tick() => self.send_probes(&sockets).await,
                Some((index, received)) = inbound.next() => match received {
                    Ok((bytes, peer)) => {
                        let iface = &sockets[index].iface.name;
                        match parse_reply(&bytes, peer) {
                            Ok(candidate) => {
                                trace!(interface = %iface, %peer, server = %candidate.address, "discovery reply");
                                if record(&mut found, candidate) && found.len() == 1 {
                                    deadline = Instant::now() + self.opts.settle;
                                }
                            },
                            Err(e) => warn!(interface = %iface, error = %e, "discarding discovery reply"),
                        }
                    },
                    Err(e) => debug!(interface = %sockets[index].iface.name, error = %e, "probe socket receive failed"),
                },
                Some(probed) = local_probes.next(), if !local_probes.is_empty() => {
                    if let Some(candidate) = probed
                        && record(&mut found, candidate)
                        && found.len() == 1
                    {
                        deadline = Instant::now() + self.opts.settle;
                    }
                }
            }
        }

        drop(inbound);
        drop(local_probes);
        drop(sockets);

        info!(servers = found.len(), "discovery scan finished");
        found
    }

    fn probe_port(&self, index: usize) -> u16 {
        if self.opts.probe_base_port == 0 {
            return 0;
        }
        u16::try_from(index)
            .ok()
            .and_then(|i| self.opts.probe_base_port.checked_add(i))
            .unwrap_or(0)
    }

    fn bind(&self, iface: &NetworkInterface, index: usize) -> Result<ProbeSocket, DiscoveryError> {
        let std_socket =
            std::net::UdpSocket::bind(SocketAddrV4::new(iface.ip, self.probe_port(index)))?;
        std_socket.set_broadcast(true)?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        trace!(interface = %iface.name, local = ?socket.local_addr().ok(), "probe socket bound");
        Ok(ProbeSocket {
            iface: iface.clone(),
            socket: Arc::new(socket),
        })
    }

    async fn send_probes(&self, sockets: &[ProbeSocket]) {
        let payload = self.opts.token.as_bytes();
        for probe in sockets {
            let mut targets = vec![probe.iface.broadcast];
            if !probe.iface.is_loopback() && probe.iface.broadcast != Ipv4Addr::BROADCAST {
                targets.push(Ipv4Addr::BROADCAST);
            }
            for target in targets {
                let dest = SocketAddr::new(IpAddr::V4(target), self.opts.server_port);
                if let Err(e) = probe.socket.send_to(payload, dest).await {
                    warn!(interface = %probe.iface.name, %dest, error = %e, "failed to send discovery probe");
                }
            }
        }
    }
}

/// Receive loop for one socket as a stream tagged with its index.
fn receive(index: usize, socket: Arc<UdpSocket>) -> Inbound {
    Box::pin(stream::unfold(socket, move |socket| async move {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let received = match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                buf.truncate(len);
                Ok((buf, peer))
            },
            Err(e) => {
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                Err(e)
            },
        };
        Some(((index, received), socket))
    }))
}

fn parse_reply(bytes: &[u8], peer: SocketAddr) -> Result<ServerCandidate, DiscoveryError> {
    let reply =
        DiscoveryReply::parse(bytes).map_err(|source| DiscoveryError::MalformedReply { peer, source })?;
    let address = reply.base_url(peer.ip());
    Ok(ServerCandidate {
        server_name: reply.server_name,
        protocol_version: reply.version,
        ..ServerCandidate::new(address)
    })
}

/// Add a candidate unless its address is already known. Returns whether it
/// was new.
fn record(found: &mut Vec<ServerCandidate>, candidate: ServerCandidate) -> bool {
    match found.iter_mut().find(|c| c.address == candidate.address) {
        Some(existing) => {
            existing.absorb(&candidate);
            false
        },
        None => {
            debug!(server = %candidate.address, name = ?candidate.server_name, "server found");
            found.push(candidate);
            true
        },
    }
}

/// The remembered server if it answered, else the first reply.
pub fn pick_preferred(
    found: Vec<ServerCandidate>,
    remembered: Option<&str>,
) -> Option<ServerCandidate> {
    let remembered = remembered.map(|r| r.trim_end_matches('/'));
    if let Some(wanted) = remembered
        && let Some(hit) = found.iter().find(|c| c.address == wanted)
    {
        return Some(hit.clone());
    }
    found.into_iter().next()
}

/// Run one scan and return the first candidate whose update service passes
/// a health check.
pub async fn discover_update_server(
    probe: &DiscoveryProbe,
    cancel: &CancellationToken,
) -> Option<String> {
    for candidate in probe.discover(cancel).await {
        if cancel.is_cancelled() {
            return None;
        }
        if probe.api().health(&candidate.address).await {
            info!(server = %candidate.address, "update server found");
            return Some(candidate.address);
        }
        debug!(server = %candidate.address, "candidate failed update health check");
    }
    None
}
