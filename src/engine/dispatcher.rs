use crate::{
    config::{FlagStore, NetworkConfig},
    error::{ConfigError, NetError, StoreError},
    net::{
        arp,
        dhcp::{DhcpClient, DhcpEvent, DhcpPhase},
        ethernet::MAX_FRAME_LEN,
        frame::Frame,
        icmp,
        tcp::{FLAG_ACK, FLAG_CWR, FLAG_ECE, FLAG_FIN, FLAG_PSH, FLAG_SYN, TcpSession},
        telnet::TelnetState,
    },
    transport::Transport,
};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// What one poll did with the frame it received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    ArpReply,
    ArpResolved { ip: Ipv4Addr, mac: [u8; 6] },
    EchoReply,
    Dhcp(DhcpEvent),
    /// A telnet segment with these flags was answered.
    Tcp { flags: u8 },
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub ignored: u64,
    pub dropped: u64,
    pub checksum_errors: u64,
    pub xid_mismatches: u64,
    pub transmit_failures: u64,
    pub overflows: u64,
}

/// Owns every piece of protocol state and handles one frame per poll.
pub struct Dispatcher {
    config: NetworkConfig,
    store: Box<dyn FlagStore>,
    dhcp: DhcpClient,
    tcp: TcpSession,
    telnet: TelnetState,
    rx: Vec<u8>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Compiled defaults, with the DHCP mode read from `store`.
    pub fn new(mut store: Box<dyn FlagStore>) -> Result<Self, StoreError> {
        let config = NetworkConfig::load(store.as_mut())?;
        Ok(Self::with_config(config, store))
    }

    pub fn with_config(config: NetworkConfig, store: Box<dyn FlagStore>) -> Self {
        Self {
            config,
            store,
            dhcp: DhcpClient::default(),
            tcp: TcpSession::new(),
            telnet: TelnetState::new(),
            rx: vec![0; MAX_FRAME_LEN],
            stats: DispatchStats::default(),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Static address setters on the returned config fail while DHCP is on.
    pub fn config_mut(&mut self) -> &mut NetworkConfig {
        &mut self.config
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn dhcp_phase(&self) -> DhcpPhase {
        self.dhcp.phase()
    }

    pub fn tcp_session(&self) -> &TcpSession {
        &self.tcp
    }

    /// Receives and handles at most one frame.
    ///
    /// `Ok(None)` means nothing was waiting. Errors are already logged and
    /// counted; the caller just keeps polling.
    pub fn poll<T: Transport>(&mut self, transport: &mut T) -> Result<Option<Decision>, NetError> {
        if transport.is_overflow() {
            self.stats.overflows += 1;
            warn!("{}", NetError::Overflow);
        }
        if !transport.is_data_available() {
            return Ok(None);
        }
        let len = transport.receive(&mut self.rx);
        if len == 0 {
            return Ok(None);
        }
        self.stats.received += 1;

        match self.handle(len, transport) {
            Ok(decision) => Ok(Some(decision)),
            Err(NetError::Ignored(reason)) => {
                debug!("ignored: {reason}");
                self.stats.ignored += 1;
                Ok(Some(Decision::Ignored))
            }
            Err(e) => {
                self.record(&e);
                Err(e)
            }
        }
    }

    fn record(&mut self, e: &NetError) {
        match e {
            NetError::TransmitAborted => {
                self.stats.transmit_failures += 1;
                warn!("{e}");
            }
            NetError::Checksum(_) => {
                self.stats.checksum_errors += 1;
                debug!("dropped: {e}");
            }
            NetError::TransactionMismatch { .. } => {
                self.stats.xid_mismatches += 1;
                debug!("dropped: {e}");
            }
            _ => {
                self.stats.dropped += 1;
                debug!("dropped: {e}");
            }
        }
    }

    fn handle<T: Transport>(&mut self, len: usize, transport: &mut T) -> Result<Decision, NetError> {
        let frame = Frame::new(&self.rx[..len]);

        if matched(frame.check_arp_request(&self.config))?.is_some() {
            arp::send_reply(&mut self.rx[..len], &self.config, transport)?;
            return Ok(Decision::ArpReply);
        }
        if let Some(reply) = matched(frame.check_arp_response(&self.config))? {
            return Ok(Decision::ArpResolved {
                ip: Ipv4Addr::from(reply.sender_ip()),
                mac: reply.sender_mac(),
            });
        }

        frame.check_ip()?;

        if let Some(message) = matched(frame.check_dhcp(&self.config))? {
            let server_mac = frame.ethernet()?.src_mac();
            let event = self
                .dhcp
                .handle_reply(&message, server_mac, &mut self.config, transport)?;
            return Ok(Decision::Dhcp(event));
        }

        frame.check_ip_unicast(&self.config)?;

        if matched(frame.check_ping_request(&self.config))?.is_some() {
            icmp::send_echo_reply(&mut self.rx[..len], &self.config, transport)?;
            return Ok(Decision::EchoReply);
        }
        frame.check_telnet(&self.config)?;
        self.handle_tcp(len, transport)
    }

    /// Reacts to the flags of a telnet segment already in `rx`.
    fn handle_tcp<T: Transport>(
        &mut self,
        len: usize,
        transport: &mut T,
    ) -> Result<Decision, NetError> {
        let received = self.tcp.receive(&self.rx[..len])?;
        let flags = received.flags;
        match flags {
            f if f == FLAG_FIN || f == FLAG_FIN | FLAG_ACK => {
                self.tcp.send_tcp_msg(FLAG_ACK, &[], &self.config, transport)?;
                self.tcp.send_tcp_msg(FLAG_FIN, &[], &self.config, transport)?;
            }
            f if f == FLAG_SYN || f == FLAG_SYN | FLAG_ECE | FLAG_CWR => {
                self.tcp
                    .send_tcp_msg(FLAG_SYN | FLAG_ACK, &[], &self.config, transport)?;
            }
            f if f == FLAG_SYN | FLAG_ACK => {
                self.tcp.send_tcp_msg(FLAG_ACK, &[], &self.config, transport)?;
            }
            f if f == FLAG_PSH | FLAG_ACK => {
                self.tcp.send_tcp_msg(FLAG_ACK, &[], &self.config, transport)?;
                let data = received.data;
                if !data.is_empty() {
                    self.telnet.process(&mut self.rx[data.clone()]);
                    self.tcp.send_tcp_msg(
                        FLAG_PSH | FLAG_ACK,
                        &self.rx[data],
                        &self.config,
                        transport,
                    )?;
                }
            }
            FLAG_ACK => {}
            _ => return Err(NetError::Ignored("unhandled tcp flags")),
        }
        Ok(Decision::Tcp { flags })
    }

    /// Writes the enabled flag, clears every address and resets the client.
    /// Call [`Dispatcher::start_dhcp`] to begin acquiring a lease.
    pub fn enable_dhcp(&mut self) -> Result<(), ConfigError> {
        self.config.set_dhcp_mode(true, self.store.as_mut())?;
        self.dhcp = DhcpClient::new(self.dhcp.xid());
        Ok(())
    }

    pub fn disable_dhcp(&mut self) -> Result<(), ConfigError> {
        self.config.set_dhcp_mode(false, self.store.as_mut())?;
        self.dhcp = DhcpClient::new(self.dhcp.xid());
        Ok(())
    }

    pub fn is_dhcp_enabled(&self) -> bool {
        self.config.is_dhcp_enabled()
    }

    pub fn start_dhcp<T: Transport>(&mut self, transport: &mut T) -> Result<(), NetError> {
        self.dhcp.start(&self.config, transport)
    }

    pub fn refresh_dhcp<T: Transport>(&mut self, transport: &mut T) -> Result<bool, NetError> {
        self.dhcp.refresh(&self.config, transport)
    }

    pub fn release_dhcp<T: Transport>(&mut self, transport: &mut T) -> Result<bool, NetError> {
        self.dhcp.release(&mut self.config, transport)
    }

    pub fn send_arp_request<T: Transport>(
        &mut self,
        target: Ipv4Addr,
        transport: &mut T,
    ) -> Result<(), NetError> {
        arp::send_request(&self.config, target, transport)
    }

    pub fn telnet_command_pending(&self) -> bool {
        self.telnet.is_pending()
    }

    pub fn consume_telnet_command(&mut self) -> Option<String> {
        self.telnet.take_command()
    }

    pub fn send_telnet_data<T: Transport>(
        &mut self,
        payload: &[u8],
        transport: &mut T,
    ) -> Result<(), NetError> {
        self.tcp.send_data(payload, &self.config, transport)
    }
}

/// Splits "not this kind of frame" from a real failure.
fn matched<V>(result: Result<V, NetError>) -> Result<Option<V>, NetError> {
    match result {
        Ok(view) => Ok(Some(view)),
        Err(NetError::Ignored(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
