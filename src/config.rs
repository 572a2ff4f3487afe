//! Local addressing and the persisted DHCP flag.

use crate::error::{ConfigError, StoreError};
use std::fs;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Erased storage reads all ones, so a fresh device starts with DHCP on.
pub const DHCP_ENABLED_FLAG: u32 = 0xFFFF_FFFF;
pub const DHCP_DISABLED_FLAG: u32 = 0x0F0F_0F0F;

pub const DEFAULT_MAC: [u8; 6] = [0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
pub const DEFAULT_SUBNET: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// Persistent 32-bit cell holding the DHCP mode sentinel.
pub trait FlagStore {
    fn read_flag(&mut self) -> Result<u32, StoreError>;
    fn write_flag(&mut self, value: u32) -> Result<(), StoreError>;
}

/// Stores the flag as four big-endian bytes in a file.
#[derive(Debug, Clone)]
pub struct FileFlagStore {
    path: PathBuf,
}

impl FileFlagStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FlagStore for FileFlagStore {
    fn read_flag(&mut self) -> Result<u32, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => match <[u8; 4]>::try_from(bytes.as_slice()) {
                Ok(word) => Ok(u32::from_be_bytes(word)),
                Err(_) => Ok(DHCP_ENABLED_FLAG),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DHCP_ENABLED_FLAG),
            Err(e) => Err(e.into()),
        }
    }

    fn write_flag(&mut self, value: u32) -> Result<(), StoreError> {
        fs::write(&self.path, value.to_be_bytes())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFlagStore {
    value: u32,
}

impl MemoryFlagStore {
    pub fn new(value: u32) -> Self {
        Self { value }
    }

    pub fn value(&self) -> u32 {
        self.value
    }
}

impl Default for MemoryFlagStore {
    fn default() -> Self {
        Self::new(DHCP_ENABLED_FLAG)
    }
}

impl FlagStore for MemoryFlagStore {
    fn read_flag(&mut self) -> Result<u32, StoreError> {
        Ok(self.value)
    }

    fn write_flag(&mut self, value: u32) -> Result<(), StoreError> {
        self.value = value;
        Ok(())
    }
}

/// Values taken from a DHCPACK. Absent options leave the current value alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub address: Ipv4Addr,
    pub subnet: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
    pub lease_time: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    mac: [u8; 6],
    ip: Ipv4Addr,
    subnet: Ipv4Addr,
    gateway: Ipv4Addr,
    dns: Ipv4Addr,
    dhcp_enabled: bool,
    lease_time: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac: DEFAULT_MAC,
            ip: Ipv4Addr::UNSPECIFIED,
            subnet: DEFAULT_SUBNET,
            gateway: Ipv4Addr::UNSPECIFIED,
            dns: Ipv4Addr::UNSPECIFIED,
            dhcp_enabled: true,
            lease_time: 0,
        }
    }
}

impl NetworkConfig {
    /// Compiled defaults with the DHCP mode taken from `store`.
    pub fn load(store: &mut dyn FlagStore) -> Result<Self, StoreError> {
        let flag = store.read_flag()?;
        Ok(Self {
            dhcp_enabled: flag != DHCP_DISABLED_FLAG,
            ..Self::default()
        })
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn set_mac(&mut self, mac: [u8; 6]) {
        self.mac = mac;
    }

    pub fn ip_address(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn subnet_mask(&self) -> Ipv4Addr {
        self.subnet
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn dns_server(&self) -> Ipv4Addr {
        self.dns
    }

    pub fn lease_time(&self) -> u32 {
        self.lease_time
    }

    pub fn is_dhcp_enabled(&self) -> bool {
        self.dhcp_enabled
    }

    /// True once any non-zero address is configured.
    pub fn is_ip_valid(&self) -> bool {
        !self.ip.is_unspecified()
    }

    pub fn set_ip_address(&mut self, ip: Ipv4Addr) -> Result<(), ConfigError> {
        self.ensure_static()?;
        self.ip = ip;
        Ok(())
    }

    pub fn set_subnet_mask(&mut self, mask: Ipv4Addr) -> Result<(), ConfigError> {
        self.ensure_static()?;
        self.subnet = mask;
        Ok(())
    }

    pub fn set_gateway(&mut self, gateway: Ipv4Addr) -> Result<(), ConfigError> {
        self.ensure_static()?;
        self.gateway = gateway;
        Ok(())
    }

    pub fn set_dns_server(&mut self, dns: Ipv4Addr) -> Result<(), ConfigError> {
        self.ensure_static()?;
        self.dns = dns;
        Ok(())
    }

    /// Persists the mode and clears every address, in either direction.
    pub fn set_dhcp_mode(
        &mut self,
        enabled: bool,
        store: &mut dyn FlagStore,
    ) -> Result<(), ConfigError> {
        let flag = if enabled {
            DHCP_ENABLED_FLAG
        } else {
            DHCP_DISABLED_FLAG
        };
        store.write_flag(flag)?;
        self.dhcp_enabled = enabled;
        self.clear_addresses();
        Ok(())
    }

    pub(crate) fn clear_addresses(&mut self) {
        self.ip = Ipv4Addr::UNSPECIFIED;
        self.subnet = Ipv4Addr::UNSPECIFIED;
        self.gateway = Ipv4Addr::UNSPECIFIED;
        self.dns = Ipv4Addr::UNSPECIFIED;
        self.lease_time = 0;
    }

    pub(crate) fn apply_lease(&mut self, lease: &Lease) {
        self.ip = lease.address;
        if let Some(subnet) = lease.subnet {
            self.subnet = subnet;
        }
        if let Some(gateway) = lease.gateway {
            self.gateway = gateway;
        }
        if let Some(dns) = lease.dns {
            self.dns = dns;
        }
        if let Some(lease_time) = lease.lease_time {
            self.lease_time = lease_time;
        }
    }

    fn ensure_static(&self) -> Result<(), ConfigError> {
        if self.dhcp_enabled {
            return Err(ConfigError::DhcpEnabled);
        }
        Ok(())
    }
}
