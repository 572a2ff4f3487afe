use crate::transport::Transport;
use libc::{c_char, c_short};
use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use thiserror::Error;
use tracing::warn;

const TUN_DEVICE: &str = "/dev/net/tun";
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TAP: c_short = 0x0002;
const IFF_NO_PI: c_short = 0x1000;

#[derive(Error, Debug)]
pub enum TapError {
    #[error("Failed to open /dev/net/tun: {0}")]
    Open(#[source] io::Error),
    #[error("Interface name too long: {0}")]
    NameTooLong(String),
    #[error("TUNSETIFF failed: {0}")]
    IoctlFailed(#[source] io::Error),
}

#[repr(C)]
struct IfReq {
    name: [c_char; libc::IFNAMSIZ],
    flags: c_short,
    _pad: [u8; 22],
}

impl IfReq {
    fn new(name: &str) -> Result<Self, TapError> {
        if name.len() >= libc::IFNAMSIZ {
            return Err(TapError::NameTooLong(name.to_string()));
        }
        let mut req: IfReq = unsafe { mem::zeroed() };
        for (dst, src) in req.name.iter_mut().zip(name.bytes()) {
            *dst = src as c_char;
        }
        Ok(req)
    }
}

/// Linux TAP interface carrying raw Ethernet frames.
pub struct TapDevice {
    name: String,
    file: File,
}

impl TapDevice {
    /// Attaches to (or creates) the TAP interface `name`. The interface
    /// still has to be brought up from outside, e.g. `ip link set tap0 up`.
    pub fn open(name: &str) -> Result<Self, TapError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(TUN_DEVICE)
            .map_err(TapError::Open)?;

        let mut req = IfReq::new(name)?;
        req.flags = IFF_TAP | IFF_NO_PI;
        if unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut req as *mut IfReq) } < 0 {
            return Err(TapError::IoctlFailed(io::Error::last_os_error()));
        }

        // The kernel may have filled in a name of its own.
        let name = unsafe { CStr::from_ptr(req.name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        Ok(Self { name, file })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Blocks for up to `timeout_ms` until a frame is readable.
    pub fn wait_readable(&self, timeout_ms: i32) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        n > 0 && pfd.revents & libc::POLLIN != 0
    }

    fn interface_flags(&self) -> io::Result<c_short> {
        let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if sock < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut req = IfReq::new(&self.name).map_err(io::Error::other)?;
        let rc = unsafe { libc::ioctl(sock, libc::SIOCGIFFLAGS as _, &mut req as *mut IfReq) };
        let err = io::Error::last_os_error();
        unsafe { libc::close(sock) };
        if rc < 0 {
            return Err(err);
        }
        Ok(req.flags)
    }
}

impl Transport for TapDevice {
    fn is_link_up(&self) -> bool {
        self.interface_flags()
            .map(|flags| flags & libc::IFF_UP as c_short != 0)
            .unwrap_or(false)
    }

    fn is_data_available(&mut self) -> bool {
        self.wait_readable(0)
    }

    /// The kernel drops frames on a full queue without telling us.
    fn is_overflow(&mut self) -> bool {
        false
    }

    fn receive(&mut self, buf: &mut [u8]) -> usize {
        match self.file.read(buf) {
            Ok(n) => n,
            Err(e) => {
                warn!("tap read failed: {e}");
                0
            }
        }
    }

    fn transmit(&mut self, frame: &[u8]) -> bool {
        match self.file.write(frame) {
            Ok(n) if n == frame.len() => true,
            Ok(n) => {
                warn!("tap short write: {n} of {} bytes", frame.len());
                false
            }
            Err(e) => {
                warn!("tap write failed: {e}");
                false
            }
        }
    }
}
