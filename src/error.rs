use thiserror::Error;

/// Why a frame was not handled, or why a reply did not leave the box.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    #[error("frame truncated")]
    Truncated,
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("{0} checksum mismatch")]
    Checksum(&'static str),
    #[error("dhcp transaction id mismatch: got {got:#010x}, expected {expected:#010x}")]
    TransactionMismatch { got: u32, expected: u32 },
    /// Well formed, but not something this stack answers.
    #[error("frame ignored: {0}")]
    Ignored(&'static str),
    #[error("no tcp peer to send to")]
    NoPeer,
    #[error("transmit aborted")]
    TransmitAborted,
    #[error("receive buffer overflow")]
    Overflow,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("flag store i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("dhcp must be disabled to set this address")]
    DhcpEnabled,
    #[error(transparent)]
    Store(#[from] StoreError),
}
