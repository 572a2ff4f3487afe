pub mod config;
pub mod engine;
pub mod error;
pub mod net;
pub mod services;
#[cfg(target_os = "linux")]
mod tap;
pub mod transport;

pub use error::{ConfigError, NetError, StoreError};
#[cfg(target_os = "linux")]
pub use tap::{TapDevice, TapError};
