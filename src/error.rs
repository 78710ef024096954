//! Error types for the printer service.
//!
//! Every failure in the connection core is local to one connection attempt
//! or session. These values are either returned from a handle method or
//! folded into an event; none of them terminate the service.

use smol_str::SmolStr;
use thiserror::Error;

/// Main error type for the printer service.
#[derive(Error, Debug)]
pub enum PrinterError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Invalid device address: {0:?}")]
   InvalidAddress(SmolStr),

   #[error("Printer not connected")]
   NotConnected,

   #[error("Connection closed")]
   ConnectionClosed,

   #[error("Request timeout")]
   RequestTimeout,

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Manager has been shut down")]
   ManagerShutdown,
}

/// Convenience type alias for Results with `PrinterError`.
pub type Result<T> = std::result::Result<T, PrinterError>;
