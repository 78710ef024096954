//! Transport abstraction for printer links.
//!
//! A [`Transport`] opens a duplex byte stream to a device address. The
//! connection core only ever sees the boxed stream, so RFCOMM sockets and
//! in-memory pipes are interchangeable.

use std::{fmt, str::FromStr};

use futures::future::BoxFuture;
use smol_str::SmolStr;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{PrinterError, Result};

/// Opaque identifier of a remote printer, e.g. `00:11:22:33:44:55`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress(SmolStr);

impl DeviceAddress {
   pub fn new(address: impl AsRef<str>) -> Result<Self> {
      let address = address.as_ref().trim();
      if address.is_empty() {
         return Err(PrinterError::InvalidAddress(address.into()));
      }
      Ok(Self(address.into()))
   }

   pub fn as_str(&self) -> &str {
      &self.0
   }

   /// Whether the address has the shape of a Bluetooth hardware address.
   pub fn is_bluetooth(&self) -> bool {
      self.0.split(':').count() == 6
   }
}

impl FromStr for DeviceAddress {
   type Err = PrinterError;

   fn from_str(s: &str) -> Result<Self> {
      Self::new(s)
   }
}

impl fmt::Display for DeviceAddress {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.0)
   }
}

/// Any bidirectional byte stream usable as a printer link.
pub trait Socket: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedSocket = Box<dyn Socket>;

/// An opened link to a printer.
pub struct Link {
   pub socket: BoxedSocket,
   pub name: SmolStr,
}

impl fmt::Debug for Link {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Link").field("name", &self.name).finish_non_exhaustive()
   }
}

/// Opens links to printers.
pub trait Transport: Send + Sync + 'static {
   /// Opens a link to `address`.
   ///
   /// Dropping the returned future abandons the attempt and closes any
   /// partially opened socket.
   fn open(&self, address: DeviceAddress) -> BoxFuture<'static, Result<Link>>;
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_address_parsing() {
      let addr: DeviceAddress = " 00:11:22:33:44:55 ".parse().unwrap();
      assert_eq!(addr.as_str(), "00:11:22:33:44:55");
      assert_eq!(addr.to_string(), "00:11:22:33:44:55");
      assert!(addr.is_bluetooth());

      let short = DeviceAddress::new("AA:BB").unwrap();
      assert!(!short.is_bluetooth());
   }

   #[test]
   fn test_empty_address_rejected() {
      assert!(matches!(
         DeviceAddress::new("   "),
         Err(PrinterError::InvalidAddress(_))
      ));
      assert!("".parse::<DeviceAddress>().is_err());
   }
}
