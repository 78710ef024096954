//! RFCOMM transport for Bluetooth printers.
//!
//! Printers advertise the Serial Port Profile in their SDP record. By
//! default a link is opened by asking BlueZ to connect that profile, which
//! resolves whatever channel the printer advertises; a configured channel
//! skips the lookup and dials `address:channel` directly.

use std::{str::FromStr, sync::Arc, time::Duration};

use bluer::{
   Adapter, Address, Device,
   rfcomm::{Profile, ProfileHandle, Role, SocketAddr, Stream},
};
use futures::{FutureExt, StreamExt, future::BoxFuture};
use log::{debug, info};
use smol_str::{SmolStr, ToSmolStr};
use tokio::{select, sync::Mutex, time};
use uuid::Uuid;

use crate::{
   bluetooth::transport::{DeviceAddress, Link, Transport},
   config::Config,
   error::{PrinterError, Result},
};

/// Serial Port Profile service class
pub const SERIAL_PORT_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// How a link reaches the printer's serial port.
#[derive(Clone)]
enum Route {
   /// BlueZ resolves the channel from the printer's SDP record and hands
   /// the connected socket to our registered client profile.
   ServiceRecord(Arc<Mutex<ProfileHandle>>),
   Channel(u8),
}

pub struct RfcommTransport {
   adapter: Adapter,
   route: Route,
   connect_timeout: Option<Duration>,
}

impl RfcommTransport {
   pub async fn new(config: &Config) -> Result<Self> {
      let session = bluer::Session::new().await?;
      let adapter = match &config.adapter {
         Some(name) => session.adapter(name)?,
         None => session.default_adapter().await?,
      };
      info!("Using Bluetooth adapter {}", adapter.name());

      let route = match config.channel {
         Some(channel) => {
            info!("Dialing fixed RFCOMM channel {channel}");
            Route::Channel(channel)
         },
         None => {
            let handle = session.register_profile(serial_port_profile()).await?;
            info!("Registered Serial Port Profile client");
            Route::ServiceRecord(Arc::new(Mutex::new(handle)))
         },
      };

      Ok(Self {
         adapter,
         route,
         connect_timeout: config.connect_timeout(),
      })
   }
}

impl Transport for RfcommTransport {
   fn open(&self, address: DeviceAddress) -> BoxFuture<'static, Result<Link>> {
      let open = open_link(self.adapter.clone(), self.route.clone(), address);
      within(self.connect_timeout, open).boxed()
   }
}

/// Bounds the whole open, name lookup included.
async fn within<F>(limit: Option<Duration>, open: F) -> Result<Link>
where
   F: Future<Output = Result<Link>>,
{
   match limit {
      Some(limit) => time::timeout(limit, open)
         .await
         .map_err(|_| PrinterError::RequestTimeout)?,
      None => open.await,
   }
}

fn serial_port_profile() -> Profile {
   Profile {
      uuid: SERIAL_PORT_UUID,
      name: Some("escposd".to_string()),
      role: Some(Role::Client),
      require_authentication: Some(false),
      require_authorization: Some(false),
      auto_connect: Some(false),
      ..Default::default()
   }
}

async fn open_link(adapter: Adapter, route: Route, address: DeviceAddress) -> Result<Link> {
   let addr = parse_address(&address)?;
   let device = adapter.device(addr)?;
   let name = device_name(&device, addr).await;

   let stream = match route {
      Route::Channel(channel) => {
         debug!("Connecting to {addr} channel {channel}");
         Stream::connect(SocketAddr::new(addr, channel)).await?
      },
      Route::ServiceRecord(profile) => {
         debug!("Connecting to {addr} serial port service");
         connect_service(&profile, &device, addr).await?
      },
   };

   Ok(Link {
      socket: Box::new(stream),
      name,
   })
}

/// Asks BlueZ to connect the Serial Port Profile and waits for the socket it
/// hands back. Both run together since BlueZ delivers the socket before the
/// connect call returns.
async fn connect_service(
   profile: &Mutex<ProfileHandle>,
   device: &Device,
   addr: Address,
) -> Result<Stream> {
   let mut requests = profile.lock().await;
   let connect = device.connect_profile(&SERIAL_PORT_UUID);
   tokio::pin!(connect);
   let mut connecting = true;

   loop {
      select! {
         res = &mut connect, if connecting => {
            res?;
            connecting = false;
         }
         req = requests.next() => {
            let Some(req) = req else {
               return Err(PrinterError::ConnectionClosed);
            };
            if req.device() == addr {
               return Ok(req.accept()?);
            }
            // Dropping the request rejects it
            debug!("Ignoring serial port connection from {}", req.device());
         }
      }
   }
}

fn parse_address(address: &DeviceAddress) -> Result<Address> {
   Address::from_str(address.as_str())
      .map_err(|_| PrinterError::InvalidAddress(address.as_str().into()))
}

/// Name the adapter knows the device by, falling back to its address.
async fn device_name(device: &Device, addr: Address) -> SmolStr {
   let name = device.name().await.ok().flatten();
   name.map_or_else(|| addr.to_smolstr(), SmolStr::from)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_parse_address() {
      let addr = parse_address(&DeviceAddress::new("00:11:22:33:44:55").unwrap()).unwrap();
      assert_eq!(addr, Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));
   }

   #[test]
   fn test_parse_address_rejects_garbage() {
      let err = parse_address(&DeviceAddress::new("AA:BB").unwrap()).unwrap_err();
      assert!(matches!(err, PrinterError::InvalidAddress(a) if a == "AA:BB"));
   }

   #[tokio::test]
   async fn test_timeout_bounds_the_whole_open() {
      // A device lookup that never answers
      let stalled = futures::future::pending::<Result<Link>>();
      let err = within(Some(Duration::from_millis(50)), stalled)
         .await
         .unwrap_err();
      assert!(matches!(err, PrinterError::RequestTimeout));
   }

   #[tokio::test]
   async fn test_no_timeout_passes_result_through() {
      let (ours, _printer) = tokio::io::duplex(16);
      let link = within(None, async {
         Ok(Link {
            socket: Box::new(ours),
            name: "Printer1".into(),
         })
      })
      .await
      .unwrap();
      assert_eq!(link.name, "Printer1");
   }

   #[test]
   fn test_serial_port_profile() {
      assert_eq!(
         SERIAL_PORT_UUID.to_string(),
         "00001101-0000-1000-8000-00805f9b34fb"
      );

      let profile = serial_port_profile();
      assert_eq!(profile.uuid, SERIAL_PORT_UUID);
      assert!(matches!(profile.role, Some(Role::Client)));
      assert_eq!(profile.auto_connect, Some(false));
   }
}
