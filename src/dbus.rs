use log::info;
use zbus::{interface, object_server::SignalEmitter};

use crate::bluetooth::{manager::PrinterManager, transport::DeviceAddress};

pub struct PrinterService {
   manager: PrinterManager,
}

impl PrinterService {
   pub const fn new(manager: PrinterManager) -> Self {
      Self { manager }
   }
}

#[interface(name = "org.escposd.Printer")]
impl PrinterService {
   async fn connect(&self, address: String) -> zbus::fdo::Result<bool> {
      let addr =
         DeviceAddress::new(&address).map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
      if !addr.is_bluetooth() {
         return Err(zbus::fdo::Error::InvalidArgs(format!(
            "Not a Bluetooth address: {addr}"
         )));
      }

      self
         .manager
         .connect(addr)
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

      info!("Connect requested for {address}");
      Ok(true)
   }

   /// Writes hex-encoded bytes to the connected printer.
   async fn write(&self, data: String) -> zbus::fdo::Result<bool> {
      let data = hex::decode(data).map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;

      self
         .manager
         .write(&data)
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

      Ok(true)
   }

   async fn stop(&self) -> zbus::fdo::Result<bool> {
      self
         .manager
         .stop()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

      Ok(true)
   }

   // Signals
   #[zbus(signal)]
   pub async fn state_changed(emitter: &SignalEmitter<'_>, state: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn device_named(emitter: &SignalEmitter<'_>, name: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn data_received(emitter: &SignalEmitter<'_>, data: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn write_completed(emitter: &SignalEmitter<'_>, data: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn connection_lost(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn connection_failed(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(property)]
   async fn current_state(&self) -> String {
      self.manager.current_state().to_string()
   }

   #[zbus(property)]
   async fn current_device(&self) -> String {
      self.manager.current_device().unwrap_or_default().to_string()
   }
}
