//! ESC/POS printer D-Bus service
//!
//! This service keeps a single RFCOMM session open to a Bluetooth receipt
//! printer, accepts raw writes over D-Bus, and relays connection events as
//! D-Bus signals.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use bluetooth::{manager::PrinterManager, rfcomm::RfcommTransport, transport::DeviceAddress};
use dbus::PrinterService;
use event::{EventBus, PrinterEvent};

mod bluetooth;
mod config;
mod dbus;
mod error;
mod event;

use crate::{dbus::PrinterServiceSignals, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting escposd D-Bus service...");

   // Load configuration
   let config = config::Config::load()?;
   info!(
      "Loaded configuration (printer: {}, channel: {})",
      config.printer.as_deref().unwrap_or("none"),
      config.channel.map_or_else(|| "serial port lookup".to_string(), |c| c.to_string())
   );

   let event_bus = EventProcessor::new();

   let transport = RfcommTransport::new(&config).await?;
   let manager = PrinterManager::new(Arc::new(transport), event_bus.clone());

   let service = PrinterService::new(manager.clone());

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name("org.escposd")?
      .serve_at("/org/escposd/printer", service)?
      .build()
      .await?;

   info!("escposd D-Bus service started at org.escposd");

   event_bus.spawn_dispatcher(connection).await?;

   if config.connect_on_start
      && let Some(printer) = &config.printer
   {
      match DeviceAddress::new(printer) {
         Ok(address) => manager.connect(address).await?,
         Err(e) => warn!("Not connecting to configured printer: {e}"),
      }
   }

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down escposd...");
   manager.stop().await?;

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<PrinterEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }
}

impl EventProcessor {
   async fn recv(self: &Arc<Self>) -> Option<PrinterEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(&self, iface: &InterfaceRef<PrinterService>, event: PrinterEvent) -> Result<()> {
      match event {
         PrinterEvent::StateChanged(state) => {
            info!("Printer is {state}");
            iface.state_changed(state.into()).await?;
         },
         PrinterEvent::DeviceNamed(name) => {
            iface.device_named(&name).await?;
         },
         PrinterEvent::DataReceived(chunk) => {
            iface.data_received(&hex::encode(chunk)).await?;
         },
         PrinterEvent::WriteCompleted(data) => {
            iface.write_completed(&hex::encode(data)).await?;
         },
         PrinterEvent::ConnectionLost => {
            warn!("Printer connection was lost");
            iface.connection_lost().await?;
         },
         PrinterEvent::ConnectionFailed => {
            warn!("Unable to connect printer");
            iface.connection_failed().await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, PrinterService>("/org/escposd/printer")
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: PrinterEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
