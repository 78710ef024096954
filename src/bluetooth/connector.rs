//! Single-shot background connect attempts.

use std::sync::Arc;

use log::{info, warn};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::bluetooth::{
   manager::{LinkId, ManagerCommand},
   transport::{DeviceAddress, Transport},
};

/// One in-flight attempt to open a link.
///
/// The attempt reports exactly once through the manager's loopback channel.
/// Cancelling drops the pending open, which closes whatever socket the
/// transport had opened so far.
#[derive(Debug)]
pub struct Connector {
   id: LinkId,
   address: DeviceAddress,
   handle: JoinHandle<()>,
}

impl Connector {
   pub fn spawn(
      id: LinkId,
      transport: Arc<dyn Transport>,
      address: DeviceAddress,
      loopback: mpsc::Sender<ManagerCommand>,
   ) -> Self {
      let open = transport.open(address.clone());
      let addr = address.clone();
      let handle = tokio::spawn(async move {
         let result = open.await;
         match &result {
            Ok(link) => info!("Opened link to {addr} ({})", link.name),
            Err(e) => warn!("Failed to open link to {addr}: {e}"),
         }
         if let Err(e) = loopback.send(ManagerCommand::Opened(id, result)).await {
            warn!("Channel closed sending connect result for {addr}: {e}");
         }
      });

      Self {
         id,
         address,
         handle,
      }
   }

   pub const fn id(&self) -> LinkId {
      self.id
   }

   pub const fn address(&self) -> &DeviceAddress {
      &self.address
   }

   pub fn cancel(&self) {
      self.handle.abort();
   }
}

impl Drop for Connector {
   fn drop(&mut self) {
      self.handle.abort();
   }
}
