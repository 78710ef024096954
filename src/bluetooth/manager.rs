//! Connection manager for a single printer.
//!
//! This module owns the `Idle`/`Connecting`/`Connected` state machine. All
//! state lives in one actor task; callers talk to it through
//! [`PrinterManager`], and the connector and session tasks only post
//! reports to its loopback channel. Reports carry the id of the attempt or
//! session that produced them, and anything that does not match the
//! currently tracked id is dropped.

use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use log::{debug, info, warn};
use smol_str::SmolStr;
use tokio::{
   select,
   sync::{mpsc, oneshot},
};

use crate::{
   bluetooth::{
      connector::Connector,
      session::{Session, SessionReport, SessionSender},
      transport::{DeviceAddress, Link, Transport},
   },
   error::{PrinterError, Result},
   event::{ConnectionState, EventSender, PrinterEvent},
};

/// Identifies one connect attempt or session. Never reused by a manager.
pub type LinkId = u64;

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 1000;

// === Commands ===

#[derive(Debug)]
pub enum ManagerCommand {
   // Background reports
   Opened(LinkId, Result<Link>),
   Session(LinkId, SessionReport),

   // User commands
   Connect(DeviceAddress, oneshot::Sender<Result<()>>),
   Writer(oneshot::Sender<Result<SessionSender>>),
   Stop(oneshot::Sender<Result<()>>),
}

/// Snapshot readable without a round trip to the actor.
#[derive(Debug, Default)]
struct Shared {
   state: AtomicCell<ConnectionState>,
   device: parking_lot::Mutex<Option<SmolStr>>,
}

// === Main Manager ===

/// Handle to the connection manager of one printer.
///
/// This type is cheaply cloneable. The actor shuts down, closing any open
/// link, once every handle has been dropped.
#[derive(Debug, Clone)]
pub struct PrinterManager {
   inbox: mpsc::Sender<ManagerCommand>,
   shared: Arc<Shared>,
}

impl PrinterManager {
   /// Spawns the manager actor. Must be called from within a Tokio runtime.
   pub fn new(transport: Arc<dyn Transport>, event_tx: EventSender) -> Self {
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let shared = Arc::new(Shared::default());
      tokio::spawn(ManagerActor::new(transport, event_tx, command_rx, shared.clone()).run());
      Self {
         inbox: command_tx,
         shared,
      }
   }

   async fn request<T>(
      &self,
      cmd: impl FnOnce(oneshot::Sender<Result<T>>) -> ManagerCommand,
   ) -> Result<T> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(cmd(tx))
         .await
         .map_err(|_| PrinterError::ManagerShutdown)?;
      rx.await.map_err(|_| PrinterError::ManagerShutdown)?
   }

   /// Starts connecting to `address`, abandoning any current attempt or
   /// session. Returns once the manager is `Connecting`; the outcome is
   /// reported through events.
   pub async fn connect(&self, address: DeviceAddress) -> Result<()> {
      self
         .request(|tx| ManagerCommand::Connect(address, tx))
         .await
   }

   /// Writes `data` to the connected printer.
   ///
   /// Fails with [`PrinterError::NotConnected`] unless the manager is
   /// `Connected`. A failed write ends the session like a failed read does.
   pub async fn write(&self, data: &[u8]) -> Result<()> {
      let sender = self.request(ManagerCommand::Writer).await?;
      sender.send(data).await
   }

   /// Cancels any attempt, closes any session and returns to `Idle`.
   pub async fn stop(&self) -> Result<()> {
      self.request(ManagerCommand::Stop).await
   }

   pub fn current_state(&self) -> ConnectionState {
      self.shared.state.load()
   }

   /// Name of the connected printer, if any.
   pub fn current_device(&self) -> Option<SmolStr> {
      self.shared.device.lock().clone()
   }
}

// === Manager Actor ===

struct ManagerActor {
   transport: Arc<dyn Transport>,
   event_tx: EventSender,
   command_rx: mpsc::Receiver<ManagerCommand>,
   loopback_rx: mpsc::Receiver<ManagerCommand>,
   loopback_tx: mpsc::Sender<ManagerCommand>,
   shared: Arc<Shared>,

   // State
   state: ConnectionState,
   last_id: LinkId,
   connector: Option<Connector>,
   session: Option<Session>,
}

impl ManagerActor {
   fn new(
      transport: Arc<dyn Transport>,
      event_tx: EventSender,
      command_rx: mpsc::Receiver<ManagerCommand>,
      shared: Arc<Shared>,
   ) -> Self {
      let (loopback_tx, loopback_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      Self {
         transport,
         event_tx,
         command_rx,
         loopback_rx,
         loopback_tx,
         shared,
         state: ConnectionState::Idle,
         last_id: 0,
         connector: None,
         session: None,
      }
   }

   async fn run(mut self) {
      debug!("Printer manager starting up");

      loop {
         // Reports first: anything a task queued before answering its caller
         // must be applied before that caller's next command.
         select! {
             biased;
             Some(cmd) = self.loopback_rx.recv() => {
                 self.handle_command(cmd);
             }
             cmd = self.command_rx.recv() => {
                 let Some(cmd) = cmd else {
                     info!("Printer manager shutting down");
                     break;
                 };
                 self.handle_command(cmd);
             }
         }
      }

      self.cleanup();
   }

   fn handle_command(&mut self, cmd: ManagerCommand) {
      match cmd {
         ManagerCommand::Opened(id, result) => {
            self.handle_opened(id, result);
         },
         ManagerCommand::Session(id, report) => {
            self.handle_session_report(id, report);
         },
         ManagerCommand::Connect(address, reply) => {
            self.connect(address);
            let _ = reply.send(Ok(()));
         },
         ManagerCommand::Writer(reply) => {
            let _ = reply.send(self.writer());
         },
         ManagerCommand::Stop(reply) => {
            self.stop();
            let _ = reply.send(Ok(()));
         },
      }
   }

   fn next_id(&mut self) -> LinkId {
      self.last_id += 1;
      self.last_id
   }

   fn emit(&self, event: PrinterEvent) {
      self.event_tx.emit(event);
   }

   fn transition(&mut self, state: ConnectionState) {
      debug!("State {} -> {state}", self.state);
      self.state = state;
      self.shared.state.store(state);
      self.emit(PrinterEvent::StateChanged(state));
   }

   fn set_device(&self, name: Option<SmolStr>) {
      *self.shared.device.lock() = name;
   }

   /// Cancels the attempt and closes the session, whichever exists.
   fn release(&mut self) {
      if let Some(connector) = self.connector.take() {
         debug!("Cancelling connect attempt {} to {}", connector.id(), connector.address());
         connector.cancel();
      }
      if let Some(mut session) = self.session.take() {
         session.close();
      }
      self.set_device(None);
   }

   fn connect(&mut self, address: DeviceAddress) {
      info!("Connecting to {address}");
      self.release();

      let id = self.next_id();
      self.connector = Some(Connector::spawn(
         id,
         self.transport.clone(),
         address,
         self.loopback_tx.clone(),
      ));
      self.transition(ConnectionState::Connecting);
   }

   fn handle_opened(&mut self, id: LinkId, result: Result<Link>) {
      if self.connector.as_ref().map(Connector::id) != Some(id) {
         // Dropping a stale link closes it
         debug!("Discarding result of superseded connect attempt {id}");
         return;
      }
      let connector = self.connector.take();

      match result {
         Ok(Link { socket, name }) => {
            drop(connector);
            let session_id = self.next_id();
            self.session = Some(Session::start(session_id, socket, self.loopback_tx.clone()));
            info!("Connected to {name}");

            self.set_device(Some(name.clone()));
            self.emit(PrinterEvent::DeviceNamed(name));
            self.transition(ConnectionState::Connected);
         },
         Err(e) => {
            if let Some(connector) = connector {
               warn!("Unable to connect to {}: {e}", connector.address());
            }
            self.emit(PrinterEvent::ConnectionFailed);
            self.transition(ConnectionState::Idle);
         },
      }
   }

   fn handle_session_report(&mut self, id: LinkId, report: SessionReport) {
      if self.session.as_ref().map(Session::id) != Some(id) {
         debug!("Discarding report of closed session {id}");
         return;
      }

      match report {
         SessionReport::Data(chunk) => {
            self.emit(PrinterEvent::DataReceived(chunk));
         },
         SessionReport::Written(data) => {
            self.emit(PrinterEvent::WriteCompleted(data));
         },
         SessionReport::Ended(reason) => {
            match reason {
               Some(e) => warn!("Connection lost: {e}"),
               None => warn!("Connection lost: printer closed the stream"),
            }
            self.release();
            self.emit(PrinterEvent::ConnectionLost);
            self.transition(ConnectionState::Idle);
         },
      }
   }

   fn writer(&self) -> Result<SessionSender> {
      match (&self.session, self.state) {
         (Some(session), ConnectionState::Connected) => Ok(session.sender()),
         _ => Err(PrinterError::NotConnected),
      }
   }

   fn stop(&mut self) {
      self.release();
      if self.state != ConnectionState::Idle {
         info!("Stopped");
         self.transition(ConnectionState::Idle);
      }
   }

   fn cleanup(&mut self) {
      debug!("Cleaning up printer manager");
      self.release();
      self.state = ConnectionState::Idle;
      self.shared.state.store(ConnectionState::Idle);
   }
}
