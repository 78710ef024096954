//! Duplex byte-stream session over an opened printer link.
//!
//! A session splits its socket into a receive loop and a send loop, each
//! running as its own task. Neither loop touches manager state: traffic and
//! termination are posted to the manager's loopback channel, tagged with the
//! session id.

use log::{debug, info, warn};
use tokio::{
   io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
   sync::{mpsc, oneshot},
   task::JoinSet,
};

use crate::{
   bluetooth::{
      manager::{LinkId, ManagerCommand},
      transport::BoxedSocket,
   },
   error::{PrinterError, Result},
   event::Chunk,
};

/// Upper bound for a single read from the socket.
pub const READ_CHUNK_SIZE: usize = 1024;
/// Writes queued ahead of the send loop
const WRITE_QUEUE_SIZE: usize = 32;

enum Command {
   Send {
      data: Vec<u8>,
      then: oneshot::Sender<Result<()>>,
   },
}

/// What a session reports back to the manager.
#[derive(Debug)]
pub enum SessionReport {
   Data(Chunk),
   Written(Vec<u8>),
   /// The link is gone; `None` for an orderly end of stream.
   Ended(Option<PrinterError>),
}

/// Sender half of a session.
///
/// This type is cheaply cloneable.
#[derive(Debug, Clone)]
pub struct SessionSender {
   tx: mpsc::Sender<Command>,
}

impl SessionSender {
   pub fn is_connected(&self) -> bool {
      !self.tx.is_closed()
   }

   /// Writes and flushes `data`, resolving once the socket accepted it.
   pub async fn send(&self, data: &[u8]) -> Result<()> {
      if !self.is_connected() {
         return Err(PrinterError::ConnectionClosed);
      }

      let (tx, rx) = oneshot::channel();
      self
         .tx
         .send(Command::Send {
            data: data.to_vec(),
            then: tx,
         })
         .await
         .map_err(|_| PrinterError::ConnectionClosed)?;

      rx.await.map_err(|_| PrinterError::ConnectionClosed)?
   }
}

/// Owns one opened socket for its whole lifetime.
#[derive(Debug)]
pub struct Session {
   id: LinkId,
   sender: SessionSender,
   jset: JoinSet<()>,
   closed: bool,
}

impl Session {
   pub fn start(id: LinkId, socket: BoxedSocket, loopback: mpsc::Sender<ManagerCommand>) -> Self {
      let (reader, writer) = tokio::io::split(socket);
      let (cmd_tx, cmd_rx) = mpsc::channel(WRITE_QUEUE_SIZE);

      let mut jset = JoinSet::new();
      jset.spawn(recv_loop(id, reader, loopback.clone()));
      jset.spawn(send_loop(id, writer, cmd_rx, loopback));
      debug!("Session {id} started");

      Self {
         id,
         sender: SessionSender { tx: cmd_tx },
         jset,
         closed: false,
      }
   }

   pub const fn id(&self) -> LinkId {
      self.id
   }

   pub fn sender(&self) -> SessionSender {
      self.sender.clone()
   }

   /// Stops both loops. The socket is released once both halves drop, which
   /// also cancels a read in progress.
   pub fn close(&mut self) {
      if self.closed {
         return;
      }
      self.closed = true;
      self.jset.abort_all();
      debug!("Session {} closed", self.id);
   }
}

impl Drop for Session {
   fn drop(&mut self) {
      self.close();
   }
}

async fn report(loopback: &mpsc::Sender<ManagerCommand>, id: LinkId, report: SessionReport) -> bool {
   loopback
      .send(ManagerCommand::Session(id, report))
      .await
      .is_ok()
}

async fn recv_loop(
   id: LinkId,
   mut reader: ReadHalf<BoxedSocket>,
   loopback: mpsc::Sender<ManagerCommand>,
) {
   let mut stack = [0u8; READ_CHUNK_SIZE];
   let reason = loop {
      match reader.read(&mut stack).await {
         Ok(0) => break None,
         Ok(n) => {
            let recvd = &stack[..n];
            debug!("← {id}: {}", hex::encode(recvd));
            if !report(&loopback, id, SessionReport::Data(Chunk::from_slice(recvd))).await {
               return;
            }
         },
         Err(e) => break Some(PrinterError::Io(e)),
      }
   };

   match &reason {
      None => info!("Session {id}: stream ended"),
      Some(e) => warn!("Session {id}: read failed: {e}"),
   }
   report(&loopback, id, SessionReport::Ended(reason)).await;
}

async fn send_loop(
   id: LinkId,
   mut writer: WriteHalf<BoxedSocket>,
   mut rx: mpsc::Receiver<Command>,
   loopback: mpsc::Sender<ManagerCommand>,
) {
   while let Some(cmd) = rx.recv().await {
      match cmd {
         Command::Send { data, then } => {
            debug!("→ {id}: {}", hex::encode(&data));
            let written = async {
               writer.write_all(&data).await?;
               writer.flush().await
            }
            .await;

            match written {
               Ok(()) => {
                  // Queued before the reply; the manager drains reports
                  // ahead of commands.
                  report(&loopback, id, SessionReport::Written(data)).await;
                  let _ = then.send(Ok(()));
               },
               Err(e) => {
                  warn!("Session {id}: write failed: {e}");
                  let cause = PrinterError::Io(e.kind().into());
                  let _ = then.send(Err(PrinterError::Io(e)));
                  report(&loopback, id, SessionReport::Ended(Some(cause))).await;
                  return;
               },
            }
         },
      }
   }
}
