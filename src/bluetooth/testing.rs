//! In-memory transport and event recorder for tests.

use std::{
   io,
   pin::Pin,
   sync::{
      Arc,
      atomic::{AtomicBool, Ordering},
   },
   task::{Context, Poll},
   time::Duration,
};

use futures::{FutureExt, future::BoxFuture};
use tokio::{
   io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf},
   sync::{mpsc, oneshot},
   time,
};

use crate::{
   bluetooth::transport::{DeviceAddress, Link, Transport},
   error::{PrinterError, Result},
   event::{EventBus, PrinterEvent},
};

/// An open request the test resolves by hand.
pub struct PendingOpen {
   pub address: DeviceAddress,
   pub reply: oneshot::Sender<Result<Link>>,
}

impl PendingOpen {
   /// Completes the open with an in-memory pipe and returns the printer's end.
   pub fn succeed(self, name: &str) -> DuplexStream {
      let (ours, theirs) = tokio::io::duplex(4096);
      let _ = self.reply.send(Ok(Link {
         socket: Box::new(ours),
         name: name.into(),
      }));
      theirs
   }

   pub fn succeed_with(self, name: &str, socket: impl AsyncRead + AsyncWrite + Send + Unpin + 'static) {
      let _ = self.reply.send(Ok(Link {
         socket: Box::new(socket),
         name: name.into(),
      }));
   }

   pub fn fail(self) {
      let _ = self.reply.send(Err(PrinterError::Io(io::Error::from(
         io::ErrorKind::ConnectionRefused,
      ))));
   }
}

pub struct FakeTransport {
   opens: mpsc::UnboundedSender<PendingOpen>,
}

impl FakeTransport {
   pub fn new() -> (Arc<dyn Transport>, mpsc::UnboundedReceiver<PendingOpen>) {
      let (tx, rx) = mpsc::unbounded_channel();
      (Arc::new(Self { opens: tx }), rx)
   }
}

impl Transport for FakeTransport {
   fn open(&self, address: DeviceAddress) -> BoxFuture<'static, Result<Link>> {
      let (reply, rx) = oneshot::channel();
      let _ = self.opens.send(PendingOpen { address, reply });
      async move { rx.await.map_err(|_| PrinterError::ConnectionClosed)? }.boxed()
   }
}

/// A socket whose reads never complete and whose writes always fail.
pub struct BrokenWriter;

impl AsyncRead for BrokenWriter {
   fn poll_read(
      self: Pin<&mut Self>,
      _cx: &mut Context<'_>,
      _buf: &mut ReadBuf<'_>,
   ) -> Poll<io::Result<()>> {
      Poll::Pending
   }
}

impl AsyncWrite for BrokenWriter {
   fn poll_write(
      self: Pin<&mut Self>,
      _cx: &mut Context<'_>,
      _buf: &[u8],
   ) -> Poll<io::Result<usize>> {
      Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
   }

   fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
      Poll::Ready(Ok(()))
   }

   fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
      Poll::Ready(Ok(()))
   }
}

/// Event sink that records every event and fails on overlapping delivery.
pub struct Recorder {
   tx: mpsc::UnboundedSender<PrinterEvent>,
   in_emit: AtomicBool,
}

impl Recorder {
   pub fn new() -> (Arc<Self>, Events) {
      let (tx, rx) = mpsc::unbounded_channel();
      (
         Arc::new(Self {
            tx,
            in_emit: AtomicBool::new(false),
         }),
         Events(rx),
      )
   }
}

impl EventBus for Recorder {
   fn emit(&self, event: PrinterEvent) {
      assert!(
         !self.in_emit.swap(true, Ordering::SeqCst),
         "sink invoked concurrently"
      );
      let _ = self.tx.send(event);
      self.in_emit.store(false, Ordering::SeqCst);
   }
}

pub struct Events(mpsc::UnboundedReceiver<PrinterEvent>);

impl Events {
   pub async fn next(&mut self) -> PrinterEvent {
      time::timeout(Duration::from_secs(2), self.0.recv())
         .await
         .expect("timed out waiting for event")
         .expect("event sink dropped")
   }

   pub async fn expect(&mut self, expected: &[PrinterEvent]) {
      for want in expected {
         assert_eq!(&self.next().await, want);
      }
   }

   /// Asserts nothing else arrives for a short while.
   pub async fn assert_quiet(&mut self) {
      if let Ok(Some(event)) = time::timeout(Duration::from_millis(100), self.0.recv()).await {
         panic!("unexpected event: {event:?}");
      }
   }
}
