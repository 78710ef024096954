//! Event handling for printer connection updates.
//!
//! The connection manager reports lifecycle changes and traffic through an
//! [`EventBus`]. Events are transient and never persisted.

use std::sync::Arc;

use smallvec::SmallVec;
use smol_str::SmolStr;

/// A chunk of bytes received from the printer.
///
/// Printers answer with short status bytes most of the time, so small
/// chunks stay inline.
pub type Chunk = SmallVec<[u8; 64]>;

/// Connection state of a manager. `Idle` until the first `connect`.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
   #[default]
   Idle,
   Connecting,
   Connected,
}

/// Events that can be emitted by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterEvent {
   StateChanged(ConnectionState),
   DeviceNamed(SmolStr),
   DataReceived(Chunk),
   WriteCompleted(Vec<u8>),
   ConnectionLost,
   ConnectionFailed,
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Delivers an event to the sink.
   ///
   /// Called from a single task, in transition order.
   fn emit(&self, event: PrinterEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
