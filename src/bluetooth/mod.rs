//! Bluetooth communication layer for printers.
//!
//! This module provides the RFCOMM transport and the connection manager
//! that owns at most one connect attempt or session per printer.

pub mod connector;
pub mod manager;
pub mod rfcomm;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod testing;
