//! Inbound transfer completion
//!
//! The event loop resolves the interrupt-IN read by calling [`complete`] on the
//! thread that is pumping it. The outcome lands in a [`ResultSlot`] which the
//! engine re-reads after every dispatch round.

use std::cell::{Cell, RefCell};
use tracing::{trace, warn};

/// How the transport reported the end of an inbound transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
}

/// Result of one armed read, as published by [`complete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Submitted, not resolved yet
    #[default]
    Pending,
    /// Byte count copied into the receive buffer
    Received(usize),
    Interrupted,
    NoDevice,
    TimedOut,
    IoError,
}

impl Outcome {
    pub fn is_pending(self) -> bool {
        self == Outcome::Pending
    }
}

/// Shared cell between the completion callback and the engine
///
/// Not `Sync`: written and read on the one thread that dispatches events.
#[derive(Debug)]
pub struct ResultSlot {
    outcome: Cell<Outcome>,
    in_flight: Cell<bool>,
    buffer: RefCell<Vec<u8>>,
}

impl ResultSlot {
    /// Create a slot with a receive buffer of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            outcome: Cell::new(Outcome::Pending),
            in_flight: Cell::new(false),
            buffer: RefCell::new(vec![0u8; capacity]),
        }
    }

    /// Receive buffer size
    pub fn capacity(&self) -> usize {
        self.buffer.borrow().len()
    }

    /// Current outcome. Always reads the cell, never a cached copy.
    pub fn outcome(&self) -> Outcome {
        self.outcome.get()
    }

    /// Mark the slot pending ahead of a fresh submission
    pub(crate) fn reset(&self) {
        self.outcome.set(Outcome::Pending);
    }

    /// Record a successful submission. Cleared only by [`complete`].
    pub(crate) fn mark_submitted(&self) {
        self.in_flight.set(true);
    }

    /// Whether a submitted read has not been called back yet.
    ///
    /// While set, the transport still owns the descriptor and its buffer.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.get()
    }

    /// Copy of the first `len` received bytes
    pub fn received(&self, len: usize) -> Vec<u8> {
        let buffer = self.buffer.borrow();
        buffer[..len.min(buffer.len())].to_vec()
    }
}

/// Classify a resolved inbound transfer and publish it to `slot`.
///
/// `data` is what the transfer actually delivered. Only a completed transfer
/// touches the receive buffer.
pub fn complete(slot: &ResultSlot, status: TransferStatus, data: &[u8]) {
    let outcome = match status {
        TransferStatus::Completed => {
            let mut buffer = slot.buffer.borrow_mut();
            let len = data.len().min(buffer.len());
            if len < data.len() {
                warn!(
                    "Inbound transfer delivered {} bytes, keeping {}",
                    data.len(),
                    len
                );
            }
            buffer[..len].copy_from_slice(&data[..len]);
            Outcome::Received(len)
        }
        TransferStatus::Cancelled => Outcome::Interrupted,
        TransferStatus::NoDevice => Outcome::NoDevice,
        TransferStatus::TimedOut => Outcome::TimedOut,
        TransferStatus::Error | TransferStatus::Stall | TransferStatus::Overflow => {
            Outcome::IoError
        }
    };

    trace!("Inbound transfer resolved: {:?} -> {:?}", status, outcome);
    slot.outcome.set(outcome);
    slot.in_flight.set(false);
}
