//! Transfer engine
//!
//! Drives one logical request/response exchange over a [`HidTransport`]:
//!
//! 1. allocate the inbound descriptor (first transaction only)
//! 2. reset the result slot and submit the interrupt-IN read
//! 3. send the request with a Set_Report control transfer
//! 4. pump the event loop until the read resolves
//! 5. on timeout, repeat from step 2 with the identical request
//!
//! The read is always submitted before the request is written, so a reply
//! cannot arrive while nothing is listening for it.
//!
//! [`TransferEngine::begin`] and [`TransferEngine::poll`] expose the exchange
//! as a state machine; [`TransferEngine::transact`] is the blocking wrapper.

use crate::completion::{Outcome, ResultSlot};
use crate::error::{Error, Result};
use crate::transport::{HidTransport, is_transient, set_report};
use std::num::NonZeroU32;
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Default receive and control transfer timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default reply report size
pub const DEFAULT_REPORT_SIZE: usize = 42;

/// Default upper bound on a single event loop wait
pub const DEFAULT_EVENT_POLL: Duration = Duration::from_millis(100);

/// Event loop rounds spent waiting for a cancellation to be delivered
const CANCEL_DRAIN_ROUNDS: usize = 10;

/// How often a timed-out read is repeated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: Option<NonZeroU32>,
}

impl RetryPolicy {
    /// Keep repeating until the device answers
    pub const fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    /// Give up after `max_attempts` timed-out reads
    pub const fn bounded(max_attempts: NonZeroU32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    pub fn max_attempts(&self) -> Option<NonZeroU32> {
        self.max_attempts
    }

    /// Whether attempt number `attempt` (1-based) may be made
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max.get())
    }
}

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub timeout: Duration,
    pub report_size: usize,
    pub event_poll: Duration,
    pub retry: RetryPolicy,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            report_size: DEFAULT_REPORT_SIZE,
            event_poll: DEFAULT_EVENT_POLL,
            retry: RetryPolicy::unbounded(),
        }
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Armed {
        request: Vec<u8>,
        expected: usize,
        attempt: u32,
    },
}

/// Owns the inbound descriptor and result slot of one session
pub struct TransferEngine<T: HidTransport> {
    interface: u8,
    endpoint: u8,
    options: TransferOptions,
    transfer: Option<T::Transfer>,
    slot: Rc<ResultSlot>,
    state: State,
}

impl<T: HidTransport> TransferEngine<T> {
    /// Create an engine for `interface`, reading from `endpoint`
    pub fn new(interface: u8, endpoint: u8, options: TransferOptions) -> Self {
        Self {
            interface,
            endpoint,
            options,
            transfer: None,
            slot: Rc::new(ResultSlot::new(options.report_size)),
            state: State::Idle,
        }
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Whether a transaction is in progress
    pub fn is_armed(&self) -> bool {
        matches!(self.state, State::Armed { .. })
    }

    /// Whether the inbound descriptor has been allocated
    pub fn has_transfer(&self) -> bool {
        self.transfer.is_some()
    }

    /// Send `request` and wait for a reply of exactly `expected` bytes
    pub fn transact(&mut self, transport: &mut T, request: &[u8], expected: usize) -> Result<Vec<u8>> {
        self.begin(transport, request, expected)?;
        loop {
            if let Poll::Ready(result) = self.poll(transport) {
                return result;
            }
        }
    }

    /// Start a transaction: arm the read, then write the request.
    ///
    /// A failed control transfer is returned immediately and not retried.
    pub fn begin(&mut self, transport: &mut T, request: &[u8], expected: usize) -> Result<()> {
        if self.is_armed() {
            return Err(Error::Busy);
        }
        if expected > self.slot.capacity() {
            return Err(Error::ReplyTooLarge {
                requested: expected,
                capacity: self.slot.capacity(),
            });
        }

        self.arm(transport, request, expected)?;
        self.state = State::Armed {
            request: request.to_vec(),
            expected,
            attempt: 1,
        };
        Ok(())
    }

    /// Pump the event loop once and report where the transaction stands.
    ///
    /// Timed-out reads are re-armed here and reported as `Pending`.
    pub fn poll(&mut self, transport: &mut T) -> Poll<Result<Vec<u8>>> {
        if !self.is_armed() {
            return Poll::Ready(Err(Error::NotArmed));
        }

        if self.slot.outcome().is_pending() {
            match transport.handle_events(self.options.event_poll) {
                Ok(()) => {}
                Err(e) if is_transient(e) => {
                    trace!("Transient event loop error: {}", e);
                }
                Err(e) => {
                    error!("Error receiving data via interrupt transfer: {}", e);
                    self.cancel_in_flight(transport);
                    self.state = State::Idle;
                    return Poll::Ready(Err(Error::Dispatch(e)));
                }
            }
        }

        match self.slot.outcome() {
            Outcome::Pending => Poll::Pending,
            Outcome::TimedOut => self.retry(transport),
            Outcome::Received(len) => Poll::Ready(self.finish(len)),
            Outcome::Interrupted => self.fail(Error::Interrupted),
            Outcome::NoDevice => self.fail(Error::NoDevice),
            Outcome::IoError => self.fail(Error::Io),
        }
    }

    /// Cancel anything in flight and free the descriptor
    pub fn teardown(&mut self, transport: &mut T) {
        self.cancel_in_flight(transport);
        self.state = State::Idle;
        if self.transfer.take().is_some() {
            debug!("Freed inbound transfer for endpoint {:#04x}", self.endpoint);
        }
    }

    fn arm(&mut self, transport: &mut T, request: &[u8], expected: usize) -> Result<()> {
        if self.slot.is_in_flight() {
            // An earlier cancellation was never delivered; the descriptor
            // cannot be refilled until it is.
            self.cancel_in_flight(transport);
            if self.slot.is_in_flight() {
                warn!("Inbound transfer still owned by the event loop");
                return Err(Error::Busy);
            }
        }

        let transfer = match &mut self.transfer {
            Some(transfer) => transfer,
            empty => {
                let transfer = transport
                    .alloc_transfer(self.endpoint, self.slot.capacity())
                    .map_err(Error::Alloc)?;
                debug!("Allocated inbound transfer for endpoint {:#04x}", self.endpoint);
                empty.insert(transfer)
            }
        };

        self.slot.reset();
        if let Err(e) = transport.submit_transfer(transfer, &self.slot, expected, self.options.timeout) {
            warn!("Failed to submit interrupt transfer: {}", e);
            return Err(Error::Submit(e));
        }
        self.slot.mark_submitted();

        if let Err(e) = set_report(transport, self.interface, request, self.options.timeout) {
            warn!("Error transmitting data via control transfer: {}", e);
            self.cancel_in_flight(transport);
            return Err(Error::ControlTransfer(e));
        }

        Ok(())
    }

    fn retry(&mut self, transport: &mut T) -> Poll<Result<Vec<u8>>> {
        let State::Armed {
            request,
            expected,
            attempt,
        } = std::mem::replace(&mut self.state, State::Idle)
        else {
            return Poll::Ready(Err(Error::NotArmed));
        };

        let next = attempt.saturating_add(1);
        if !self.options.retry.allows(next) {
            warn!("No reply after {} attempts, giving up", attempt);
            return Poll::Ready(Err(Error::RetriesExhausted { attempts: attempt }));
        }

        debug!("Receive timed out, repeating request (attempt {})", next);
        if let Err(e) = self.arm(transport, &request, expected) {
            return Poll::Ready(Err(e));
        }
        self.state = State::Armed {
            request,
            expected,
            attempt: next,
        };
        Poll::Pending
    }

    fn finish(&mut self, len: usize) -> Result<Vec<u8>> {
        let State::Armed { expected, .. } = std::mem::replace(&mut self.state, State::Idle) else {
            return Err(Error::NotArmed);
        };

        if len != expected {
            warn!("Short read: {} bytes instead of {}", len, expected);
            return Err(Error::ShortReply {
                expected,
                actual: len,
            });
        }
        Ok(self.slot.received(len))
    }

    fn fail(&mut self, err: Error) -> Poll<Result<Vec<u8>>> {
        debug!("Transaction failed: {}", err);
        self.state = State::Idle;
        Poll::Ready(Err(err))
    }

    /// Cancel the armed read and wait for the cancellation to come back
    /// through the event loop, leaving the descriptor free for reuse.
    ///
    /// Gives up after [`CANCEL_DRAIN_ROUNDS`] or a fatal event loop error,
    /// with the slot still marked in flight; the next [`Self::arm`] tries again.
    fn cancel_in_flight(&mut self, transport: &mut T) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        if !self.slot.is_in_flight() {
            return;
        }

        if let Err(e) = transport.cancel_transfer(transfer) {
            debug!("Cancel of inbound transfer returned: {}", e);
        }

        for _ in 0..CANCEL_DRAIN_ROUNDS {
            if !self.slot.is_in_flight() {
                return;
            }
            match transport.handle_events(self.options.event_poll) {
                Ok(()) => {}
                Err(e) if is_transient(e) => {}
                Err(e) => {
                    warn!("Event loop failed while cancelling transfer: {}", e);
                    break;
                }
            }
        }

        if self.slot.is_in_flight() {
            warn!("Inbound transfer did not report cancellation");
        }
    }
}
