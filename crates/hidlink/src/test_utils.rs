//! Test utilities for hidlink
//!
//! [`MockTransport`] is a scripted, in-memory [`HidTransport`]. Replies are
//! queued up front and handed to the armed read from inside
//! `handle_events`, the same place libusb would run the completion callback.
//! Clones share state, so a test can keep one clone for inspection after the
//! other has been moved into a session.
//!
//! # Example
//!
//! ```
//! use hidlink::test_utils::{MockTransport, Reply};
//! use hidlink::{LinkConfig, Session};
//!
//! let mock = MockTransport::new();
//! mock.push_reply(Reply::Data(vec![0x55; 4]));
//!
//! let mut session = Session::attach(mock.clone(), &LinkConfig::default()).unwrap();
//! assert_eq!(session.transact(&[0x01], 4).unwrap(), vec![0x55; 4]);
//! assert_eq!(mock.requests(), vec![vec![0x01]]);
//! ```

use crate::completion::{self, ResultSlot, TransferStatus};
use crate::transport::HidTransport;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// How the mock resolves an armed read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Completed with this payload (overflows if longer than the armed length)
    Data(Vec<u8>),
    TimedOut,
    Cancelled,
    NoDevice,
    Stall,
    Error,
}

/// One recorded control transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSetup {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct ArmedRead {
    slot: Rc<ResultSlot>,
    length: usize,
    request_written: bool,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct MockState {
    kernel_driver_active: bool,
    claim_error: Option<rusb::Error>,
    endpoint: Option<u8>,
    replies: VecDeque<Reply>,
    fallback: Option<Reply>,
    control_errors: VecDeque<rusb::Error>,
    submit_errors: VecDeque<rusb::Error>,
    dispatch_errors: VecDeque<rusb::Error>,
    resolve_during_control: bool,
    armed: Option<ArmedRead>,
    controls: Vec<ControlSetup>,
    submitted_endpoints: Vec<u8>,
    claimed: bool,
    allocs: usize,
    frees: usize,
    leaks: usize,
    submits: usize,
    cancels: usize,
    claims: usize,
    releases: usize,
    detaches: usize,
    reattaches: usize,
    event_rounds: usize,
}

/// Scripted transport
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

/// Descriptor handed out by [`MockTransport`]; counts its own release
///
/// Dropping it while a read is still armed counts as a leak, not a free.
#[derive(Debug)]
pub struct MockTransfer {
    endpoint: u8,
    capacity: usize,
    state: Rc<RefCell<MockState>>,
}

impl Drop for MockTransfer {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        if state.armed.is_some() {
            state.leaks += 1;
        } else {
            state.frees += 1;
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a kernel driver bound to the interface
    pub fn with_kernel_driver(self) -> Self {
        self.state.borrow_mut().kernel_driver_active = true;
        self
    }

    /// Fail every interface claim with `err`
    pub fn with_claim_error(self, err: rusb::Error) -> Self {
        self.state.borrow_mut().claim_error = Some(err);
        self
    }

    /// Advertise `endpoint` as the interrupt-IN endpoint
    pub fn with_endpoint(self, endpoint: u8) -> Self {
        self.state.borrow_mut().endpoint = Some(endpoint);
        self
    }

    /// Queue the resolution of the next armed read
    pub fn push_reply(&self, reply: Reply) {
        self.state.borrow_mut().replies.push_back(reply);
    }

    /// Resolve every read with `reply` once the queue is empty
    pub fn always(&self, reply: Reply) {
        self.state.borrow_mut().fallback = Some(reply);
    }

    pub fn fail_next_control(&self, err: rusb::Error) {
        self.state.borrow_mut().control_errors.push_back(err);
    }

    pub fn fail_next_submit(&self, err: rusb::Error) {
        self.state.borrow_mut().submit_errors.push_back(err);
    }

    pub fn fail_next_dispatch(&self, err: rusb::Error) {
        self.state.borrow_mut().dispatch_errors.push_back(err);
    }

    /// Resolve the armed read inside `write_control`, as libusb does when
    /// it runs pending callbacks during a synchronous transfer
    pub fn resolve_during_control(&self) {
        self.state.borrow_mut().resolve_during_control = true;
    }

    /// Payloads of every control transfer, in order
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .controls
            .iter()
            .map(|c| c.data.clone())
            .collect()
    }

    pub fn controls(&self) -> Vec<ControlSetup> {
        self.state.borrow().controls.clone()
    }

    pub fn submitted_endpoints(&self) -> Vec<u8> {
        self.state.borrow().submitted_endpoints.clone()
    }

    pub fn is_armed(&self) -> bool {
        self.state.borrow().armed.is_some()
    }

    pub fn is_claimed(&self) -> bool {
        self.state.borrow().claimed
    }

    pub fn allocs(&self) -> usize {
        self.state.borrow().allocs
    }

    pub fn frees(&self) -> usize {
        self.state.borrow().frees
    }

    /// Descriptors dropped while still armed
    pub fn leaks(&self) -> usize {
        self.state.borrow().leaks
    }

    pub fn submits(&self) -> usize {
        self.state.borrow().submits
    }

    pub fn cancels(&self) -> usize {
        self.state.borrow().cancels
    }

    pub fn claims(&self) -> usize {
        self.state.borrow().claims
    }

    pub fn releases(&self) -> usize {
        self.state.borrow().releases
    }

    pub fn detaches(&self) -> usize {
        self.state.borrow().detaches
    }

    pub fn reattaches(&self) -> usize {
        self.state.borrow().reattaches
    }

    pub fn event_rounds(&self) -> usize {
        self.state.borrow().event_rounds
    }
}

impl HidTransport for MockTransport {
    type Transfer = MockTransfer;

    fn kernel_driver_active(&mut self, _interface: u8) -> rusb::Result<bool> {
        Ok(self.state.borrow().kernel_driver_active)
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        state.kernel_driver_active = false;
        state.detaches += 1;
        Ok(())
    }

    fn attach_kernel_driver(&mut self, _interface: u8) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        state.kernel_driver_active = true;
        state.reattaches += 1;
        Ok(())
    }

    fn claim_interface(&mut self, _interface: u8) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.claim_error {
            return Err(err);
        }
        if state.claimed {
            return Err(rusb::Error::Busy);
        }
        state.claimed = true;
        state.claims += 1;
        Ok(())
    }

    fn release_interface(&mut self, _interface: u8) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.claimed {
            return Err(rusb::Error::NotFound);
        }
        state.claimed = false;
        state.releases += 1;
        Ok(())
    }

    fn interrupt_in_endpoint(&self, _interface: u8) -> Option<u8> {
        self.state.borrow().endpoint
    }

    fn alloc_transfer(&mut self, endpoint: u8, capacity: usize) -> rusb::Result<MockTransfer> {
        self.state.borrow_mut().allocs += 1;
        Ok(MockTransfer {
            endpoint,
            capacity,
            state: Rc::clone(&self.state),
        })
    }

    fn submit_transfer(
        &mut self,
        transfer: &mut MockTransfer,
        slot: &Rc<ResultSlot>,
        length: usize,
        _timeout: Duration,
    ) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.submit_errors.pop_front() {
            return Err(err);
        }
        if state.armed.is_some() {
            return Err(rusb::Error::Busy);
        }
        if length > transfer.capacity {
            return Err(rusb::Error::InvalidParam);
        }

        state.submits += 1;
        state.submitted_endpoints.push(transfer.endpoint);
        state.armed = Some(ArmedRead {
            slot: Rc::clone(slot),
            length,
            request_written: false,
            cancelled: false,
        });
        Ok(())
    }

    fn cancel_transfer(&mut self, _transfer: &mut MockTransfer) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        match state.armed.as_mut() {
            Some(armed) => {
                armed.cancelled = true;
                state.cancels += 1;
                Ok(())
            }
            None => Err(rusb::Error::NotFound),
        }
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        let mut state = self.state.borrow_mut();
        state.controls.push(ControlSetup {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
        });
        if let Some(err) = state.control_errors.pop_front() {
            return Err(err);
        }
        if let Some(armed) = state.armed.as_mut() {
            armed.request_written = true;
        }
        let resolve = state.resolve_during_control;
        drop(state);

        if resolve {
            self.resolve_armed();
        }
        Ok(data.len())
    }

    fn handle_events(&mut self, _timeout: Duration) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        state.event_rounds += 1;
        if let Some(err) = state.dispatch_errors.pop_front() {
            return Err(err);
        }
        drop(state);

        self.resolve_armed();
        Ok(())
    }
}

impl MockTransport {
    /// Run the completion for the armed read, if it has something to report
    fn resolve_armed(&self) {
        let mut state = self.state.borrow_mut();
        let Some(armed) = state.armed.take() else {
            return;
        };

        let reply = if armed.cancelled {
            Reply::Cancelled
        } else if !armed.request_written {
            // Nothing to answer yet.
            state.armed = Some(armed);
            return;
        } else {
            let queued = state.replies.pop_front();
            match queued.or_else(|| state.fallback.clone()) {
                Some(reply) => reply,
                None => {
                    state.armed = Some(armed);
                    return;
                }
            }
        };
        drop(state);

        let (status, data) = match reply {
            Reply::Data(data) if data.len() > armed.length => (TransferStatus::Overflow, Vec::new()),
            Reply::Data(data) => (TransferStatus::Completed, data),
            Reply::TimedOut => (TransferStatus::TimedOut, Vec::new()),
            Reply::Cancelled => (TransferStatus::Cancelled, Vec::new()),
            Reply::NoDevice => (TransferStatus::NoDevice, Vec::new()),
            Reply::Stall => (TransferStatus::Stall, Vec::new()),
            Reply::Error => (TransferStatus::Error, Vec::new()),
        };
        completion::complete(&armed.slot, status, &data);
    }
}
