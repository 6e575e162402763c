//! Transport seam between the engine and a USB backend
//!
//! The engine and session only talk to the device through [`HidTransport`].
//! [`crate::libusb::LibusbTransport`] is the production implementation; tests
//! use the scripted transport in [`crate::test_utils`].

use crate::completion::ResultSlot;
use rusb::{Direction, Recipient, RequestType};
use std::rc::Rc;
use std::time::Duration;

/// HID class request: Set_Report
pub const HID_SET_REPORT: u8 = 0x09;

/// HID report type: Output
pub const HID_REPORT_TYPE_OUTPUT: u8 = 2;

/// Interrupt-IN endpoint used when the descriptor does not name one
pub const DEFAULT_INTERRUPT_IN_ENDPOINT: u8 = 0x81;

/// Operations the engine and session need from a USB backend
pub trait HidTransport {
    /// Reusable inbound transfer descriptor
    type Transfer;

    fn kernel_driver_active(&mut self, interface: u8) -> rusb::Result<bool>;

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;

    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;

    /// Interrupt-IN endpoint address of `interface`, if the descriptors say
    fn interrupt_in_endpoint(&self, interface: u8) -> Option<u8>;

    /// Allocate a descriptor bound to `endpoint` with room for `capacity` bytes
    fn alloc_transfer(&mut self, endpoint: u8, capacity: usize) -> rusb::Result<Self::Transfer>;

    /// Arm `transfer` for a read of `length` bytes and submit it without
    /// blocking. On resolution the transport calls
    /// [`crate::completion::complete`] with `slot` from inside
    /// [`HidTransport::handle_events`].
    fn submit_transfer(
        &mut self,
        transfer: &mut Self::Transfer,
        slot: &Rc<ResultSlot>,
        length: usize,
        timeout: Duration,
    ) -> rusb::Result<()>;

    /// Request cancellation. The cancelled status is still delivered through
    /// the event loop.
    fn cancel_transfer(&mut self, transfer: &mut Self::Transfer) -> rusb::Result<()>;

    /// Synchronous host-to-device control transfer
    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    /// Dispatch pending events, waiting at most `timeout`
    fn handle_events(&mut self, timeout: Duration) -> rusb::Result<()>;
}

/// `bmRequestType` for Set_Report: class request, host to device, interface
pub fn set_report_request_type() -> u8 {
    rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface)
}

/// `wValue` for Set_Report: report type in the high byte, report ID below
pub fn set_report_value(report_id: u8) -> u16 {
    (u16::from(HID_REPORT_TYPE_OUTPUT) << 8) | u16::from(report_id)
}

/// Deliver `data` as an output report (report ID 0) to `interface`
pub fn set_report<T: HidTransport + ?Sized>(
    transport: &mut T,
    interface: u8,
    data: &[u8],
    timeout: Duration,
) -> rusb::Result<usize> {
    transport.write_control(
        set_report_request_type(),
        HID_SET_REPORT,
        set_report_value(0),
        u16::from(interface),
        data,
        timeout,
    )
}

/// Event loop errors that do not end a transaction
pub fn is_transient(err: rusb::Error) -> bool {
    matches!(
        err,
        rusb::Error::Busy | rusb::Error::Timeout | rusb::Error::Overflow | rusb::Error::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_report_setup_values() {
        assert_eq!(set_report_request_type(), 0x21);
        assert_eq!(set_report_value(0), 0x0200);
        assert_eq!(set_report_value(3), 0x0203);
    }

    #[test]
    fn test_transient_dispatch_errors() {
        assert!(is_transient(rusb::Error::Busy));
        assert!(is_transient(rusb::Error::Timeout));
        assert!(is_transient(rusb::Error::Overflow));
        assert!(is_transient(rusb::Error::Interrupted));

        assert!(!is_transient(rusb::Error::Io));
        assert!(!is_transient(rusb::Error::NoDevice));
        assert!(!is_transient(rusb::Error::Pipe));
        assert!(!is_transient(rusb::Error::Other));
    }
}
