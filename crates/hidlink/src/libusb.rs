//! libusb-backed transport
//!
//! Device lookup, interface management and the control write go through
//! rusb's safe API. rusb has no asynchronous transfer API, so the reusable
//! interrupt-IN descriptor is driven through the libusb bindings it
//! re-exports as `rusb::ffi`.

use crate::completion::{self, ResultSlot, TransferStatus};
use crate::error::Error;
use crate::transport::HidTransport;
use rusb::ffi::{self, constants::*};
use rusb::{Context, DeviceHandle, Direction, TransferType, UsbContext};
use std::ffi::{c_int, c_uint, c_void};
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};

/// An opened device together with the context that owns it
pub struct LibusbTransport {
    handle: DeviceHandle<Context>,
    context: Context,
}

impl LibusbTransport {
    /// Create a libusb context and open the first device matching
    /// `vendor_id:product_id`.
    pub fn connect(vendor_id: u16, product_id: u16) -> crate::Result<Self> {
        let context = Context::new().map_err(|e| {
            warn!("libusb init failed: {}", e);
            Error::ContextInit(e)
        })?;

        let handle = context
            .open_device_with_vid_pid(vendor_id, product_id)
            .ok_or(Error::DeviceNotFound {
                vendor_id,
                product_id,
            })?;

        debug!("Found USB device {:04x}:{:04x}", vendor_id, product_id);

        Ok(Self { handle, context })
    }
}

impl HidTransport for LibusbTransport {
    type Transfer = LibusbTransfer;

    fn kernel_driver_active(&mut self, interface: u8) -> rusb::Result<bool> {
        self.handle.kernel_driver_active(interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.detach_kernel_driver(interface)
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.attach_kernel_driver(interface)
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.claim_interface(interface)
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.release_interface(interface)
    }

    fn interrupt_in_endpoint(&self, interface: u8) -> Option<u8> {
        let config = self.handle.device().active_config_descriptor().ok()?;

        config
            .interfaces()
            .filter(|iface| iface.number() == interface)
            .flat_map(|iface| iface.descriptors())
            .flat_map(|desc| desc.endpoint_descriptors().collect::<Vec<_>>())
            .find(|ep| ep.direction() == Direction::In && ep.transfer_type() == TransferType::Interrupt)
            .map(|ep| ep.address())
    }

    fn alloc_transfer(&mut self, endpoint: u8, capacity: usize) -> rusb::Result<LibusbTransfer> {
        // SAFETY: plain allocation; a null return is handled below.
        let raw = unsafe { ffi::libusb_alloc_transfer(0) };
        let raw = NonNull::new(raw).ok_or(rusb::Error::NoMem)?;

        Ok(LibusbTransfer {
            raw,
            endpoint,
            buffer: vec![0u8; capacity].into_boxed_slice(),
            slot: None,
        })
    }

    fn submit_transfer(
        &mut self,
        transfer: &mut LibusbTransfer,
        slot: &Rc<ResultSlot>,
        length: usize,
        timeout: Duration,
    ) -> rusb::Result<()> {
        if transfer.in_flight() || slot.is_in_flight() {
            return Err(rusb::Error::Busy);
        }
        if length > transfer.buffer.len() {
            return Err(rusb::Error::InvalidParam);
        }
        let length = c_int::try_from(length).map_err(|_| rusb::Error::InvalidParam)?;
        let timeout_ms = c_uint::try_from(timeout.as_millis()).unwrap_or(c_uint::MAX);

        // The descriptor keeps the slot alive for as long as libusb may call
        // back into it.
        transfer.slot = Some(Rc::clone(slot));
        let user_data = Rc::as_ptr(slot) as *mut c_void;

        // SAFETY: `raw` came from libusb_alloc_transfer and is not in flight,
        // checked above against the flag only the completion callback clears.
        // The buffer and slot are owned by `transfer` and outlive the
        // submission.
        let rc = unsafe {
            ffi::libusb_fill_interrupt_transfer(
                transfer.raw.as_ptr(),
                self.handle.as_raw(),
                transfer.endpoint,
                transfer.buffer.as_mut_ptr(),
                length,
                read_callback,
                user_data,
                timeout_ms,
            );
            ffi::libusb_submit_transfer(transfer.raw.as_ptr())
        };
        check(rc)
    }

    fn cancel_transfer(&mut self, transfer: &mut LibusbTransfer) -> rusb::Result<()> {
        // SAFETY: `raw` is a live descriptor owned by `transfer`.
        check(unsafe { ffi::libusb_cancel_transfer(transfer.raw.as_ptr()) })
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn handle_events(&mut self, timeout: Duration) -> rusb::Result<()> {
        self.context.handle_events(Some(timeout))
    }
}

/// Reusable interrupt-IN transfer descriptor
pub struct LibusbTransfer {
    raw: NonNull<ffi::libusb_transfer>,
    endpoint: u8,
    buffer: Box<[u8]>,
    slot: Option<Rc<ResultSlot>>,
}

impl LibusbTransfer {
    /// Submitted and not yet called back
    fn in_flight(&self) -> bool {
        self.slot.as_ref().is_some_and(|slot| slot.is_in_flight())
    }
}

impl Drop for LibusbTransfer {
    fn drop(&mut self) {
        if self.in_flight() {
            // libusb still references the descriptor and its buffer.
            warn!(
                "Inbound transfer on endpoint {:#04x} still in flight, leaking it",
                self.endpoint
            );
            std::mem::forget(std::mem::take(&mut self.buffer));
            std::mem::forget(self.slot.take());
            return;
        }

        // SAFETY: allocated by libusb_alloc_transfer and not in flight. The
        // FREE_BUFFER flag is never set, so our buffer is not touched.
        unsafe { ffi::libusb_free_transfer(self.raw.as_ptr()) };
    }
}

/// Completion callback registered with every submission
extern "system" fn read_callback(transfer: *mut ffi::libusb_transfer) {
    // SAFETY: libusb passes back the descriptor we submitted; `user_data` is
    // the slot pointer set in `submit_transfer`, kept alive by the owning
    // `LibusbTransfer`. The callback runs on the thread pumping events.
    unsafe {
        let transfer = &*transfer;
        let slot = &*(transfer.user_data as *const ResultSlot);

        let len = usize::try_from(transfer.actual_length).unwrap_or(0);
        let data: &[u8] = if len == 0 || transfer.buffer.is_null() {
            &[]
        } else {
            std::slice::from_raw_parts(transfer.buffer, len)
        };

        completion::complete(slot, map_transfer_status(transfer.status), data);
    }
}

/// Map a libusb transfer status code
fn map_transfer_status(status: c_int) -> TransferStatus {
    match status {
        LIBUSB_TRANSFER_COMPLETED => TransferStatus::Completed,
        LIBUSB_TRANSFER_TIMED_OUT => TransferStatus::TimedOut,
        LIBUSB_TRANSFER_CANCELLED => TransferStatus::Cancelled,
        LIBUSB_TRANSFER_STALL => TransferStatus::Stall,
        LIBUSB_TRANSFER_NO_DEVICE => TransferStatus::NoDevice,
        LIBUSB_TRANSFER_OVERFLOW => TransferStatus::Overflow,
        _ => TransferStatus::Error,
    }
}

fn check(rc: c_int) -> rusb::Result<()> {
    if rc == 0 { Ok(()) } else { Err(map_libusb_error(rc)) }
}

/// Map a negative libusb return code to rusb::Error
fn map_libusb_error(code: c_int) -> rusb::Error {
    match code {
        LIBUSB_ERROR_IO => rusb::Error::Io,
        LIBUSB_ERROR_INVALID_PARAM => rusb::Error::InvalidParam,
        LIBUSB_ERROR_ACCESS => rusb::Error::Access,
        LIBUSB_ERROR_NO_DEVICE => rusb::Error::NoDevice,
        LIBUSB_ERROR_NOT_FOUND => rusb::Error::NotFound,
        LIBUSB_ERROR_BUSY => rusb::Error::Busy,
        LIBUSB_ERROR_TIMEOUT => rusb::Error::Timeout,
        LIBUSB_ERROR_OVERFLOW => rusb::Error::Overflow,
        LIBUSB_ERROR_PIPE => rusb::Error::Pipe,
        LIBUSB_ERROR_INTERRUPTED => rusb::Error::Interrupted,
        LIBUSB_ERROR_NO_MEM => rusb::Error::NoMem,
        LIBUSB_ERROR_NOT_SUPPORTED => rusb::Error::NotSupported,
        _ => rusb::Error::Other,
    }
}
