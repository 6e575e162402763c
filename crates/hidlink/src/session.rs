//! HID session lifecycle
//!
//! A [`Session`] owns the transport (context and device handle), the claimed
//! interface and the transfer engine. It is created by [`Session::open`] or
//! [`Session::attach`] and released by [`Session::close`] or drop.

use crate::config::LinkConfig;
use crate::engine::TransferEngine;
use crate::error::{Error, Result};
use crate::libusb::LibusbTransport;
use crate::transport::{DEFAULT_INTERRUPT_IN_ENDPOINT, HidTransport};
use common::trace_packet;
use std::fmt;
use std::task::Poll;
use tracing::{debug, error, info, warn};

/// Claimed HID interface with its transfer engine
pub struct Session<T: HidTransport = LibusbTransport> {
    live: Option<Live<T>>,
}

struct Live<T: HidTransport> {
    transport: T,
    engine: TransferEngine<T>,
    interface: u8,
    kernel_driver_detached: bool,
}

impl Session<LibusbTransport> {
    /// Find the configured device and claim its HID interface.
    ///
    /// A missing device is reported as [`Error::DeviceNotFound`]; context and
    /// claim failures are fatal errors.
    pub fn open(config: &LinkConfig) -> Result<Self> {
        let transport =
            LibusbTransport::connect(config.device.vendor_id, config.device.product_id)?;
        Self::attach(transport, config)
    }
}

impl<T: HidTransport> Session<T> {
    /// Claim the configured interface on an already opened transport.
    ///
    /// An active kernel driver is detached first and reattached on close.
    pub fn attach(mut transport: T, config: &LinkConfig) -> Result<Self> {
        let interface = config.device.interface;

        let kernel_driver_detached = match transport.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                match transport.detach_kernel_driver(interface) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface, e
                        );
                        false
                    }
                }
            }
            Ok(false) => false,
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
                false
            }
        };

        if let Err(e) = transport.claim_interface(interface) {
            error!("Failed to claim USB interface {}: {}", interface, e);
            if kernel_driver_detached {
                if let Err(e) = transport.attach_kernel_driver(interface) {
                    debug!("Could not reattach kernel driver: {}", e);
                }
            }
            return Err(Error::ClaimInterface {
                interface,
                source: e,
            });
        }

        let endpoint = transport.interrupt_in_endpoint(interface).unwrap_or_else(|| {
            debug!(
                "No interrupt-IN endpoint described for interface {}, using {:#04x}",
                interface, DEFAULT_INTERRUPT_IN_ENDPOINT
            );
            DEFAULT_INTERRUPT_IN_ENDPOINT
        });

        info!(
            "Claimed HID interface {} (interrupt-IN {:#04x})",
            interface, endpoint
        );

        Ok(Self {
            live: Some(Live {
                transport,
                engine: TransferEngine::new(interface, endpoint, config.transfer.options()),
                interface,
                kernel_driver_detached,
            }),
        })
    }

    pub fn is_open(&self) -> bool {
        self.live.is_some()
    }

    /// Interrupt-IN endpoint replies are read from
    pub fn endpoint(&self) -> Option<u8> {
        self.live.as_ref().map(|live| live.engine.endpoint())
    }

    /// Send `request` and return a reply of exactly `expected_reply_len` bytes.
    ///
    /// Timed-out reads are repeated according to the configured retry policy.
    pub fn transact(&mut self, request: &[u8], expected_reply_len: usize) -> Result<Vec<u8>> {
        let live = self.live.as_mut().ok_or(Error::Closed)?;
        live.engine
            .transact(&mut live.transport, request, expected_reply_len)
    }

    /// Send `request` and fill `reply` completely from the device's answer.
    ///
    /// Both packets are traced at TRACE level. On error `reply` is untouched.
    pub fn send_recv(&mut self, request: &[u8], reply: &mut [u8]) -> Result<()> {
        trace_packet("Send", request);

        let data = self.transact(request, reply.len())?;
        if data.len() != reply.len() {
            return Err(Error::ShortReply {
                expected: reply.len(),
                actual: data.len(),
            });
        }
        reply.copy_from_slice(&data);

        trace_packet("Recv", reply);
        Ok(())
    }

    /// Arm the read and write `request` without waiting for the reply
    pub fn begin(&mut self, request: &[u8], expected_reply_len: usize) -> Result<()> {
        let live = self.live.as_mut().ok_or(Error::Closed)?;
        live.engine
            .begin(&mut live.transport, request, expected_reply_len)
    }

    /// Drive a transaction started with [`Session::begin`] one step
    pub fn poll(&mut self) -> Poll<Result<Vec<u8>>> {
        match self.live.as_mut() {
            Some(live) => live.engine.poll(&mut live.transport),
            None => Poll::Ready(Err(Error::Closed)),
        }
    }

    /// Release the interface and the device. Safe to call more than once.
    pub fn close(&mut self) {
        let Some(mut live) = self.live.take() else {
            return;
        };

        live.engine.teardown(&mut live.transport);

        if let Err(e) = live.transport.release_interface(live.interface) {
            warn!("Failed to release interface {}: {}", live.interface, e);
        }

        if live.kernel_driver_detached {
            match live.transport.attach_kernel_driver(live.interface) {
                Ok(()) => debug!("Reattached kernel driver to interface {}", live.interface),
                Err(e) => debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    live.interface, e
                ),
            }
        }

        debug!("Closed HID session on interface {}", live.interface);
    }
}

impl<T: HidTransport> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: HidTransport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.live {
            Some(live) => f
                .debug_struct("Session")
                .field("interface", &live.interface)
                .field("endpoint", &live.engine.endpoint())
                .field("armed", &live.engine.is_armed())
                .finish(),
            None => f.write_str("Session(closed)"),
        }
    }
}
