//! Half-duplex request/response transactions over a USB HID endpoint
//!
//! A [`Session`] claims the HID interface of an attached device and exchanges
//! command and reply packets with it. Each exchange arms an asynchronous
//! interrupt-IN read, delivers the request with a synchronous HID Set_Report
//! control transfer, then pumps the libusb event loop until the read resolves.
//! Reads that time out are repeated with the identical request according to a
//! [`RetryPolicy`].
//!
//! ```no_run
//! use hidlink::{LinkConfig, Session};
//!
//! # fn main() -> hidlink::Result<()> {
//! let config = LinkConfig::default();
//! let mut session = Session::open(&config)?;
//! let mut reply = [0u8; 8];
//! session.send_recv(&[0x01, 0x02], &mut reply)?;
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod libusb;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use completion::{Outcome, ResultSlot, TransferStatus};
pub use config::LinkConfig;
pub use engine::{RetryPolicy, TransferEngine, TransferOptions};
pub use error::{Error, Result};
pub use libusb::LibusbTransport;
pub use session::Session;
pub use transport::HidTransport;
