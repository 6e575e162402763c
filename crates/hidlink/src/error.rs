//! Transaction error types

use thiserror::Error;

/// Errors surfaced by sessions and transactions
#[derive(Debug, Error)]
pub enum Error {
    /// libusb context could not be created
    #[error("libusb init failed: {0}")]
    ContextInit(#[source] rusb::Error),

    /// No attached device matches the vendor/product pair
    #[error("Cannot find USB device {vendor_id:04x}:{product_id:04x}")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Failed to claim USB interface {interface}: {source}")]
    ClaimInterface {
        interface: u8,
        #[source]
        source: rusb::Error,
    },

    #[error("Failed to allocate transfer descriptor: {0}")]
    Alloc(#[source] rusb::Error),

    #[error("Failed to submit interrupt transfer: {0}")]
    Submit(#[source] rusb::Error),

    /// The Set_Report control transfer carrying the request failed
    #[error("Error transmitting data via control transfer: {0}")]
    ControlTransfer(#[source] rusb::Error),

    /// The event loop failed with a non-transient error
    #[error("Error receiving data via interrupt transfer: {0}")]
    Dispatch(#[source] rusb::Error),

    #[error("Interrupt transfer cancelled")]
    Interrupted,

    #[error("Device disconnected")]
    NoDevice,

    #[error("Interrupt transfer failed")]
    Io,

    /// Every permitted attempt timed out
    #[error("No reply after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The device answered with a different number of bytes than expected
    #[error("Short read: {actual} bytes instead of {expected}")]
    ShortReply { expected: usize, actual: usize },

    #[error("Reply length {requested} exceeds report size {capacity}")]
    ReplyTooLarge { requested: usize, capacity: usize },

    /// A transaction is armed, or an abandoned read has not been called back
    #[error("A transaction is already in progress")]
    Busy,

    #[error("No transaction in progress")]
    NotArmed,

    #[error("Session is closed")]
    Closed,
}

impl Error {
    /// Whether the session can no longer be used after this error.
    ///
    /// A missing device is not fatal: nothing was opened, the caller may try
    /// again later. Per-transaction failures leave the session usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ContextInit(_)
                | Error::ClaimInterface { .. }
                | Error::Alloc(_)
                | Error::Submit(_)
                | Error::Dispatch(_)
                | Error::NoDevice
        )
    }
}

/// Type alias for transaction results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_not_found_display() {
        let err = Error::DeviceNotFound {
            vendor_id: 0x0483,
            product_id: 0xdf11,
        };
        assert_eq!(err.to_string(), "Cannot find USB device 0483:df11");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_short_reply_display() {
        let err = Error::ShortReply {
            expected: 42,
            actual: 10,
        };
        assert_eq!(err.to_string(), "Short read: 10 bytes instead of 42");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::ContextInit(rusb::Error::Other).is_fatal());
        assert!(
            Error::ClaimInterface {
                interface: 0,
                source: rusb::Error::Busy
            }
            .is_fatal()
        );
        assert!(Error::Dispatch(rusb::Error::Io).is_fatal());
        assert!(!Error::ControlTransfer(rusb::Error::Pipe).is_fatal());
        assert!(!Error::RetriesExhausted { attempts: 3 }.is_fatal());
        assert!(!Error::Interrupted.is_fatal());
    }
}
