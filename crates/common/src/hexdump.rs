//! Packet trace formatting
//!
//! Requests and replies are dumped as rows of up to 16 two-digit hex bytes.
//! The first row carries a label, continuation rows are indented so the bytes
//! line up underneath it:
//!
//! ```text
//! ---Send 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f 10
//!         11 12
//! ```

use tracing::{Level, trace};

/// Bytes per trace row
pub const BYTES_PER_LINE: usize = 16;

/// Format `data` as hex rows of at most [`BYTES_PER_LINE`] bytes each.
///
/// Returns no rows for empty input.
pub fn hex_lines(data: &[u8]) -> Vec<String> {
    data.chunks(BYTES_PER_LINE)
        .map(|chunk| {
            chunk
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Emit a labelled packet dump at TRACE level.
///
/// Formatting is skipped entirely unless TRACE is enabled for this module.
pub fn trace_packet(label: &str, data: &[u8]) {
    if !tracing::enabled!(Level::TRACE) {
        return;
    }

    let prefix = format!("---{}", label);
    let indent = " ".repeat(prefix.len());
    let lines = hex_lines(data);

    if lines.is_empty() {
        trace!("{} (empty)", prefix);
        return;
    }

    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            trace!("{} {}", prefix, line);
        } else {
            trace!("{} {}", indent, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_lines_empty() {
        assert!(hex_lines(&[]).is_empty());
    }

    #[test]
    fn test_hex_lines_single_row() {
        assert_eq!(hex_lines(&[0x01, 0xab, 0x00]), vec!["01 ab 00".to_string()]);
    }

    #[test]
    fn test_hex_lines_wraps_at_sixteen() {
        let data: Vec<u8> = (0..18).collect();
        let lines = hex_lines(&data);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f"
        );
        assert_eq!(lines[1], "10 11");
    }

    #[test]
    fn test_hex_lines_exact_multiple() {
        let data = [0xffu8; 32];
        let lines = hex_lines(&data);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.split(' ').count() == BYTES_PER_LINE));
    }

    #[test]
    fn test_trace_packet_without_subscriber() {
        // No subscriber installed: must be a cheap no-op.
        trace_packet("Send", &[1, 2, 3]);
    }
}
