/// Membership log guardrails.
///
/// These constants bound per-entry decoding work and event buffering so a
/// hostile peer cannot make the index allocate without limit.

/// Store type a group's membership log is registered under.
pub const MEMBER_STORE_TYPE: &str = "member_store";

/// Current claim envelope version.
pub const CLAIM_ENVELOPE_VERSION: u8 = 1;

/// Default max raw payload size per log entry.
pub const MAX_ENTRY_PAYLOAD_BYTES: usize = 16 * 1024; // 16 KB

/// Absolute ceiling for a configured payload limit.
pub const MAX_ENTRY_PAYLOAD_CEILING: usize = 1024 * 1024; // 1 MB

/// Smallest payload limit that still fits a well-formed claim.
pub const MIN_ENTRY_PAYLOAD_BYTES: usize = 1024;

/// Default capacity of the membership event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on the event channel capacity.
pub const MAX_EVENT_CHANNEL_CAPACITY: usize = 65_536;

/// Size classification of a raw entry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySizeStatus {
    Ok,
    Empty,
    TooLarge,
}

/// Check a raw payload length against the configured maximum.
pub fn check_entry_size(len: usize, max: usize) -> EntrySizeStatus {
    if len == 0 {
        EntrySizeStatus::Empty
    } else if len > max {
        EntrySizeStatus::TooLarge
    } else {
        EntrySizeStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_size_ok() {
        assert_eq!(check_entry_size(1, MAX_ENTRY_PAYLOAD_BYTES), EntrySizeStatus::Ok);
        assert_eq!(
            check_entry_size(MAX_ENTRY_PAYLOAD_BYTES, MAX_ENTRY_PAYLOAD_BYTES),
            EntrySizeStatus::Ok
        );
    }

    #[test]
    fn test_entry_size_empty() {
        assert_eq!(check_entry_size(0, MAX_ENTRY_PAYLOAD_BYTES), EntrySizeStatus::Empty);
    }

    #[test]
    fn test_entry_size_too_large() {
        assert_eq!(
            check_entry_size(MAX_ENTRY_PAYLOAD_BYTES + 1, MAX_ENTRY_PAYLOAD_BYTES),
            EntrySizeStatus::TooLarge
        );
    }

    #[test]
    fn test_limits_are_consistent() {
        assert!(MIN_ENTRY_PAYLOAD_BYTES <= MAX_ENTRY_PAYLOAD_BYTES);
        assert!(MAX_ENTRY_PAYLOAD_BYTES <= MAX_ENTRY_PAYLOAD_CEILING);
        assert!(DEFAULT_EVENT_CHANNEL_CAPACITY <= MAX_EVENT_CHANNEL_CAPACITY);
    }
}
