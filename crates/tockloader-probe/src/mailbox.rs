//! RAM mailbox layout
//!
//! All fields are little-endian 32-bit words:
//!
//! | Offset | Field      | Written by |
//! |--------|------------|------------|
//! | 0x00   | magic      | target     |
//! | 0x04   | capacity   | target     |
//! | 0x08   | req_seq    | host       |
//! | 0x0C   | req_ack    | target     |
//! | 0x10   | req_len    | host       |
//! | 0x14   | rsp_seq    | target     |
//! | 0x18   | rsp_ack    | host       |
//! | 0x1C   | rsp_len    | target     |
//!
//! The request buffer follows the header and the response buffer follows the
//! request buffer, each `capacity` bytes long. A side publishes data by
//! filling its buffer and length and then bumping its sequence number; the
//! other side copies the data out and echoes the sequence number into the
//! matching ack word.

/// "TKBL" read as a little-endian word
pub const MAILBOX_MAGIC: u32 = 0x4C42_4B54;

pub const MAGIC: u32 = 0x00;
pub const CAPACITY: u32 = 0x04;
pub const REQ_SEQ: u32 = 0x08;
pub const REQ_ACK: u32 = 0x0C;
pub const REQ_LEN: u32 = 0x10;
pub const RSP_SEQ: u32 = 0x14;
pub const RSP_ACK: u32 = 0x18;
pub const RSP_LEN: u32 = 0x1C;

pub const HEADER_LEN: u32 = 0x20;

/// Largest buffer capacity accepted from a target
pub const MAX_CAPACITY: u32 = 0x1_0000;

/// Where a mailbox lives in target memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxLayout {
    base: u32,
    capacity: u32,
}

impl MailboxLayout {
    /// `None` if the capacity is unusable or the mailbox wraps the address space
    pub fn new(base: u32, capacity: u32) -> Option<Self> {
        if base % 4 != 0 || capacity == 0 || capacity % 4 != 0 || capacity > MAX_CAPACITY {
            return None;
        }
        base.checked_add(HEADER_LEN + 2 * capacity)?;
        Some(Self { base, capacity })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Address of a header word
    pub fn field(&self, offset: u32) -> u32 {
        self.base + offset
    }

    pub fn request_buffer(&self) -> u32 {
        self.base + HEADER_LEN
    }

    pub fn response_buffer(&self) -> u32 {
        self.base + HEADER_LEN + self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_addresses() {
        let layout = MailboxLayout::new(0x2000_0000, 256).unwrap();
        assert_eq!(layout.field(REQ_SEQ), 0x2000_0008);
        assert_eq!(layout.request_buffer(), 0x2000_0020);
        assert_eq!(layout.response_buffer(), 0x2000_0120);
    }

    #[test]
    fn test_layout_rejects_bad_geometry() {
        assert!(MailboxLayout::new(0x2000_0002, 256).is_none());
        assert!(MailboxLayout::new(0x2000_0000, 0).is_none());
        assert!(MailboxLayout::new(0x2000_0000, 250).is_none());
        assert!(MailboxLayout::new(0x2000_0000, MAX_CAPACITY + 4).is_none());
        assert!(MailboxLayout::new(0xFFFF_FF00, 256).is_none());
    }

    #[test]
    fn test_magic_spells_tkbl() {
        assert_eq!(&MAILBOX_MAGIC.to_le_bytes(), b"TKBL");
    }
}
