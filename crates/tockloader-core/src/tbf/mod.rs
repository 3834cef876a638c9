//! Tock Binary Format (TBF) headers
//!
//! Every app in flash starts with a TBF header: a 16-byte base header
//! followed by type-length-value entries, all little-endian.
//!
//! ```text
//! 0   version: u16      (2)
//! 2   header_size: u16  (base + entries, multiple of 4)
//! 4   total_size: u32   (header + binary + footers)
//! 8   flags: u32
//! 12  checksum: u32     (XOR of all header words, this one taken as 0)
//! 16  { tag: u16, length: u16, value[length], pad to 4 }*
//! ```

pub mod entry;
pub mod header;

pub use entry::{
    DriverPermission, FixedAddresses, KernelVersion, MainEntry, ProgramEntry, StoragePermissions,
    TbfEntry, WriteableFlashRegion,
};
pub use header::{TbfFlags, TbfHeader, TBF_VERSION};

use crate::error::HeaderError;
use entry::{le_u16, le_u32};

/// Size of the fixed part of the header
pub const BASE_HEADER_LEN: usize = 16;

/// Bytes needed by [`parse_lengths`]
pub const LENGTHS_LEN: usize = 8;

const CHECKSUM_WORD: usize = 3;

/// XOR of the header's 32-bit words, skipping the checksum word
///
/// A trailing partial word is zero-extended.
pub fn compute_checksum(header: &[u8]) -> u32 {
    header
        .chunks(4)
        .enumerate()
        .filter(|(index, _)| *index != CHECKSUM_WORD)
        .fold(0, |acc, (_, word)| {
            let mut bytes = [0u8; 4];
            bytes[..word.len()].copy_from_slice(word);
            acc ^ u32::from_le_bytes(bytes)
        })
}

/// Read `(version, header_size, total_size)` from the first 8 bytes
///
/// Erased (`0xFF`) or zeroed flash fails with [`HeaderError::BadMagic`], which
/// is how callers recognise the end of the app list.
pub fn parse_lengths(bytes: &[u8]) -> Result<(u16, u16, u32), HeaderError> {
    if bytes.len() < LENGTHS_LEN {
        return Err(HeaderError::Truncated {
            needed: LENGTHS_LEN,
            available: bytes.len(),
        });
    }

    let version = le_u16(bytes, 0);
    let header_size = le_u16(bytes, 2);
    let total_size = le_u32(bytes, 4);

    match version {
        0x0000 | 0xFFFF => return Err(HeaderError::BadMagic(version)),
        TBF_VERSION => {}
        other => return Err(HeaderError::UnsupportedVersion(other)),
    }
    if (header_size as usize) < BASE_HEADER_LEN || header_size % 4 != 0 {
        return Err(HeaderError::BadHeaderSize(header_size));
    }
    if total_size < u32::from(header_size) {
        return Err(HeaderError::BadTotalSize {
            header_size,
            total_size,
        });
    }

    Ok((version, header_size, total_size))
}

/// Parse a header from the start of `bytes`
///
/// `bytes` may be the whole image; only the first `header_size` bytes are
/// looked at.
pub fn parse(bytes: &[u8]) -> Result<TbfHeader, HeaderError> {
    let (version, header_size, total_size) = parse_lengths(bytes)?;
    let header_size = header_size as usize;
    if bytes.len() < header_size {
        return Err(HeaderError::Truncated {
            needed: header_size,
            available: bytes.len(),
        });
    }
    let header = &bytes[..header_size];

    let stored = le_u32(header, CHECKSUM_WORD * 4);
    let computed = compute_checksum(header);
    if stored != computed {
        return Err(HeaderError::ChecksumMismatch { stored, computed });
    }

    let flags = TbfFlags::from_bits_retain(le_u32(header, 8));

    let mut entries = Vec::new();
    let mut offset = BASE_HEADER_LEN;
    // header_size and every padded entry are multiples of 4, so at least a
    // full TLV header is always left here
    while offset < header_size {
        let tag = le_u16(header, offset);
        let length = le_u16(header, offset + 2);
        let remaining = header_size - offset - 4;
        let padded = (length as usize).next_multiple_of(4);
        if padded > remaining {
            return Err(HeaderError::TruncatedEntry {
                tag,
                length,
                remaining,
            });
        }
        let value = &header[offset + 4..offset + 4 + length as usize];
        entries.push(TbfEntry::decode(tag, value)?);
        offset += 4 + padded;
    }

    Ok(TbfHeader::from_parts(version, total_size, flags, entries))
}

/// Serialize a header, computing its size and checksum
pub fn serialize(header: &TbfHeader) -> Vec<u8> {
    let header_size = header.header_size();
    let mut out = Vec::with_capacity(header_size as usize);
    out.extend_from_slice(&header.version().to_le_bytes());
    out.extend_from_slice(&header_size.to_le_bytes());
    out.extend_from_slice(&header.total_size().to_le_bytes());
    out.extend_from_slice(&header.flags().bits().to_le_bytes());
    out.extend_from_slice(&[0; 4]);

    for entry in header.entries() {
        let value = entry.encode_value();
        out.extend_from_slice(&entry.tag().to_le_bytes());
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        out.extend_from_slice(&value);
        out.resize(out.len().next_multiple_of(4), 0);
    }

    let checksum = compute_checksum(&out);
    out[CHECKSUM_WORD * 4..CHECKSUM_WORD * 4 + 4].copy_from_slice(&checksum.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> TbfHeader {
        TbfHeader::new(0x1000)
            .with_entry(TbfEntry::Main(MainEntry {
                init_fn_offset: 0x41,
                protected_trailer_size: 0,
                minimum_ram_size: 0x1200,
            }))
            .unwrap()
            .with_entry(TbfEntry::PackageName("c_hello".into()))
            .unwrap()
            .with_entry(TbfEntry::WriteableFlashRegions(vec![WriteableFlashRegion {
                offset: 0x800,
                size: 0x200,
            }]))
            .unwrap()
            .with_entry(TbfEntry::KernelVersion(KernelVersion { major: 2, minor: 1 }))
            .unwrap()
            .with_entry(TbfEntry::StoragePermissions(StoragePermissions {
                write_id: 5,
                read_ids: vec![5, 6],
                modify_ids: vec![],
            }))
            .unwrap()
            .with_entry(TbfEntry::Unknown {
                tag: 128,
                data: vec![0xAA, 0xBB, 0xCC],
            })
            .unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let header = sample_header();
        let bytes = serialize(&header);
        assert_eq!(bytes.len(), header.header_size() as usize);
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(parse(&bytes), Ok(header));
    }

    #[test]
    fn test_roundtrip_with_trailing_binary() {
        let header = sample_header();
        let mut image = serialize(&header);
        image.resize(header.total_size() as usize, 0x5A);
        assert_eq!(parse(&image), Ok(header));
    }

    #[test]
    fn test_known_layout() {
        let header = TbfHeader::new(0x400)
            .with_entry(TbfEntry::Main(MainEntry {
                init_fn_offset: 0,
                protected_trailer_size: 0,
                minimum_ram_size: 0,
            }))
            .unwrap();
        let bytes = serialize(&header);
        assert_eq!(&bytes[0..2], &[2, 0]);
        assert_eq!(&bytes[2..4], &[32, 0]);
        assert_eq!(&bytes[4..8], &[0x00, 0x04, 0, 0]);
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        assert_eq!(&bytes[16..20], &[1, 0, 12, 0]);
        // 0x00200002 ^ 0x400 ^ 1 ^ 0x000C0001
        assert_eq!(&bytes[12..16], &0x002C_0402u32.to_le_bytes());
    }

    #[test]
    fn test_every_bit_flip_is_rejected() {
        let header = sample_header();
        let bytes = serialize(&header);
        for index in 0..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[index] ^= 1 << bit;
                assert!(
                    parse(&corrupted).is_err(),
                    "flip at byte {} bit {} went unnoticed",
                    index,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = serialize(&sample_header());
        bytes[20] ^= 0x01;
        assert!(matches!(
            parse(&bytes),
            Err(HeaderError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_erased_and_zeroed_flash() {
        assert_eq!(parse(&[0xFF; 64]), Err(HeaderError::BadMagic(0xFFFF)));
        assert_eq!(parse(&[0x00; 64]), Err(HeaderError::BadMagic(0x0000)));
        assert_eq!(
            parse_lengths(&[0xFF; 8]),
            Err(HeaderError::BadMagic(0xFFFF))
        );
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = serialize(&sample_header());
        bytes[0] = 1;
        assert_eq!(parse(&bytes), Err(HeaderError::UnsupportedVersion(1)));
    }

    #[test]
    fn test_truncated_buffers() {
        let bytes = serialize(&sample_header());
        assert_eq!(
            parse(&bytes[..4]),
            Err(HeaderError::Truncated {
                needed: 8,
                available: 4
            })
        );
        assert_eq!(
            parse(&bytes[..20]),
            Err(HeaderError::Truncated {
                needed: bytes.len(),
                available: 20
            })
        );
    }

    #[test]
    fn test_entry_overrunning_header() {
        // Base header plus one TLV claiming 8 bytes with only 4 left
        let mut bytes = vec![0u8; 24];
        bytes[0..2].copy_from_slice(&2u16.to_le_bytes());
        bytes[2..4].copy_from_slice(&24u16.to_le_bytes());
        bytes[4..8].copy_from_slice(&0x400u32.to_le_bytes());
        bytes[16..18].copy_from_slice(&3u16.to_le_bytes());
        bytes[18..20].copy_from_slice(&8u16.to_le_bytes());
        let checksum = compute_checksum(&bytes);
        bytes[12..16].copy_from_slice(&checksum.to_le_bytes());

        assert_eq!(
            parse(&bytes),
            Err(HeaderError::TruncatedEntry {
                tag: 3,
                length: 8,
                remaining: 4
            })
        );
    }

    #[test]
    fn test_bad_sizes() {
        let mut bytes = serialize(&sample_header());
        bytes[2..4].copy_from_slice(&18u16.to_le_bytes());
        assert_eq!(parse_lengths(&bytes), Err(HeaderError::BadHeaderSize(18)));

        let mut bytes = serialize(&sample_header());
        bytes[4..8].copy_from_slice(&8u32.to_le_bytes());
        assert!(matches!(
            parse_lengths(&bytes),
            Err(HeaderError::BadTotalSize { .. })
        ));
    }

    #[test]
    fn test_unknown_flags_survive() {
        let header = sample_header().with_flags(TbfFlags::from_bits_retain(0x0000_0103));
        let parsed = parse(&serialize(&header)).unwrap();
        assert_eq!(parsed.flags().bits(), 0x0000_0103);
        assert!(parsed.sticky());
    }
}
