//! TBF metadata entries (the TLVs that follow the base header)

use crate::error::HeaderError;

/// Entry type tags
pub mod tag {
    pub const MAIN: u16 = 1;
    pub const WRITEABLE_FLASH_REGIONS: u16 = 2;
    pub const PACKAGE_NAME: u16 = 3;
    pub const FIXED_ADDRESSES: u16 = 5;
    pub const PERMISSIONS: u16 = 6;
    pub const STORAGE_PERMISSIONS: u16 = 7;
    pub const KERNEL_VERSION: u16 = 8;
    pub const PROGRAM: u16 = 9;
}

/// Value used in fixed address entries for "no requirement"
pub const NO_FIXED_ADDRESS: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainEntry {
    /// Entry point, relative to the end of the header
    pub init_fn_offset: u32,
    pub protected_trailer_size: u32,
    pub minimum_ram_size: u32,
}

/// Main entry plus the end of the binary and a version, used by apps with
/// footers (credentials)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramEntry {
    pub init_fn_offset: u32,
    pub protected_trailer_size: u32,
    pub minimum_ram_size: u32,
    pub binary_end_offset: u32,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteableFlashRegion {
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedAddresses {
    pub start_process_ram: u32,
    pub start_process_flash: u32,
}

/// Which commands of one driver an app may call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverPermission {
    pub driver_number: u32,
    /// Index of the 64-command block `allowed_commands` applies to
    pub offset: u32,
    pub allowed_commands: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePermissions {
    pub write_id: u32,
    pub read_ids: Vec<u32>,
    pub modify_ids: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelVersion {
    pub major: u16,
    pub minor: u16,
}

/// One metadata entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TbfEntry {
    Main(MainEntry),
    WriteableFlashRegions(Vec<WriteableFlashRegion>),
    PackageName(String),
    FixedAddresses(FixedAddresses),
    Permissions(Vec<DriverPermission>),
    StoragePermissions(StoragePermissions),
    KernelVersion(KernelVersion),
    Program(ProgramEntry),
    /// Any tag this codec does not interpret, kept verbatim
    Unknown { tag: u16, data: Vec<u8> },
}

pub(crate) fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

pub(crate) fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn le_u64(b: &[u8], at: usize) -> u64 {
    u64::from(le_u32(b, at)) | (u64::from(le_u32(b, at + 4)) << 32)
}

fn expect_len(tag: u16, value: &[u8], len: usize) -> Result<(), HeaderError> {
    if value.len() == len {
        Ok(())
    } else {
        Err(HeaderError::BadEntry {
            tag,
            length: value.len() as u16,
        })
    }
}

fn bad_entry(tag: u16, value: &[u8]) -> HeaderError {
    HeaderError::BadEntry {
        tag,
        length: value.len() as u16,
    }
}

fn read_id_list(tag: u16, value: &[u8], at: usize) -> Result<(Vec<u32>, usize), HeaderError> {
    if value.len() < at + 2 {
        return Err(bad_entry(tag, value));
    }
    let count = le_u16(value, at) as usize;
    let start = at + 2;
    let end = start + count * 4;
    if value.len() < end {
        return Err(bad_entry(tag, value));
    }
    let ids = (0..count).map(|i| le_u32(value, start + i * 4)).collect();
    Ok((ids, end))
}

impl TbfEntry {
    pub fn tag(&self) -> u16 {
        match self {
            TbfEntry::Main(_) => tag::MAIN,
            TbfEntry::WriteableFlashRegions(_) => tag::WRITEABLE_FLASH_REGIONS,
            TbfEntry::PackageName(_) => tag::PACKAGE_NAME,
            TbfEntry::FixedAddresses(_) => tag::FIXED_ADDRESSES,
            TbfEntry::Permissions(_) => tag::PERMISSIONS,
            TbfEntry::StoragePermissions(_) => tag::STORAGE_PERMISSIONS,
            TbfEntry::KernelVersion(_) => tag::KERNEL_VERSION,
            TbfEntry::Program(_) => tag::PROGRAM,
            TbfEntry::Unknown { tag, .. } => *tag,
        }
    }

    /// Decode the value of a TLV with the given tag
    pub(crate) fn decode(tag: u16, value: &[u8]) -> Result<Self, HeaderError> {
        let entry = match tag {
            tag::MAIN => {
                expect_len(tag, value, 12)?;
                TbfEntry::Main(MainEntry {
                    init_fn_offset: le_u32(value, 0),
                    protected_trailer_size: le_u32(value, 4),
                    minimum_ram_size: le_u32(value, 8),
                })
            }
            tag::PROGRAM => {
                expect_len(tag, value, 20)?;
                TbfEntry::Program(ProgramEntry {
                    init_fn_offset: le_u32(value, 0),
                    protected_trailer_size: le_u32(value, 4),
                    minimum_ram_size: le_u32(value, 8),
                    binary_end_offset: le_u32(value, 12),
                    version: le_u32(value, 16),
                })
            }
            tag::WRITEABLE_FLASH_REGIONS => {
                if value.len() % 8 != 0 {
                    return Err(bad_entry(tag, value));
                }
                TbfEntry::WriteableFlashRegions(
                    value
                        .chunks_exact(8)
                        .map(|c| WriteableFlashRegion {
                            offset: le_u32(c, 0),
                            size: le_u32(c, 4),
                        })
                        .collect(),
                )
            }
            tag::PACKAGE_NAME => {
                let name = std::str::from_utf8(value).map_err(|_| HeaderError::BadPackageName)?;
                TbfEntry::PackageName(name.to_string())
            }
            tag::FIXED_ADDRESSES => {
                expect_len(tag, value, 8)?;
                TbfEntry::FixedAddresses(FixedAddresses {
                    start_process_ram: le_u32(value, 0),
                    start_process_flash: le_u32(value, 4),
                })
            }
            tag::PERMISSIONS => {
                if value.len() < 2 {
                    return Err(bad_entry(tag, value));
                }
                let count = le_u16(value, 0) as usize;
                expect_len(tag, value, 2 + count * 16)?;
                TbfEntry::Permissions(
                    (0..count)
                        .map(|i| {
                            let at = 2 + i * 16;
                            DriverPermission {
                                driver_number: le_u32(value, at),
                                offset: le_u32(value, at + 4),
                                allowed_commands: le_u64(value, at + 8),
                            }
                        })
                        .collect(),
                )
            }
            tag::STORAGE_PERMISSIONS => {
                if value.len() < 4 {
                    return Err(bad_entry(tag, value));
                }
                let write_id = le_u32(value, 0);
                let (read_ids, next) = read_id_list(tag, value, 4)?;
                let (modify_ids, end) = read_id_list(tag, value, next)?;
                if end != value.len() {
                    return Err(bad_entry(tag, value));
                }
                TbfEntry::StoragePermissions(StoragePermissions {
                    write_id,
                    read_ids,
                    modify_ids,
                })
            }
            tag::KERNEL_VERSION => {
                expect_len(tag, value, 4)?;
                TbfEntry::KernelVersion(KernelVersion {
                    major: le_u16(value, 0),
                    minor: le_u16(value, 2),
                })
            }
            _ => TbfEntry::Unknown {
                tag,
                data: value.to_vec(),
            },
        };
        Ok(entry)
    }

    /// Unpadded value bytes of this entry
    pub(crate) fn encode_value(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            TbfEntry::Main(m) => {
                out.extend_from_slice(&m.init_fn_offset.to_le_bytes());
                out.extend_from_slice(&m.protected_trailer_size.to_le_bytes());
                out.extend_from_slice(&m.minimum_ram_size.to_le_bytes());
            }
            TbfEntry::Program(p) => {
                out.extend_from_slice(&p.init_fn_offset.to_le_bytes());
                out.extend_from_slice(&p.protected_trailer_size.to_le_bytes());
                out.extend_from_slice(&p.minimum_ram_size.to_le_bytes());
                out.extend_from_slice(&p.binary_end_offset.to_le_bytes());
                out.extend_from_slice(&p.version.to_le_bytes());
            }
            TbfEntry::WriteableFlashRegions(regions) => {
                for r in regions {
                    out.extend_from_slice(&r.offset.to_le_bytes());
                    out.extend_from_slice(&r.size.to_le_bytes());
                }
            }
            TbfEntry::PackageName(name) => out.extend_from_slice(name.as_bytes()),
            TbfEntry::FixedAddresses(f) => {
                out.extend_from_slice(&f.start_process_ram.to_le_bytes());
                out.extend_from_slice(&f.start_process_flash.to_le_bytes());
            }
            TbfEntry::Permissions(perms) => {
                out.extend_from_slice(&(perms.len() as u16).to_le_bytes());
                for p in perms {
                    out.extend_from_slice(&p.driver_number.to_le_bytes());
                    out.extend_from_slice(&p.offset.to_le_bytes());
                    out.extend_from_slice(&p.allowed_commands.to_le_bytes());
                }
            }
            TbfEntry::StoragePermissions(s) => {
                out.extend_from_slice(&s.write_id.to_le_bytes());
                out.extend_from_slice(&(s.read_ids.len() as u16).to_le_bytes());
                for id in &s.read_ids {
                    out.extend_from_slice(&id.to_le_bytes());
                }
                out.extend_from_slice(&(s.modify_ids.len() as u16).to_le_bytes());
                for id in &s.modify_ids {
                    out.extend_from_slice(&id.to_le_bytes());
                }
            }
            TbfEntry::KernelVersion(k) => {
                out.extend_from_slice(&k.major.to_le_bytes());
                out.extend_from_slice(&k.minor.to_le_bytes());
            }
            TbfEntry::Unknown { data, .. } => out.extend_from_slice(data),
        }
        out
    }

    /// Bytes this entry occupies in the header, TLV header and padding included
    pub fn encoded_len(&self) -> usize {
        4 + self.encode_value().len().next_multiple_of(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_size_entries_check_length() {
        assert_eq!(
            TbfEntry::decode(tag::MAIN, &[0; 8]),
            Err(HeaderError::BadEntry {
                tag: tag::MAIN,
                length: 8
            })
        );
        assert!(TbfEntry::decode(tag::KERNEL_VERSION, &[2, 0, 1, 0]).is_ok());
        assert!(TbfEntry::decode(tag::KERNEL_VERSION, &[2, 0, 1]).is_err());
        assert!(TbfEntry::decode(tag::WRITEABLE_FLASH_REGIONS, &[0; 12]).is_err());
    }

    #[test]
    fn test_permissions_layout() {
        let mut value = vec![1, 0];
        value.extend_from_slice(&0x60000u32.to_le_bytes());
        value.extend_from_slice(&0u32.to_le_bytes());
        value.extend_from_slice(&0b1011u64.to_le_bytes());
        let entry = TbfEntry::decode(tag::PERMISSIONS, &value).unwrap();
        assert_eq!(
            entry,
            TbfEntry::Permissions(vec![DriverPermission {
                driver_number: 0x60000,
                offset: 0,
                allowed_commands: 0b1011,
            }])
        );
        assert_eq!(entry.encode_value(), value);

        // Count says two entries, only one present
        value[0] = 2;
        assert!(TbfEntry::decode(tag::PERMISSIONS, &value).is_err());
    }

    #[test]
    fn test_storage_permissions_layout() {
        let entry = TbfEntry::StoragePermissions(StoragePermissions {
            write_id: 7,
            read_ids: vec![1, 2],
            modify_ids: vec![3],
        });
        let value = entry.encode_value();
        assert_eq!(value.len(), 4 + 2 + 8 + 2 + 4);
        assert_eq!(TbfEntry::decode(tag::STORAGE_PERMISSIONS, &value), Ok(entry));
        assert!(TbfEntry::decode(tag::STORAGE_PERMISSIONS, &value[..value.len() - 1]).is_err());
    }

    #[test]
    fn test_package_name_must_be_utf8() {
        assert_eq!(
            TbfEntry::decode(tag::PACKAGE_NAME, &[0xFF, 0xFE]),
            Err(HeaderError::BadPackageName)
        );
    }

    #[test]
    fn test_encoded_len_is_padded() {
        assert_eq!(TbfEntry::PackageName("blink".into()).encoded_len(), 12);
        assert_eq!(TbfEntry::PackageName(String::new()).encoded_len(), 4);
        assert_eq!(
            TbfEntry::Unknown {
                tag: 128,
                data: vec![1; 4]
            }
            .encoded_len(),
            8
        );
    }
}
