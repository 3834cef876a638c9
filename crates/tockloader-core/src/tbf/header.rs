//! In-memory TBF header

use bitflags::bitflags;

use super::entry::*;
use super::BASE_HEADER_LEN;
use crate::error::HeaderError;

/// The only TBF header version this codec reads and writes
pub const TBF_VERSION: u16 = 2;

bitflags! {
    /// Header flags word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TbfFlags: u32 {
        /// The kernel should start this app
        const ENABLED = 1 << 0;
        /// The app survives a plain uninstall
        const STICKY = 1 << 1;
    }
}

/// A parsed (or to be serialized) TBF header
///
/// The header size is derived from the entries, so a header built through
/// this type always tiles its TLVs exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbfHeader {
    version: u16,
    total_size: u32,
    flags: TbfFlags,
    entries: Vec<TbfEntry>,
}

impl TbfHeader {
    /// An enabled header with no entries
    pub fn new(total_size: u32) -> Self {
        Self {
            version: TBF_VERSION,
            total_size,
            flags: TbfFlags::ENABLED,
            entries: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        version: u16,
        total_size: u32,
        flags: TbfFlags,
        entries: Vec<TbfEntry>,
    ) -> Self {
        Self {
            version,
            total_size,
            flags,
            entries,
        }
    }

    /// Builder style [`push_entry`](Self::push_entry)
    pub fn with_entry(mut self, entry: TbfEntry) -> Result<Self, HeaderError> {
        self.push_entry(entry)?;
        Ok(self)
    }

    pub fn with_flags(mut self, flags: TbfFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Append an entry, failing if the header would outgrow its size field
    pub fn push_entry(&mut self, entry: TbfEntry) -> Result<(), HeaderError> {
        let value_len = entry.encode_value().len();
        if value_len > u16::MAX as usize {
            return Err(HeaderError::TooLarge(value_len));
        }
        let size = self.header_size_usize() + entry.encoded_len();
        if size > u16::MAX as usize {
            return Err(HeaderError::TooLarge(size));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn entries(&self) -> &[TbfEntry] {
        &self.entries
    }

    pub fn flags(&self) -> TbfFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: TbfFlags) {
        self.flags = flags;
    }

    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn set_total_size(&mut self, total_size: u32) {
        self.total_size = total_size;
    }

    fn header_size_usize(&self) -> usize {
        BASE_HEADER_LEN + self.entries.iter().map(TbfEntry::encoded_len).sum::<usize>()
    }

    /// Size of the serialized header in bytes
    pub fn header_size(&self) -> u16 {
        self.header_size_usize() as u16
    }

    pub fn enabled(&self) -> bool {
        self.flags.contains(TbfFlags::ENABLED)
    }

    pub fn sticky(&self) -> bool {
        self.flags.contains(TbfFlags::STICKY)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.flags.set(TbfFlags::ENABLED, enabled);
    }

    pub fn set_sticky(&mut self, sticky: bool) {
        self.flags.set(TbfFlags::STICKY, sticky);
    }

    /// A header with neither a Main nor a Program entry is padding
    pub fn is_app(&self) -> bool {
        self.main().is_some() || self.program().is_some()
    }

    pub fn main(&self) -> Option<&MainEntry> {
        self.entries.iter().find_map(|e| match e {
            TbfEntry::Main(m) => Some(m),
            _ => None,
        })
    }

    pub fn program(&self) -> Option<&ProgramEntry> {
        self.entries.iter().find_map(|e| match e {
            TbfEntry::Program(p) => Some(p),
            _ => None,
        })
    }

    pub fn package_name(&self) -> Option<&str> {
        self.entries.iter().find_map(|e| match e {
            TbfEntry::PackageName(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn kernel_version(&self) -> Option<KernelVersion> {
        self.entries.iter().find_map(|e| match e {
            TbfEntry::KernelVersion(k) => Some(*k),
            _ => None,
        })
    }

    pub fn writeable_flash_regions(&self) -> &[WriteableFlashRegion] {
        self.entries
            .iter()
            .find_map(|e| match e {
                TbfEntry::WriteableFlashRegions(r) => Some(r.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn permissions(&self) -> &[DriverPermission] {
        self.entries
            .iter()
            .find_map(|e| match e {
                TbfEntry::Permissions(p) => Some(p.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    fn fixed_addresses(&self) -> Option<&FixedAddresses> {
        self.entries.iter().find_map(|e| match e {
            TbfEntry::FixedAddresses(f) => Some(f),
            _ => None,
        })
    }

    /// Flash address the app must be placed at, if it was linked for one
    pub fn fixed_address_flash(&self) -> Option<u32> {
        self.fixed_addresses()
            .map(|f| f.start_process_flash)
            .filter(|&a| a != NO_FIXED_ADDRESS)
    }

    /// RAM address the app expects, if it was linked for one
    pub fn fixed_address_ram(&self) -> Option<u32> {
        self.fixed_addresses()
            .map(|f| f.start_process_ram)
            .filter(|&a| a != NO_FIXED_ADDRESS)
    }

    /// (init_fn_offset, protected_trailer_size, minimum_ram_size), preferring Program
    fn program_fields(&self) -> Option<(u32, u32, u32)> {
        if let Some(p) = self.program() {
            return Some((p.init_fn_offset, p.protected_trailer_size, p.minimum_ram_size));
        }
        self.main()
            .map(|m| (m.init_fn_offset, m.protected_trailer_size, m.minimum_ram_size))
    }

    fn past_header(&self, field: &'static str, value: u32) -> Result<u32, HeaderError> {
        value
            .checked_add(u32::from(self.header_size()))
            .ok_or(HeaderError::OffsetOverflow { field, value })
    }

    /// Entry point as an offset from the start of the TBF
    pub fn init_fn_offset(&self) -> Result<Option<u32>, HeaderError> {
        self.program_fields()
            .map(|(init, _, _)| self.past_header("init_fn_offset", init))
            .transpose()
    }

    /// Bytes at the start of the TBF the app may not write to
    pub fn protected_size(&self) -> Result<Option<u32>, HeaderError> {
        self.program_fields()
            .map(|(_, trailer, _)| self.past_header("protected_trailer_size", trailer))
            .transpose()
    }

    pub fn minimum_ram_size(&self) -> Option<u32> {
        self.program_fields().map(|(_, _, ram)| ram)
    }

    /// End of the executable part, before any footers
    pub fn binary_end_offset(&self) -> u32 {
        self.program()
            .map(|p| p.binary_end_offset)
            .unwrap_or(self.total_size)
    }

    pub fn app_version(&self) -> Option<u32> {
        self.program().map(|p| p.version)
    }
}
