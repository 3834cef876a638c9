//! Page-aligned flash address ranges

use std::fmt;

use crate::error::RegionError;

/// A contiguous, non-empty range of flash addresses
///
/// Alignment is checked against a page size when the region is built with
/// [`FlashRegion::aligned`] and again by every session operation, since the
/// session decides which page size applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlashRegion {
    start: u32,
    len: u32,
}

fn check_page_size(page_size: u32) -> Result<(), RegionError> {
    if page_size == 0 || !page_size.is_power_of_two() {
        return Err(RegionError::InvalidPageSize(page_size));
    }
    Ok(())
}

impl FlashRegion {
    /// A region with no alignment requirement
    pub fn new(start: u32, len: u32) -> Result<Self, RegionError> {
        if len == 0 {
            return Err(RegionError::Empty);
        }
        if start.checked_add(len - 1).is_none() {
            return Err(RegionError::Overflow { start, len });
        }
        Ok(Self { start, len })
    }

    /// A region whose start and length are multiples of `page_size`
    pub fn aligned(start: u32, len: u32, page_size: u32) -> Result<Self, RegionError> {
        let region = Self::new(start, len)?;
        region.check_aligned(page_size)?;
        Ok(region)
    }

    /// The smallest page-aligned region containing `start..start + len`
    pub fn covering(start: u32, len: u32, page_size: u32) -> Result<Self, RegionError> {
        check_page_size(page_size)?;
        let region = Self::new(start, len)?;
        let first = u64::from(start) & !(u64::from(page_size) - 1);
        let end = region.end().next_multiple_of(u64::from(page_size));
        if end > 1 << 32 {
            return Err(RegionError::Overflow { start, len });
        }
        Self::new(first as u32, (end - first) as u32)
    }

    pub fn check_aligned(&self, page_size: u32) -> Result<(), RegionError> {
        check_page_size(page_size)?;
        if self.start % page_size != 0 || self.len % page_size != 0 {
            return Err(RegionError::Unaligned {
                start: self.start,
                len: self.len,
                page_size,
            });
        }
        Ok(())
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    /// Always false; regions cannot be empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// One past the last address (as u64 so a region ending at 4 GiB fits)
    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.len)
    }

    /// Whether `address..address + len` lies entirely inside this region
    pub fn contains_range(&self, address: u32, len: u32) -> bool {
        u64::from(address) >= u64::from(self.start)
            && u64::from(address) + u64::from(len) <= self.end()
    }

    pub fn contains(&self, other: &FlashRegion) -> bool {
        self.contains_range(other.start, other.len)
    }

    pub fn overlaps(&self, other: &FlashRegion) -> bool {
        u64::from(self.start) < other.end() && u64::from(other.start) < self.end()
    }

    /// Start address of each page in the region
    pub fn pages(&self, page_size: u32) -> impl Iterator<Item = u32> {
        let start = self.start;
        let count = self.page_count(page_size);
        (0..count).map(move |i| start + i * page_size)
    }

    pub fn page_count(&self, page_size: u32) -> u32 {
        self.len.div_ceil(page_size.max(1))
    }
}

impl fmt::Display for FlashRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}..0x{:08X}", self.start, self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        assert!(FlashRegion::aligned(0x30000, 0x400, 0x200).is_ok());
        assert_eq!(
            FlashRegion::aligned(0x30100, 0x400, 0x200),
            Err(RegionError::Unaligned {
                start: 0x30100,
                len: 0x400,
                page_size: 0x200
            })
        );
        assert!(FlashRegion::aligned(0x30000, 0x300, 0x200).is_err());
        assert_eq!(
            FlashRegion::aligned(0, 0x200, 0x300),
            Err(RegionError::InvalidPageSize(0x300))
        );
    }

    #[test]
    fn test_empty_and_overflow() {
        assert_eq!(FlashRegion::new(0x1000, 0), Err(RegionError::Empty));
        assert!(FlashRegion::new(0xFFFF_F000, 0x1000).is_ok());
        assert_eq!(
            FlashRegion::new(0xFFFF_F000, 0x2000),
            Err(RegionError::Overflow {
                start: 0xFFFF_F000,
                len: 0x2000
            })
        );
    }

    #[test]
    fn test_covering() {
        let region = FlashRegion::covering(0x30010, 0x300, 0x200).unwrap();
        assert_eq!(region.start(), 0x30000);
        assert_eq!(region.len(), 0x400);
        assert_eq!(region.pages(0x200).collect::<Vec<_>>(), vec![0x30000, 0x30200]);
    }

    #[test]
    fn test_containment_and_overlap() {
        let outer = FlashRegion::new(0x1000, 0x1000).unwrap();
        let inner = FlashRegion::new(0x1800, 0x800).unwrap();
        let beyond = FlashRegion::new(0x1800, 0x1000).unwrap();
        let after = FlashRegion::new(0x2000, 0x100).unwrap();
        assert!(outer.contains(&inner));
        assert!(!outer.contains(&beyond));
        assert!(outer.overlaps(&beyond));
        assert!(!outer.overlaps(&after));
        assert_eq!(outer.to_string(), "0x00001000..0x00002000");
    }
}
