//! Progress reporting for long flash operations

use crate::tbf::TbfHeader;

/// Callbacks fired while an image is installed
///
/// Every method has an empty default so implementors only override what
/// they display.
pub trait InstallProgress {
    /// About to erase `pages` pages
    fn erasing(&mut self, _pages: usize) {}

    /// `erased` of the announced pages are done
    fn erase_progress(&mut self, _erased: usize) {}

    /// About to write `bytes` bytes
    fn writing(&mut self, _bytes: usize) {}

    /// `written` of the announced bytes are done
    fn write_progress(&mut self, _written: usize) {}

    /// About to verify `bytes` bytes
    fn verifying(&mut self, _bytes: usize) {}

    /// Install finished successfully
    fn complete(&mut self, _header: &TbfHeader) {}
}

/// Progress sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl InstallProgress for NoProgress {}
