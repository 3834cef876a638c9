//! High-level flash operations over a protocol engine

use std::time::Duration;

use serde::Deserialize;

use super::progress::{InstallProgress, NoProgress};
use super::region::FlashRegion;
use crate::error::{HeaderError, InstallError, ProtocolError, RegionError, SessionError};
use crate::protocol::codes::{
    ATTRIBUTE_COUNT, CMD_CRC_INTERNAL_FLASH, CMD_INFO, CMD_READ_RANGE, FLASH_CRC, INFO_MAX_LEN,
};
use crate::protocol::{Attribute, Command, ProtocolEngine, Rejection, Response};
use crate::tbf::{self, TbfHeader, LENGTHS_LEN};
use crate::transport::Transport;

/// How an installed image is checked after writing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifyMode {
    /// Ask the bootloader for a CRC-32 of the range, falling back to
    /// read-back if the command is unknown
    #[default]
    Crc,
    /// Read the whole range back and compare
    ReadBack,
}

/// Tuning and board geometry for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub page_size: u32,
    /// First address apps may occupy
    pub app_address: u32,
    /// Bytes available for apps starting at `app_address`
    pub app_region_len: u32,
    /// Deadline for a single attempt of a single command
    pub timeout: Duration,
    pub max_retries: u32,
    /// Largest read requested in one command
    pub read_chunk: u16,
    pub verify: VerifyMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: 512,
            app_address: 0x30000,
            app_region_len: 0x50000,
            timeout: Duration::from_millis(1000),
            max_retries: 3,
            read_chunk: 512,
            verify: VerifyMode::Crc,
        }
    }
}

impl SessionConfig {
    pub fn app_region(&self) -> Result<FlashRegion, RegionError> {
        FlashRegion::new(self.app_address, self.app_region_len)
    }
}

/// An app found in flash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApp {
    pub address: u32,
    pub header: TbfHeader,
}

impl InstalledApp {
    pub fn name(&self) -> &str {
        self.header.package_name().unwrap_or("<unnamed>")
    }
}

/// A connection to one bootloader
///
/// The session owns the engine, which owns the transport, and every
/// operation takes `&mut self`, so requests are strictly sequential.
pub struct FlashSession<T: Transport> {
    engine: ProtocolEngine<T>,
    config: SessionConfig,
    /// Regions erased in this session and not yet written
    erased: Vec<FlashRegion>,
    crc_supported: bool,
}

impl<T: Transport> FlashSession<T> {
    /// Wrap a transport without talking to the target
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            engine: ProtocolEngine::new(transport),
            config,
            erased: Vec::new(),
            crc_supported: true,
        }
    }

    /// Wrap a transport and make sure a bootloader answers on it
    pub fn connect(transport: T, config: SessionConfig) -> Result<Self, SessionError> {
        let mut session = Self::new(transport, config);
        session.engine.post(&Command::sync())?;
        session.ping()?;
        log::info!("Connected to bootloader");
        Ok(session)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &ProtocolEngine<T> {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        self.engine.transport()
    }

    pub fn into_transport(self) -> T {
        self.engine.into_transport()
    }

    /// Regions erased in this session that may still be written
    pub fn erased_regions(&self) -> &[FlashRegion] {
        &self.erased
    }

    fn run(&mut self, command: Command) -> Result<Response, ProtocolError> {
        let command = command.with_context(self.engine.next_context());
        self.engine
            .execute(&command, self.config.timeout, self.config.max_retries)
    }

    pub fn ping(&mut self) -> Result<(), SessionError> {
        self.run(Command::ping())?;
        Ok(())
    }

    /// The bootloader's version/info string
    pub fn info(&mut self) -> Result<String, SessionError> {
        let response = self.run(Command::info())?;
        let Some((&len, text)) = response.payload.split_first() else {
            return Err(ProtocolError::MalformedResponse {
                opcode: CMD_INFO,
                reason: "empty info payload".into(),
            }
            .into());
        };
        let len = (len as usize).min(text.len()).min(INFO_MAX_LEN);
        Ok(String::from_utf8_lossy(&text[..len])
            .trim_end_matches('\0')
            .to_string())
    }

    pub fn attribute(&mut self, index: u8) -> Result<Option<Attribute>, SessionError> {
        if index >= ATTRIBUTE_COUNT {
            return Err(SessionError::BadAttributeIndex(index));
        }
        let response = self.run(Command::get_attribute(index))?;
        Ok(Attribute::parse(&response.payload)?)
    }

    /// All populated attribute slots
    pub fn attributes(&mut self) -> Result<Vec<(u8, Attribute)>, SessionError> {
        let mut found = Vec::new();
        for index in 0..ATTRIBUTE_COUNT {
            if let Some(attribute) = self.attribute(index)? {
                found.push((index, attribute));
            }
        }
        Ok(found)
    }

    pub fn set_attribute(&mut self, index: u8, attribute: &Attribute) -> Result<(), SessionError> {
        if index >= ATTRIBUTE_COUNT {
            return Err(SessionError::BadAttributeIndex(index));
        }
        log::debug!("Setting attribute {} ({})", index, attribute.key());
        self.run(Command::set_attribute(index, attribute))?;
        Ok(())
    }

    pub fn read_range(&mut self, address: u32, len: u32) -> Result<Vec<u8>, SessionError> {
        FlashRegion::new(address, len)?;
        Ok(self.read_flash(address, len)?)
    }

    fn read_flash(&mut self, address: u32, len: u32) -> Result<Vec<u8>, ProtocolError> {
        let chunk = u32::from(self.config.read_chunk.max(1));
        let mut out = Vec::with_capacity(len as usize);
        let mut offset = 0;
        while offset < len {
            let n = chunk.min(len - offset);
            let response = self.run(Command::read_range(address + offset, n as u16))?;
            if response.payload.len() != n as usize {
                return Err(ProtocolError::MalformedResponse {
                    opcode: CMD_READ_RANGE,
                    reason: format!("asked for {} bytes, got {}", n, response.payload.len()),
                });
            }
            out.extend_from_slice(&response.payload);
            offset += n;
        }
        Ok(out)
    }

    /// CRC-32 (ISO-HDLC) of a flash range, computed by the bootloader
    pub fn flash_crc(&mut self, address: u32, len: u32) -> Result<u32, SessionError> {
        FlashRegion::new(address, len)?;
        let response = self.run(Command::crc_internal_flash(address, len))?;
        Ok(response.payload_u32(CMD_CRC_INTERNAL_FLASH)?)
    }

    /// Erase a page-aligned region
    ///
    /// Alignment is checked before anything is sent.
    pub fn erase(&mut self, region: FlashRegion) -> Result<(), SessionError> {
        region.check_aligned(self.config.page_size)?;
        log::info!("Erasing {}", region);
        self.erase_region(region, &mut NoProgress)?;
        Ok(())
    }

    fn erase_region(
        &mut self,
        region: FlashRegion,
        progress: &mut dyn InstallProgress,
    ) -> Result<(), ProtocolError> {
        let page_size = self.config.page_size;
        progress.erasing(region.page_count(page_size) as usize);
        for (done, page) in region.pages(page_size).enumerate() {
            self.run(Command::erase_page(page))?;
            progress.erase_progress(done + 1);
        }
        self.erased.retain(|r| !region.contains(r));
        self.erased.push(region);
        Ok(())
    }

    fn forget_erased(&mut self, region: &FlashRegion) {
        self.erased.retain(|r| !r.overlaps(region));
    }

    fn write_page(&mut self, address: u32, data: &[u8]) -> Result<(), InstallError> {
        let len = data.len() as u32;
        if !self.erased.iter().any(|r| r.contains_range(address, len)) {
            return Err(InstallError::NotErased { address, len });
        }
        self.run(Command::write_page(address, data))?;
        Ok(())
    }

    pub fn install(&mut self, image: &[u8], address: u32) -> Result<TbfHeader, InstallError> {
        self.install_with_progress(image, address, &mut NoProgress)
    }

    /// Erase, write and verify one TBF image at `address`
    ///
    /// Any failure leaves the region in an unknown state; calling this again
    /// with the same arguments starts over from the erase.
    pub fn install_with_progress(
        &mut self,
        image: &[u8],
        address: u32,
        progress: &mut dyn InstallProgress,
    ) -> Result<TbfHeader, InstallError> {
        let header = tbf::parse(image)?;
        if header.total_size() as usize != image.len() {
            return Err(InstallError::ImageSizeMismatch {
                declared: header.total_size(),
                actual: image.len(),
            });
        }

        let page_size = self.config.page_size;
        let len = header.total_size();
        let region = FlashRegion::covering(address, len, page_size)?;
        if region.start() != address {
            return Err(RegionError::Unaligned {
                start: address,
                len,
                page_size,
            }
            .into());
        }
        let app_region = self.config.app_region()?;
        if !app_region.contains(&region) {
            return Err(InstallError::OutsideAppRegion { region, app_region });
        }
        if let Some(fixed) = header.fixed_address_flash() {
            if fixed != address {
                log::warn!(
                    "App was linked for 0x{:08X} but is being installed at 0x{:08X}",
                    fixed,
                    address
                );
            }
        }

        log::info!(
            "Installing {} ({} bytes) at 0x{:08X}",
            header.package_name().unwrap_or("<unnamed>"),
            len,
            address
        );

        let result = self.program(image, region, progress);
        self.forget_erased(&region);
        result?;

        progress.complete(&header);
        Ok(header)
    }

    fn program(
        &mut self,
        image: &[u8],
        region: FlashRegion,
        progress: &mut dyn InstallProgress,
    ) -> Result<(), InstallError> {
        self.erase_region(region, progress)?;

        let page_size = self.config.page_size as usize;
        progress.writing(image.len());
        let mut page = vec![0xFF; page_size];
        for (index, chunk) in image.chunks(page_size).enumerate() {
            page[..chunk.len()].copy_from_slice(chunk);
            page[chunk.len()..].fill(0xFF);
            let address = region.start() + (index * page_size) as u32;
            self.write_page(address, &page)?;
            progress.write_progress(index * page_size + chunk.len());
        }

        progress.verifying(image.len());
        self.verify(region.start(), image)
    }

    fn verify(&mut self, address: u32, image: &[u8]) -> Result<(), InstallError> {
        let len = image.len() as u32;
        let region = FlashRegion::new(address, len)?;

        if self.config.verify == VerifyMode::Crc && self.crc_supported {
            match self.run(Command::crc_internal_flash(address, len)) {
                Ok(response) => {
                    let actual = response.payload_u32(CMD_CRC_INTERNAL_FLASH)?;
                    let expected = FLASH_CRC.checksum(image);
                    if actual != expected {
                        log::debug!(
                            "CRC mismatch over {}: expected 0x{:08X}, target reports 0x{:08X}",
                            region,
                            expected,
                            actual
                        );
                        return Err(InstallError::VerificationFailed { region });
                    }
                    return Ok(());
                }
                Err(ProtocolError::TargetRejected(Rejection::UnknownCommand)) => {
                    log::info!("Bootloader has no flash CRC command, verifying by read-back");
                    self.crc_supported = false;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let readback = self.read_flash(address, len)?;
        if let Some(offset) = readback.iter().zip(image).position(|(a, b)| a != b) {
            log::debug!("first mismatch at 0x{:08X}", address + offset as u32);
            return Err(InstallError::VerificationFailed { region });
        }
        Ok(())
    }

    /// Walk the app linked list from the start of the application region
    ///
    /// Stops at erased or zeroed flash, or at the end of the region. Padding
    /// entries are skipped.
    pub fn list(&mut self) -> Result<Vec<InstalledApp>, SessionError> {
        let app_region = self.config.app_region()?;
        let end = app_region.end();
        let mut address = app_region.start();
        let mut apps = Vec::new();

        while u64::from(address) + LENGTHS_LEN as u64 <= end {
            let lengths = self.read_flash(address, LENGTHS_LEN as u32)?;
            let (_, header_size, total_size) = match tbf::parse_lengths(&lengths) {
                Ok(lengths) => lengths,
                Err(HeaderError::BadMagic(_)) => break,
                Err(e) => return Err(e.into()),
            };
            let next = u64::from(address) + u64::from(total_size);
            if next > end {
                return Err(SessionError::CorruptAppList {
                    address,
                    total_size,
                });
            }

            let bytes = self.read_flash(address, u32::from(header_size))?;
            let header = tbf::parse(&bytes)?;
            if header.is_app() {
                log::debug!(
                    "Found {} at 0x{:08X}",
                    header.package_name().unwrap_or("<unnamed>"),
                    address
                );
                apps.push(InstalledApp { address, header });
            } else {
                log::debug!("Skipping padding at 0x{:08X}", address);
            }

            if next >= end {
                break;
            }
            address = next as u32;
        }

        Ok(apps)
    }

    /// Address the bootloader jumps to when it exits
    pub fn set_start_address(&mut self, address: u32) -> Result<(), SessionError> {
        self.run(Command::set_start_address(address))?;
        Ok(())
    }

    /// Move both ends of the link to `baud_rate`
    ///
    /// The bootloader acknowledges at the old rate, then expects the
    /// confirmation at the new one.
    pub fn change_baud_rate(&mut self, baud_rate: u32) -> Result<(), SessionError> {
        self.run(Command::change_baud_rate(baud_rate))?;
        self.engine.transport_mut().set_baud_rate(baud_rate)?;
        self.run(Command::confirm_baud_rate(baud_rate))?;
        log::info!("Link now running at {} baud", baud_rate);
        Ok(())
    }

    /// Leave the bootloader and start the kernel
    pub fn exit_bootloader(&mut self) -> Result<(), SessionError> {
        self.engine.post(&Command::exit())?;
        Ok(())
    }

    /// Reset the target through the transport
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.engine.transport_mut().reset()?;
        self.erased.clear();
        Ok(())
    }

    pub fn close(mut self) -> Result<(), SessionError> {
        self.engine.transport_mut().close()?;
        Ok(())
    }
}
