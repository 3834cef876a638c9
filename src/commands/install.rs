//! Install command

use std::error::Error;
use std::path::Path;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tockloader_core::{InstallProgress, SessionError, TbfHeader};

use super::{format_size, Session};

/// Progress bar with a phase label
fn create_progress_bar(total: u64, template: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    match ProgressStyle::default_bar().template(template) {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => log::debug!("bad progress template: {}", e),
    }
    pb
}

/// Progress reporter using indicatif progress bars
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
        }
    }

    fn start(&mut self, pb: ProgressBar) {
        self.current_bar = Some(self.multi.add(pb));
    }

    fn finish(&mut self, message: &str) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(message.to_string());
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallProgress for IndicatifProgress {
    fn erasing(&mut self, pages: usize) {
        self.start(create_progress_bar(
            pages as u64,
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages Erasing",
        ));
    }

    fn erase_progress(&mut self, erased: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(erased as u64);
        }
    }

    fn writing(&mut self, bytes: usize) {
        self.finish("Erase complete");
        self.start(create_progress_bar(
            bytes as u64,
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) Writing",
        ));
    }

    fn write_progress(&mut self, written: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(written as u64);
        }
    }

    fn verifying(&mut self, bytes: usize) {
        self.finish("Write complete");
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("Verifying {} bytes...", bytes));
        pb.enable_steady_tick(Duration::from_millis(100));
        self.start(pb);
    }

    fn complete(&mut self, header: &TbfHeader) {
        self.finish("Verified");
        println!(
            "Installed {} ({})",
            header.package_name().unwrap_or("<unnamed>"),
            format_size(header.total_size())
        );
    }
}

/// First page boundary after the last installed app
fn next_free_address(session: &mut Session) -> Result<u32, SessionError> {
    let apps = session.list()?;
    let page_size = session.config().page_size;
    let end = apps
        .last()
        .map(|app| app.address + app.header.total_size())
        .unwrap_or(session.config().app_address);
    Ok(end.next_multiple_of(page_size))
}

/// Install a TBF file, after the existing apps unless an address is given
pub fn run_install(
    session: &mut Session,
    path: &Path,
    address: Option<u32>,
) -> Result<(), Box<dyn Error>> {
    let image = std::fs::read(path)?;
    println!("Read {} bytes from {:?}", image.len(), path);

    let address = match address {
        Some(address) => address,
        None => next_free_address(session)?,
    };

    let mut progress = IndicatifProgress::new();
    session.install_with_progress(&image, address, &mut progress)?;
    println!("App is at 0x{:08X}", address);
    Ok(())
}
