/*!
Image files and output directories.

Two formats are produced from an [`ImageFrame`]:

- `.bin` - the payload bytes exactly as received
- `.dat` - one text line per image row, every pixel value followed by a space
*/

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use xpad::ImageFrame;

/// On-disk image format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Dat,
    Bin,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Dat => "dat",
            Self::Bin => "bin",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Create `dir` and its parents if needed
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

/// Directory for one exposure run
///
/// With `timestamped` set, a `YYYYmmdd_HHMMSS` subdirectory of `base` is
/// used. The directory is created either way.
pub fn session_dir(base: &Path, timestamped: bool) -> Result<PathBuf> {
    let dir = if timestamped {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        info!("📁 Capture session timestamp: {}", timestamp);
        base.join(timestamp)
    } else {
        base.to_path_buf()
    };
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Write the raw payload bytes
pub fn write_raw(path: &Path, frame: &ImageFrame) -> Result<()> {
    fs::write(path, frame.data())
        .with_context(|| format!("Failed to write image file: {}", path.display()))
}

/// Write the pixel grid as text
pub fn write_dat(path: &Path, frame: &ImageFrame) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create image file: {}", path.display()))?;
    let mut out = BufWriter::new(file);

    for row in frame.rows() {
        for pixel in row {
            write!(out, "{} ", pixel)?;
        }
        out.write_all(b"\n")?;
    }
    out.flush()
        .with_context(|| format!("Failed to write image file: {}", path.display()))?;
    Ok(())
}

/// Write `frame` as `<dir>/<stem>.<ext>` and return the path
pub fn write_image(dir: &Path, stem: &str, format: ImageFormat, frame: &ImageFrame) -> Result<PathBuf> {
    let path = dir.join(format!("{}.{}", stem, format.extension()));
    match format {
        ImageFormat::Dat => write_dat(&path, frame)?,
        ImageFormat::Bin => write_raw(&path, frame)?,
    }
    debug!(
        "Wrote {}x{} image to {}",
        frame.height(),
        frame.width(),
        path.display()
    );
    Ok(path)
}
