use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{ImageReader, codecs::jpeg::JpegEncoder, imageops::FilterType};

use crate::outcome::Fatal;

/// Profile pictures are scaled to fit in a square of this side.
pub const MAX_SIDE: u32 = 720;

const JPEG_QUALITY: u8 = 100;
const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// First supported image in `dir`, in file name order.
///
/// Only a missing folder or one without images is fatal. A folder that
/// cannot be listed is logged and yields `None`.
pub fn find_image(dir: &Path) -> Result<Option<PathBuf>, Fatal> {
    if !dir.exists() {
        return Err(Fatal::ProfileFolderMissing(dir.to_path_buf()));
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Error reading profile folder {dir:?}: {e}");
            return Ok(None);
        }
    };
    let mut names = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name())
        .collect::<Vec<_>>();
    names.sort();

    names
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| is_supported(path))
        .map(Some)
        .ok_or_else(|| Fatal::NoProfileImage(dir.to_path_buf()))
}

/// Loads the image, crops it to its own bounds, scales it to fit
/// [`MAX_SIDE`]² keeping the aspect ratio and re-encodes it as JPEG.
pub fn prepare(path: &Path) -> anyhow::Result<Vec<u8>> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let img = img
        .crop_imm(0, 0, img.width(), img.height())
        .resize(MAX_SIDE, MAX_SIDE, FilterType::Triangle);
    tracing::debug!("profile picture scaled to {}x{}", img.width(), img.height());

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(&img.to_rgb8())?;
    Ok(buf)
}
