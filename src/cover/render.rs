//! Materialize a cover source into the cover directory.
//!
//! Folder images are copied byte for byte; embedded artwork is decoded and
//! re-encoded as JPEG so every rendered cover can be served the same way.
//! Files are written to a temporary name first and renamed into place.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageFormat;

use super::CoverError;

/// Copy a folder image to `dest`.
pub fn copy_image(source: &Path, dest: &Path) -> Result<(), CoverError> {
    let temp = temp_path(dest);
    fs::copy(source, &temp)?;
    fs::rename(&temp, dest)?;
    Ok(())
}

/// Decode embedded picture bytes and re-encode them as JPEG.
pub fn encode_jpeg(data: &[u8]) -> Result<Vec<u8>, CoverError> {
    let decoded = image::load_from_memory(data)?;
    let mut out = Cursor::new(Vec::new());
    decoded.to_rgb8().write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

/// Write already rendered cover bytes to `dest`.
pub fn write_bytes(data: &[u8], dest: &Path) -> Result<(), CoverError> {
    let temp = temp_path(dest);
    fs::write(&temp, data)?;
    fs::rename(&temp, dest)?;
    Ok(())
}

/// Mark a rendered cover as current without rewriting it.
pub fn touch(dest: &Path) -> Result<(), CoverError> {
    fs::File::options()
        .write(true)
        .open(dest)?
        .set_modified(std::time::SystemTime::now())?;
    Ok(())
}

/// Remove a rendered cover. A missing file is not an error.
pub fn remove(dest: &Path) -> Result<bool, CoverError> {
    match fs::remove_file(dest) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A tiny PNG for tests.
    pub(crate) fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_encode_jpeg_from_png() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("al_1");

        let jpeg = encode_jpeg(&png_bytes()).unwrap();
        write_bytes(&jpeg, &dest).unwrap();

        let written = fs::read(&dest).unwrap();
        assert_eq!(image::guess_format(&written).unwrap(), ImageFormat::Jpeg);
        assert!(!dir.path().join("al_1.tmp").exists());
    }

    #[test]
    fn test_encode_jpeg_rejects_garbage() {
        assert!(matches!(
            encode_jpeg(b"not an image"),
            Err(CoverError::Image(_))
        ));
    }

    #[test]
    fn test_copy_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cover.png");
        fs::write(&source, png_bytes()).unwrap();
        let dest = dir.path().join("al_2");

        copy_image(&source, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), png_bytes());

        assert!(remove(&dest).unwrap());
        assert!(!remove(&dest).unwrap());
    }
}
