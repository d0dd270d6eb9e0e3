//! Decode a source image file into a comparison miniature.
//!
//! Format detection, decoding, and resampling are delegated to the `image`
//! crate; this crate only enforces the service's contract: the source must
//! be at least `side` pixels on both axes, and the result is an exact
//! `side` x `side` RGB8 raster.

use std::path::Path;

use image::GenericImageView;
use image::imageops::FilterType;
use pixmatch_error::{PixmatchError, Result};
use pixmatch_types::Miniature;
use tracing::debug;

/// Decode `path` and shrink it to a `side` x `side` miniature.
///
/// Fails with [`PixmatchError::Decode`] when the file cannot be decoded or
/// is smaller than the miniature on either axis. Upscaling tiny sources
/// would manufacture detail that the pixel-distance compare then trusts.
pub fn miniature_from_file(path: &Path, side: u32) -> Result<Miniature> {
    let img = image::open(path).map_err(|e| PixmatchError::Decode {
        detail: format!("{}: {e}", path.display()),
    })?;

    let (width, height) = img.dimensions();
    if width < side || height < side {
        return Err(PixmatchError::Decode {
            detail: format!(
                "{}: source {width}x{height} below compare size {side}",
                path.display()
            ),
        });
    }

    let shrunk = img.resize_exact(side, side, FilterType::Lanczos3).to_rgb8();
    debug!(path = %path.display(), width, height, side, "decoded miniature");
    Miniature::from_raw(side, side, shrunk.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &tempfile::TempDir, name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let mut img = RgbImage::new(width, height);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, 128]);
        }
        let path = dir.path().join(name);
        img.save(&path).expect("save png");
        path
    }

    #[test]
    fn shrinks_to_exact_side() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_png(&dir, "big.png", 64, 48);
        let m = miniature_from_file(&path, 16).expect("decode");
        assert_eq!(m.width(), 16);
        assert_eq!(m.height(), 16);
        assert_eq!(m.data().len(), 3 * 16 * 16);
    }

    #[test]
    fn rejects_sources_below_compare_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_png(&dir, "small.png", 8, 64);
        assert!(matches!(
            miniature_from_file(&path, 16),
            Err(PixmatchError::Decode { .. })
        ));
    }

    #[test]
    fn rejects_unreadable_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.png");
        assert!(matches!(
            miniature_from_file(&path, 16),
            Err(PixmatchError::Decode { .. })
        ));
    }
}
