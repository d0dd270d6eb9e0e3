//! The miniature: a small fixed-size RGB raster used as a comparison key.
//!
//! Pixels are three bytes each, row-major, with a row stride of `3 * width`.
//! The only interesting operation is [`Miniature::distance`], the squared
//! per-channel difference sum with a per-row early exit against a caller
//! supplied ceiling.

use pixmatch_error::{PixmatchError, Result};

/// A rectangular RGB8 raster.
///
/// Invariant: `data.len() == 3 * width * height`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Miniature {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Miniature {
    /// Allocate a zero-filled miniature.
    ///
    /// Allocation failure surfaces as [`PixmatchError::OutOfMemory`] rather
    /// than aborting the process.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let len = 3 * width as usize * height as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| PixmatchError::OutOfMemory {
                detail: format!("{width}x{height} pixel buffer"),
            })?;
        data.resize(len, 0);
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Wrap an existing RGB8 buffer.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = 3 * width as usize * height as usize;
        if data.len() != expected {
            return Err(PixmatchError::internal(format!(
                "pixel buffer is {} bytes, {width}x{height} needs {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw pixel bytes, row-major RGB triples.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes per row.
    #[must_use]
    fn stride(&self) -> usize {
        3 * self.width as usize
    }

    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || x >= self.width as i32 || y < 0 || y >= self.height as i32 {
            return None;
        }
        Some(self.stride() * y as usize + 3 * x as usize)
    }

    /// Read one pixel. Out-of-range coordinates yield `None`.
    #[must_use]
    pub fn pixel(&self, x: i32, y: i32) -> Option<(u8, u8, u8)> {
        let off = self.offset(x, y)?;
        Some((self.data[off], self.data[off + 1], self.data[off + 2]))
    }

    /// Write one pixel. Out-of-range coordinates are silently ignored.
    pub fn set_pixel(&mut self, x: i32, y: i32, r: u8, g: u8, b: u8) {
        if let Some(off) = self.offset(x, y) {
            self.data[off] = r;
            self.data[off + 1] = g;
            self.data[off + 2] = b;
        }
    }

    /// Squared per-channel distance to `other`, pruned against `ceiling`.
    ///
    /// Sums `(dr*dr + dg*dg + db*db)` over all pixels. At the end of each
    /// row the running sum is checked against `ceiling`; once it exceeds the
    /// ceiling the rest of the raster cannot matter to the caller (who passes
    /// the best distance found so far) and the partial sum is returned
    /// immediately. Row granularity bounds the wasted work at one row.
    ///
    /// Returns 0 for identical rasters; larger means more different.
    pub fn distance(&self, other: &Self, ceiling: u32) -> Result<u32> {
        if self.width != other.width || self.height != other.height {
            return Err(PixmatchError::SizeMismatch {
                left_width: self.width,
                left_height: self.height,
                right_width: other.width,
                right_height: other.height,
            });
        }

        if self.data.is_empty() {
            return Ok(0);
        }

        let stride = self.stride();
        let mut err: u32 = 0;
        for (mine, theirs) in self
            .data
            .chunks_exact(stride)
            .zip(other.data.chunks_exact(stride))
        {
            for (a, b) in mine.iter().zip(theirs) {
                let d = i32::from(*a) - i32::from(*b);
                err = err.saturating_add((d * d) as u32);
            }
            if err > ceiling {
                return Ok(err);
            }
        }
        Ok(err)
    }
}
