use crate::error::{IgtError, IgtResult};

/// Surface tiling layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tiling {
    #[default]
    None,
    X,
    Y,
    Yf,
    Ys,
    Tile4,
}

impl Tiling {
    /// Value of the surface-state tiled-mode field.
    #[must_use]
    pub const fn surface_mode(self) -> u32 {
        match self {
            Self::None | Self::Yf | Self::Ys => 0,
            Self::X => 2,
            Self::Y | Self::Tile4 => 3,
        }
    }
}

/// A GEM-backed 2D surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntelBuf {
    pub handle: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub bpp: u32,
    pub tiling: Tiling,
    pub mocs_index: u8,
    pub size: u64,
    /// GPU offset once the buffer has been placed in a batch.
    pub addr: Option<u64>,
}

impl IntelBuf {
    /// Describe a linear surface backed by `handle`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a zero dimension or a `bpp` that is not
    /// a whole number of bytes.
    pub fn linear(handle: u32, width: u32, height: u32, bpp: u32) -> IgtResult<Self> {
        if width == 0 || height == 0 || bpp == 0 || bpp % 8 != 0 {
            return Err(IgtError::InvalidArgument(format!(
                "surface {width}x{height} at {bpp} bpp"
            )));
        }
        let stride = width * (bpp / 8);
        Ok(Self {
            handle,
            width,
            height,
            stride,
            bpp,
            tiling: Tiling::None,
            mocs_index: 0,
            size: u64::from(stride) * u64::from(height),
            addr: None,
        })
    }

    #[must_use]
    pub const fn with_mocs_index(mut self, index: u8) -> Self {
        self.mocs_index = index;
        self
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub const fn bytes_per_pixel(&self) -> u32 {
        self.bpp / 8
    }

    /// Byte offset of pixel `(x, y)`.
    #[must_use]
    pub const fn pixel_offset(&self, x: u32, y: u32) -> usize {
        (y * self.stride + x * self.bytes_per_pixel()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_surface_layout() {
        let buf = IntelBuf::linear(3, 64, 32, 8).unwrap();
        assert_eq!(buf.stride, 64);
        assert_eq!(buf.size, 64 * 32);
        assert_eq!(buf.pixel_offset(5, 2), 133);

        let rgba = IntelBuf::linear(3, 16, 16, 32).unwrap();
        assert_eq!(rgba.stride, 64);
        assert_eq!(rgba.pixel_offset(1, 1), 68);
    }

    #[test]
    fn rejects_odd_bpp() {
        assert!(IntelBuf::linear(1, 16, 16, 12).is_err());
        assert!(IntelBuf::linear(1, 0, 16, 8).is_err());
    }
}
