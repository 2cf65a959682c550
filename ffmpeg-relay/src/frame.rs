use std::fmt::{Display, Formatter};
use std::path::Path;

use bytes::Bytes;

/// Packed 8-bit BGR picture, rows stored back to back without padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BgrImage {
    width: u32,
    height: u32,
    data: Bytes,
}

impl BgrImage {
    pub const CHANNELS: usize = 3;

    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> anyhow::Result<Self> {
        let data = data.into();
        let expected = width as usize * height as usize * Self::CHANNELS;
        if data.len() != expected {
            anyhow::bail!(
                "bgr image {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            );
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let stride = self.width as usize * Self::CHANNELS;
        let start = y as usize * stride;
        self.data.get(start..start + stride)
    }

    /// Encodes the picture as a JPEG file.
    pub fn save_jpeg(&self, path: &Path, quality: u8) -> anyhow::Result<()> {
        let width = u16::try_from(self.width)
            .map_err(|_| anyhow::anyhow!("width {} too large for jpeg", self.width))?;
        let height = u16::try_from(self.height)
            .map_err(|_| anyhow::anyhow!("height {} too large for jpeg", self.height))?;
        let encoder = jpeg_encoder::Encoder::new_file(path, quality)?;
        encoder.encode(&self.data, width, height, jpeg_encoder::ColorType::Bgr)?;
        Ok(())
    }
}

impl Display for BgrImage {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "BgrImage {}x{} ({} bytes)",
            self.width,
            self.height,
            self.data.len()
        )
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod frame_test;
