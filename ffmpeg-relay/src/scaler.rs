use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, Flags};

use crate::frame::BgrImage;

/// Converts decoded pictures of any pixel format to packed BGR at their
/// native size. The swscale context is rebuilt whenever the source format or
/// geometry changes.
pub struct Scaler {
    context: Option<(Context, Pixel, u32, u32)>,
}

impl Scaler {
    pub fn new() -> Self {
        Self { context: None }
    }

    fn context_for(&mut self, format: Pixel, width: u32, height: u32) -> anyhow::Result<&mut Context> {
        let stale = match &self.context {
            Some((_, f, w, h)) => *f != format || *w != width || *h != height,
            None => true,
        };
        if stale {
            let context = Context::get(
                format,
                width,
                height,
                Pixel::BGR24,
                width,
                height,
                Flags::FAST_BILINEAR,
            )?;
            self.context = Some((context, format, width, height));
        }
        match self.context.as_mut() {
            Some((context, ..)) => Ok(context),
            None => Err(anyhow::anyhow!("scaler context missing")),
        }
    }

    pub fn run(&mut self, frame: &ffmpeg_next::frame::Video) -> anyhow::Result<BgrImage> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            anyhow::bail!("invalid video size {}x{}", width, height);
        }
        let context = self.context_for(frame.format(), width, height)?;
        let mut bgr = ffmpeg_next::frame::Video::empty();
        context.run(frame, &mut bgr)?;

        let row_len = width as usize * BgrImage::CHANNELS;
        let stride = bgr.stride(0);
        let plane = bgr.data(0);
        let mut data = Vec::with_capacity(row_len * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            let row = plane
                .get(start..start + row_len)
                .ok_or_else(|| anyhow::anyhow!("short bgr plane at row {}", y))?;
            data.extend_from_slice(row);
        }
        BgrImage::new(width, height, data)
    }
}

impl Default for Scaler {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for Scaler {}

#[cfg(test)]
#[path = "scaler_test.rs"]
mod scaler_test;
