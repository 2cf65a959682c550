use anyhow::Context as _;
use ffmpeg_next::{Dictionary, ffi, format::Pixel};

use crate::{
    engine::{DecoderOptions, Drain, FrameDecoder, FrameGeometry},
    frame::BgrImage,
    hw::{self, HwDevice, HwDeviceKind},
    packet::RawPacket,
    scaler::Scaler,
    stream::{AvStream, MediaKind},
};

/// Decode state machine for one input stream: submit a packet, then drain
/// frames until the decoder asks for more input or reports end of stream.
pub struct DecodeStage {
    stream_index: usize,
    kind: MediaKind,
    decoder: Box<dyn FrameDecoder>,
    frames: u64,
}

impl DecodeStage {
    pub fn new(stream: &AvStream, decoder: Box<dyn FrameDecoder>) -> Self {
        Self {
            stream_index: stream.index(),
            kind: stream.kind(),
            decoder,
            frames: 0,
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.decoder.geometry()
    }

    pub fn hw_device(&self) -> Option<HwDeviceKind> {
        self.decoder.hw_device()
    }

    /// Decodes one packet and returns how many frames it produced. Every
    /// converted picture is handed to `on_image` in decode order.
    pub fn decode(
        &mut self,
        packet: &RawPacket,
        mut on_image: impl FnMut(BgrImage),
    ) -> anyhow::Result<usize> {
        self.decoder
            .send_packet(packet)
            .context("error submitting the packet to the decoder")?;

        let mut produced = 0;
        loop {
            match self.decoder.receive_frame() {
                Ok(Drain::Frame(image)) => {
                    produced += 1;
                    self.frames += 1;
                    if let Some(image) = image {
                        on_image(image);
                    }
                }
                Ok(Drain::Again | Drain::EndOfStream) => return Ok(produced),
                Err(e) => {
                    self.discard_pending();
                    return Err(e.context("error while decoding"));
                }
            }
        }
    }

    /// Empties the decoder after a failed drain so the next packet is
    /// accepted. Frames pulled here are dropped.
    fn discard_pending(&mut self) {
        let mut discarded = 0;
        for _ in 0..MAX_DISCARDED_FRAMES {
            match self.decoder.receive_frame() {
                Ok(Drain::Frame(_)) | Err(_) => discarded += 1,
                Ok(Drain::Again | Drain::EndOfStream) => break,
            }
        }
        if discarded > 0 {
            log::debug!(
                "stream {}: discarded {} pending frames after a decode error",
                self.stream_index,
                discarded
            );
        }
    }
}

/// Upper bound on frames pulled while discarding, for decoders that keep
/// failing without ever reporting EAGAIN.
const MAX_DISCARDED_FRAMES: usize = 64;

enum DecoderType {
    Video {
        decoder: ffmpeg_next::codec::decoder::Video,
        scaler: Scaler,
    },
    Audio(ffmpeg_next::codec::decoder::Audio),
}

/// FFmpeg decoder for one stream. Video pictures are converted to BGR; when a
/// hardware device was negotiated, hardware surfaces are downloaded first.
pub struct AvDecoder {
    inner: DecoderType,
    geometry: Option<FrameGeometry>,
    hw: Option<HwDevice>,
    // read by `get_hw_format` through the codec context's opaque pointer
    hw_format: Option<Box<ffi::AVPixelFormat>>,
}

unsafe extern "C" fn get_hw_format(
    ctx: *mut ffi::AVCodecContext,
    formats: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    let mut offered = Vec::new();
    unsafe {
        let mut p = formats;
        while !p.is_null() && *p != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            offered.push(Pixel::from(*p));
            p = p.add(1);
        }
    }
    let wanted = unsafe {
        let opaque = (*ctx).opaque as *const ffi::AVPixelFormat;
        if opaque.is_null() {
            None
        } else {
            Some(Pixel::from(*opaque))
        }
    };

    match hw::select_surface_format(&offered, wanted) {
        Some(format) => {
            if wanted.is_some() && Some(format) != wanted {
                log::warn!("failed to get HW surface format, decoding {:?} in software", format);
            }
            format.into()
        }
        None => ffi::AVPixelFormat::AV_PIX_FMT_NONE,
    }
}

impl AvDecoder {
    pub fn open(stream: &AvStream, options: &DecoderOptions) -> anyhow::Result<Self> {
        let codec_id = stream.parameters().id();
        let codec = ffmpeg_next::decoder::find(codec_id)
            .ok_or_else(|| anyhow::anyhow!("no decoder for {:?}", codec_id))?;

        let mut decoder_ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        decoder_ctx.set_parameters(stream.parameters().clone())?;

        let mut dict = Dictionary::new();
        // only honoured by FFmpeg builds that still know the option
        dict.set(
            "refcounted_frames",
            if options.refcounted_frames { "1" } else { "0" },
        );

        match stream.kind() {
            MediaKind::Video => {
                let mut hw = None;
                let mut hw_format = None;
                let configs = hw::decoder_hw_configs(&codec);
                match hw::negotiate_hw_format(&configs, options.hw_device) {
                    Some(format) => match HwDevice::create(options.hw_device) {
                        Ok(device) => {
                            let wanted = Box::new(ffi::AVPixelFormat::from(format));
                            unsafe {
                                let ctx = decoder_ctx.as_mut_ptr();
                                device.attach(ctx)?;
                                (*ctx).opaque = &*wanted as *const ffi::AVPixelFormat as *mut _;
                                (*ctx).get_format = Some(get_hw_format);
                            }
                            hw = Some(device);
                            hw_format = Some(wanted);
                        }
                        Err(e) => {
                            log::warn!("{:#}, falling back to software decode", e);
                        }
                    },
                    None if !options.hw_device.is_none() => {
                        log::warn!(
                            "decoder {} does not support device type {}, using software decode",
                            codec.name(),
                            options.hw_device
                        );
                    }
                    None => {}
                }

                let decoder = decoder_ctx
                    .decoder()
                    .open_as_with(codec, dict)?
                    .video()?;
                if decoder.width() == 0 || decoder.height() == 0 {
                    return Err(anyhow::anyhow!("missing codec parameters"));
                }
                let geometry = FrameGeometry {
                    width: decoder.width(),
                    height: decoder.height(),
                    pixel_format: decoder.format(),
                };
                log::info!(
                    "opened video decoder {} {}x{} {:?}, hw: {}",
                    codec.name(),
                    geometry.width,
                    geometry.height,
                    geometry.pixel_format,
                    hw.as_ref().map(|d| d.kind()).unwrap_or_default()
                );

                Ok(Self {
                    inner: DecoderType::Video {
                        decoder,
                        scaler: Scaler::new(),
                    },
                    geometry: Some(geometry),
                    hw,
                    hw_format,
                })
            }
            MediaKind::Audio => {
                let decoder = decoder_ctx
                    .decoder()
                    .open_as_with(codec, dict)?
                    .audio()?;
                log::info!("opened audio decoder {}", codec.name());
                Ok(Self {
                    inner: DecoderType::Audio(decoder),
                    geometry: None,
                    hw: None,
                    hw_format: None,
                })
            }
            MediaKind::Other => Err(anyhow::anyhow!("unsupported stream type")),
        }
    }
}

// Hardware surfaces can't be converted by swscale; copy them to host memory.
fn download(
    frame: ffmpeg_next::frame::Video,
    hw_format: Option<&ffi::AVPixelFormat>,
) -> anyhow::Result<ffmpeg_next::frame::Video> {
    match hw_format {
        Some(format) if frame.format() == Pixel::from(*format) => {}
        _ => return Ok(frame),
    }
    let mut host = ffmpeg_next::frame::Video::empty();
    let code = unsafe { ffi::av_hwframe_transfer_data(host.as_mut_ptr(), frame.as_ptr(), 0) };
    if code < 0 {
        anyhow::bail!(
            "error transferring the data to system memory: {}",
            crate::describe_error(code)
        );
    }
    Ok(host)
}

fn map_receive(result: Result<(), ffmpeg_next::Error>) -> anyhow::Result<Option<Drain>> {
    match result {
        Ok(()) => Ok(None),
        Err(ffmpeg_next::Error::Eof) => Ok(Some(Drain::EndOfStream)),
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
            Ok(Some(Drain::Again))
        }
        Err(err) => Err(err.into()),
    }
}

impl FrameDecoder for AvDecoder {
    fn send_packet(&mut self, packet: &RawPacket) -> anyhow::Result<()> {
        match &mut self.inner {
            DecoderType::Video { decoder, .. } => decoder.send_packet(packet.packet())?,
            DecoderType::Audio(decoder) => decoder.send_packet(packet.packet())?,
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> anyhow::Result<Drain> {
        match &mut self.inner {
            DecoderType::Video { decoder, scaler } => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                if let Some(drain) = map_receive(decoder.receive_frame(&mut frame))? {
                    return Ok(drain);
                }
                let frame = download(frame, self.hw_format.as_deref())?;
                Ok(Drain::Frame(Some(scaler.run(&frame)?)))
            }
            DecoderType::Audio(decoder) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                if let Some(drain) = map_receive(decoder.receive_frame(&mut frame))? {
                    return Ok(drain);
                }
                Ok(Drain::Frame(None))
            }
        }
    }

    fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry
    }

    fn hw_device(&self) -> Option<HwDeviceKind> {
        self.hw.as_ref().map(|d| d.kind())
    }
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
