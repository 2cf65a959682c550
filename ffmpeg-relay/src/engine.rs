//! The seam between the relay pipeline and the media engine that demuxes,
//! decodes and muxes. [`FfmpegEngine`] is the production implementation.

use ffmpeg_next::Rational;
use ffmpeg_next::format::Pixel;
use tokio_util::sync::CancellationToken;

use crate::{
    decoder::AvDecoder,
    frame::BgrImage,
    hw::HwDeviceKind,
    input::{AvInput, InputOptions},
    output::AvOutput,
    packet::RawPacket,
    stream::{AvStream, MediaKind},
};

pub enum ReadOutcome {
    Packet(RawPacket),
    EndOfStream,
    /// The read gave up because the interrupt token was cancelled.
    Interrupted,
}

/// An opened demuxer.
pub trait InputSource: Send {
    fn streams(&self) -> &[AvStream];

    fn best_stream(&self, kind: MediaKind) -> Option<usize>;

    /// Blocks until the next packet is available. Must return
    /// [`ReadOutcome::Interrupted`] soon after the interrupt token passed at
    /// open time is cancelled.
    fn read_packet(&mut self) -> anyhow::Result<ReadOutcome>;
}

/// Result of one `receive_frame` call on a decoder.
pub enum Drain {
    /// A frame was produced; video decoders attach its BGR conversion.
    Frame(Option<BgrImage>),
    /// The decoder needs another packet.
    Again,
    EndOfStream,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub pixel_format: Pixel,
}

#[derive(Clone, Debug, Default)]
pub struct DecoderOptions {
    pub hw_device: HwDeviceKind,
    pub refcounted_frames: bool,
}

pub trait FrameDecoder: Send {
    fn send_packet(&mut self, packet: &RawPacket) -> anyhow::Result<()>;

    fn receive_frame(&mut self) -> anyhow::Result<Drain>;

    /// Picture geometry for video decoders.
    fn geometry(&self) -> Option<FrameGeometry>;

    /// The hardware device decoding runs on, `None` for software decode.
    fn hw_device(&self) -> Option<HwDeviceKind>;
}

/// An allocated output container with its I/O already open.
pub trait MuxBackend: Send {
    /// Declares an output stream copying `stream`'s codec parameters and
    /// returns its index in the output.
    fn add_stream(&mut self, stream: &AvStream) -> anyhow::Result<usize>;

    fn write_header(&mut self) -> anyhow::Result<()>;

    /// Time base chosen by the muxer for an output stream; only meaningful
    /// once the header is written.
    fn stream_time_base(&self, index: usize) -> Option<Rational>;

    fn write_interleaved(&mut self, packet: RawPacket) -> anyhow::Result<()>;

    fn write_trailer(&mut self) -> anyhow::Result<()>;
}

pub trait MediaEngine: Send + Sync {
    fn open_input(
        &self,
        locator: &str,
        interrupt: CancellationToken,
    ) -> anyhow::Result<Box<dyn InputSource>>;

    fn open_decoder(
        &self,
        stream: &AvStream,
        options: &DecoderOptions,
    ) -> anyhow::Result<Box<dyn FrameDecoder>>;

    fn open_output(&self, format: &str, destination: &str) -> anyhow::Result<Box<dyn MuxBackend>>;
}

#[derive(Clone, Debug, Default)]
pub struct FfmpegEngine {
    input_options: InputOptions,
}

impl FfmpegEngine {
    pub fn new(input_options: InputOptions) -> Self {
        Self { input_options }
    }
}

impl MediaEngine for FfmpegEngine {
    fn open_input(
        &self,
        locator: &str,
        interrupt: CancellationToken,
    ) -> anyhow::Result<Box<dyn InputSource>> {
        Ok(Box::new(AvInput::open(locator, &self.input_options, interrupt)?))
    }

    fn open_decoder(
        &self,
        stream: &AvStream,
        options: &DecoderOptions,
    ) -> anyhow::Result<Box<dyn FrameDecoder>> {
        Ok(Box::new(AvDecoder::open(stream, options)?))
    }

    fn open_output(&self, format: &str, destination: &str) -> anyhow::Result<Box<dyn MuxBackend>> {
        Ok(Box::new(AvOutput::new(destination, format)?))
    }
}
