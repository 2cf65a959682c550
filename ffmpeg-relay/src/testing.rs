//! In-memory engine used by the unit tests: scripted inputs, decoders that
//! count instead of decode, and muxers that record what they were given.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ffmpeg_next::{Rational, codec::Parameters, format::Pixel};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{
        DecoderOptions, Drain, FrameDecoder, FrameGeometry, InputSource, MediaEngine, MuxBackend,
        ReadOutcome,
    },
    frame::BgrImage,
    hw::{self, HwConfig, HwDeviceKind},
    packet::RawPacket,
    stream::{AvStream, MediaKind},
};

pub const FAKE_WIDTH: u32 = 4;
pub const FAKE_HEIGHT: u32 = 2;

pub fn video_stream(index: usize, time_base: Rational) -> AvStream {
    AvStream::new(index, MediaKind::Video, Parameters::new(), time_base)
}

pub fn audio_stream(index: usize, time_base: Rational) -> AvStream {
    AvStream::new(index, MediaKind::Audio, Parameters::new(), time_base)
}

pub fn data_stream(index: usize, time_base: Rational) -> AvStream {
    AvStream::new(index, MediaKind::Other, Parameters::new(), time_base)
}

pub fn packet(stream: &AvStream, pts: i64, duration: i64) -> RawPacket {
    let mut packet = ffmpeg_next::Packet::copy(&[0u8; 16]);
    packet.set_stream(stream.index());
    packet.set_pts(Some(pts));
    packet.set_dts(Some(pts));
    packet.set_duration(duration);
    RawPacket::from((packet, stream.time_base()))
}

pub fn empty_packet(stream: &AvStream) -> RawPacket {
    let mut packet = ffmpeg_next::Packet::empty();
    packet.set_stream(stream.index());
    RawPacket::from((packet, stream.time_base()))
}

/// `count` video packets of 1001 ticks each at 1/30000, i.e. 29.97 fps.
pub fn ntsc_packets(stream: &AvStream, count: i64) -> Vec<RawPacket> {
    (0..count).map(|i| packet(stream, i * 1001, 1001)).collect()
}

pub fn grey_image() -> BgrImage {
    let len = (FAKE_WIDTH * FAKE_HEIGHT) as usize * BgrImage::CHANNELS;
    match BgrImage::new(FAKE_WIDTH, FAKE_HEIGHT, vec![128u8; len]) {
        Ok(image) => image,
        Err(e) => panic!("grey image: {}", e),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEnd {
    /// Report end of stream once the script runs out.
    Eof,
    /// Block like a stalled network source until interrupted.
    Block,
    Fail,
}

pub struct FakeInput {
    streams: Vec<AvStream>,
    packets: VecDeque<RawPacket>,
    end: InputEnd,
    interrupt: CancellationToken,
    closed: Arc<AtomicUsize>,
}

impl InputSource for FakeInput {
    fn streams(&self) -> &[AvStream] {
        &self.streams
    }

    fn best_stream(&self, kind: MediaKind) -> Option<usize> {
        self.streams
            .iter()
            .find(|s| s.kind() == kind)
            .map(|s| s.index())
    }

    fn read_packet(&mut self) -> anyhow::Result<ReadOutcome> {
        if self.interrupt.is_cancelled() {
            return Ok(ReadOutcome::Interrupted);
        }
        if let Some(packet) = self.packets.pop_front() {
            return Ok(ReadOutcome::Packet(packet));
        }
        match self.end {
            InputEnd::Eof => Ok(ReadOutcome::EndOfStream),
            InputEnd::Fail => Err(anyhow::anyhow!("connection reset")),
            InputEnd::Block => {
                while !self.interrupt.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(ReadOutcome::Interrupted)
            }
        }
    }
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Produces `frames_per_packet` frames for each packet; packets whose pts is
/// listed in `fail_pts` are rejected.
pub struct FakeDecoder {
    kind: MediaKind,
    frames_per_packet: usize,
    fail_pts: HashSet<i64>,
    pending: usize,
    hw: Option<HwDeviceKind>,
}

impl FakeDecoder {
    pub fn new(kind: MediaKind, frames_per_packet: usize) -> Self {
        Self {
            kind,
            frames_per_packet,
            fail_pts: HashSet::new(),
            pending: 0,
            hw: None,
        }
    }

    pub fn failing_on(mut self, pts: impl IntoIterator<Item = i64>) -> Self {
        self.fail_pts.extend(pts);
        self
    }
}

impl FrameDecoder for FakeDecoder {
    fn send_packet(&mut self, packet: &RawPacket) -> anyhow::Result<()> {
        if packet.pts().is_some_and(|pts| self.fail_pts.contains(&pts)) {
            anyhow::bail!("Invalid data found when processing input");
        }
        self.pending += self.frames_per_packet;
        Ok(())
    }

    fn receive_frame(&mut self) -> anyhow::Result<Drain> {
        if self.pending == 0 {
            return Ok(Drain::Again);
        }
        self.pending -= 1;
        match self.kind {
            MediaKind::Video => Ok(Drain::Frame(Some(grey_image()))),
            _ => Ok(Drain::Frame(None)),
        }
    }

    fn geometry(&self) -> Option<FrameGeometry> {
        (self.kind == MediaKind::Video).then_some(FrameGeometry {
            width: FAKE_WIDTH,
            height: FAKE_HEIGHT,
            pixel_format: Pixel::YUV420P,
        })
    }

    fn hw_device(&self) -> Option<HwDeviceKind> {
        self.hw
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrittenPacket {
    pub stream: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub position: isize,
}

#[derive(Debug, Default)]
pub struct MuxLog {
    pub format: String,
    pub destination: String,
    pub streams: usize,
    pub headers: usize,
    pub trailers: usize,
    pub writes: Vec<WrittenPacket>,
    pub closed: bool,
}

pub struct FakeMuxer {
    log: Arc<Mutex<MuxLog>>,
    time_base: Rational,
    fail_header: bool,
    fail_writes: bool,
}

impl MuxBackend for FakeMuxer {
    fn add_stream(&mut self, _stream: &AvStream) -> anyhow::Result<usize> {
        let mut log = self.log.lock().unwrap();
        log.streams += 1;
        Ok(log.streams - 1)
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        if self.fail_header {
            anyhow::bail!("Connection refused");
        }
        self.log.lock().unwrap().headers += 1;
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Option<Rational> {
        (index < self.log.lock().unwrap().streams).then_some(self.time_base)
    }

    fn write_interleaved(&mut self, mut packet: RawPacket) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("Broken pipe");
        }
        let p = packet.get_mut();
        let written = WrittenPacket {
            stream: p.stream(),
            pts: p.pts(),
            dts: p.dts(),
            duration: p.duration(),
            position: p.position(),
        };
        self.log.lock().unwrap().writes.push(written);
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().trailers += 1;
        Ok(())
    }
}

impl Drop for FakeMuxer {
    fn drop(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}

pub struct FakeEngine {
    pub streams: Vec<AvStream>,
    pub packets: Mutex<Vec<RawPacket>>,
    pub end: InputEnd,
    pub frames_per_packet: usize,
    pub fail_decode_pts: Vec<i64>,
    pub fail_open_input: bool,
    pub fail_video_decoder: bool,
    pub fail_audio_decoder: bool,
    /// Hardware configs the fake video decoder advertises.
    pub hw_configs: Vec<HwConfig>,
    pub mux_time_base: Rational,
    /// Output formats whose header write fails.
    pub fail_header_for: Vec<&'static str>,
    /// Output formats whose packet writes fail.
    pub fail_writes_for: Vec<&'static str>,
    pub inputs_opened: AtomicUsize,
    pub inputs_closed: Arc<AtomicUsize>,
    pub hw_devices_created: AtomicUsize,
    pub outputs: Mutex<Vec<Arc<Mutex<MuxLog>>>>,
}

impl FakeEngine {
    pub fn new(streams: Vec<AvStream>, packets: Vec<RawPacket>) -> Self {
        Self {
            streams,
            packets: Mutex::new(packets),
            end: InputEnd::Eof,
            frames_per_packet: 1,
            fail_decode_pts: Vec::new(),
            fail_open_input: false,
            fail_video_decoder: false,
            fail_audio_decoder: false,
            hw_configs: Vec::new(),
            mux_time_base: Rational::new(1, 1000),
            fail_header_for: Vec::new(),
            fail_writes_for: Vec::new(),
            inputs_opened: AtomicUsize::new(0),
            inputs_closed: Arc::new(AtomicUsize::new(0)),
            hw_devices_created: AtomicUsize::new(0),
            outputs: Mutex::new(Vec::new()),
        }
    }

    pub fn output(&self, format: &str) -> Option<Arc<Mutex<MuxLog>>> {
        self.outputs
            .lock()
            .unwrap()
            .iter()
            .find(|log| log.lock().unwrap().format == format)
            .cloned()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.lock().unwrap().len()
    }
}

impl MediaEngine for FakeEngine {
    fn open_input(
        &self,
        locator: &str,
        interrupt: CancellationToken,
    ) -> anyhow::Result<Box<dyn InputSource>> {
        if self.fail_open_input || locator.is_empty() {
            anyhow::bail!("No such file or directory");
        }
        self.inputs_opened.fetch_add(1, Ordering::SeqCst);
        let packets = std::mem::take(&mut *self.packets.lock().unwrap());
        Ok(Box::new(FakeInput {
            streams: self.streams.clone(),
            packets: packets.into(),
            end: self.end,
            interrupt,
            closed: self.inputs_closed.clone(),
        }))
    }

    fn open_decoder(
        &self,
        stream: &AvStream,
        options: &DecoderOptions,
    ) -> anyhow::Result<Box<dyn FrameDecoder>> {
        let mut decoder = FakeDecoder::new(stream.kind(), self.frames_per_packet)
            .failing_on(self.fail_decode_pts.iter().copied());
        match stream.kind() {
            MediaKind::Video if self.fail_video_decoder => anyhow::bail!("no decoder for video"),
            MediaKind::Audio if self.fail_audio_decoder => anyhow::bail!("no decoder for audio"),
            MediaKind::Video => {
                if hw::negotiate_hw_format(&self.hw_configs, options.hw_device).is_some() {
                    self.hw_devices_created.fetch_add(1, Ordering::SeqCst);
                    decoder.hw = Some(options.hw_device);
                }
            }
            _ => {}
        }
        Ok(Box::new(decoder))
    }

    fn open_output(&self, format: &str, destination: &str) -> anyhow::Result<Box<dyn MuxBackend>> {
        let log = Arc::new(Mutex::new(MuxLog {
            format: format.to_string(),
            destination: destination.to_string(),
            ..Default::default()
        }));
        self.outputs.lock().unwrap().push(log.clone());
        Ok(Box::new(FakeMuxer {
            log,
            time_base: self.mux_time_base,
            fail_header: self.fail_header_for.contains(&format),
            fail_writes: self.fail_writes_for.contains(&format),
        }))
    }
}
