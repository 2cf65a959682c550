use std::collections::HashMap;

use anyhow::Context as _;
use ffmpeg_next::{Rational, format::context};

use crate::{
    engine::{MediaEngine, MuxBackend},
    packet::RawPacket,
    stream::{AvStream, MediaKind},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    /// Local file in the day's video directory.
    Recording,
    /// Network re-publication, e.g. an rtmp:// endpoint.
    Republish,
}

impl OutputKind {
    /// Container the kind is muxed into.
    pub fn format_name(&self) -> &'static str {
        match self {
            OutputKind::Recording => "mp4",
            OutputKind::Republish => "flv",
        }
    }
}

struct StreamMapping {
    output_index: usize,
    input_time_base: Rational,
    kind: MediaKind,
}

/// One multiplexing sink. Packets are rescaled from their input stream's
/// time base to the time base the muxer settled on after the header.
pub struct OutputTarget {
    kind: OutputKind,
    destination: String,
    backend: Option<Box<dyn MuxBackend>>,
    mapping: HashMap<usize, StreamMapping>,
    initialized: bool,
    written: u64,
}

impl OutputTarget {
    pub fn new(kind: OutputKind) -> Self {
        Self {
            kind,
            destination: String::new(),
            backend: None,
            mapping: HashMap::new(),
            initialized: false,
            written: 0,
        }
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Allocates the container, mirrors every input stream and writes the
    /// header. Nothing is kept when any step fails.
    pub fn open(
        &mut self,
        engine: &dyn MediaEngine,
        destination: &str,
        streams: &[AvStream],
    ) -> anyhow::Result<()> {
        if self.backend.is_some() {
            anyhow::bail!("output {} is already open", self.destination);
        }
        if destination.trim().is_empty() {
            anyhow::bail!("invalid {:?} output destination", self.kind);
        }
        if streams.is_empty() {
            anyhow::bail!("no streams to mux into {}", destination);
        }

        let format = self.kind.format_name();
        let mut backend = engine
            .open_output(format, destination)
            .with_context(|| format!("can't open {} output {}", format, destination))?;

        let mut mapping = HashMap::with_capacity(streams.len());
        for stream in streams {
            let output_index = backend
                .add_stream(stream)
                .with_context(|| format!("can't add stream {} to {}", stream.index(), destination))?;
            mapping.insert(
                stream.index(),
                StreamMapping {
                    output_index,
                    input_time_base: stream.time_base(),
                    kind: stream.kind(),
                },
            );
        }

        backend
            .write_header()
            .with_context(|| format!("can't write header of {}", destination))?;

        log::info!("output opened: {} ({})", destination, format);
        self.destination = destination.to_string();
        self.backend = Some(backend);
        self.mapping = mapping;
        self.initialized = true;
        self.written = 0;
        Ok(())
    }

    /// Relays one packet. Returns `Ok(false)` when the packet was skipped:
    /// the target isn't open, the packet is empty or its stream is not
    /// audio or video.
    pub fn write(&mut self, packet: &RawPacket) -> anyhow::Result<bool> {
        if !self.initialized || packet.is_empty() {
            return Ok(false);
        }
        let Some(backend) = self.backend.as_mut() else {
            return Ok(false);
        };
        let Some(mapping) = self.mapping.get(&packet.index()) else {
            return Ok(false);
        };
        if !mapping.kind.is_av() {
            return Ok(false);
        }

        let output_time_base = backend
            .stream_time_base(mapping.output_index)
            .ok_or_else(|| anyhow::anyhow!("output stream {} missing", mapping.output_index))?;
        let input_time_base = mapping.input_time_base;

        let mut copy = packet.clone();
        let p = copy.get_mut();
        p.rescale_ts(input_time_base, output_time_base);
        p.set_position(-1);
        p.set_stream(mapping.output_index);

        backend
            .write_interleaved(copy)
            .with_context(|| format!("error muxing packet into {}", self.destination))?;
        self.written += 1;
        Ok(true)
    }

    /// Writes the trailer if the header made it out, then releases the
    /// container. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            if self.initialized {
                if let Err(e) = backend.write_trailer() {
                    log::error!("write trailer of {} failed: {:#}", self.destination, e);
                }
            }
            drop(backend);
            log::info!(
                "output closed: {}, {} packets written",
                self.destination,
                self.written
            );
        }
        self.initialized = false;
        self.mapping.clear();
    }
}

impl Drop for OutputTarget {
    fn drop(&mut self) {
        self.close();
    }
}

/// FFmpeg muxer with its I/O opened at construction.
pub struct AvOutput {
    inner: context::Output,
}

unsafe impl Send for AvOutput {}

impl AvOutput {
    pub fn new(destination: &str, format: &str) -> anyhow::Result<Self> {
        let inner = ffmpeg_next::format::output_as(destination, format).map_err(|e| {
            anyhow::anyhow!("can't create output context {}: {}", destination, e)
        })?;
        Ok(Self { inner })
    }
}

impl MuxBackend for AvOutput {
    fn add_stream(&mut self, stream: &AvStream) -> anyhow::Result<usize> {
        let codec_parameters = stream.parameters().clone();
        let mut ost = self
            .inner
            .add_stream(ffmpeg_next::encoder::find(codec_parameters.id()))?;
        ost.set_parameters(codec_parameters);
        // let the muxer pick a tag valid for its container
        unsafe {
            (*(*ost.as_mut_ptr()).codecpar).codec_tag = 0;
        }
        Ok(ost.index())
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        self.inner.write_header()?;
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Option<Rational> {
        self.inner.stream(index).map(|s| s.time_base())
    }

    fn write_interleaved(&mut self, mut packet: RawPacket) -> anyhow::Result<()> {
        packet.get_mut().write_interleaved(&mut self.inner)?;
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        self.inner.write_trailer()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "output_test.rs"]
mod output_test;
