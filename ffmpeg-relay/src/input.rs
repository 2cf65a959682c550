use std::ffi::{CString, c_int, c_void};
use std::time::Duration;

use ffmpeg_next::{Dictionary, ffi, format::context};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{InputSource, ReadOutcome},
    packet::RawPacket,
    stream::{AvStream, MediaKind},
};

#[derive(Clone, Debug)]
pub struct InputOptions {
    /// Force a demuxer by name (e.g. "lavfi", "v4l2") instead of probing.
    pub format: Option<String>,
    /// Transport for rtsp:// inputs.
    pub rtsp_transport: Option<String>,
    /// Socket I/O timeout for network inputs.
    pub socket_timeout: Option<Duration>,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            format: None,
            rtsp_transport: Some("tcp".to_string()),
            socket_timeout: Some(Duration::from_secs(2)),
        }
    }
}

impl InputOptions {
    fn dictionary(&self, locator: &str) -> Dictionary<'static> {
        let mut dict = Dictionary::new();
        let timeout = self
            .socket_timeout
            .map(|t| t.as_micros().to_string());
        if locator.starts_with("rtsp://") {
            if let Some(transport) = &self.rtsp_transport {
                dict.set("rtsp_transport", transport);
            }
            if let Some(timeout) = &timeout {
                dict.set("timeout", timeout);
            }
        } else if is_network(locator) {
            if let Some(timeout) = &timeout {
                dict.set("rw_timeout", timeout);
            }
        }
        dict
    }
}

fn is_network(locator: &str) -> bool {
    match locator.split_once("://") {
        Some((scheme, _)) => scheme != "file",
        None => false,
    }
}

// Polled by FFmpeg while blocked in open/read; non-zero aborts the call with AVERROR_EXIT.
unsafe extern "C" fn interrupt_callback(opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    let token = unsafe { &*(opaque as *const CancellationToken) };
    token.is_cancelled() as c_int
}

/// Demuxer over a file path, URL or device.
pub struct AvInput {
    inner: context::Input,
    streams: Vec<AvStream>,
    // read by `interrupt_callback`; declared after `inner` so it outlives the context
    interrupt: Box<CancellationToken>,
}

impl AvInput {
    /// Resolve input format by name (e.g. "x11grab", "v4l2") via FFmpeg's av_find_input_format.
    fn find_input_format(name: &str) -> anyhow::Result<*const ffi::AVInputFormat> {
        let cname = CString::new(name)
            .map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
        let ptr = unsafe { ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(anyhow::anyhow!("input format not found: {}", name));
        }
        Ok(ptr)
    }

    pub fn open(
        locator: &str,
        options: &InputOptions,
        interrupt: CancellationToken,
    ) -> anyhow::Result<Self> {
        if locator.is_empty() {
            anyhow::bail!("empty input locator");
        }
        let format = match options.format.as_deref() {
            Some(name) => Self::find_input_format(name)?,
            None => std::ptr::null(),
        };
        let url = CString::new(locator)
            .map_err(|e| anyhow::anyhow!("invalid input locator {:?}: {}", locator, e))?;
        let interrupt = Box::new(interrupt);

        let inner = unsafe {
            let mut ps = ffi::avformat_alloc_context();
            if ps.is_null() {
                anyhow::bail!("can't alloc input context");
            }
            (*ps).interrupt_callback = ffi::AVIOInterruptCB {
                callback: Some(interrupt_callback),
                opaque: &*interrupt as *const CancellationToken as *mut c_void,
            };

            let mut opts = options.dictionary(locator).disown();
            let code = ffi::avformat_open_input(&mut ps, url.as_ptr(), format, &mut opts);
            Dictionary::own(opts);
            if code < 0 {
                // avformat_open_input frees the context on failure
                anyhow::bail!(
                    "can't open input {}: {}",
                    locator,
                    crate::describe_error(code)
                );
            }

            let code = ffi::avformat_find_stream_info(ps, std::ptr::null_mut());
            if code < 0 {
                ffi::avformat_close_input(&mut ps);
                anyhow::bail!(
                    "can't find stream info of {}: {}",
                    locator,
                    crate::describe_error(code)
                );
            }
            context::Input::wrap(ps)
        };

        context::input::dump(&inner, 0, Some(locator));
        let streams: Vec<AvStream> = inner.streams().map(AvStream::from).collect();
        for stream in &streams {
            log::info!(
                "input stream index: {}, kind: {:?}, codec: {:?}, time_base: {}",
                stream.index(),
                stream.kind(),
                stream.parameters().id(),
                stream.time_base()
            );
        }

        Ok(Self {
            inner,
            streams,
            interrupt,
        })
    }
}

impl InputSource for AvInput {
    fn streams(&self) -> &[AvStream] {
        &self.streams
    }

    fn best_stream(&self, kind: MediaKind) -> Option<usize> {
        let media = match kind {
            MediaKind::Video => ffmpeg_next::media::Type::Video,
            MediaKind::Audio => ffmpeg_next::media::Type::Audio,
            MediaKind::Other => return None,
        };
        self.inner.streams().best(media).map(|s| s.index())
    }

    fn read_packet(&mut self) -> anyhow::Result<ReadOutcome> {
        let mut packet = ffmpeg_next::Packet::empty();
        loop {
            match packet.read(&mut self.inner) {
                Ok(()) => {
                    let time_base = self
                        .streams
                        .get(packet.stream())
                        .map(|s| s.time_base())
                        .ok_or_else(|| {
                            anyhow::anyhow!("packet of unknown stream {}", packet.stream())
                        })?;
                    return Ok(ReadOutcome::Packet(RawPacket::from((packet, time_base))));
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(ReadOutcome::EndOfStream),
                Err(ffmpeg_next::Error::Exit) => return Ok(ReadOutcome::Interrupted),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    if self.interrupt.is_cancelled() {
                        return Ok(ReadOutcome::Interrupted);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(err) => {
                    if self.interrupt.is_cancelled() {
                        return Ok(ReadOutcome::Interrupted);
                    }
                    return Err(anyhow::anyhow!("read frame failed: {}", err));
                }
            }
        }
    }
}
