use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{SessionConfig, StreamSession},
    decoder::DecodeStage,
    engine::{DecoderOptions, InputSource, MediaEngine, ReadOutcome},
    frame::BgrImage,
    hw::HwDeviceKind,
    layout::{FileKind, RecordingLayout},
    output::{OutputKind, OutputTarget},
    packet::RawPacket,
    pool::WorkerPool,
    queue::PacketQueue,
    stats::{RelayStats, StatsSnapshot},
    stream::{AvStream, MediaKind},
};

const SNAPSHOT_POOL_THREADS: usize = 1;
const SNAPSHOT_POOL_MAX_THREADS: usize = 4;
const SNAPSHOT_QUALITY: u8 = 90;

type LatestImage = Arc<Mutex<Option<BgrImage>>>;

fn lock_image(latest: &LatestImage) -> MutexGuard<'_, Option<BgrImage>> {
    latest.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drives one relay run at a time: an ingest thread reading packets into a
/// bounded queue and a frame thread that decodes them and hands them to the
/// recording and republish outputs.
pub struct SessionController {
    engine: Arc<dyn MediaEngine>,
    layout: Arc<RecordingLayout>,
    session: Option<StreamSession>,
    cancel: CancellationToken,
    queue: Option<Arc<PacketQueue<RawPacket>>>,
    ingest: Option<JoinHandle<Box<dyn InputSource>>>,
    frames: Option<JoinHandle<FrameHandler>>,
    pool: Option<Arc<WorkerPool>>,
    finished: Arc<AtomicBool>,
    latest: LatestImage,
    stats: Arc<RelayStats>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn MediaEngine>, root: impl Into<PathBuf>) -> Self {
        let layout = RecordingLayout::new(root);
        if let Err(e) = layout.refresh() {
            log::warn!("prepare output directories failed: {:#}", e);
        }
        Self {
            engine,
            layout: Arc::new(layout),
            session: None,
            cancel: CancellationToken::new(),
            queue: None,
            ingest: None,
            frames: None,
            pool: None,
            finished: Arc::new(AtomicBool::new(true)),
            latest: Arc::new(Mutex::new(None)),
            stats: Arc::new(RelayStats::default()),
        }
    }

    pub fn layout(&self) -> &RecordingLayout {
        &self.layout
    }

    /// The current run, if one was started and not stopped.
    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    /// False once the pipeline ended by itself or after [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.frames.is_some() && !self.finished.load(Ordering::SeqCst)
    }

    /// The most recently converted video picture.
    pub fn latest_image(&self) -> Option<BgrImage> {
        lock_image(&self.latest).clone()
    }

    /// Width and height of the video stream, `(0, 0)` without one.
    pub fn video_size(&self) -> (u32, u32) {
        self.session
            .as_ref()
            .and_then(|s| s.geometry())
            .map(|g| (g.width, g.height))
            .unwrap_or((0, 0))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn start(&mut self, config: SessionConfig) -> anyhow::Result<()> {
        config.validate()?;
        if self.frames.is_some() {
            anyhow::bail!("session already started, stop it first");
        }

        self.cancel = CancellationToken::new();
        self.stats = Arc::new(RelayStats::default());
        self.latest = Arc::new(Mutex::new(None));
        self.finished = Arc::new(AtomicBool::new(false));
        if let Err(e) = self.layout.refresh() {
            log::warn!("prepare output directories failed: {:#}", e);
        }

        let input = self
            .engine
            .open_input(&config.input, self.cancel.clone())
            .with_context(|| format!("can't open input {}", config.input))?;
        let (session, video, audio) = self.open_decoders(config, input.as_ref())?;
        let outputs = self.open_outputs(session.config(), input.streams())?;

        let pool = if session.config().snapshot {
            Some(Arc::new(WorkerPool::start(
                "relay-snapshot",
                SNAPSHOT_POOL_THREADS,
                SNAPSHOT_POOL_MAX_THREADS,
            )?))
        } else {
            None
        };

        let queue = Arc::new(PacketQueue::new(session.config().queue_capacity));
        let handler = FrameHandler {
            queue: queue.clone(),
            video,
            audio,
            outputs,
            layout: self.layout.clone(),
            latest: self.latest.clone(),
            stats: self.stats.clone(),
            snapshots: pool.clone().map(|pool| SnapshotWriter {
                pool,
                interval: session.config().snapshot_interval,
                last: None,
            }),
            finished: self.finished.clone(),
        };

        let frames = std::thread::Builder::new()
            .name("relay-frames".to_string())
            .spawn(move || handler.run())
            .context("can't spawn frame thread")?;

        let ingest = {
            let queue = queue.clone();
            let cancel = self.cancel.clone();
            let stats = self.stats.clone();
            std::thread::Builder::new()
                .name("relay-ingest".to_string())
                .spawn(move || ingest_loop(input, queue, cancel, stats))
        };
        let ingest = match ingest {
            Ok(handle) => handle,
            Err(e) => {
                queue.shutdown();
                if let Ok(handler) = frames.join() {
                    handler.release();
                }
                if let Some(pool) = pool {
                    pool.stop();
                }
                return Err(anyhow::anyhow!("can't spawn ingest thread: {}", e));
            }
        };

        log::info!(
            "session started: {} -> record: {}, republish: {}, snapshot: {}",
            session.config().input,
            session.config().record,
            session.config().republish,
            session.config().snapshot
        );
        self.session = Some(session);
        self.queue = Some(queue);
        self.ingest = Some(ingest);
        self.frames = Some(frames);
        self.pool = pool;
        Ok(())
    }

    fn open_decoders(
        &self,
        config: SessionConfig,
        input: &dyn InputSource,
    ) -> anyhow::Result<(StreamSession, Option<DecodeStage>, Option<DecodeStage>)> {
        let video_stream = find_stream(input, MediaKind::Video);
        let audio_stream = find_stream(input, MediaKind::Audio);
        if video_stream.is_none() && audio_stream.is_none() {
            anyhow::bail!("can't find audio or video stream in the input");
        }

        let video = match video_stream {
            Some(stream) => {
                let options = DecoderOptions {
                    hw_device: config.hw_device,
                    refcounted_frames: config.refcounted_frames,
                };
                let decoder = self
                    .engine
                    .open_decoder(stream, &options)
                    .with_context(|| format!("can't open video decoder of stream {}", stream.index()))?;
                if !config.hw_device.is_none() && decoder.hw_device().is_none() {
                    log::warn!("{} requested, decoding video in software", config.hw_device);
                }
                Some(DecodeStage::new(stream, decoder))
            }
            None => None,
        };

        let audio = match audio_stream {
            Some(stream) => {
                let options = DecoderOptions {
                    hw_device: HwDeviceKind::None,
                    refcounted_frames: config.refcounted_frames,
                };
                match self.engine.open_decoder(stream, &options) {
                    Ok(decoder) => Some(DecodeStage::new(stream, decoder)),
                    Err(e) => {
                        log::warn!(
                            "can't open audio decoder of stream {}, relaying only: {:#}",
                            stream.index(),
                            e
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let session = StreamSession::new(
            config,
            video.as_ref().map(|v| v.stream_index()),
            audio.as_ref().map(|a| a.stream_index()),
            video.as_ref().and_then(|v| v.geometry()),
            video_stream.map(|s| s.fps()).unwrap_or(0.0),
        );
        Ok((session, video, audio))
    }

    fn open_outputs(
        &self,
        config: &SessionConfig,
        streams: &[AvStream],
    ) -> anyhow::Result<Vec<OutputTarget>> {
        let mut outputs = Vec::with_capacity(2);
        if config.republish {
            let mut target = OutputTarget::new(OutputKind::Republish);
            target.open(self.engine.as_ref(), &config.output, streams)?;
            outputs.push(target);
        }
        if config.record {
            let path = self.layout.file_path(FileKind::Video)?;
            let mut target = OutputTarget::new(OutputKind::Recording);
            target.open(self.engine.as_ref(), &path.to_string_lossy(), streams)?;
            outputs.push(target);
        }
        Ok(outputs)
    }

    /// Ends the run and releases everything it opened. Does nothing when no
    /// run is active.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }

        let input = self.ingest.take().and_then(|handle| match handle.join() {
            Ok(input) => Some(input),
            Err(_) => {
                log::error!("ingest thread panicked");
                None
            }
        });
        let handler = self.frames.take().and_then(|handle| match handle.join() {
            Ok(handler) => Some(handler),
            Err(_) => {
                log::error!("frame thread panicked");
                None
            }
        });

        if let Some(input) = input {
            drop(input);
            log::debug!("input closed");
        }
        if let Some(handler) = handler {
            handler.release();
        }
        if let Some(pool) = self.pool.take() {
            pool.stop();
        }
        self.queue = None;
        self.finished.store(true, Ordering::SeqCst);

        if let Some(session) = self.session.take() {
            let stats = self.stats.snapshot();
            log::info!(
                "session stopped: {}, {} packets read, {} handled, {} decode failures",
                session.config().input,
                stats.packets_read,
                stats.packets_handled,
                stats.decode_failures
            );
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn find_stream(input: &dyn InputSource, kind: MediaKind) -> Option<&AvStream> {
    let index = input.best_stream(kind)?;
    input.streams().iter().find(|s| s.index() == index)
}

fn ingest_loop(
    mut input: Box<dyn InputSource>,
    queue: Arc<PacketQueue<RawPacket>>,
    cancel: CancellationToken,
    stats: Arc<RelayStats>,
) -> Box<dyn InputSource> {
    let mut count = 0u64;
    while !cancel.is_cancelled() {
        match input.read_packet() {
            Ok(ReadOutcome::Packet(packet)) => {
                stats.packet_read();
                if queue.push(packet).is_err() {
                    break;
                }
                count += 1;
            }
            Ok(ReadOutcome::EndOfStream) => {
                log::info!("end of input reached");
                break;
            }
            Ok(ReadOutcome::Interrupted) => {
                log::info!("input read interrupted");
                break;
            }
            Err(e) => {
                log::error!("read packet failed: {:#}", e);
                break;
            }
        }
    }
    queue.shutdown();
    log::info!("reading ended, {} packets queued", count);
    input
}

struct SnapshotWriter {
    pool: Arc<WorkerPool>,
    interval: Duration,
    last: Option<Instant>,
}

impl SnapshotWriter {
    fn maybe_save(&mut self, image: &BgrImage, layout: &RecordingLayout, stats: &Arc<RelayStats>) {
        let now = Instant::now();
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.interval {
                return;
            }
        }
        self.last = Some(now);

        let path = match layout.file_path(FileKind::Picture) {
            Ok(path) => path,
            Err(e) => {
                log::warn!("snapshot skipped: {:#}", e);
                return;
            }
        };
        let image = image.clone();
        let stats = stats.clone();
        let submitted = self.pool.submit(move || match image.save_jpeg(&path, SNAPSHOT_QUALITY) {
            Ok(()) => stats.snapshot_saved(),
            Err(e) => log::warn!("save snapshot {} failed: {:#}", path.display(), e),
        });
        if let Err(e) = submitted {
            log::warn!("snapshot not queued: {:#}", e);
        }
    }
}

/// State owned by the frame thread for the whole run; handed back to the
/// controller on join so outputs are closed there.
struct FrameHandler {
    queue: Arc<PacketQueue<RawPacket>>,
    video: Option<DecodeStage>,
    audio: Option<DecodeStage>,
    outputs: Vec<OutputTarget>,
    layout: Arc<RecordingLayout>,
    latest: LatestImage,
    stats: Arc<RelayStats>,
    snapshots: Option<SnapshotWriter>,
    finished: Arc<AtomicBool>,
}

impl FrameHandler {
    fn run(mut self) -> Self {
        while let Some(packet) = self.queue.pop() {
            self.handle(&packet);
        }
        self.finished.store(true, Ordering::SeqCst);

        let stats = self.stats.snapshot();
        log::info!(
            "Save finished, {} video frames, {} audio frames, {} recorded, {} republished",
            stats.video_frames,
            stats.audio_frames,
            stats.recorded,
            stats.republished
        );
        self
    }

    fn handle(&mut self, packet: &RawPacket) {
        if let Err(e) = self.layout.refresh_if_due(Instant::now()) {
            log::warn!("refresh output directories failed: {:#}", e);
        }

        let stage = [self.video.as_mut(), self.audio.as_mut()]
            .into_iter()
            .flatten()
            .find(|stage| stage.stream_index() == packet.index());
        if let Some(stage) = stage {
            let mut converted = None;
            match stage.decode(packet, |image| converted = Some(image)) {
                Ok(frames) => match stage.kind() {
                    MediaKind::Video => self.stats.video_frames(frames),
                    _ => self.stats.audio_frames(frames),
                },
                Err(e) => {
                    self.stats.decode_failure();
                    log::warn!(
                        "decode packet of stream {} failed: {:#}",
                        packet.index(),
                        e
                    );
                }
            }
            if let Some(image) = converted {
                if let Some(snapshots) = self.snapshots.as_mut() {
                    snapshots.maybe_save(&image, &self.layout, &self.stats);
                }
                *lock_image(&self.latest) = Some(image);
            }
        }

        for output in &mut self.outputs {
            match output.write(packet) {
                Ok(true) => match output.kind() {
                    OutputKind::Recording => self.stats.recorded(),
                    OutputKind::Republish => self.stats.republished(),
                },
                Ok(false) => {}
                Err(e) => {
                    self.stats.write_failure();
                    log::error!("{:#}", e);
                }
            }
        }
        self.stats.packet_handled();
    }

    /// Closes the outputs, then the decoders together with their hardware
    /// devices.
    fn release(mut self) {
        for output in &mut self.outputs {
            output.close();
        }
        self.outputs.clear();
        self.video.take();
        self.audio.take();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
