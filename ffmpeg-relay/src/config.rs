use std::time::Duration;

use crate::{engine::FrameGeometry, hw::HwDeviceKind, queue::DEFAULT_QUEUE_CAPACITY};

pub const DEFAULT_FRAME_RATE: u32 = 25;
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// What one relay run reads and where it sends it.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// File path, network URL or device name.
    pub input: String,
    /// Republish destination, only used when `republish` is set.
    pub output: String,
    pub record: bool,
    pub republish: bool,
    pub snapshot: bool,
    pub hw_device: HwDeviceKind,
    pub refcounted_frames: bool,
    /// Reported when the input doesn't advertise a frame rate.
    pub frame_rate: u32,
    pub queue_capacity: usize,
    pub snapshot_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input: String::new(),
            output: String::new(),
            record: false,
            republish: false,
            snapshot: false,
            hw_device: HwDeviceKind::None,
            refcounted_frames: false,
            frame_rate: DEFAULT_FRAME_RATE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// True when at least one of record, republish or snapshot is enabled.
    pub fn has_sink(&self) -> bool {
        self.record || self.republish || self.snapshot
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input.trim().is_empty() {
            anyhow::bail!("input locator is empty");
        }
        if !self.has_sink() {
            anyhow::bail!("nothing to do: record, republish and snapshot are all disabled");
        }
        if self.republish && self.output.trim().is_empty() {
            anyhow::bail!("republish requested without an output locator");
        }
        Ok(())
    }
}

pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.config.input = input.into();
        self
    }

    /// Sets the republish destination and turns republishing on.
    pub fn republish_to(mut self, output: impl Into<String>) -> Self {
        self.config.output = output.into();
        self.config.republish = true;
        self
    }

    pub fn republish(mut self, republish: bool) -> Self {
        self.config.republish = republish;
        self
    }

    pub fn record(mut self, record: bool) -> Self {
        self.config.record = record;
        self
    }

    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.config.snapshot = snapshot;
        self
    }

    pub fn hw_device(mut self, hw_device: HwDeviceKind) -> Self {
        self.config.hw_device = hw_device;
        self
    }

    pub fn refcounted_frames(mut self, refcounted: bool) -> Self {
        self.config.refcounted_frames = refcounted;
        self
    }

    pub fn frame_rate(mut self, frame_rate: u32) -> Self {
        self.config.frame_rate = frame_rate;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.config.snapshot_interval = interval;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Description of a started run: its configuration plus what was resolved
/// from the input.
#[derive(Clone, Debug)]
pub struct StreamSession {
    config: SessionConfig,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    geometry: Option<FrameGeometry>,
    frame_rate: f32,
}

impl StreamSession {
    pub fn new(
        config: SessionConfig,
        video_index: Option<usize>,
        audio_index: Option<usize>,
        geometry: Option<FrameGeometry>,
        advertised_rate: f32,
    ) -> Self {
        let frame_rate = if advertised_rate > 0.0 {
            advertised_rate
        } else {
            config.frame_rate as f32
        };
        Self {
            config,
            video_index,
            audio_index,
            geometry,
            frame_rate,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn video_index(&self) -> Option<usize> {
        self.video_index
    }

    pub fn audio_index(&self) -> Option<usize> {
        self.audio_index
    }

    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
