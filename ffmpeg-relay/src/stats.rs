use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the ingest and frame threads of one run.
#[derive(Debug, Default)]
pub struct RelayStats {
    packets_read: AtomicU64,
    packets_handled: AtomicU64,
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    decode_failures: AtomicU64,
    recorded: AtomicU64,
    republished: AtomicU64,
    write_failures: AtomicU64,
    snapshots: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_read: u64,
    pub packets_handled: u64,
    pub video_frames: u64,
    pub audio_frames: u64,
    pub decode_failures: u64,
    pub recorded: u64,
    pub republished: u64,
    pub write_failures: u64,
    pub snapshots: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl RelayStats {
    pub fn packet_read(&self) {
        bump(&self.packets_read, 1);
    }

    pub fn packet_handled(&self) {
        bump(&self.packets_handled, 1);
    }

    pub fn video_frames(&self, n: usize) {
        bump(&self.video_frames, n as u64);
    }

    pub fn audio_frames(&self, n: usize) {
        bump(&self.audio_frames, n as u64);
    }

    pub fn decode_failure(&self) {
        bump(&self.decode_failures, 1);
    }

    pub fn recorded(&self) {
        bump(&self.recorded, 1);
    }

    pub fn republished(&self) {
        bump(&self.republished, 1);
    }

    pub fn write_failure(&self) {
        bump(&self.write_failures, 1);
    }

    pub fn snapshot_saved(&self) {
        bump(&self.snapshots, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_read: self.packets_read.load(Ordering::Relaxed),
            packets_handled: self.packets_handled.load(Ordering::Relaxed),
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
            republished: self.republished.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
        }
    }
}
