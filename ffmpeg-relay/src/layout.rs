use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const VIDEO_DIR: &str = "video";
pub const PICTURE_DIR: &str = "picture";

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Video,
    Picture,
}

impl FileKind {
    pub fn dir(&self) -> &'static str {
        match self {
            FileKind::Video => VIDEO_DIR,
            FileKind::Picture => PICTURE_DIR,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Video => "mp4",
            FileKind::Picture => "jpg",
        }
    }
}

#[derive(Default)]
struct LayoutState {
    today: Option<String>,
    last_check: Option<Instant>,
    last_millis: i64,
}

/// Date-partitioned output directories:
/// `<root>/<YYYY-MM-DD>/video` and `<root>/<YYYY-MM-DD>/picture`.
///
/// File names are local epoch milliseconds, bumped when two names would land
/// in the same millisecond.
pub struct RecordingLayout {
    root: PathBuf,
    state: Mutex<LayoutState>,
}

impl RecordingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(LayoutState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LayoutState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn today(&self) -> Option<String> {
        self.lock().today.clone()
    }

    pub fn dir(&self, date: &str, kind: FileKind) -> PathBuf {
        self.root.join(date).join(kind.dir())
    }

    /// Makes sure today's directories exist. Returns true when they were
    /// (re)created for a new date.
    pub fn refresh(&self) -> anyhow::Result<bool> {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        self.refresh_for(&today)
    }

    pub fn refresh_for(&self, date: &str) -> anyhow::Result<bool> {
        let mut state = self.lock();
        if state.today.as_deref() == Some(date) {
            return Ok(false);
        }
        for kind in [FileKind::Video, FileKind::Picture] {
            let dir = self.dir(date, kind);
            std::fs::create_dir_all(&dir)
                .map_err(|e| anyhow::anyhow!("can't create directory {}: {}", dir.display(), e))?;
        }
        log::info!("output directories ready for {}", date);
        state.today = Some(date.to_string());
        Ok(true)
    }

    /// Rate-limited [`refresh`](Self::refresh), checked at most once per second.
    pub fn refresh_if_due(&self, now: Instant) -> anyhow::Result<bool> {
        {
            let mut state = self.lock();
            if let Some(last) = state.last_check {
                if now.saturating_duration_since(last) < REFRESH_INTERVAL {
                    return Ok(false);
                }
            }
            state.last_check = Some(now);
        }
        self.refresh()
    }

    /// A fresh file name for `kind` in today's directory.
    pub fn file_path(&self, kind: FileKind) -> anyhow::Result<PathBuf> {
        if self.today().is_none() {
            self.refresh()?;
        }
        let mut state = self.lock();
        let today = state
            .today
            .clone()
            .ok_or_else(|| anyhow::anyhow!("output directories not initialised"))?;
        let millis = chrono::Local::now()
            .timestamp_millis()
            .max(state.last_millis + 1);
        state.last_millis = millis;
        Ok(self
            .dir(&today, kind)
            .join(format!("{}.{}", millis, kind.extension())))
    }
}

#[cfg(test)]
#[path = "layout_test.rs"]
mod layout_test;
