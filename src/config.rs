use std::path::PathBuf;
use std::time::Duration;

use ffmpeg_relay::{HwDeviceKind, SessionConfig};

const DEFAULT_RUN_DURATION: Duration = Duration::from_secs(200);

/// Process settings: positional `<input> [output]` arguments, everything
/// else from `RELAY_*` environment variables.
pub struct RelayConfig {
    session: SessionConfig,
    root: PathBuf,
    duration: Duration,
}

impl RelayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut args = std::env::args().skip(1);
        let input = args
            .next()
            .or_else(|| var("RELAY_INPUT"))
            .ok_or_else(|| anyhow::anyhow!("usage: stream-relay <input> [output]"))?;
        let output = args.next().or_else(|| var("RELAY_OUTPUT"));

        let mut builder = SessionConfig::builder()
            .input(input)
            .record(flag("RELAY_RECORD", true)?)
            .snapshot(flag("RELAY_SNAPSHOT", false)?)
            .refcounted_frames(flag("RELAY_REFCOUNTED", false)?);
        if let Some(output) = output {
            builder = builder.republish_to(output);
        }
        if let Some(hw) = var("RELAY_HW_DEVICE") {
            builder = builder.hw_device(hw.parse::<HwDeviceKind>()?);
        }
        if let Some(rate) = var("RELAY_FRAME_RATE") {
            builder = builder.frame_rate(number(&rate, "RELAY_FRAME_RATE")?);
        }
        if let Some(capacity) = var("RELAY_QUEUE_CAPACITY") {
            builder = builder.queue_capacity(number(&capacity, "RELAY_QUEUE_CAPACITY")?);
        }

        let root = match var("RELAY_ROOT") {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir()?,
        };
        let duration = match var("RELAY_DURATION_SECS") {
            Some(secs) => Duration::from_secs(number(&secs, "RELAY_DURATION_SECS")?),
            None => DEFAULT_RUN_DURATION,
        };

        Ok(Self {
            session: builder.build(),
            root,
            duration,
        })
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag(name: &str, default: bool) -> anyhow::Result<bool> {
    match var(name).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(anyhow::anyhow!("{}: expected a boolean, got {:?}", name, other)),
    }
}

fn number<T: std::str::FromStr>(value: &str, name: &str) -> anyhow::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{}: expected a number, got {:?}", name, value))
}
