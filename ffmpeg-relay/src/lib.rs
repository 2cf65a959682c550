/// Registers FFmpeg components (formats, devices, network) and lowers
/// FFmpeg's own logging to warnings. Call once at startup.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Warning);
    Ok(())
}

/// Formats a negative FFmpeg return code as `Code[<n>]: <message>`.
pub fn describe_error(code: i32) -> String {
    format!("Code[{}]: {}", code, ffmpeg_next::Error::from(code))
}

pub mod config;
pub mod decoder;
pub mod engine;
pub mod frame;
pub mod hw;
pub mod input;
pub mod layout;
pub mod output;
pub mod packet;
pub mod pool;
pub mod queue;
pub mod scaler;
pub mod session;
pub mod stats;
pub mod stream;

#[cfg(test)]
mod testing;

pub use config::{SessionConfig, SessionConfigBuilder, StreamSession};
pub use engine::{FfmpegEngine, MediaEngine};
pub use hw::{HwDeviceKind, supported_hw_devices};
pub use input::InputOptions;
pub use session::SessionController;
pub use stats::StatsSnapshot;
