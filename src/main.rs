use std::sync::Arc;

use ffmpeg_relay::{FfmpegEngine, InputOptions, SessionController};

mod config;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_next", log::LevelFilter::Warn)
        .filter_module("ffmpeg_relay", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    ffmpeg_relay::init()?;
    log::info!(
        "supported hardware devices: {}",
        ffmpeg_relay::supported_hw_devices().join(", ")
    );

    let config = config::RelayConfig::from_env()?;
    let engine = Arc::new(FfmpegEngine::new(InputOptions::default()));
    let mut session = SessionController::new(engine, config.root());
    session.start(config.session().clone())?;

    // ends early when the input runs out
    let mut finished = tokio::time::interval(std::time::Duration::from_millis(500));
    let deadline = tokio::time::sleep(config.duration());
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            _ = finished.tick() => {
                if !session.is_running() {
                    break;
                }
            }
        }
    }

    let (width, height) = session.video_size();
    session.stop();
    log::info!("relay done ({}x{}): {:?}", width, height, session.stats());
    Ok(())
}
