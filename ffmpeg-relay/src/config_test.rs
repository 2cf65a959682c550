use std::time::Duration;

use ffmpeg_next::format::Pixel;

use super::{SessionConfig, StreamSession};
use crate::{engine::FrameGeometry, hw::HwDeviceKind};

#[test]
fn test_builder_defaults() {
    let config = SessionConfig::builder().input("in.mp4").record(true).build();

    assert_eq!(config.input, "in.mp4");
    assert!(config.record);
    assert!(!config.republish);
    assert!(!config.snapshot);
    assert_eq!(config.hw_device, HwDeviceKind::None);
    assert_eq!(config.frame_rate, 25);
    assert_eq!(config.queue_capacity, 512);
    assert_eq!(config.snapshot_interval, Duration::from_secs(1));
    assert!(config.validate().is_ok());
}

#[test]
fn test_republish_to_enables_republish() {
    let config = SessionConfig::builder()
        .input("rtsp://camera/stream")
        .republish_to("rtmp://server/live/cam")
        .hw_device(HwDeviceKind::Cuda)
        .build();

    assert!(config.republish);
    assert_eq!(config.output, "rtmp://server/live/cam");
    assert!(config.has_sink());
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_rejects_bad_configs() {
    let no_sink = SessionConfig::builder().input("in.mp4").build();
    assert!(no_sink.validate().is_err());

    let no_input = SessionConfig::builder().record(true).build();
    assert!(no_input.validate().is_err());

    let no_output = SessionConfig::builder()
        .input("in.mp4")
        .republish(true)
        .build();
    assert!(no_output.validate().is_err());
}

#[test]
fn test_session_frame_rate_falls_back_to_hint() {
    let config = SessionConfig::builder()
        .input("in.mp4")
        .record(true)
        .frame_rate(30)
        .build();
    let geometry = FrameGeometry {
        width: 640,
        height: 360,
        pixel_format: Pixel::YUV420P,
    };

    let session = StreamSession::new(config.clone(), Some(0), None, Some(geometry), 0.0);
    assert_eq!(session.frame_rate(), 30.0);
    assert_eq!(session.video_index(), Some(0));
    assert_eq!(session.audio_index(), None);
    assert_eq!(session.geometry(), Some(geometry));

    let session = StreamSession::new(config, Some(0), Some(1), None, 29.97);
    assert_eq!(session.frame_rate(), 29.97);
}
