use ffmpeg_next::format::Pixel;

use super::Scaler;

fn grey_yuv420p(width: u32, height: u32) -> ffmpeg_next::frame::Video {
    let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, width, height);
    for plane in 0..3 {
        frame.data_mut(plane).fill(128);
    }
    frame
}

#[test]
fn test_converts_to_packed_bgr_at_native_size() -> anyhow::Result<()> {
    let mut scaler = Scaler::new();
    let image = scaler.run(&grey_yuv420p(32, 18))?;

    assert_eq!(image.width(), 32);
    assert_eq!(image.height(), 18);
    assert_eq!(image.data().len(), 32 * 18 * 3);
    for px in image.data().chunks(3) {
        let (b, g, r) = (px[0] as i32, px[1] as i32, px[2] as i32);
        assert!((b - g).abs() <= 4 && (g - r).abs() <= 4, "not grey: {:?}", px);
    }
    Ok(())
}

#[test]
fn test_rebuilds_context_when_geometry_changes() -> anyhow::Result<()> {
    let mut scaler = Scaler::new();
    let first = scaler.run(&grey_yuv420p(32, 18))?;
    let second = scaler.run(&grey_yuv420p(64, 36))?;

    assert_eq!((first.width(), first.height()), (32, 18));
    assert_eq!((second.width(), second.height()), (64, 36));
    Ok(())
}

#[test]
fn test_rejects_empty_frame() {
    let mut scaler = Scaler::new();
    assert!(scaler.run(&ffmpeg_next::frame::Video::empty()).is_err());
}
