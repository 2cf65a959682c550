use ffmpeg_next::format::Pixel;

use super::{HwConfig, HwDeviceKind, negotiate_hw_format, select_surface_format, supported_hw_devices};

fn h264_configs() -> Vec<HwConfig> {
    vec![
        HwConfig {
            pix_fmt: Pixel::QSV,
            device_ctx_method: false,
            device_kind: HwDeviceKind::Qsv,
        },
        HwConfig {
            pix_fmt: Pixel::CUDA,
            device_ctx_method: true,
            device_kind: HwDeviceKind::Cuda,
        },
        HwConfig {
            pix_fmt: Pixel::D3D11,
            device_ctx_method: true,
            device_kind: HwDeviceKind::D3d11va,
        },
    ]
}

#[test]
fn test_negotiate_picks_matching_device_ctx_config() {
    let configs = h264_configs();
    assert_eq!(
        negotiate_hw_format(&configs, HwDeviceKind::Cuda),
        Some(Pixel::CUDA)
    );
    assert_eq!(
        negotiate_hw_format(&configs, HwDeviceKind::D3d11va),
        Some(Pixel::D3D11)
    );
}

#[test]
fn test_negotiate_skips_configs_without_device_ctx_method() {
    let configs = h264_configs();
    assert_eq!(negotiate_hw_format(&configs, HwDeviceKind::Qsv), None);
}

#[test]
fn test_negotiate_takes_first_match_in_order() {
    let mut configs = h264_configs();
    configs.push(HwConfig {
        pix_fmt: Pixel::NV12,
        device_ctx_method: true,
        device_kind: HwDeviceKind::Cuda,
    });
    assert_eq!(
        negotiate_hw_format(&configs, HwDeviceKind::Cuda),
        Some(Pixel::CUDA)
    );
}

#[test]
fn test_negotiate_unsupported_kind_falls_back_to_software() {
    let configs = h264_configs();
    assert_eq!(negotiate_hw_format(&configs, HwDeviceKind::Vaapi), None);
    assert_eq!(negotiate_hw_format(&[], HwDeviceKind::Cuda), None);
    assert_eq!(negotiate_hw_format(&configs, HwDeviceKind::None), None);
}

#[test]
fn test_select_surface_prefers_negotiated_format() {
    let offered = [Pixel::CUDA, Pixel::YUV420P];
    assert_eq!(
        select_surface_format(&offered, Some(Pixel::CUDA)),
        Some(Pixel::CUDA)
    );
}

#[test]
fn test_select_surface_falls_back_to_software_format() {
    let offered = [Pixel::CUDA, Pixel::NV12, Pixel::YUV420P];
    assert_eq!(
        select_surface_format(&offered, Some(Pixel::D3D11)),
        Some(Pixel::NV12)
    );
    assert_eq!(select_surface_format(&offered, None), Some(Pixel::NV12));
    assert_eq!(select_surface_format(&[], None), None);
}

#[test]
fn test_device_kind_parse() {
    assert_eq!("cuda".parse::<HwDeviceKind>().unwrap(), HwDeviceKind::Cuda);
    assert_eq!("DXVA2".parse::<HwDeviceKind>().unwrap(), HwDeviceKind::Dxva2);
    assert_eq!("".parse::<HwDeviceKind>().unwrap(), HwDeviceKind::None);
    assert!("gpu".parse::<HwDeviceKind>().is_err());

    for kind in [
        HwDeviceKind::Vaapi,
        HwDeviceKind::VideoToolbox,
        HwDeviceKind::D3d11va,
        HwDeviceKind::Vulkan,
    ] {
        assert_eq!(kind.name().parse::<HwDeviceKind>().unwrap(), kind);
    }
}

#[test]
fn test_supported_hw_devices_lists_known_names() {
    for name in supported_hw_devices() {
        assert!(!name.is_empty());
        assert_ne!(name, "none");
    }
}
