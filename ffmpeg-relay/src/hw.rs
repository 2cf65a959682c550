//! Hardware-accelerated decode negotiation.
//!
//! The decoder's hardware configs are walked in order and the first one that can be bound
//! to a device context of the requested kind wins. When nothing matches, decoding falls
//! back to software and no device is created.

use std::ffi::{CStr, CString};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;

// AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX
const HW_CONFIG_METHOD_HW_DEVICE_CTX: i32 = 0x01;
// AV_PIX_FMT_FLAG_HWACCEL
const PIX_FMT_FLAG_HWACCEL: u64 = 1 << 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HwDeviceKind {
    #[default]
    None,
    Vdpau,
    Cuda,
    Vaapi,
    Dxva2,
    Qsv,
    VideoToolbox,
    D3d11va,
    Drm,
    OpenCl,
    MediaCodec,
    Vulkan,
}

impl HwDeviceKind {
    /// FFmpeg's name for the device type, as used by `-hwaccel`.
    pub fn name(&self) -> &'static str {
        match self {
            HwDeviceKind::None => "none",
            HwDeviceKind::Vdpau => "vdpau",
            HwDeviceKind::Cuda => "cuda",
            HwDeviceKind::Vaapi => "vaapi",
            HwDeviceKind::Dxva2 => "dxva2",
            HwDeviceKind::Qsv => "qsv",
            HwDeviceKind::VideoToolbox => "videotoolbox",
            HwDeviceKind::D3d11va => "d3d11va",
            HwDeviceKind::Drm => "drm",
            HwDeviceKind::OpenCl => "opencl",
            HwDeviceKind::MediaCodec => "mediacodec",
            HwDeviceKind::Vulkan => "vulkan",
        }
    }

    pub fn is_none(&self) -> bool {
        *self == HwDeviceKind::None
    }

    fn to_av(self) -> ffi::AVHWDeviceType {
        if self.is_none() {
            return ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;
        }
        match CString::new(self.name()) {
            Ok(name) => unsafe { ffi::av_hwdevice_find_type_by_name(name.as_ptr()) },
            Err(_) => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE,
        }
    }

    fn from_av(device_type: ffi::AVHWDeviceType) -> Self {
        device_type_name(device_type)
            .and_then(|name| name.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for HwDeviceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => HwDeviceKind::None,
            "vdpau" => HwDeviceKind::Vdpau,
            "cuda" => HwDeviceKind::Cuda,
            "vaapi" => HwDeviceKind::Vaapi,
            "dxva2" => HwDeviceKind::Dxva2,
            "qsv" => HwDeviceKind::Qsv,
            "videotoolbox" => HwDeviceKind::VideoToolbox,
            "d3d11va" => HwDeviceKind::D3d11va,
            "drm" => HwDeviceKind::Drm,
            "opencl" => HwDeviceKind::OpenCl,
            "mediacodec" => HwDeviceKind::MediaCodec,
            "vulkan" => HwDeviceKind::Vulkan,
            other => anyhow::bail!("unknown hardware device type: {}", other),
        };
        Ok(kind)
    }
}

impl Display for HwDeviceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a decoder's hardware configuration list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HwConfig {
    pub pix_fmt: Pixel,
    pub device_ctx_method: bool,
    pub device_kind: HwDeviceKind,
}

/// Picks the hardware surface format for `wanted`, or `None` for the software path.
pub fn negotiate_hw_format(configs: &[HwConfig], wanted: HwDeviceKind) -> Option<Pixel> {
    if wanted.is_none() {
        return None;
    }
    configs
        .iter()
        .find(|c| c.device_ctx_method && c.device_kind == wanted)
        .map(|c| c.pix_fmt)
}

/// Chooses among the formats a decoder offers when it (re)initialises its
/// output. The negotiated hardware format is preferred; otherwise the first
/// software format is taken so decoding carries on without acceleration.
pub fn select_surface_format(offered: &[Pixel], hw_format: Option<Pixel>) -> Option<Pixel> {
    if let Some(hw) = hw_format {
        if offered.contains(&hw) {
            return Some(hw);
        }
    }
    offered
        .iter()
        .copied()
        .find(|fmt| !is_hw_surface(*fmt))
        .or_else(|| offered.first().copied())
}

fn is_hw_surface(format: Pixel) -> bool {
    let av: ffi::AVPixelFormat = format.into();
    unsafe {
        let desc = ffi::av_pix_fmt_desc_get(av);
        !desc.is_null() && ((*desc).flags & PIX_FMT_FLAG_HWACCEL) != 0
    }
}

/// Reads the hardware configs a decoder advertises, in FFmpeg's order.
pub fn decoder_hw_configs(codec: &ffmpeg_next::Codec) -> Vec<HwConfig> {
    let mut configs = Vec::new();
    for i in 0.. {
        let config = unsafe { ffi::avcodec_get_hw_config(codec.as_ptr(), i) };
        if config.is_null() {
            break;
        }
        let config = unsafe { &*config };
        configs.push(HwConfig {
            pix_fmt: Pixel::from(config.pix_fmt),
            device_ctx_method: config.methods & HW_CONFIG_METHOD_HW_DEVICE_CTX != 0,
            device_kind: HwDeviceKind::from_av(config.device_type),
        });
    }
    configs
}

fn device_type_name(device_type: ffi::AVHWDeviceType) -> Option<String> {
    unsafe {
        let name = ffi::av_hwdevice_get_type_name(device_type);
        if name.is_null() {
            return None;
        }
        Some(CStr::from_ptr(name).to_string_lossy().into_owned())
    }
}

/// Names of the hardware device types this FFmpeg build was compiled with.
pub fn supported_hw_devices() -> Vec<String> {
    let mut names = Vec::new();
    let mut device_type = ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;
    loop {
        device_type = unsafe { ffi::av_hwdevice_iterate_types(device_type) };
        if device_type == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }
        if let Some(name) = device_type_name(device_type) {
            names.push(name);
        }
    }
    names
}

/// Owned reference to a hardware device context. The decoder holds its own
/// reference; this one is released on drop.
pub struct HwDevice {
    kind: HwDeviceKind,
    ctx: *mut ffi::AVBufferRef,
}

unsafe impl Send for HwDevice {}

impl HwDevice {
    pub fn create(kind: HwDeviceKind) -> anyhow::Result<Self> {
        let device_type = kind.to_av();
        if device_type == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            anyhow::bail!("hardware device type {} is not available", kind);
        }
        let mut ctx: *mut ffi::AVBufferRef = std::ptr::null_mut();
        let code = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut ctx,
                device_type,
                std::ptr::null(),
                std::ptr::null_mut(),
                0,
            )
        };
        if code < 0 || ctx.is_null() {
            anyhow::bail!(
                "failed to create {} device: {}",
                kind,
                crate::describe_error(code)
            );
        }
        log::info!("created hardware device: {}", kind);
        Ok(Self { kind, ctx })
    }

    pub fn kind(&self) -> HwDeviceKind {
        self.kind
    }

    /// Attaches a new reference of this device to a codec context.
    ///
    /// # Safety
    /// `codec_ctx` must point to a valid, not yet opened codec context.
    pub unsafe fn attach(&self, codec_ctx: *mut ffi::AVCodecContext) -> anyhow::Result<()> {
        let new_ref = unsafe { ffi::av_buffer_ref(self.ctx) };
        if new_ref.is_null() {
            anyhow::bail!("failed to reference {} device", self.kind);
        }
        unsafe {
            (*codec_ctx).hw_device_ctx = new_ref;
        }
        Ok(())
    }
}

impl Drop for HwDevice {
    fn drop(&mut self) {
        if !self.ctx.is_null() {
            unsafe { ffi::av_buffer_unref(&mut self.ctx) };
            log::debug!("released hardware device: {}", self.kind);
        }
    }
}

#[cfg(test)]
#[path = "hw_test.rs"]
mod hw_test;
