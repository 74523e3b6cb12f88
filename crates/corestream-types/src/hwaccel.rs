/// Hardware-device type tag. Values line up with `AVHWDeviceType` so a
/// decoder can round-trip them through the raw FFI surface without a lookup
/// table; `None` is never returned by `HwRegistry::list_available`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwDeviceType {
    None,
    Vdpau,
    Cuda,
    VaApi,
    Dxva2,
    Qsv,
    VideoToolbox,
    D3d11Va,
    Drm,
    OpenCl,
    MediaCodec,
    Vulkan,
    D3d12Va,
}

impl HwDeviceType {
    /// Maps to the underlying library's `AVHWDeviceType` enum value.
    pub fn from_av(raw: i32) -> Self {
        use ffmpeg_the_third::ffi::AVHWDeviceType as Av;
        match raw {
            x if x == Av::AV_HWDEVICE_TYPE_VDPAU as i32 => Self::Vdpau,
            x if x == Av::AV_HWDEVICE_TYPE_CUDA as i32 => Self::Cuda,
            x if x == Av::AV_HWDEVICE_TYPE_VAAPI as i32 => Self::VaApi,
            x if x == Av::AV_HWDEVICE_TYPE_DXVA2 as i32 => Self::Dxva2,
            x if x == Av::AV_HWDEVICE_TYPE_QSV as i32 => Self::Qsv,
            x if x == Av::AV_HWDEVICE_TYPE_VIDEOTOOLBOX as i32 => Self::VideoToolbox,
            x if x == Av::AV_HWDEVICE_TYPE_D3D11VA as i32 => Self::D3d11Va,
            x if x == Av::AV_HWDEVICE_TYPE_DRM as i32 => Self::Drm,
            x if x == Av::AV_HWDEVICE_TYPE_OPENCL as i32 => Self::OpenCl,
            x if x == Av::AV_HWDEVICE_TYPE_MEDIACODEC as i32 => Self::MediaCodec,
            x if x == Av::AV_HWDEVICE_TYPE_VULKAN as i32 => Self::Vulkan,
            x if x == Av::AV_HWDEVICE_TYPE_D3D12VA as i32 => Self::D3d12Va,
            _ => Self::None,
        }
    }

    pub fn to_av(self) -> i32 {
        use ffmpeg_the_third::ffi::AVHWDeviceType as Av;
        (match self {
            Self::None => Av::AV_HWDEVICE_TYPE_NONE,
            Self::Vdpau => Av::AV_HWDEVICE_TYPE_VDPAU,
            Self::Cuda => Av::AV_HWDEVICE_TYPE_CUDA,
            Self::VaApi => Av::AV_HWDEVICE_TYPE_VAAPI,
            Self::Dxva2 => Av::AV_HWDEVICE_TYPE_DXVA2,
            Self::Qsv => Av::AV_HWDEVICE_TYPE_QSV,
            Self::VideoToolbox => Av::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
            Self::D3d11Va => Av::AV_HWDEVICE_TYPE_D3D11VA,
            Self::Drm => Av::AV_HWDEVICE_TYPE_DRM,
            Self::OpenCl => Av::AV_HWDEVICE_TYPE_OPENCL,
            Self::MediaCodec => Av::AV_HWDEVICE_TYPE_MEDIACODEC,
            Self::Vulkan => Av::AV_HWDEVICE_TYPE_VULKAN,
            Self::D3d12Va => Av::AV_HWDEVICE_TYPE_D3D12VA,
        }) as i32
    }
}
