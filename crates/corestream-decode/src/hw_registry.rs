// Process-wide cache of hardware device contexts, one per `HwDeviceType`.
//
// FFmpeg already reference-counts `AVBufferRef` internally; this registry
// keeps exactly one master ref per type and hands callers a fresh
// `av_buffer_ref()` of it on every `request()`. Releasing a caller's ref
// never touches the registry's own master ref, so one decoder releasing its
// handle cannot invalidate another decoder still using the same type.

use std::collections::HashMap;

use ffmpeg_the_third::ffi::{av_buffer_ref, av_buffer_unref, av_hwdevice_ctx_create, av_hwdevice_iterate_types, AVBufferRef, AVHWDeviceType};
use parking_lot::RwLock;

use corestream_types::{CoreError, CoreResult, HwDeviceType};

/// A single reference to a shared hardware device context. Dropping it
/// unrefs the underlying `AVBufferRef`; it does not affect the registry's
/// own cached master reference or any other outstanding handle.
pub struct HwDeviceContextHandle {
    ptr: *mut AVBufferRef,
    device_type: HwDeviceType,
}

// The pointer is only ever dereferenced by FFmpeg itself (as an opaque
// device context); we never touch its pointee from Rust, so moving the
// handle across threads is sound.
unsafe impl Send for HwDeviceContextHandle {}

impl HwDeviceContextHandle {
    /// Raw pointer to hand to `AVCodecContext::hw_device_ctx`. The codec
    /// context takes its own ref via `av_buffer_ref` internally when it is
    /// assigned, so this handle must be kept alive for as long as decoding
    /// continues but is not consumed by the assignment.
    pub fn as_raw(&self) -> *mut AVBufferRef {
        self.ptr
    }

    pub fn device_type(&self) -> HwDeviceType {
        self.device_type
    }

    /// Consumes the handle and returns its raw pointer without unreffing
    /// it. Used when handing ownership of the ref to an `AVCodecContext`,
    /// which takes over unreffing it on `avcodec_free_context`.
    pub fn into_raw(self) -> *mut AVBufferRef {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for HwDeviceContextHandle {
    fn drop(&mut self) {
        unsafe { av_buffer_unref(&mut self.ptr) };
    }
}

#[derive(Default)]
pub struct HwRegistry {
    contexts: RwLock<HashMap<HwDeviceType, *mut AVBufferRef>>,
}

// Same reasoning as `HwDeviceContextHandle`: the map's pointers are opaque
// to Rust and only ever passed to FFmpeg.
unsafe impl Send for HwRegistry {}
unsafe impl Sync for HwRegistry {}

impl HwRegistry {
    pub fn new() -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Enumerate every hardware-device type the linked FFmpeg build can
    /// create a context for. Never includes `HwDeviceType::None`.
    pub fn list_available(&self) -> Vec<HwDeviceType> {
        let _guard = self.contexts.read();
        let mut available = Vec::new();
        let mut ty = AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;
        loop {
            ty = unsafe { av_hwdevice_iterate_types(ty) };
            if ty == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
                break;
            }
            available.push(HwDeviceType::from_av(ty as i32));
        }
        available
    }

    /// Request a reference to the shared context for `device_type`, creating
    /// it on first use. Returns `None` for `HwDeviceType::None` or if the
    /// underlying library cannot create the context.
    pub fn request(&self, device_type: HwDeviceType) -> CoreResult<Option<HwDeviceContextHandle>> {
        if device_type == HwDeviceType::None {
            return Ok(None);
        }

        let mut contexts = self.contexts.write();

        if let Some(&cached) = contexts.get(&device_type) {
            let reffed = unsafe { av_buffer_ref(cached) };
            if reffed.is_null() {
                return Err(CoreError::hardware_acceleration(
                    "failed to take a reference to a cached hardware device context",
                ));
            }
            return Ok(Some(HwDeviceContextHandle { ptr: reffed, device_type }));
        }

        let mut ctx: *mut AVBufferRef = std::ptr::null_mut();
        let rc = unsafe {
            av_hwdevice_ctx_create(
                &mut ctx,
                std::mem::transmute::<i32, AVHWDeviceType>(device_type.to_av()),
                std::ptr::null(),
                std::ptr::null_mut(),
                0,
            )
        };
        if rc < 0 || ctx.is_null() {
            return Ok(None);
        }

        contexts.insert(device_type, ctx);

        let reffed = unsafe { av_buffer_ref(ctx) };
        if reffed.is_null() {
            return Err(CoreError::hardware_acceleration(
                "failed to take a reference to a freshly created hardware device context",
            ));
        }
        Ok(Some(HwDeviceContextHandle { ptr: reffed, device_type }))
    }

    /// Clears every cached master reference. Terminal: any handle still
    /// outstanding remains individually valid (it holds its own ref), but
    /// no further `request()` for the same type will reuse it.
    pub fn clean_up(&self) {
        let mut contexts = self.contexts.write();
        for (_, mut ctx) in contexts.drain() {
            unsafe { av_buffer_unref(&mut ctx) };
        }
    }
}

impl Drop for HwRegistry {
    fn drop(&mut self) {
        self.clean_up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_available_never_includes_none() {
        let registry = HwRegistry::new();
        assert!(!registry.list_available().contains(&HwDeviceType::None));
    }

    #[test]
    fn request_none_returns_no_handle() {
        let registry = HwRegistry::new();
        let handle = registry.request(HwDeviceType::None).unwrap();
        assert!(handle.is_none());
    }

    #[test]
    fn clean_up_on_an_empty_registry_is_a_no_op() {
        let registry = HwRegistry::new();
        registry.clean_up();
        registry.clean_up();
    }

    #[test]
    fn requesting_an_unsupported_type_yields_none_not_an_error() {
        // Whichever types this build doesn't actually support (likely most,
        // in a headless test environment) must fail soft rather than error.
        let registry = HwRegistry::new();
        let candidates = [
            HwDeviceType::Cuda,
            HwDeviceType::VaApi,
            HwDeviceType::VideoToolbox,
            HwDeviceType::D3d11Va,
        ];
        for candidate in candidates {
            match registry.request(candidate) {
                Ok(_) | Err(CoreError::HardwareAcceleration(_)) => {}
                Err(other) => panic!("unexpected error variant: {other:?}"),
            }
        }
    }
}
