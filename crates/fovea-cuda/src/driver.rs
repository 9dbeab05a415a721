//! Minimal CUDA driver API, resolved at runtime via `dlopen`.
//!
//! The engine needs a handful of driver entry points: init, device lookup,
//! primary-context retain/release, linear allocations, and synchronous
//! host/device copies. Loading them dynamically keeps `libcuda` out of the
//! link line, so the same binary runs on GPU-less hosts.

use std::ffi::{c_int, c_void};
use std::sync::{Arc, OnceLock};

use fovea_core::error::{EngineError, Result};

pub type CUresult = i32;
pub const CUDA_SUCCESS: CUresult = 0;

pub(crate) type CUdevice = c_int;

#[cfg(target_os = "linux")]
use std::ffi::{CStr, CString, c_char, c_uint};

#[cfg(target_os = "linux")]
unsafe extern "C" {
    fn dlopen(filename: *const c_char, flags: c_int) -> *mut c_void;
    fn dlerror() -> *const c_char;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
}

#[cfg(target_os = "linux")]
const RTLD_NOW: c_int = 2;
#[cfg(target_os = "linux")]
const RTLD_GLOBAL: c_int = 0x100;

#[cfg(target_os = "linux")]
struct Api {
    cu_init: unsafe extern "C" fn(c_uint) -> CUresult,
    cu_device_get_count: unsafe extern "C" fn(*mut c_int) -> CUresult,
    cu_device_get: unsafe extern "C" fn(*mut CUdevice, c_int) -> CUresult,
    cu_device_primary_ctx_retain: unsafe extern "C" fn(*mut *mut c_void, CUdevice) -> CUresult,
    cu_device_primary_ctx_release: unsafe extern "C" fn(CUdevice) -> CUresult,
    cu_ctx_set_current: unsafe extern "C" fn(*mut c_void) -> CUresult,
    cu_mem_alloc: unsafe extern "C" fn(*mut u64, usize) -> CUresult,
    cu_mem_free: unsafe extern "C" fn(u64) -> CUresult,
    cu_memcpy_htod: unsafe extern "C" fn(u64, *const c_void, usize) -> CUresult,
    cu_memcpy_dtoh: unsafe extern "C" fn(*mut c_void, u64, usize) -> CUresult,
    cu_ctx_synchronize: unsafe extern "C" fn() -> CUresult,
}

#[cfg(target_os = "linux")]
fn last_dl_error() -> String {
    // SAFETY: dlerror returns a thread-local C string or null.
    unsafe {
        let p = dlerror();
        if p.is_null() {
            "unknown dl error".to_string()
        } else {
            CStr::from_ptr(p).to_string_lossy().to_string()
        }
    }
}

#[cfg(target_os = "linux")]
fn load_symbol<T>(handle: *mut c_void, names: &[&'static str]) -> std::result::Result<T, String> {
    for name in names {
        let cname = CString::new(*name).map_err(|_| format!("invalid CUDA symbol name: {name}"))?;
        // SAFETY: handle is a valid dlopen handle and cname is a valid C symbol name.
        let ptr = unsafe { dlsym(handle, cname.as_ptr()) };
        if !ptr.is_null() {
            // SAFETY: ptr points to a function with signature T.
            return Ok(unsafe { std::mem::transmute_copy(&ptr) });
        }
    }
    Err(format!(
        "dlsym({}) failed: {}",
        names.join("|"),
        last_dl_error()
    ))
}

#[cfg(target_os = "linux")]
fn load_api() -> std::result::Result<Api, String> {
    let mut handle = std::ptr::null_mut();
    let mut last_err = "unknown dlopen error".to_string();
    for candidate in ["libcuda.so.1", "libcuda.so"] {
        let soname =
            CString::new(candidate).map_err(|_| format!("invalid CUDA soname: {candidate}"))?;
        // SAFETY: static soname and valid dlopen flags.
        handle = unsafe { dlopen(soname.as_ptr(), RTLD_NOW | RTLD_GLOBAL) };
        if !handle.is_null() {
            break;
        }
        last_err = last_dl_error();
    }
    if handle.is_null() {
        return Err(format!("dlopen(libcuda.so.1|libcuda.so) failed: {last_err}"));
    }

    Ok(Api {
        cu_init: load_symbol(handle, &["cuInit"])?,
        cu_device_get_count: load_symbol(handle, &["cuDeviceGetCount"])?,
        cu_device_get: load_symbol(handle, &["cuDeviceGet"])?,
        cu_device_primary_ctx_retain: load_symbol(handle, &["cuDevicePrimaryCtxRetain"])?,
        cu_device_primary_ctx_release: load_symbol(
            handle,
            &["cuDevicePrimaryCtxRelease_v2", "cuDevicePrimaryCtxRelease"],
        )?,
        cu_ctx_set_current: load_symbol(handle, &["cuCtxSetCurrent"])?,
        cu_mem_alloc: load_symbol(handle, &["cuMemAlloc_v2", "cuMemAlloc"])?,
        cu_mem_free: load_symbol(handle, &["cuMemFree_v2", "cuMemFree"])?,
        cu_memcpy_htod: load_symbol(handle, &["cuMemcpyHtoD_v2", "cuMemcpyHtoD"])?,
        cu_memcpy_dtoh: load_symbol(handle, &["cuMemcpyDtoH_v2", "cuMemcpyDtoH"])?,
        cu_ctx_synchronize: load_symbol(handle, &["cuCtxSynchronize"])?,
    })
}

/// Loaded and initialised CUDA driver. One per process, shared via `Arc`.
pub struct CudaDriver {
    #[cfg(target_os = "linux")]
    api: Api,
}

static DRIVER: OnceLock<std::result::Result<Arc<CudaDriver>, String>> = OnceLock::new();

impl CudaDriver {
    /// Load `libcuda` and run `cuInit` once per process.
    pub fn load() -> Result<Arc<Self>> {
        let loaded = DRIVER.get_or_init(|| {
            #[cfg(target_os = "linux")]
            {
                let api = load_api()?;
                // SAFETY: cuInit takes a flags word that must be zero.
                let rc = unsafe { (api.cu_init)(0) };
                if rc != CUDA_SUCCESS {
                    return Err(format!("cuInit failed: CUresult {rc}"));
                }
                Ok(Arc::new(CudaDriver { api }))
            }
            #[cfg(not(target_os = "linux"))]
            {
                Err("runtime CUDA driver loading is only supported on linux".to_string())
            }
        });
        loaded.clone().map_err(EngineError::Cuda)
    }

    fn check(rc: CUresult, what: &str) -> Result<()> {
        if rc == CUDA_SUCCESS {
            Ok(())
        } else {
            Err(EngineError::Cuda(format!("{what} failed: CUresult {rc}")))
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn unavailable<T>() -> Result<T> {
        Err(EngineError::Cuda("CUDA driver not available".into()))
    }

    pub fn device_count(&self) -> Result<i32> {
        #[cfg(target_os = "linux")]
        {
            let mut count = 0;
            // SAFETY: cuDeviceGetCount writes the count.
            let rc = unsafe { (self.api.cu_device_get_count)(&mut count) };
            Self::check(rc, "cuDeviceGetCount")?;
            Ok(count)
        }
        #[cfg(not(target_os = "linux"))]
        Self::unavailable()
    }

    pub(crate) fn device_get(&self, ordinal: u32) -> Result<CUdevice> {
        #[cfg(target_os = "linux")]
        {
            let mut device: CUdevice = 0;
            // SAFETY: cuDeviceGet writes the device handle for a valid ordinal.
            let rc = unsafe { (self.api.cu_device_get)(&mut device, ordinal as c_int) };
            Self::check(rc, "cuDeviceGet")?;
            Ok(device)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = ordinal;
            Self::unavailable()
        }
    }

    pub(crate) fn primary_ctx_retain(&self, device: CUdevice) -> Result<usize> {
        #[cfg(target_os = "linux")]
        {
            let mut ctx: *mut c_void = std::ptr::null_mut();
            // SAFETY: cuDevicePrimaryCtxRetain writes the context handle.
            let rc = unsafe { (self.api.cu_device_primary_ctx_retain)(&mut ctx, device) };
            Self::check(rc, "cuDevicePrimaryCtxRetain")?;
            Ok(ctx as usize)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = device;
            Self::unavailable()
        }
    }

    pub(crate) fn primary_ctx_release(&self, device: CUdevice) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: balanced against a prior retain on the same device.
            let rc = unsafe { (self.api.cu_device_primary_ctx_release)(device) };
            Self::check(rc, "cuDevicePrimaryCtxRelease")
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = device;
            Self::unavailable()
        }
    }

    pub(crate) fn ctx_set_current(&self, ctx: usize) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: ctx came from cuDevicePrimaryCtxRetain and is still retained.
            let rc = unsafe { (self.api.cu_ctx_set_current)(ctx as *mut c_void) };
            Self::check(rc, "cuCtxSetCurrent")
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = ctx;
            Self::unavailable()
        }
    }

    pub(crate) fn mem_alloc(&self, len: usize) -> Result<u64> {
        #[cfg(target_os = "linux")]
        {
            let mut dptr: u64 = 0;
            // SAFETY: cuMemAlloc writes the device pointer; a context is current.
            let rc = unsafe { (self.api.cu_mem_alloc)(&mut dptr, len) };
            Self::check(rc, "cuMemAlloc")?;
            Ok(dptr)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = len;
            Self::unavailable()
        }
    }

    pub(crate) fn mem_free(&self, dptr: u64) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: dptr came from cuMemAlloc and is freed exactly once.
            let rc = unsafe { (self.api.cu_mem_free)(dptr) };
            Self::check(rc, "cuMemFree")
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = dptr;
            Self::unavailable()
        }
    }

    pub(crate) fn memcpy_htod(&self, dptr: u64, src: &[u8]) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: src is valid for src.len() bytes and the caller
            // bounds-checked dptr against the allocation.
            let rc = unsafe {
                (self.api.cu_memcpy_htod)(dptr, src.as_ptr() as *const c_void, src.len())
            };
            Self::check(rc, "cuMemcpyHtoD")
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (dptr, src);
            Self::unavailable()
        }
    }

    pub(crate) fn memcpy_dtoh(&self, dst: &mut [u8], dptr: u64) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: dst is valid for dst.len() bytes and the caller
            // bounds-checked dptr against the allocation.
            let rc = unsafe {
                (self.api.cu_memcpy_dtoh)(dst.as_mut_ptr() as *mut c_void, dptr, dst.len())
            };
            Self::check(rc, "cuMemcpyDtoH")
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (dst, dptr);
            Self::unavailable()
        }
    }

    pub(crate) fn ctx_synchronize(&self) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: synchronises whatever context is current on this thread.
            let rc = unsafe { (self.api.cu_ctx_synchronize)() };
            Self::check(rc, "cuCtxSynchronize")
        }
        #[cfg(not(target_os = "linux"))]
        Self::unavailable()
    }
}

impl std::fmt::Debug for CudaDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaDriver").finish_non_exhaustive()
    }
}
