//! Device handles and frame buffers.
//!
//! A [`GpuDevice`] retains the primary context of one CUDA device for the
//! lifetime of a job; stage threads re-establish the device binding with
//! [`GpuDevice::bind_thread`] when they start. In host mode every operation
//! is a no-op and frame buffers are plain heap memory, which keeps the whole
//! pipeline runnable on machines without a driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use fovea_core::config::DeviceMode;
use fovea_core::error::{EngineError, Result};

use crate::driver::CudaDriver;

/// Where frame buffers live for this job.
#[derive(Clone)]
pub enum GpuRuntime {
    /// Host memory, software codec and network backends.
    Host,
    /// Device memory through the loaded driver.
    Cuda(Arc<CudaDriver>),
}

impl GpuRuntime {
    /// Resolve a [`DeviceMode`] against what the host actually offers.
    pub fn detect(mode: DeviceMode) -> Result<Self> {
        match mode {
            DeviceMode::Cpu => Ok(Self::Host),
            DeviceMode::Cuda => {
                let driver = CudaDriver::load()?;
                let count = driver.device_count()?;
                if count == 0 {
                    return Err(EngineError::Cuda("no CUDA devices visible".into()));
                }
                info!(devices = count, "CUDA driver loaded");
                Ok(Self::Cuda(driver))
            }
            DeviceMode::Auto => match CudaDriver::load() {
                Ok(driver) if driver.device_count().map(|c| c > 0).unwrap_or(false) => {
                    info!("CUDA driver loaded, using device memory");
                    Ok(Self::Cuda(driver))
                }
                Ok(_) | Err(_) => {
                    info!("CUDA driver unavailable, falling back to host memory");
                    Ok(Self::Host)
                }
            },
        }
    }

    pub fn is_cuda(&self) -> bool {
        matches!(self, Self::Cuda(_))
    }
}

impl std::fmt::Debug for GpuRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => f.write_str("GpuRuntime::Host"),
            Self::Cuda(_) => f.write_str("GpuRuntime::Cuda"),
        }
    }
}

/// One retained primary context on one device (or a host-mode placeholder).
#[derive(Debug)]
pub struct GpuDevice {
    runtime: GpuRuntime,
    ordinal: u32,
    ctx: usize,
    released: AtomicBool,
}

impl GpuDevice {
    /// Retain the primary context of device `ordinal`.
    pub fn open(runtime: &GpuRuntime, ordinal: u32) -> Result<Self> {
        let ctx = match runtime {
            GpuRuntime::Host => 0,
            GpuRuntime::Cuda(driver) => {
                let device = driver.device_get(ordinal)?;
                driver.primary_ctx_retain(device)?
            }
        };
        Ok(Self {
            runtime: runtime.clone(),
            ordinal,
            ctx,
            released: AtomicBool::new(false),
        })
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn is_cuda(&self) -> bool {
        self.runtime.is_cuda()
    }

    /// Make this device's context current on the calling thread. Stage
    /// workers call this once before touching buffers.
    pub fn bind_thread(&self) -> Result<()> {
        match &self.runtime {
            GpuRuntime::Host => Ok(()),
            GpuRuntime::Cuda(driver) => driver.ctx_set_current(self.ctx),
        }
    }

    /// Allocate one frame buffer of `len` bytes on this device.
    pub fn alloc_frames(&self, len: usize) -> Result<FrameBuffer> {
        match &self.runtime {
            GpuRuntime::Host => Ok(FrameBuffer {
                mem: Mem::Host(vec![0u8; len]),
            }),
            GpuRuntime::Cuda(driver) => {
                let dptr = driver.mem_alloc(len)?;
                Ok(FrameBuffer {
                    mem: Mem::Device {
                        driver: driver.clone(),
                        dptr,
                        len,
                    },
                })
            }
        }
    }

    /// Block until all outstanding work on the current context finished.
    pub fn synchronize(&self) -> Result<()> {
        match &self.runtime {
            GpuRuntime::Host => Ok(()),
            GpuRuntime::Cuda(driver) => driver.ctx_synchronize(),
        }
    }

    /// Release the retained primary context. Idempotent.
    pub fn release_context(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match &self.runtime {
            GpuRuntime::Host => Ok(()),
            GpuRuntime::Cuda(driver) => {
                let device = driver.device_get(self.ordinal)?;
                driver.primary_ctx_release(device)
            }
        }
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        if let Err(err) = self.release_context() {
            warn!(ordinal = self.ordinal, error = %err, "primary context release failed");
        }
    }
}

enum Mem {
    Host(Vec<u8>),
    Device {
        driver: Arc<CudaDriver>,
        dptr: u64,
        len: usize,
    },
}

impl Drop for Mem {
    fn drop(&mut self) {
        if let Mem::Device { driver, dptr, .. } = self
            && let Err(err) = driver.mem_free(*dptr)
        {
            warn!(error = %err, "device buffer free failed");
        }
    }
}

/// A frame buffer sized for one work item of decoded NV12 frames.
///
/// Owned by the per-GPU pool and loaned to at most one decode/evaluate pair
/// at a time. All access goes through offset copies so the same stage code
/// runs against host and device memory.
pub struct FrameBuffer {
    mem: Mem,
}

impl FrameBuffer {
    pub fn len(&self) -> usize {
        match &self.mem {
            Mem::Host(v) => v.len(),
            Mem::Device { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bounds_check(&self, offset: usize, len: usize) -> Result<()> {
        let need = offset
            .checked_add(len)
            .ok_or_else(|| EngineError::InvariantViolation("buffer offset overflow".into()))?;
        if need > self.len() {
            return Err(EngineError::BufferTooSmall {
                need,
                have: self.len(),
            });
        }
        Ok(())
    }

    /// Copy `src` into the buffer at `offset`.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.bounds_check(offset, src.len())?;
        match &mut self.mem {
            Mem::Host(v) => {
                v[offset..offset + src.len()].copy_from_slice(src);
                Ok(())
            }
            Mem::Device { driver, dptr, .. } => driver.memcpy_htod(*dptr + offset as u64, src),
        }
    }

    /// Copy `dst.len()` bytes out of the buffer starting at `offset`.
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.bounds_check(offset, dst.len())?;
        match &self.mem {
            Mem::Host(v) => {
                dst.copy_from_slice(&v[offset..offset + dst.len()]);
                Ok(())
            }
            Mem::Device { driver, dptr, .. } => driver.memcpy_dtoh(dst, *dptr + offset as u64),
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.mem {
            Mem::Host(_) => "host",
            Mem::Device { .. } => "device",
        };
        f.debug_struct("FrameBuffer")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}
