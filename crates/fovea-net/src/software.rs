//! Software reference network.
//!
//! Preprocessing mirrors the device chain frame for frame: NV12 to BGR with
//! BT.709 full-range coefficients, bilinear resize to the network input
//! square, planar channel layout, then per-channel mean subtraction. The
//! "forward pass" average-pools each channel over a fixed grid, which gives
//! deterministic, content-dependent features so reruns are bitwise
//! reproducible.

use fovea_core::error::{EngineError, Result};
use fovea_core::types::nv12_frame_size;

use crate::descriptor::NetDescriptor;
use crate::network::{FrameView, Network};

pub struct SoftwareNet {
    dim: usize,
    outputs_per_frame: usize,
    mean: [f32; 3],
    batch: usize,
    nv12: Vec<u8>,
    /// Planar BGR, `batch * 3 * dim * dim`, mean already subtracted.
    input: Vec<f32>,
    output: Vec<f32>,
}

impl SoftwareNet {
    pub fn new(descriptor: &NetDescriptor, streams: usize) -> Self {
        // Staging is computed inline, so stream slots need no scratch here.
        let _ = streams;
        Self {
            dim: descriptor.input_dim as usize,
            outputs_per_frame: descriptor.outputs_per_frame,
            mean: descriptor.mean_pixel,
            batch: 0,
            nv12: Vec::new(),
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    fn plane(&self, slot: usize, channel: usize) -> &[f32] {
        let plane_len = self.dim * self.dim;
        let base = (slot * 3 + channel) * plane_len;
        &self.input[base..base + plane_len]
    }
}

/// BT.709 full-range YUV to BGR for one pixel, in 0..=255 space.
fn bgr_at(nv12: &[u8], width: usize, height: usize, x: usize, y: usize) -> [f32; 3] {
    let y_v = nv12[y * width + x] as f32;
    let uv_base = width * height;
    let uv_width = width.div_ceil(2);
    let uv_at = uv_base + (y / 2) * uv_width * 2 + (x / 2) * 2;
    let u = nv12[uv_at] as f32 - 128.0;
    let v = nv12[uv_at + 1] as f32 - 128.0;

    let r = y_v + 1.5748 * v;
    let g = y_v - 0.1873 * u - 0.4681 * v;
    let b = y_v + 1.8556 * u;
    [
        b.clamp(0.0, 255.0),
        g.clamp(0.0, 255.0),
        r.clamp(0.0, 255.0),
    ]
}

impl Network for SoftwareNet {
    fn input_dim(&self) -> u32 {
        self.dim as u32
    }

    fn outputs_per_frame(&self) -> usize {
        self.outputs_per_frame
    }

    fn begin_batch(&mut self, batch: usize) -> Result<()> {
        if batch == 0 {
            return Err(EngineError::Inference("empty batch".into()));
        }
        self.batch = batch;
        self.input.resize(batch * 3 * self.dim * self.dim, 0.0);
        self.output.resize(batch * self.outputs_per_frame, 0.0);
        Ok(())
    }

    fn stage_frame(&mut self, slot: usize, frame: FrameView<'_>) -> Result<()> {
        if slot >= self.batch {
            return Err(EngineError::Inference(format!(
                "slot {slot} outside batch of {}",
                self.batch
            )));
        }
        let width = frame.width as usize;
        let height = frame.height as usize;
        let frame_size = nv12_frame_size(frame.width, frame.height);
        self.nv12.resize(frame_size, 0);
        frame.buffer.read_at(frame.offset, &mut self.nv12)?;

        let dim = self.dim;
        let plane_len = dim * dim;
        let base = slot * 3 * plane_len;
        for oy in 0..dim {
            // Map output pixel centres back into the source frame.
            let fy = ((oy as f32 + 0.5) * height as f32 / dim as f32 - 0.5)
                .clamp(0.0, (height - 1) as f32);
            let y0 = fy.floor() as usize;
            let y1 = (y0 + 1).min(height - 1);
            let wy = fy - y0 as f32;
            for ox in 0..dim {
                let fx = ((ox as f32 + 0.5) * width as f32 / dim as f32 - 0.5)
                    .clamp(0.0, (width - 1) as f32);
                let x0 = fx.floor() as usize;
                let x1 = (x0 + 1).min(width - 1);
                let wx = fx - x0 as f32;

                let p00 = bgr_at(&self.nv12, width, height, x0, y0);
                let p10 = bgr_at(&self.nv12, width, height, x1, y0);
                let p01 = bgr_at(&self.nv12, width, height, x0, y1);
                let p11 = bgr_at(&self.nv12, width, height, x1, y1);

                for c in 0..3 {
                    let top = p00[c] + (p10[c] - p00[c]) * wx;
                    let bottom = p01[c] + (p11[c] - p01[c]) * wx;
                    let value = top + (bottom - top) * wy;
                    self.input[base + c * plane_len + oy * dim + ox] = value - self.mean[c];
                }
            }
        }
        Ok(())
    }

    fn forward(&mut self) -> Result<()> {
        let dim = self.dim;
        let cells = self.outputs_per_frame.div_ceil(3);
        let grid_w = (cells as f32).sqrt().ceil() as usize;
        let grid_h = cells.div_ceil(grid_w);

        for slot in 0..self.batch {
            for j in 0..self.outputs_per_frame {
                let channel = j % 3;
                let cell = j / 3;
                let plane = self.plane(slot, channel);

                let cx = cell % grid_w;
                let cy = cell / grid_w;
                let (x0, x1) = cell_bounds(cx, grid_w, dim);
                let (y0, y1) = cell_bounds(cy, grid_h, dim);

                let mut sum = 0.0f32;
                let mut count = 0usize;
                for y in y0..y1 {
                    for x in x0..x1 {
                        sum += plane[y * dim + x];
                        count += 1;
                    }
                }
                let value = if count > 0 {
                    sum / count as f32
                } else {
                    // More cells than pixels: fall back to the plane mean.
                    plane.iter().sum::<f32>() / plane.len() as f32
                };
                self.output[slot * self.outputs_per_frame + j] = value;
            }
        }
        Ok(())
    }

    fn read_outputs(&mut self, dst: &mut [u8]) -> Result<()> {
        let need = self.batch * self.outputs_per_frame * 4;
        if dst.len() != need {
            return Err(EngineError::BufferTooSmall {
                need,
                have: dst.len(),
            });
        }
        for (chunk, value) in dst.chunks_exact_mut(4).zip(&self.output) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }
}

fn cell_bounds(index: usize, cells: usize, dim: usize) -> (usize, usize) {
    let start = index * dim / cells;
    let end = (index + 1) * dim / cells;
    if start >= dim {
        return (dim, dim);
    }
    (start, end.max(start + 1).min(dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::NetBackend;
    use fovea_cuda::{GpuDevice, GpuRuntime};

    fn descriptor(outputs: usize) -> NetDescriptor {
        NetDescriptor {
            name: "test".into(),
            backend: NetBackend::Software,
            input_dim: 8,
            outputs_per_frame: outputs,
            mean_pixel: [10.0, 20.0, 30.0],
        }
    }

    fn gray_frame(width: u32, height: u32, luma: u8) -> Vec<u8> {
        let mut frame = vec![128u8; nv12_frame_size(width, height)];
        frame[..(width * height) as usize].fill(luma);
        frame
    }

    fn stage(net: &mut SoftwareNet, frame: &[u8], width: u32, height: u32, slot: usize) {
        let device = GpuDevice::open(&GpuRuntime::Host, 0).unwrap();
        let mut buf = device.alloc_frames(frame.len()).unwrap();
        buf.write_at(0, frame).unwrap();
        net.stage_frame(slot, FrameView {
            buffer: &buf,
            offset: 0,
            width,
            height,
        })
        .unwrap();
    }

    #[test]
    fn uniform_frame_pools_to_mean_subtracted_value() {
        let mut net = SoftwareNet::new(&descriptor(6), 2);
        net.begin_batch(1).unwrap();
        // Neutral chroma and Y = 100 decodes to BGR (100, 100, 100).
        stage(&mut net, &gray_frame(16, 12, 100), 16, 12, 0);
        net.forward().unwrap();

        let mut bytes = vec![0u8; 6 * 4];
        net.read_outputs(&mut bytes).unwrap();
        let feats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        let expect = [90.0f32, 80.0, 70.0]; // 100 minus per-channel mean
        for (j, value) in feats.iter().enumerate() {
            assert!(
                (value - expect[j % 3]).abs() < 1e-3,
                "feature {j}: {value} vs {}",
                expect[j % 3]
            );
        }
    }

    #[test]
    fn staging_is_deterministic() {
        let mut net = SoftwareNet::new(&descriptor(40), 4);
        let frame = {
            let mut f = gray_frame(20, 10, 50);
            for (i, b) in f.iter_mut().enumerate() {
                *b = (i * 31) as u8;
            }
            f
        };
        net.begin_batch(2).unwrap();
        stage(&mut net, &frame, 20, 10, 0);
        stage(&mut net, &frame, 20, 10, 1);
        net.forward().unwrap();

        let mut bytes = vec![0u8; 2 * 40 * 4];
        net.read_outputs(&mut bytes).unwrap();
        assert_eq!(bytes[..40 * 4], bytes[40 * 4..]);
    }

    #[test]
    fn read_outputs_checks_length() {
        let mut net = SoftwareNet::new(&descriptor(3), 1);
        net.begin_batch(1).unwrap();
        let mut short = vec![0u8; 8];
        assert!(net.read_outputs(&mut short).is_err());
    }

    #[test]
    fn more_outputs_than_pixels_still_defined() {
        let mut net = SoftwareNet::new(
            &NetDescriptor {
                input_dim: 2,
                ..descriptor(64)
            },
            1,
        );
        net.begin_batch(1).unwrap();
        stage(&mut net, &gray_frame(4, 4, 10), 4, 4, 0);
        net.forward().unwrap();
        let mut bytes = vec![0u8; 64 * 4];
        net.read_outputs(&mut bytes).unwrap();
    }
}
