use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::config::PacerConfig;
use crate::constants::SceneConstants;
use crate::error::PacerError;
use crate::error::PacerResult;
use crate::fence::GpuFence;
use crate::fence::PacerDevice;
use crate::fence::required_wait;
use crate::ring::ConstantRing;
use crate::ring::RingLayout;

/// Value the fence is created with. Every signal the pacer issues is
/// strictly greater, so "never used" slots are always satisfied.
pub const INITIAL_FENCE_VALUE: u64 = 0;

struct PacerResources<D: PacerDevice> {
    fence: D::Fence,
    ring: ConstantRing<D::Buffer>,
    // fence value that must complete before each slot may be rewritten
    pending: Vec<u64>,
    next_value: u64,
}

impl<D: PacerDevice> PacerResources<D> {
    fn create(device: &D, layout: RingLayout) -> PacerResult<Self> {
        let fence = device.create_fence(INITIAL_FENCE_VALUE)?;
        let buffer = device.create_upload_buffer(layout.total_size())?;
        let ring = ConstantRing::new(buffer, layout)?;
        Ok(Self {
            fence,
            ring,
            pending: vec![INITIAL_FENCE_VALUE; layout.slot_count()],
            next_value: INITIAL_FENCE_VALUE + 1,
        })
    }

    fn last_signaled(&self) -> u64 {
        self.next_value - 1
    }
}

/// Keeps the CPU from overwriting constant-buffer memory the GPU is still
/// reading.
///
/// Each frame goes through [`begin_frame`](Self::begin_frame), which may
/// block until the slot for that frame is free, then
/// [`write_constants`](Self::write_constants) and
/// [`address_of`](Self::address_of) while recording, then
/// [`end_frame`](Self::end_frame) once the command lists are submitted.
///
/// Fence values live on a monotonic timeline owned by the pacer and are
/// independent of the caller's frame index, so the index may restart at zero
/// (for example after a resize) without confusing the bookkeeping.
pub struct FramePacer<D: PacerDevice> {
    config: PacerConfig,
    layout: RingLayout,
    resources: Option<PacerResources<D>>,
}

impl<D: PacerDevice> FramePacer<D> {
    pub fn new(device: &D, config: PacerConfig) -> PacerResult<Self> {
        config.validate()?;
        let layout = config.layout()?;
        let resources = PacerResources::create(device, layout)?;
        info!(
            slots = layout.slot_count(),
            slot_stride = layout.slot_stride(),
            bytes = layout.total_size(),
            "frame pacer created"
        );
        Ok(Self {
            config,
            layout,
            resources: Some(resources),
        })
    }

    pub fn config(&self) -> &PacerConfig {
        &self.config
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    pub fn slot_of(&self, frame_index: u64) -> usize {
        self.layout.slot_of(frame_index)
    }

    pub fn slot_stride(&self) -> usize {
        self.layout.slot_stride()
    }

    pub fn is_released(&self) -> bool {
        self.resources.is_none()
    }

    fn resources(&self) -> PacerResult<&PacerResources<D>> {
        self.resources
            .as_ref()
            .ok_or_else(|| PacerError::Released.into())
    }

    fn resources_mut(&mut self) -> PacerResult<&mut PacerResources<D>> {
        self.resources
            .as_mut()
            .ok_or_else(|| PacerError::Released.into())
    }

    pub fn completed_value(&self) -> PacerResult<u64> {
        Ok(self.resources()?.fence.completed_value())
    }

    pub fn last_signaled_value(&self) -> PacerResult<u64> {
        Ok(self.resources()?.last_signaled())
    }

    /// Returns the slot for `frame_index` once the GPU has finished with it.
    ///
    /// Blocks only when the previous frame that used this slot has not
    /// completed yet.
    pub fn begin_frame(&mut self, frame_index: u64) -> PacerResult<usize> {
        let slot = self.layout.slot_of(frame_index);
        let timeout = self.config.wait_timeout;
        let resources = self.resources_mut()?;
        let completed = resources.fence.completed_value();
        if let Some(target) = required_wait(resources.pending[slot], completed) {
            debug!(frame_index, slot, target, completed, "gpu behind, waiting for slot");
            resources.fence.wait_until(target, timeout)?;
        }
        trace!(frame_index, slot, "frame begun");
        Ok(slot)
    }

    pub fn write_constants(&mut self, slot: usize, constants: &SceneConstants) -> PacerResult<()> {
        self.write_draw_constants(slot, 0, constants)
    }

    pub fn write_draw_constants(
        &mut self,
        slot: usize,
        draw: usize,
        constants: &SceneConstants,
    ) -> PacerResult<()> {
        self.resources_mut()?.ring.write(slot, draw, constants)
    }

    /// Reads a record back from the mapped slot.
    pub fn read_constants(&mut self, slot: usize, draw: usize) -> PacerResult<SceneConstants> {
        self.resources_mut()?.ring.read(slot, draw)
    }

    /// GPU address to bind as the root constant-buffer view for `slot`.
    pub fn address_of(&self, slot: usize) -> PacerResult<u64> {
        self.draw_address(slot, 0)
    }

    pub fn draw_address(&self, slot: usize, draw: usize) -> PacerResult<u64> {
        self.resources()?.ring.address_of(slot, draw)
    }

    /// Signals the fence after the frame's commands were submitted. Does not
    /// wait. Returns the value the slot now waits on.
    pub fn end_frame(&mut self, frame_index: u64) -> PacerResult<u64> {
        let slot = self.layout.slot_of(frame_index);
        let resources = self.resources_mut()?;
        let value = resources.next_value;
        resources.fence.signal(value)?;
        resources.pending[slot] = value;
        resources.next_value += 1;
        trace!(frame_index, slot, value, "frame signaled");
        Ok(value)
    }

    /// Blocks until every signaled frame has completed on the GPU.
    pub fn drain(&mut self) -> PacerResult<()> {
        let timeout = self.config.wait_timeout;
        let resources = self.resources_mut()?;
        let last = resources.last_signaled();
        if let Some(target) = required_wait(last, resources.fence.completed_value()) {
            debug!(target, "draining gpu");
            resources.fence.wait_until(target, timeout)?;
        }
        Ok(())
    }

    /// Drops the fence and the mapped ring after device loss, without
    /// waiting on the GPU.
    pub fn reset(&mut self) {
        if self.resources.take().is_some() {
            info!("frame pacer resources released");
        }
    }

    /// Recreates the fence and the ring on a (new) device after [`reset`](Self::reset).
    pub fn restore(&mut self, device: &D) -> PacerResult<()> {
        if self.resources.is_some() {
            warn!("restore called on a live pacer, replacing its resources");
            self.drain()?;
        }
        self.resources = Some(PacerResources::create(device, self.layout)?);
        info!("frame pacer resources restored");
        Ok(())
    }
}

impl<D: PacerDevice> Drop for FramePacer<D> {
    fn drop(&mut self) {
        if self.resources.is_none() {
            return;
        }
        if let Err(e) = self.drain() {
            warn!("Error waiting for GPU idle on destroy: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::headless::SimulatedGpu;

    #[test]
    fn slot_is_frame_index_mod_count() {
        let gpu = SimulatedGpu::new();
        let pacer = FramePacer::new(&gpu, PacerConfig::default().with_back_buffer_count(3)).unwrap();
        for frame in 0..20u64 {
            assert_eq!(pacer.slot_of(frame), (frame % 3) as usize);
            assert_eq!(pacer.slot_of(frame), pacer.slot_of(frame));
        }
    }

    #[test]
    fn first_ring_never_waits() {
        let gpu = SimulatedGpu::new();
        let mut pacer = FramePacer::new(&gpu, PacerConfig::default()).unwrap();
        for frame in 0..2 {
            pacer.begin_frame(frame).unwrap();
            pacer.end_frame(frame).unwrap();
        }
        assert_eq!(gpu.timeline().blocking_waits(), 0);
        gpu.timeline().complete_all();
    }

    #[test]
    fn end_frame_signals_increasing_values() {
        let gpu = SimulatedGpu::new();
        let mut pacer = FramePacer::new(&gpu, PacerConfig::default()).unwrap();
        let first = pacer.end_frame(0).unwrap();
        let second = pacer.end_frame(1).unwrap();
        assert!(second > first);
        assert_eq!(gpu.timeline().queued(), vec![first, second]);
        assert_eq!(pacer.last_signaled_value().unwrap(), second);
        gpu.timeline().complete_all();
    }

    #[test]
    fn saturated_ring_times_out_when_configured() {
        let gpu = SimulatedGpu::new();
        let config = PacerConfig::default().with_wait_timeout(Some(Duration::from_millis(20)));
        let mut pacer = FramePacer::new(&gpu, config).unwrap();
        pacer.begin_frame(0).unwrap();
        pacer.end_frame(0).unwrap();
        pacer.begin_frame(1).unwrap();
        pacer.end_frame(1).unwrap();
        let err = pacer.begin_frame(2).unwrap_err();
        assert!(matches!(err.kind(), Some(PacerError::SyncTimeout { value: 1, .. })));
        pacer.reset();
    }

    #[test]
    fn calls_after_reset_are_rejected() {
        let gpu = SimulatedGpu::new();
        let mut pacer = FramePacer::new(&gpu, PacerConfig::default()).unwrap();
        pacer.reset();
        assert!(pacer.is_released());
        let err = pacer.begin_frame(0).unwrap_err();
        assert_eq!(err.kind(), Some(&PacerError::Released));
        let err = pacer.address_of(0).unwrap_err();
        assert_eq!(err.kind(), Some(&PacerError::Released));
        let err = pacer.end_frame(0).unwrap_err();
        assert_eq!(err.kind(), Some(&PacerError::Released));
    }

    #[test]
    fn restore_brings_back_a_fresh_timeline() {
        let gpu = SimulatedGpu::new();
        let mut pacer = FramePacer::new(&gpu, PacerConfig::default()).unwrap();
        pacer.end_frame(0).unwrap();
        pacer.reset();
        pacer.restore(&gpu).unwrap();
        assert!(!pacer.is_released());
        assert_eq!(pacer.last_signaled_value().unwrap(), INITIAL_FENCE_VALUE);
        assert_eq!(pacer.begin_frame(0).unwrap(), 0);
        assert_eq!(gpu.timeline().blocking_waits(), 0);
    }

    #[test]
    fn invalid_config_is_rejected_before_creating_resources() {
        let gpu = SimulatedGpu::new();
        let result = FramePacer::new(&gpu, PacerConfig::default().with_constant_alignment(100));
        let err = result.err().unwrap();
        assert!(matches!(err.kind(), Some(PacerError::InvalidConfig(_))));
        assert_eq!(gpu.timeline().signal_count(), 0);
    }
}
