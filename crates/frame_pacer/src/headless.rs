//! A software stand-in for the GPU, for tests and for running the pacer
//! without a graphics device.
//!
//! [`SimulatedGpu`] implements [`PacerDevice`]. Signals queue up on a shared
//! [`SimulatedTimeline`] and only complete when something advances it,
//! either a test calling [`SimulatedTimeline::complete_next`] or a
//! [`GpuWorker`] thread that drains the queue with an artificial latency.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::trace;

use crate::error::PacerError;
use crate::error::PacerResult;
use crate::fence::GpuFence;
use crate::fence::PacerDevice;
use crate::fence::UploadBuffer;

#[derive(Debug, Default)]
struct TimelineState {
    completed: u64,
    queued: VecDeque<u64>,
    blocking_waits: usize,
    signals: usize,
}

#[derive(Debug, Default)]
struct TimelineShared {
    state: Mutex<TimelineState>,
    changed: Condvar,
}

/// Shared view of the simulated queue: what was signaled and how far the
/// "GPU" has progressed.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTimeline {
    shared: Arc<TimelineShared>,
}

impl SimulatedTimeline {
    fn lock(&self) -> MutexGuard<'_, TimelineState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn restart(&self, initial_value: u64) {
        let mut state = self.lock();
        state.completed = initial_value;
        state.queued.clear();
        self.shared.changed.notify_all();
    }

    pub fn completed_value(&self) -> u64 {
        self.lock().completed
    }

    /// Signals submitted but not yet completed, oldest first.
    pub fn queued(&self) -> Vec<u64> {
        self.lock().queued.iter().copied().collect()
    }

    /// How many `wait_until` calls had to block.
    pub fn blocking_waits(&self) -> usize {
        self.lock().blocking_waits
    }

    pub fn signal_count(&self) -> usize {
        self.lock().signals
    }

    /// Completes the oldest queued signal and returns its value.
    pub fn complete_next(&self) -> Option<u64> {
        let mut state = self.lock();
        let value = state.queued.pop_front()?;
        state.completed = value;
        trace!(value, "simulated gpu completed signal");
        self.shared.changed.notify_all();
        Some(value)
    }

    /// Completes queued signals in order until `value` has been reached or
    /// the queue is empty.
    pub fn complete_through(&self, value: u64) {
        let mut state = self.lock();
        while state.completed < value {
            let Some(next) = state.queued.pop_front() else {
                break;
            };
            state.completed = next;
        }
        self.shared.changed.notify_all();
    }

    pub fn complete_all(&self) {
        let mut state = self.lock();
        let last = state.queued.drain(..).last();
        if let Some(last) = last {
            state.completed = last;
        }
        self.shared.changed.notify_all();
    }

    /// Starts a thread that completes each queued signal `latency` after
    /// picking it up.
    pub fn spawn_worker(&self, latency: Duration) -> GpuWorker {
        let timeline = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || timeline.run_worker(latency, &worker_stop));
        GpuWorker {
            timeline: self.clone(),
            stop,
            handle: Some(handle),
        }
    }

    fn run_worker(&self, latency: Duration, stop: &AtomicBool) {
        debug!(?latency, "simulated gpu worker started");
        loop {
            let value = {
                let mut state = self.lock();
                loop {
                    if stop.load(Ordering::Acquire) {
                        debug!("simulated gpu worker stopped");
                        return;
                    }
                    if let Some(&front) = state.queued.front() {
                        break front;
                    }
                    state = self
                        .shared
                        .changed
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };
            std::thread::sleep(latency);
            let mut state = self.lock();
            // restart() may have cleared the queue while we slept
            if state.queued.front() == Some(&value) {
                state.queued.pop_front();
                state.completed = value;
                trace!(value, "simulated gpu completed signal");
                self.shared.changed.notify_all();
            }
        }
    }
}

/// Background thread advancing a [`SimulatedTimeline`]. Stops on drop.
pub struct GpuWorker {
    timeline: SimulatedTimeline,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GpuWorker {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        {
            let _state = self.timeline.lock();
            self.timeline.shared.changed.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GpuWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct SimulatedFence {
    timeline: SimulatedTimeline,
}

impl GpuFence for SimulatedFence {
    fn completed_value(&self) -> u64 {
        self.timeline.completed_value()
    }

    fn signal(&mut self, value: u64) -> PacerResult<()> {
        let mut state = self.timeline.lock();
        state.queued.push_back(value);
        state.signals += 1;
        self.timeline.shared.changed.notify_all();
        Ok(())
    }

    fn wait_until(&mut self, value: u64, timeout: Option<Duration>) -> PacerResult<()> {
        let started = Instant::now();
        let mut state = self.timeline.lock();
        if state.completed >= value {
            return Ok(());
        }
        state.blocking_waits += 1;
        while state.completed < value {
            state = match timeout {
                None => self
                    .timeline
                    .shared
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(timeout) => {
                    let Some(remaining) = timeout.checked_sub(started.elapsed()) else {
                        return Err(PacerError::SyncTimeout {
                            value,
                            completed: state.completed,
                            timeout,
                        }
                        .into());
                    };
                    self.timeline
                        .shared
                        .changed
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        Ok(())
    }
}

/// Heap memory posing as a mapped upload heap at a fixed fake GPU address.
#[derive(Debug, Clone)]
pub struct HostUploadBuffer {
    base_address: u64,
    bytes: Vec<u8>,
}

impl HostUploadBuffer {
    pub fn new(base_address: u64, size: usize) -> Self {
        Self {
            base_address,
            bytes: vec![0; size],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl UploadBuffer for HostUploadBuffer {
    fn gpu_address(&self) -> u64 {
        self.base_address
    }

    fn mapped_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Device handle for headless pacers. Each instance has its own timeline,
/// so independent pacers never observe each other.
#[derive(Debug, Clone)]
pub struct SimulatedGpu {
    timeline: SimulatedTimeline,
    base_address: u64,
    fail_fence: bool,
    fail_buffer: bool,
}

impl Default for SimulatedGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedGpu {
    pub const DEFAULT_BASE_ADDRESS: u64 = 0x0001_0000_0000;

    pub fn new() -> Self {
        Self {
            timeline: SimulatedTimeline::default(),
            base_address: Self::DEFAULT_BASE_ADDRESS,
            fail_fence: false,
            fail_buffer: false,
        }
    }

    pub fn with_base_address(mut self, base_address: u64) -> Self {
        self.base_address = base_address;
        self
    }

    /// Makes `create_fence` fail, to exercise creation error paths.
    pub fn failing_fence(mut self) -> Self {
        self.fail_fence = true;
        self
    }

    pub fn failing_buffer(mut self) -> Self {
        self.fail_buffer = true;
        self
    }

    pub fn timeline(&self) -> SimulatedTimeline {
        self.timeline.clone()
    }
}

impl PacerDevice for SimulatedGpu {
    type Fence = SimulatedFence;
    type Buffer = HostUploadBuffer;

    fn create_fence(&self, initial_value: u64) -> PacerResult<SimulatedFence> {
        if self.fail_fence {
            return Err(PacerError::ResourceCreation {
                resource: "fence",
                reason: "simulated device refused".into(),
            }
            .into());
        }
        self.timeline.restart(initial_value);
        Ok(SimulatedFence {
            timeline: self.timeline.clone(),
        })
    }

    fn create_upload_buffer(&self, size: usize) -> PacerResult<HostUploadBuffer> {
        if self.fail_buffer {
            return Err(PacerError::ResourceCreation {
                resource: "constant upload buffer",
                reason: "simulated device refused".into(),
            }
            .into());
        }
        Ok(HostUploadBuffer::new(self.base_address, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_complete_in_order() {
        let gpu = SimulatedGpu::new();
        let mut fence = gpu.create_fence(0).unwrap();
        fence.signal(1).unwrap();
        fence.signal(2).unwrap();
        let timeline = gpu.timeline();
        assert_eq!(timeline.queued(), vec![1, 2]);
        assert_eq!(timeline.complete_next(), Some(1));
        assert_eq!(fence.completed_value(), 1);
        timeline.complete_all();
        assert_eq!(fence.completed_value(), 2);
        assert_eq!(timeline.complete_next(), None);
    }

    #[test]
    fn wait_times_out_when_nothing_completes() {
        let gpu = SimulatedGpu::new();
        let mut fence = gpu.create_fence(0).unwrap();
        fence.signal(1).unwrap();
        let err = fence
            .wait_until(1, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            Some(PacerError::SyncTimeout { value: 1, completed: 0, .. })
        ));
    }

    #[test]
    fn satisfied_wait_does_not_block() {
        let gpu = SimulatedGpu::new();
        let mut fence = gpu.create_fence(5).unwrap();
        fence.wait_until(5, None).unwrap();
        assert_eq!(gpu.timeline().blocking_waits(), 0);
    }

    #[test]
    fn worker_drains_queue() {
        let gpu = SimulatedGpu::new();
        let mut fence = gpu.create_fence(0).unwrap();
        let worker = gpu.timeline().spawn_worker(Duration::from_millis(1));
        for value in 1..=5 {
            fence.signal(value).unwrap();
        }
        fence.wait_until(5, Some(Duration::from_secs(5))).unwrap();
        worker.stop();
        assert_eq!(fence.completed_value(), 5);
    }
}
