use std::time::Duration;

use crate::error::PacerResult;

/// A GPU timeline the CPU can observe, advance through the command queue,
/// and block on.
///
/// Values signaled through one queue complete in submission order, so a
/// completed value of `v` means every signal `<= v` has been reached.
pub trait GpuFence {
    /// The last value the GPU has reached.
    fn completed_value(&self) -> u64;

    /// Schedules a signal of `value` on the command queue. Does not wait.
    fn signal(&mut self, value: u64) -> PacerResult<()>;

    /// Blocks the calling thread until `completed_value() >= value`.
    ///
    /// With `timeout == None` the wait is unbounded. Implementations return
    /// [`crate::PacerError::SyncTimeout`] when the bound elapses first.
    fn wait_until(&mut self, value: u64, timeout: Option<Duration>) -> PacerResult<()>;
}

/// CPU-writable, GPU-readable memory that stays mapped for its lifetime.
pub trait UploadBuffer {
    /// GPU virtual address of byte 0.
    fn gpu_address(&self) -> u64;

    fn mapped_mut(&mut self) -> &mut [u8];

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The device-side collaborator that owns creation of pacer resources.
///
/// Passed explicitly to the pacer; nothing is looked up globally.
pub trait PacerDevice {
    type Fence: GpuFence;
    type Buffer: UploadBuffer;

    fn create_fence(&self, initial_value: u64) -> PacerResult<Self::Fence>;

    fn create_upload_buffer(&self, size: usize) -> PacerResult<Self::Buffer>;
}

/// Fence target that must be reached before a slot last used at
/// `pending_value` can be written again, or `None` when no wait is needed.
pub fn required_wait(pending_value: u64, completed_value: u64) -> Option<u64> {
    (completed_value < pending_value).then_some(pending_value)
}

/// Milliseconds for a bounded OS wait, rounded up so a sub-millisecond
/// timeout still blocks. Stays below `u32::MAX`, which the OS reads as
/// "wait forever".
pub fn bounded_wait_millis(timeout: Duration) -> u32 {
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    u32::try_from(millis).map_or(u32::MAX - 1, |millis| millis.min(u32::MAX - 1))
}
