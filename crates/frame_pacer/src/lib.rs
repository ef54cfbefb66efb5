//! CPU/GPU frame pacing over a fence and a ring of per-frame constant-buffer
//! slots.
//!
//! The CPU records frame `n` while the GPU may still be executing earlier
//! frames. Constant data for each frame goes into slot `n % back_buffer_count`
//! of a persistently mapped upload buffer, and [`FramePacer`] makes sure a
//! slot is only rewritten after the GPU signaled the fence for the frame that
//! last read it.
//!
//! Device access goes through [`PacerDevice`], implemented by
//! [`d3d12::D3D12Context`] on Windows and by [`headless::SimulatedGpu`]
//! everywhere.

pub mod camera;
pub mod config;
pub mod constants;
#[cfg(windows)]
pub mod d3d12;
pub mod error;
pub mod fence;
pub mod headless;
pub mod pacer;
pub mod ring;
pub mod step_timer;

pub use camera::CameraInput;
pub use camera::FlyCamera;
pub use camera::Projection;
pub use config::PacerConfig;
pub use constants::SceneConstants;
pub use error::PacerError;
pub use error::PacerReport;
pub use error::PacerResult;
pub use fence::GpuFence;
pub use fence::PacerDevice;
pub use fence::UploadBuffer;
pub use pacer::FramePacer;
pub use ring::RingLayout;
pub use step_timer::StepTimer;
