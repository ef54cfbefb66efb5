//! Direct3D 12 backing for the pacer: an `ID3D12Fence` signaled through the
//! command queue, a Win32 event for blocking waits, and a persistently mapped
//! upload-heap buffer for the constant ring.

use std::ptr::NonNull;
use std::time::Duration;

use tracing::debug;
use tracing::warn;
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Foundation::WAIT_OBJECT_0;
use windows::Win32::Foundation::WAIT_TIMEOUT;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;
use windows::Win32::System::Threading::CreateEventA;
use windows::Win32::System::Threading::INFINITE;
use windows::Win32::System::Threading::WaitForSingleObjectEx;

use crate::error::PacerError;
use crate::error::PacerReport;
use crate::error::PacerResult;
use crate::fence::GpuFence;
use crate::fence::PacerDevice;
use crate::fence::bounded_wait_millis;
use crate::fence::UploadBuffer;

fn creation_failure(resource: &'static str, error: windows::core::Error) -> PacerReport {
    PacerError::ResourceCreation {
        resource,
        reason: format!("{} ({:?})", error.message(), error.code()),
    }
    .into()
}

/// The device and the queue frames are submitted on.
#[derive(Clone)]
pub struct D3D12Context {
    pub device: ID3D12Device,
    pub command_queue: ID3D12CommandQueue,
}

impl D3D12Context {
    pub fn new(device: &ID3D12Device, command_queue: &ID3D12CommandQueue) -> Self {
        Self {
            device: device.clone(),
            command_queue: command_queue.clone(),
        }
    }
}

impl PacerDevice for D3D12Context {
    type Fence = D3D12Fence;
    type Buffer = D3D12UploadBuffer;

    fn create_fence(&self, initial_value: u64) -> PacerResult<D3D12Fence> {
        let fence: ID3D12Fence = unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| creation_failure("fence", e))?;
        let event =
            unsafe { CreateEventA(None, false, false, None) }.map_err(|e| creation_failure("fence event", e))?;
        if event.is_invalid() {
            return Err(PacerError::ResourceCreation {
                resource: "fence event",
                reason: "CreateEventA returned an invalid handle".into(),
            }
            .into());
        }
        debug!(initial_value, "created d3d12 fence");
        Ok(D3D12Fence {
            command_queue: self.command_queue.clone(),
            fence,
            event,
        })
    }

    fn create_upload_buffer(&self, size: usize) -> PacerResult<D3D12UploadBuffer> {
        D3D12UploadBuffer::new(&self.device, size)
    }
}

pub struct D3D12Fence {
    command_queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    event: HANDLE,
}

impl D3D12Fence {
    pub fn fence(&self) -> &ID3D12Fence {
        &self.fence
    }
}

impl GpuFence for D3D12Fence {
    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn signal(&mut self, value: u64) -> PacerResult<()> {
        unsafe { self.command_queue.Signal(&self.fence, value)? };
        Ok(())
    }

    fn wait_until(&mut self, value: u64, timeout: Option<Duration>) -> PacerResult<()> {
        if self.completed_value() >= value {
            return Ok(());
        }
        let millis = timeout.map_or(INFINITE, bounded_wait_millis);
        unsafe { self.fence.SetEventOnCompletion(value, self.event)? };
        let result = unsafe { WaitForSingleObjectEx(self.event, millis, false) };
        if result == WAIT_OBJECT_0 {
            Ok(())
        } else if result == WAIT_TIMEOUT {
            Err(PacerError::SyncTimeout {
                value,
                completed: self.completed_value(),
                timeout: timeout.unwrap_or(Duration::MAX),
            }
            .into())
        } else {
            Err(eyre::eyre!("WaitForSingleObjectEx failed while waiting for fence value {value}: {result:?}").into())
        }
    }
}

impl Drop for D3D12Fence {
    fn drop(&mut self) {
        unsafe {
            if !self.event.is_invalid() {
                if let Err(e) = CloseHandle(self.event) {
                    warn!("Failed to close fence event: {:?}", e);
                }
            }
        }
    }
}

/// Upload-heap buffer mapped once at creation and unmapped on drop.
pub struct D3D12UploadBuffer {
    resource: ID3D12Resource,
    mapped: NonNull<u8>,
    len: usize,
    gpu_address: u64,
}

impl D3D12UploadBuffer {
    pub fn new(device: &ID3D12Device, size: usize) -> PacerResult<Self> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_UPLOAD,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: size as u64,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                &mut resource,
            )
        }
        .map_err(|e| creation_failure("constant upload buffer", e))?;
        let resource = resource.ok_or_else(|| PacerError::ResourceCreation {
            resource: "constant upload buffer",
            reason: "CreateCommittedResource returned no resource".into(),
        })?;

        // The CPU never reads this memory back through the map.
        let read_range = D3D12_RANGE { Begin: 0, End: 0 };
        let mut data_ptr = std::ptr::null_mut();
        unsafe { resource.Map(0, Some(&read_range), Some(&mut data_ptr)) }
            .map_err(|e| creation_failure("constant buffer mapping", e))?;
        let mapped = NonNull::new(data_ptr as *mut u8).ok_or_else(|| PacerError::ResourceCreation {
            resource: "constant buffer mapping",
            reason: "Map returned a null pointer".into(),
        })?;

        let gpu_address = unsafe { resource.GetGPUVirtualAddress() };
        debug!(size, gpu_address, "created constant upload buffer");
        Ok(Self {
            resource,
            mapped,
            len: size,
            gpu_address,
        })
    }

    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl UploadBuffer for D3D12UploadBuffer {
    fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    fn mapped_mut(&mut self) -> &mut [u8] {
        // mapped stays valid until Unmap in drop and spans `len` bytes
        unsafe { std::slice::from_raw_parts_mut(self.mapped.as_ptr(), self.len) }
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for D3D12UploadBuffer {
    fn drop(&mut self) {
        unsafe { self.resource.Unmap(0, None) };
    }
}
