use crate::constants::SceneConstants;
use crate::error::PacerError;
use crate::error::PacerResult;
use crate::fence::UploadBuffer;

/// Rounds `size` up to the next multiple of `alignment` (a power of two).
/// `None` when the result does not fit in `usize`.
pub const fn align_up(size: usize, alignment: usize) -> Option<usize> {
    match size.checked_add(alignment - 1) {
        Some(padded) => Some(padded & !(alignment - 1)),
        None => None,
    }
}

/// Byte layout of the constant ring: `slot_count` slots, each holding
/// `draws_per_slot` records padded to the constant alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    slot_count: usize,
    draws_per_slot: usize,
    record_stride: usize,
    slot_stride: usize,
    total_size: usize,
}

impl RingLayout {
    /// `None` when the padded ring would not be addressable.
    pub fn new(slot_count: usize, draws_per_slot: usize, alignment: usize) -> Option<Self> {
        let record_stride = align_up(std::mem::size_of::<SceneConstants>(), alignment)?;
        let slot_stride = record_stride.checked_mul(draws_per_slot)?;
        let total_size = slot_stride.checked_mul(slot_count)?;
        // addresses are handed out as u64 offsets from the buffer base
        u64::try_from(total_size).ok()?;
        Some(Self {
            slot_count,
            draws_per_slot,
            record_stride,
            slot_stride,
            total_size,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn draws_per_slot(&self) -> usize {
        self.draws_per_slot
    }

    pub fn record_stride(&self) -> usize {
        self.record_stride
    }

    pub fn slot_stride(&self) -> usize {
        self.slot_stride
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn slot_of(&self, frame_index: u64) -> usize {
        (frame_index % self.slot_count as u64) as usize
    }

    pub fn record_offset(&self, slot: usize, draw: usize) -> PacerResult<usize> {
        if slot >= self.slot_count {
            return Err(PacerError::SlotOutOfRange {
                slot,
                count: self.slot_count,
            }
            .into());
        }
        if draw >= self.draws_per_slot {
            return Err(PacerError::DrawOutOfRange {
                draw,
                count: self.draws_per_slot,
            }
            .into());
        }
        Ok(self.slot_stride * slot + self.record_stride * draw)
    }
}

/// Mapped upload memory partitioned into per-frame slots.
pub struct ConstantRing<B> {
    buffer: B,
    layout: RingLayout,
}

impl<B: UploadBuffer> ConstantRing<B> {
    pub fn new(buffer: B, layout: RingLayout) -> PacerResult<Self> {
        if buffer.len() < layout.total_size() {
            return Err(PacerError::ResourceCreation {
                resource: "constant upload buffer",
                reason: format!(
                    "buffer holds {} bytes, ring needs {}",
                    buffer.len(),
                    layout.total_size()
                ),
            }
            .into());
        }
        Ok(Self { buffer, layout })
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    pub fn address_of(&self, slot: usize, draw: usize) -> PacerResult<u64> {
        let offset = self.layout.record_offset(slot, draw)?;
        Ok(self.buffer.gpu_address() + offset as u64)
    }

    pub fn write(&mut self, slot: usize, draw: usize, constants: &SceneConstants) -> PacerResult<()> {
        let offset = self.layout.record_offset(slot, draw)?;
        let bytes = constants.as_bytes();
        self.buffer.mapped_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads a record back from mapped memory.
    pub fn read(&mut self, slot: usize, draw: usize) -> PacerResult<SceneConstants> {
        let offset = self.layout.record_offset(slot, draw)?;
        let size = std::mem::size_of::<SceneConstants>();
        Ok(bytemuck::pod_read_unaligned(
            &self.buffer.mapped_mut()[offset..offset + size],
        ))
    }

    pub fn into_buffer(self) -> B {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HostUploadBuffer;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 256), Some(0));
        assert_eq!(align_up(1, 256), Some(256));
        assert_eq!(align_up(208, 256), Some(256));
        assert_eq!(align_up(256, 256), Some(256));
        assert_eq!(align_up(257, 256), Some(512));
        assert_eq!(align_up(208, 16), Some(208));
    }

    #[test]
    fn align_up_reports_overflow() {
        assert_eq!(align_up(usize::MAX, 256), None);
        assert_eq!(align_up(208, 1 << (usize::BITS - 1)), Some(1 << (usize::BITS - 1)));
    }

    #[test]
    fn slot_stride_is_multiple_of_alignment() {
        for alignment in [16, 64, 256, 512, 4096] {
            let layout = RingLayout::new(3, 2, alignment).unwrap();
            assert_eq!(layout.slot_stride() % alignment, 0);
            assert!(layout.record_stride() >= std::mem::size_of::<SceneConstants>());
        }
    }

    #[test]
    fn oversized_layouts_are_refused() {
        let huge_alignment = 1 << (usize::BITS - 1);
        assert_eq!(RingLayout::new(2, 1, huge_alignment), None);
        assert_eq!(RingLayout::new(usize::MAX / 2, 1, 256), None);
        assert_eq!(RingLayout::new(2, usize::MAX / 2, 256), None);
        assert!(RingLayout::new(1, 1, huge_alignment).is_some());
    }

    #[test]
    fn addresses_are_evenly_spaced() {
        let layout = RingLayout::new(4, 1, 256).unwrap();
        let ring = ConstantRing::new(HostUploadBuffer::new(0x1000_0000, layout.total_size()), layout)
            .unwrap();
        let addresses: Vec<u64> = (0..4).map(|slot| ring.address_of(slot, 0).unwrap()).collect();
        assert_eq!(addresses[0], 0x1000_0000);
        for pair in addresses.windows(2) {
            assert_eq!(pair[1] - pair[0], layout.slot_stride() as u64);
        }
    }

    #[test]
    fn draws_are_packed_inside_their_slot() {
        let layout = RingLayout::new(2, 3, 256).unwrap();
        let ring = ConstantRing::new(HostUploadBuffer::new(0, layout.total_size()), layout).unwrap();
        assert_eq!(ring.address_of(0, 2).unwrap(), 512);
        assert_eq!(ring.address_of(1, 0).unwrap(), 768);
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let layout = RingLayout::new(2, 1, 256).unwrap();
        let ring = ConstantRing::new(HostUploadBuffer::new(0, layout.total_size()), layout).unwrap();
        let err = ring.address_of(2, 0).unwrap_err();
        assert_eq!(err.kind(), Some(&PacerError::SlotOutOfRange { slot: 2, count: 2 }));
        let err = ring.address_of(0, 1).unwrap_err();
        assert_eq!(err.kind(), Some(&PacerError::DrawOutOfRange { draw: 1, count: 1 }));
    }

    #[test]
    fn undersized_buffer_is_a_creation_failure() {
        let layout = RingLayout::new(2, 1, 256).unwrap();
        let result = ConstantRing::new(HostUploadBuffer::new(0, 256), layout);
        let err = result.err().unwrap();
        assert!(matches!(err.kind(), Some(PacerError::ResourceCreation { .. })));
    }
}
