use std::collections::BTreeMap;

/// Strategy for handing out GPU virtual address ranges.
pub trait VaAllocator {
    /// Reserve a virtual address range within this aperture.
    fn allocate_va(&mut self, size: u64, align: u64) -> Option<u64>;

    /// Free a previously reserved virtual address range.
    fn free_va(&mut self, addr: u64, size: u64);

    /// Get the aperture's base and limit.
    fn bounds(&self) -> (u64, u64);
}

/// A managed range of GPU virtual address space.
///
/// Used for the amdgpu per-device VA window and for Intel softpin offsets.
#[derive(Debug)]
pub struct Aperture {
    base: u64,
    limit: u64,
    align: u64,
    guard_pages: u64,

    // Occupied ranges: start (guard included) -> size (guards included)
    allocations: BTreeMap<u64, u64>,
}

impl Aperture {
    pub const PAGE_SIZE: u64 = 4096;

    #[must_use]
    pub fn new(base: u64, limit: u64, align: u64, guard_pages: u64) -> Self {
        Self {
            base,
            limit,
            align: align.max(1).next_power_of_two(),
            guard_pages,
            allocations: BTreeMap::new(),
        }
    }

    fn align_up(val: u64, align: u64) -> u64 {
        (val + align - 1) & !(align - 1)
    }

    /// Number of live reservations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}

impl VaAllocator for Aperture {
    fn bounds(&self) -> (u64, u64) {
        (self.base, self.limit)
    }

    fn allocate_va(&mut self, size: u64, align: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        let align = align.max(self.align).next_power_of_two();
        let guard_size = self.guard_pages * Self::PAGE_SIZE;
        let request_size = size.checked_add(guard_size * 2)?;

        let mut candidate_start = Self::align_up(self.base, align);

        for (&alloc_start, &alloc_size) in &self.allocations {
            if alloc_start >= candidate_start && alloc_start - candidate_start >= request_size {
                break;
            }
            candidate_start = candidate_start.max(Self::align_up(alloc_start + alloc_size, align));
        }

        if candidate_start.checked_add(request_size)? > self.limit {
            return None; // Out of virtual address space
        }

        self.allocations.insert(candidate_start, request_size);
        Some(candidate_start + guard_size)
    }

    fn free_va(&mut self, addr: u64, size: u64) {
        let guard_size = self.guard_pages * Self::PAGE_SIZE;
        let tracked_start = addr.wrapping_sub(guard_size);

        match self.allocations.remove(&tracked_start) {
            Some(tracked) if tracked != size + guard_size * 2 => {
                log::warn!(
                    "VA 0x{addr:x} freed with size 0x{size:x}, reserved as 0x{:x}",
                    tracked - guard_size * 2
                );
            }
            Some(_) => {}
            None => log::error!("Tried to free VA 0x{addr:x} which was not tracked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut ap = Aperture::new(0x1000, 0x10_0000, 0x1000, 0);
        let a = ap.allocate_va(0x1800, 0).unwrap();
        let b = ap.allocate_va(0x1000, 0x4000).unwrap();
        assert_eq!(a, 0x1000);
        assert_eq!(b % 0x4000, 0);
        assert!(b >= a + 0x1800);
        assert_eq!(ap.len(), 2);
    }

    #[test]
    fn freed_holes_are_reused() {
        let mut ap = Aperture::new(0x10000, 0x20000, 0x1000, 0);
        let a = ap.allocate_va(0x1000, 0).unwrap();
        let b = ap.allocate_va(0x1000, 0).unwrap();
        ap.free_va(a, 0x1000);
        let c = ap.allocate_va(0x1000, 0).unwrap();
        assert_eq!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn guard_pages_surround_allocations() {
        let mut ap = Aperture::new(0, 0x10_0000, 0x1000, 1);
        let a = ap.allocate_va(0x1000, 0).unwrap();
        let b = ap.allocate_va(0x1000, 0).unwrap();
        assert_eq!(a, 0x1000);
        assert!(b >= a + 0x2000);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut ap = Aperture::new(0, 0x2000, 0x1000, 0);
        assert!(ap.allocate_va(0x2000, 0).is_some());
        assert!(ap.allocate_va(0x1000, 0).is_none());
        assert!(ap.allocate_va(0, 0).is_none());
    }
}
