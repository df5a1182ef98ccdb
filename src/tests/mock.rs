//! In-memory mock of [`Backend`] for exercising the engine's core logic
//! without a real kernel underneath it, mirroring the donor
//! `frame_allocator::test` module's use of `extern crate std` inside
//! `#[cfg(test)]`.

extern crate std;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::vec::Vec;

use crate::addr::{PhysAddr, ReservationId};
use crate::backend::{Backend, ObjectKind, PageAllocFlags};
use crate::reservation::PAGE_SIZE;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct MockPage(pub u64);

struct ObjectState {
    kind: ObjectKind,
    backing: Option<u32>,
    size_pages: u64,
    vnode_backed: bool,
    rvq: Vec<(ReservationId, u64)>,
    pages_by_pindex: BTreeMap<u64, MockPage>,
}

struct PageState {
    object: Option<u32>,
    pindex: u64,
    phys: PhysAddr,
    zero: bool,
    valid: bool,
}

struct Inner {
    total_pages: usize,
    free: Vec<bool>,
    objects: BTreeMap<u32, ObjectState>,
    pages: BTreeMap<u64, PageState>,
    next_page_id: u64,
}

/// A deliberately small, fully in-memory physical allocator + object/page
/// layer. `total_pages` must be a multiple of `NPAGES` so every superpage is
/// representable.
pub struct MockBackend {
    inner: RefCell<Inner>,
    /// Test-only race injection: the next `page_from_phys` call binds its
    /// page to this object instead of the one it was asked for, simulating
    /// a page whose object has been reassigned between the physical
    /// allocation and the object-layer bind.
    reassign_next_to: RefCell<Option<u32>>,
}

impl MockBackend {
    pub fn new(total_pages: usize) -> MockBackend {
        MockBackend {
            inner: RefCell::new(Inner {
                total_pages,
                free: std::vec![true; total_pages],
                objects: BTreeMap::new(),
                pages: BTreeMap::new(),
                next_page_id: 1,
            }),
            reassign_next_to: RefCell::new(None),
        }
    }

    pub fn reassign_next_bound_page_to(&self, obj: u32) {
        *self.reassign_next_to.borrow_mut() = Some(obj);
    }

    pub fn free_page_count(&self) -> usize {
        self.inner.borrow().free.iter().filter(|&&f| f).count()
    }

    pub fn add_object(&self, id: u32, kind: ObjectKind, size_pages: u64) {
        self.inner.borrow_mut().objects.insert(
            id,
            ObjectState {
                kind,
                backing: None,
                size_pages,
                vnode_backed: matches!(kind, ObjectKind::Vnode),
                rvq: Vec::new(),
                pages_by_pindex: BTreeMap::new(),
            },
        );
    }

    pub fn set_backing(&self, id: u32, backing: Option<u32>) {
        self.inner.borrow_mut().objects.get_mut(&id).unwrap().backing = backing;
    }

    pub fn mark_zeroed(&self, page: MockPage, zero: bool) {
        self.inner.borrow_mut().pages.get_mut(&page.0).unwrap().zero = zero;
    }

    pub fn free_superpage_count(&self) -> usize {
        let inner = self.inner.borrow();
        inner.free.chunks(crate::reservation::NPAGES).filter(|c| c.iter().all(|&f| f)).count()
    }

    fn addr_to_index(&self, addr: PhysAddr) -> usize {
        addr.value() / PAGE_SIZE
    }
}

impl Backend for MockBackend {
    type ObjectId = u32;
    type PageRef = MockPage;

    fn alloc_contig(&self, npages: usize, low: PhysAddr, high: PhysAddr, alignment: usize, boundary: usize) -> Option<PhysAddr> {
        let mut inner = self.inner.borrow_mut();
        let low_idx = low.value() / PAGE_SIZE;
        let high_idx = (high.value() / PAGE_SIZE).min(inner.total_pages);
        let align_pages = (alignment / PAGE_SIZE).max(1);
        let mut start = low_idx;
        while start + npages <= high_idx {
            if start % align_pages != 0 {
                start += 1;
                continue;
            }
            if boundary > 0 {
                let boundary_pages = boundary / PAGE_SIZE;
                let end = start + npages - 1;
                if start / boundary_pages != end / boundary_pages {
                    start += 1;
                    continue;
                }
            }
            if inner.free[start..start + npages].iter().all(|&f| f) {
                for slot in inner.free[start..start + npages].iter_mut() {
                    *slot = false;
                }
                return Some(PhysAddr::new(start * PAGE_SIZE));
            }
            start += 1;
        }
        None
    }

    fn free_contig(&self, base: PhysAddr, count: usize) {
        let mut inner = self.inner.borrow_mut();
        let start = self.addr_to_index(base);
        for slot in inner.free[start..start + count].iter_mut() {
            *slot = true;
        }
        for addr in start..start + count {
            let phys = PhysAddr::new(addr * PAGE_SIZE);
            inner.pages.retain(|_, p| p.phys != phys);
        }
    }

    fn count_order_9(&self) -> usize {
        self.free_superpage_count()
    }

    fn reclaim_run(&self, _count: usize, _base: PhysAddr, _high: PhysAddr) -> bool {
        true
    }

    fn object_write_lock(&self, _obj: u32) {}
    fn object_write_unlock(&self, _obj: u32) {}

    fn rvq_link(&self, obj: u32, rv: ReservationId, pindex: u64) {
        let mut inner = self.inner.borrow_mut();
        let o = inner.objects.get_mut(&obj).unwrap();
        o.rvq.retain(|&(id, _)| id != rv);
        o.rvq.insert(0, (rv, pindex));
    }

    fn rvq_unlink(&self, obj: u32, rv: ReservationId) {
        let mut inner = self.inner.borrow_mut();
        if let Some(o) = inner.objects.get_mut(&obj) {
            o.rvq.retain(|&(id, _)| id != rv);
        }
    }

    fn rvq_find_collision(&self, obj: u32, pindex: u64, exclude: ReservationId) -> Option<ReservationId> {
        let inner = self.inner.borrow();
        inner
            .objects
            .get(&obj)
            .and_then(|o| o.rvq.iter().find(|&&(id, p)| id != exclude && p == pindex).map(|&(id, _)| id))
    }

    fn rvq_members(&self, obj: u32) -> alloc::vec::Vec<ReservationId> {
        let inner = self.inner.borrow();
        inner
            .objects
            .get(&obj)
            .map(|o| o.rvq.iter().map(|&(id, _)| id).collect())
            .unwrap_or_default()
    }

    fn object_size_pages(&self, obj: u32) -> u64 {
        self.inner.borrow().objects.get(&obj).map(|o| o.size_pages).unwrap_or(0)
    }

    fn object_kind(&self, obj: u32) -> ObjectKind {
        self.inner.borrow().objects.get(&obj).map(|o| o.kind).unwrap_or(ObjectKind::Device)
    }

    fn object_backing(&self, obj: u32) -> Option<u32> {
        self.inner.borrow().objects.get(&obj).and_then(|o| o.backing)
    }

    fn object_is_vnode_backed(&self, obj: u32) -> bool {
        self.inner.borrow().objects.get(&obj).map(|o| o.vnode_backed).unwrap_or(false)
    }

    fn page_object(&self, page: MockPage) -> Option<u32> {
        self.inner.borrow().pages.get(&page.0).and_then(|p| p.object)
    }

    fn page_pindex(&self, page: MockPage) -> u64 {
        self.inner.borrow().pages.get(&page.0).map(|p| p.pindex).unwrap_or(0)
    }

    fn page_phys_addr(&self, page: MockPage) -> PhysAddr {
        self.inner.borrow().pages.get(&page.0).map(|p| p.phys).unwrap_or(PhysAddr::new(0))
    }

    fn mpred(&self, obj: u32, pindex: u64) -> Option<MockPage> {
        let inner = self.inner.borrow();
        inner.objects.get(&obj)?.pages_by_pindex.range(..pindex).next_back().map(|(_, &p)| p)
    }

    fn msucc(&self, obj: u32, pindex: u64) -> Option<MockPage> {
        let inner = self.inner.borrow();
        inner.objects.get(&obj)?.pages_by_pindex.range(pindex + 1..).next().map(|(_, &p)| p)
    }

    fn find_most(&self, obj: u32, max_pindex: u64) -> Option<MockPage> {
        let inner = self.inner.borrow();
        inner.objects.get(&obj)?.pages_by_pindex.range(..=max_pindex).next_back().map(|(_, &p)| p)
    }

    fn page_alloc(&self, obj: u32, pindex: u64, _flags: PageAllocFlags) -> Option<MockPage> {
        let mut inner = self.inner.borrow_mut();
        let start = {
            let low_idx = 0;
            let high_idx = inner.total_pages;
            (low_idx..high_idx).find(|&i| inner.free[i])?
        };
        inner.free[start] = false;
        let id = inner.next_page_id;
        inner.next_page_id += 1;
        let phys = PhysAddr::new(start * PAGE_SIZE);
        inner.pages.insert(id, PageState { object: Some(obj), pindex, phys, zero: true, valid: false });
        inner.objects.get_mut(&obj).unwrap().pages_by_pindex.insert(pindex, MockPage(id));
        Some(MockPage(id))
    }

    fn page_from_phys(&self, obj: u32, pindex: u64, addr: PhysAddr) -> Option<MockPage> {
        let mut inner = self.inner.borrow_mut();
        if let Some(o) = inner.objects.get(&obj) {
            if o.pages_by_pindex.contains_key(&pindex) {
                return None;
            }
        }
        let owner = self.reassign_next_to.borrow_mut().take().unwrap_or(obj);
        let id = inner.next_page_id;
        inner.next_page_id += 1;
        inner.pages.insert(id, PageState { object: Some(owner), pindex, phys: addr, zero: false, valid: false });
        inner.objects.get_mut(&owner).unwrap().pages_by_pindex.insert(pindex, MockPage(id));
        Some(MockPage(id))
    }

    fn page_has_zero_flag(&self, page: MockPage) -> bool {
        self.inner.borrow().pages.get(&page.0).map(|p| p.zero).unwrap_or(false)
    }

    fn page_zero_idle(&self, page: MockPage) {
        if let Some(p) = self.inner.borrow_mut().pages.get_mut(&page.0) {
            p.zero = true;
        }
    }

    fn page_activate(&self, _page: MockPage) {}

    fn page_xunbusy(&self, _page: MockPage) {}

    fn page_set_valid(&self, page: MockPage, valid: bool) {
        if let Some(p) = self.inner.borrow_mut().pages.get_mut(&page.0) {
            p.valid = valid;
        }
    }
}

pub const TOTAL_PAGES: usize = 16 * crate::reservation::NPAGES;
