//! 内存管理相关操作的 Mock 实现
//!
//! - [`MockPhysMemory`]：一段宿主机堆内存模拟的物理帧池
//! - [`MockMmu`]：以 (地址空间, 虚拟页号) 为键的硬件页表，带 accessed/dirty 位
//!
//! 注意：这里不直接依赖 `vm` crate（避免循环依赖），页号都用 `usize` 表示。

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// 与 vm crate 的页大小一致
pub const MOCK_PAGE_SIZE: usize = 4096;

/// 第一个模拟物理帧的页号，避免与 0 混淆
pub const MOCK_BASE_PPN: usize = 0x8_0000;

/// 模拟的物理内存
pub struct MockPhysMemory {
    base: *mut u8,
    frames: usize,
    used: Mutex<Vec<bool>>,
    allocations: AtomicUsize,
}

// SAFETY: base 指向的内存在整个生命周期内有效，帧的互斥访问由被测代码保证
unsafe impl Send for MockPhysMemory {}
unsafe impl Sync for MockPhysMemory {}

impl MockPhysMemory {
    pub fn new(frames: usize) -> Self {
        let layout = Self::layout(frames);
        // SAFETY: layout 大小非零
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "mock physical memory allocation failed");
        Self {
            base,
            frames,
            used: Mutex::new(vec![false; frames]),
            allocations: AtomicUsize::new(0),
        }
    }

    fn layout(frames: usize) -> Layout {
        Layout::from_size_align(frames.max(1) * MOCK_PAGE_SIZE, MOCK_PAGE_SIZE).unwrap()
    }

    /// 分配一个清零的帧，返回物理页号
    pub fn alloc_zeroed_frame(&self) -> Option<usize> {
        let mut used = self.used.lock().unwrap();
        let idx = used.iter().position(|u| !u)?;
        used[idx] = true;
        // SAFETY: idx < frames
        unsafe {
            core::ptr::write_bytes(self.base.add(idx * MOCK_PAGE_SIZE), 0, MOCK_PAGE_SIZE);
        }
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Some(MOCK_BASE_PPN + idx)
    }

    pub fn free_frame(&self, ppn: usize) {
        let idx = ppn - MOCK_BASE_PPN;
        let mut used = self.used.lock().unwrap();
        assert!(used[idx], "mock: double free of frame {:#x}", ppn);
        used[idx] = false;
    }

    /// 物理地址到宿主机地址的转换
    pub fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        let offset = paddr - MOCK_BASE_PPN * MOCK_PAGE_SIZE;
        assert!(offset < self.frames * MOCK_PAGE_SIZE, "mock: paddr {:#x} out of range", paddr);
        self.base as usize + offset
    }

    /// 当前已分配的帧数
    pub fn allocated(&self) -> usize {
        self.used.lock().unwrap().iter().filter(|u| **u).count()
    }

    /// 累计分配次数
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }
}

impl Drop for MockPhysMemory {
    fn drop(&mut self) {
        // SAFETY: 与 new 中的 layout 相同
        unsafe { dealloc(self.base, Self::layout(self.frames)) };
    }
}

/// 模拟的页表项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPte {
    pub ppn: usize,
    pub writable: bool,
    pub accessed: bool,
    pub dirty: bool,
}

/// 模拟的 MMU
///
/// 用户态访问通过 [`MockMmu::access`] 模拟：持有页表锁期间完成内存读写，
/// 与解除映射互斥，相当于硬件访问的原子性。
pub struct MockMmu {
    entries: Mutex<BTreeMap<(usize, usize), MockPte>>,
}

impl MockMmu {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// 建立映射，已存在时返回 false
    pub fn map(&self, asid: usize, vpn: usize, ppn: usize, writable: bool) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&(asid, vpn)) {
            return false;
        }
        entries.insert(
            (asid, vpn),
            MockPte {
                ppn,
                writable,
                accessed: false,
                dirty: false,
            },
        );
        true
    }

    pub fn unmap(&self, asid: usize, vpn: usize) -> Option<MockPte> {
        self.entries.lock().unwrap().remove(&(asid, vpn))
    }

    pub fn translate(&self, asid: usize, vpn: usize) -> Option<MockPte> {
        self.entries.lock().unwrap().get(&(asid, vpn)).copied()
    }

    pub fn is_accessed(&self, asid: usize, vpn: usize) -> bool {
        self.translate(asid, vpn).is_some_and(|pte| pte.accessed)
    }

    pub fn clear_accessed(&self, asid: usize, vpn: usize) {
        if let Some(pte) = self.entries.lock().unwrap().get_mut(&(asid, vpn)) {
            pte.accessed = false;
        }
    }

    /// 模拟一次用户态访问：设置 accessed（写时还有 dirty），
    /// 并在页表锁内以该帧的物理地址调用 `f`。
    ///
    /// 未映射或向只读页写入时返回 None，相当于触发缺页。
    pub fn access<R>(
        &self,
        asid: usize,
        vpn: usize,
        write: bool,
        f: impl FnOnce(usize) -> R,
    ) -> Option<R> {
        let mut entries = self.entries.lock().unwrap();
        let pte = entries.get_mut(&(asid, vpn))?;
        if write && !pte.writable {
            return None;
        }
        pte.accessed = true;
        if write {
            pte.dirty = true;
        }
        Some(f(pte.ppn * MOCK_PAGE_SIZE))
    }

    /// 当前映射数
    pub fn mapping_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for MockMmu {
    fn default() -> Self {
        Self::new()
    }
}
