//! 帧池
//!
//! 帧池拥有固定数量的帧描述符，是用户页可用物理内存的唯一入口。
//!
//! # 分配
//!
//! [`FramePool::allocate`] 在一把池级锁内完成“找空位 → （必要时）驱逐 →
//! 从物理分配器取清零帧 → 发布 (owner, vpn)”。新帧处于钉住状态，
//! 直到缺页处理安装映射后才解除，期间不会被选为受害者。
//! 池中的帧全部被钉住时，分配方放开池锁等待某次加载完成，而不是报错。
//!
//! # 驱逐
//!
//! 受害者由时钟算法（`clock` 子模块）选出。驱逐全程持有池锁，包括对文件或交换区的 I/O；
//! 这会阻塞无关的分配，但保证一帧的驱逐先于它的重用。
//!
//! 步骤：标记受害页表项为 Evicting → 清除硬件映射并取回 dirty 位 →
//! 脏的文件页写回文件，否则写入新预留的交换槽 → 释放帧 → 表项回到 NotResident。
//!
//! # 锁顺序
//!
//! 帧池 → 补充页表 → 交换区。

mod clock;

use alloc::sync::Arc;
use alloc::vec::Vec;

use sync::{SpinLock, SpinLockGuard};

use crate::address::{Asid, Ppn, Vpn};
use crate::error::{VmError, VmResult};
use crate::file::write_back;
use crate::hal::{Mmu, PhysAllocator, ProcessRegistry, PteFlags, frame_bytes};
use crate::swap::{SwapSlot, SwapStore};

/// 帧描述符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    owner: Option<Asid>,
    vpn: Option<Vpn>,
    ppn: Option<Ppn>,
    pinned: bool,
}

impl FrameDescriptor {
    const fn vacant() -> Self {
        Self {
            owner: None,
            vpn: None,
            ppn: None,
            pinned: false,
        }
    }

    fn occupy(&mut self, owner: Asid, vpn: Vpn, ppn: Ppn) {
        self.owner = Some(owner);
        self.vpn = Some(vpn);
        self.ppn = Some(ppn);
        self.pinned = true;
    }

    fn clear(&mut self) {
        *self = Self::vacant();
    }

    fn matches(&self, owner: Asid, vpn: Vpn) -> bool {
        self.owner == Some(owner) && self.vpn == Some(vpn)
    }

    /// 可被选为受害者时返回 (owner, vpn)
    fn evictable(&self) -> Option<(Asid, Vpn)> {
        if self.pinned {
            return None;
        }
        Some((self.owner?, self.vpn?))
    }

    /// 所属地址空间
    pub fn owner(&self) -> Option<Asid> {
        self.owner
    }

    /// 映射到此帧的虚拟页
    pub fn vpn(&self) -> Option<Vpn> {
        self.vpn
    }

    /// 物理页
    pub fn ppn(&self) -> Option<Ppn> {
        self.ppn
    }

    /// 是否被占用
    pub fn is_resident(&self) -> bool {
        self.owner.is_some()
    }

    /// 是否被钉住（正在加载）
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}

/// 由 [`FramePool::allocate`] 返回的帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    index: usize,
    ppn: Ppn,
}

impl Frame {
    /// 物理页
    pub fn ppn(&self) -> Ppn {
        self.ppn
    }
}

pub(crate) struct PoolInner {
    frames: Vec<FrameDescriptor>,
    hand: usize,
    resident: usize,
}

/// 帧池
pub struct FramePool {
    inner: SpinLock<PoolInner>,
    phys: Arc<dyn PhysAllocator>,
    mmu: Arc<dyn Mmu>,
    registry: Arc<dyn ProcessRegistry>,
    swap: Arc<SwapStore>,
}

impl FramePool {
    /// 创建容量为 `capacity` 的帧池
    pub fn new(
        capacity: usize,
        phys: Arc<dyn PhysAllocator>,
        mmu: Arc<dyn Mmu>,
        registry: Arc<dyn ProcessRegistry>,
        swap: Arc<SwapStore>,
    ) -> Self {
        Self {
            inner: SpinLock::new(PoolInner {
                frames: alloc::vec![FrameDescriptor::vacant(); capacity],
                hand: 0,
                resident: 0,
            }),
            phys,
            mmu,
            registry,
            swap,
        }
    }

    /// 为 `(owner, vpn)` 分配一个清零的帧
    ///
    /// 池满时先驱逐一页；所有已占用的帧都被钉住时，放开池锁等待某次加载完成后重试。
    /// 返回的帧处于钉住状态，调用方安装映射后必须解除。
    ///
    /// # Errors
    ///
    /// 池容量为 0 或物理分配器耗尽时返回 [`VmError::OutOfFrames`]；
    /// 驱逐失败时返回其 I/O 错误。这些错误都是致命的。
    pub fn allocate(&self, owner: Asid, vpn: Vpn) -> VmResult<Frame> {
        loop {
            let mut inner = self.inner.lock();
            if inner.frames.is_empty() {
                log::error!("frame pool: no frames for {:?} {:?}", owner, vpn);
                return Err(VmError::OutOfFrames);
            }

            let index = match inner.frames.iter().position(|d| !d.is_resident()) {
                Some(index) => index,
                None => {
                    let Some(victim) = clock::select_victim(&mut inner, self.mmu.as_ref()) else {
                        // 全部被钉住
                        drop(inner);
                        sync::relax();
                        continue;
                    };
                    self.evict_locked(&mut inner, victim)?;
                    victim
                }
            };

            let Some(ppn) = self.phys.alloc_zeroed_frame() else {
                log::error!("frame pool: physical allocator exhausted");
                return Err(VmError::OutOfFrames);
            };
            inner.frames[index].occupy(owner, vpn, ppn);
            inner.resident += 1;
            log::trace!("frame pool: {:?} -> {:?} {:?}", ppn, owner, vpn);
            return Ok(Frame { index, ppn });
        }
    }

    /// 释放帧
    ///
    /// 调用方必须已经清除了硬件映射。
    pub fn free(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        self.free_locked(&mut inner, frame.index, frame.ppn);
    }

    pub(crate) fn lock(&self) -> SpinLockGuard<'_, PoolInner> {
        self.inner.lock()
    }

    pub(crate) fn unpin_locked(inner: &mut PoolInner, frame: Frame) {
        let desc = &mut inner.frames[frame.index];
        assert_eq!(desc.ppn, Some(frame.ppn), "unpin of a stale frame");
        desc.pinned = false;
    }

    /// 释放 `(owner, vpn)` 占用的帧，返回其物理页
    pub(crate) fn release_locked(&self, inner: &mut PoolInner, owner: Asid, vpn: Vpn) -> Ppn {
        let Some(index) = inner.frames.iter().position(|d| d.matches(owner, vpn)) else {
            panic!("frame pool: {:?} {:?} owns no frame", owner, vpn);
        };
        let Some(ppn) = inner.frames[index].ppn else {
            panic!("frame pool: descriptor {} has no physical page", index);
        };
        self.free_locked(inner, index, ppn);
        ppn
    }

    fn free_locked(&self, inner: &mut PoolInner, index: usize, ppn: Ppn) {
        let desc = &mut inner.frames[index];
        assert_eq!(desc.ppn, Some(ppn), "free of a frame the pool does not hold");
        self.phys.free_frame(ppn);
        desc.clear();
        inner.resident -= 1;
    }

    /// 驱逐 `index` 处的帧，持有池锁调用
    fn evict_locked(&self, inner: &mut PoolInner, index: usize) -> VmResult<()> {
        let desc = inner.frames[index];
        let (Some(owner), Some(vpn), Some(ppn)) = (desc.owner, desc.vpn, desc.ppn) else {
            panic!("frame pool: victim {} is vacant", index);
        };
        let Some(space) = self.registry.resolve(owner) else {
            panic!("frame pool: victim owner {:?} is not registered", owner);
        };

        let job = {
            let mut table = space.table().lock();
            let Some(entry) = table.lookup_mut(vpn) else {
                panic!("frame pool: victim {:?} {:?} has no page entry", owner, vpn);
            };
            entry.begin_eviction()
        };

        let Some((_, flags)) = self.mmu.unmap(owner, vpn) else {
            panic!("frame pool: victim {:?} {:?} is not mapped", owner, vpn);
        };
        let dirty = flags.contains(PteFlags::DIRTY);

        // SAFETY: 映射已清除，帧仍由池持有
        let bytes = unsafe { frame_bytes(self.phys.as_ref(), ppn) };
        let slot: Option<SwapSlot> = match job.file {
            Some(file) if job.kind.is_file() && dirty => {
                write_back(file.as_ref(), job.offset, &bytes[..job.length])?;
                None
            }
            _ => {
                let slot = self.swap.reserve_slot()?;
                self.swap.write_slot(slot, bytes)?;
                Some(slot)
            }
        };
        log::debug!(
            "frame pool: evicted {:?} {:?} ({:?}) to {}",
            owner,
            vpn,
            job.kind,
            if slot.is_some() { "swap" } else { "file" }
        );

        self.free_locked(inner, index, ppn);

        let mut table = space.table().lock();
        let Some(entry) = table.lookup_mut(vpn) else {
            panic!("frame pool: victim {:?} {:?} vanished during eviction", owner, vpn);
        };
        entry.finish_eviction(slot);
        Ok(())
    }

    /// 帧池容量
    pub fn capacity(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// 已占用的帧数
    pub fn resident_count(&self) -> usize {
        self.inner.lock().resident
    }

    /// 查找 `(owner, vpn)` 所在的帧
    pub fn lookup(&self, owner: Asid, vpn: Vpn) -> Option<FrameDescriptor> {
        self.inner
            .lock()
            .frames
            .iter()
            .find(|d| d.matches(owner, vpn))
            .copied()
    }

    /// 所有帧描述符的快照
    pub fn snapshot(&self) -> Vec<FrameDescriptor> {
        self.inner.lock().frames.clone()
    }
}
