//! 外部协作者接口
//!
//! 子系统不直接依赖具体硬件或内核其他部分，而是通过以下 trait 访问：
//! - [`PhysAllocator`]：物理帧的唯一来源与去处
//! - [`Mmu`]：按 (地址空间, 虚拟页) 操作硬件页表项
//! - [`ProcessRegistry`]：地址空间与进程之间的双向解析
//!
//! 这些对象在初始化时打包进 [`VmHal`]，随 [`crate::VmSystem`] 一起存活。

use alloc::sync::Arc;

use crate::address::{Asid, Pid, Ppn, Vpn};
use crate::config::PAGE_SIZE;
use crate::error::VmResult;
use crate::space::AddressSpace;
use crate::swap::SwapDevice;

/// 物理帧分配器
pub trait PhysAllocator: Send + Sync {
    /// 分配一个清零的物理帧，物理内存耗尽时返回 None
    fn alloc_zeroed_frame(&self) -> Option<Ppn>;

    /// 归还物理帧
    fn free_frame(&self, ppn: Ppn);

    /// 物理地址到内核可直接访问的虚拟地址
    fn paddr_to_vaddr(&self, paddr: usize) -> usize;
}

/// 以字节切片访问一个物理帧
///
/// # Safety
///
/// 调用方必须保证 `ppn` 由 `phys` 分配且尚未释放，并且在返回的切片存活期间
/// 没有其他路径（包括用户态映射）并发写入该帧。
#[allow(clippy::mut_from_ref)]
pub(crate) unsafe fn frame_bytes(phys: &dyn PhysAllocator, ppn: Ppn) -> &mut [u8] {
    let va = phys.paddr_to_vaddr(ppn.start_paddr());
    unsafe { core::slice::from_raw_parts_mut(va as *mut u8, PAGE_SIZE) }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// 页表项标志
    pub struct PteFlags: u8 {
        /// 有效
        const VALID    = 1 << 0;
        /// 可写
        const WRITE    = 1 << 2;
        /// 用户态可访问
        const USER     = 1 << 4;
        /// 已访问（硬件置位）
        const ACCESSED = 1 << 6;
        /// 已修改（硬件置位）
        const DIRTY    = 1 << 7;
    }
}

impl PteFlags {
    /// 用户页的初始标志
    pub fn user(writable: bool) -> Self {
        let mut flags = PteFlags::VALID | PteFlags::USER;
        if writable {
            flags |= PteFlags::WRITE;
        }
        flags
    }
}

/// 硬件页表操作
///
/// 所有操作以 (地址空间, 虚拟页) 为键。
pub trait Mmu: Send + Sync {
    /// 安装映射
    fn map(&self, asid: Asid, vpn: Vpn, ppn: Ppn, flags: PteFlags) -> VmResult<()>;

    /// 清除映射，返回被清除映射的物理页和最终标志
    ///
    /// 清除与读取 dirty 位必须是原子的，否则与之并发的写入可能丢失。
    fn unmap(&self, asid: Asid, vpn: Vpn) -> Option<(Ppn, PteFlags)>;

    /// 查询映射
    fn translate(&self, asid: Asid, vpn: Vpn) -> Option<(Ppn, PteFlags)>;

    /// 查询 accessed 位
    fn is_accessed(&self, asid: Asid, vpn: Vpn) -> bool;

    /// 清除 accessed 位
    fn clear_accessed(&self, asid: Asid, vpn: Vpn);
}

/// 进程注册表
///
/// 帧描述符只保存 [`Asid`]，驱逐时通过注册表找到受害页所在的地址空间。
pub trait ProcessRegistry: Send + Sync {
    /// 解析地址空间
    fn resolve(&self, asid: Asid) -> Option<Arc<AddressSpace>>;

    /// 地址空间所属的进程
    fn owner(&self, asid: Asid) -> Option<Pid>;

    /// 进程的地址空间
    fn asid_of(&self, pid: Pid) -> Option<Asid>;
}

/// 协作者集合
#[derive(Clone)]
pub struct VmHal {
    /// 物理帧分配器
    pub phys: Arc<dyn PhysAllocator>,
    /// 硬件页表
    pub mmu: Arc<dyn Mmu>,
    /// 进程注册表
    pub registry: Arc<dyn ProcessRegistry>,
    /// 交换设备
    pub swap_device: Arc<dyn SwapDevice>,
}

#[cfg(test)]
mod test_mock {
    use super::*;
    use crate::error::VmError;
    use test_support::mock::mm::{MockMmu, MockPhysMemory, MockPte};

    impl PhysAllocator for MockPhysMemory {
        fn alloc_zeroed_frame(&self) -> Option<Ppn> {
            MockPhysMemory::alloc_zeroed_frame(self).map(Ppn::from_usize)
        }

        fn free_frame(&self, ppn: Ppn) {
            MockPhysMemory::free_frame(self, ppn.as_usize())
        }

        fn paddr_to_vaddr(&self, paddr: usize) -> usize {
            MockPhysMemory::paddr_to_vaddr(self, paddr)
        }
    }

    fn pte_to_flags(pte: MockPte) -> (Ppn, PteFlags) {
        let mut flags = PteFlags::user(pte.writable);
        if pte.accessed {
            flags |= PteFlags::ACCESSED;
        }
        if pte.dirty {
            flags |= PteFlags::DIRTY;
        }
        (Ppn::from_usize(pte.ppn), flags)
    }

    impl Mmu for MockMmu {
        fn map(&self, asid: Asid, vpn: Vpn, ppn: Ppn, flags: PteFlags) -> VmResult<()> {
            let writable = flags.contains(PteFlags::WRITE);
            if MockMmu::map(self, asid.0, vpn.as_usize(), ppn.as_usize(), writable) {
                Ok(())
            } else {
                Err(VmError::AlreadyExists)
            }
        }

        fn unmap(&self, asid: Asid, vpn: Vpn) -> Option<(Ppn, PteFlags)> {
            MockMmu::unmap(self, asid.0, vpn.as_usize()).map(pte_to_flags)
        }

        fn translate(&self, asid: Asid, vpn: Vpn) -> Option<(Ppn, PteFlags)> {
            MockMmu::translate(self, asid.0, vpn.as_usize()).map(pte_to_flags)
        }

        fn is_accessed(&self, asid: Asid, vpn: Vpn) -> bool {
            MockMmu::is_accessed(self, asid.0, vpn.as_usize())
        }

        fn clear_accessed(&self, asid: Asid, vpn: Vpn) {
            MockMmu::clear_accessed(self, asid.0, vpn.as_usize())
        }
    }
}
