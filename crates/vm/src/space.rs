//! 地址空间
//!
//! 一个 [`AddressSpace`] 拥有自己的补充页表和文件映射记录，
//! 通过 [`VmSystem`] 句柄访问共享的帧池与交换区。
//!
//! 缺页处理见 [`crate::fault`]，文件映射见 [`crate::mmap`]。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sync::SpinLock;

use crate::address::{Asid, Vaddr, VpnRange};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::file::VmFile;
use crate::mmap::{MapId, MmapRecord};
use crate::page::{BackingKind, PageEntry, PageState, SupplementalPageTable};
use crate::system::VmSystem;

/// 地址空间
pub struct AddressSpace {
    asid: Asid,
    system: Arc<VmSystem>,
    table: SpinLock<SupplementalPageTable>,
    pub(crate) mappings: SpinLock<BTreeMap<MapId, MmapRecord>>,
    pub(crate) next_map_id: AtomicUsize,
    destroyed: AtomicBool,
}

impl AddressSpace {
    /// 创建空的地址空间
    ///
    /// 调用方负责把它登记到进程注册表中，驱逐其他进程的页时需要据此找到它。
    pub fn new(system: Arc<VmSystem>, asid: Asid) -> Arc<Self> {
        Arc::new(Self {
            asid,
            system,
            table: SpinLock::new(SupplementalPageTable::new()),
            mappings: SpinLock::new(BTreeMap::new()),
            next_map_id: AtomicUsize::new(1),
            destroyed: AtomicBool::new(false),
        })
    }

    /// 地址空间标识符
    pub fn asid(&self) -> Asid {
        self.asid
    }

    /// 所属子系统
    pub fn system(&self) -> &VmSystem {
        &self.system
    }

    pub(crate) fn table(&self) -> &SpinLock<SupplementalPageTable> {
        &self.table
    }

    /// 在页表锁内读取补充页表
    pub fn with_table<R>(&self, f: impl FnOnce(&SupplementalPageTable) -> R) -> R {
        f(&self.table.lock())
    }

    /// 登记一个可执行文件段，按需加载
    ///
    /// 从 `vaddr` 开始的每一页：仍有 `read_bytes` 剩余的页从 `file`
    /// 对应偏移读取，其余部分补零；之后的 `zero_bytes` 部分为全零页。
    ///
    /// # Errors
    ///
    /// - `vaddr` 或 `offset` 未按页对齐：[`VmError::Unaligned`]
    /// - 段的结束地址溢出：[`VmError::InvalidAddress`]
    /// - 任何一页已有表项：[`VmError::Overlap`]，此时不做任何修改
    pub fn register_segment(
        &self,
        file: &Arc<dyn VmFile>,
        offset: usize,
        vaddr: Vaddr,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> VmResult<()> {
        if !vaddr.is_page_aligned() || offset % PAGE_SIZE != 0 {
            return Err(VmError::Unaligned);
        }
        let Some(range) = read_bytes
            .checked_add(zero_bytes)
            .and_then(|len| VpnRange::covering(vaddr, len))
        else {
            return Err(VmError::InvalidAddress);
        };

        let mut table = self.table.lock();
        if table.overlaps(&range) {
            return Err(VmError::Overlap);
        }
        let mut remaining = read_bytes;
        for (i, vpn) in range.iter().enumerate() {
            let page_read = remaining.min(PAGE_SIZE);
            remaining -= page_read;
            let entry = if page_read > 0 {
                PageEntry::file_backed(
                    vpn,
                    BackingKind::Executable,
                    file.clone(),
                    offset + i * PAGE_SIZE,
                    page_read,
                    writable,
                )
            } else {
                PageEntry::zero_fill(vpn, writable)
            };
            table.insert(entry)?;
        }
        log::debug!(
            "{:?}: segment {:?} of {} pages at offset {:#x}",
            self.asid,
            vaddr,
            range.len(),
            offset
        );
        Ok(())
    }

    /// 销毁地址空间
    ///
    /// 撤销所有文件映射（写回脏页），释放所有驻留帧与交换槽，最后销毁补充页表。
    /// 重复调用无效果。
    ///
    /// # Errors
    ///
    /// 写回文件失败时返回 [`VmError::FileError`] 等致命错误。
    pub fn destroy(&self) -> VmResult<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for id in self.mapping_ids() {
            self.munmap(id)?;
        }

        let system = self.system();
        loop {
            let mut pool = system.frames().lock();
            let mut table = self.table.lock();
            let busy = table
                .iter()
                .any(|e| matches!(e.state(), PageState::Loading | PageState::Evicting));
            if busy {
                drop(table);
                drop(pool);
                sync::relax();
                continue;
            }

            for vpn in table.vpns() {
                let Some(entry) = table.lookup_mut(vpn) else {
                    continue;
                };
                if entry.is_resident() {
                    system.mmu().unmap(self.asid, vpn);
                    system.frames().release_locked(&mut pool, self.asid, vpn);
                    entry.drop_residency();
                }
                if let Some(slot) = entry.take_swap_slot() {
                    system.swap().release_slot(slot);
                }
            }
            table.destroy();
            break;
        }
        log::debug!("{:?}: destroyed", self.asid);
        Ok(())
    }

    /// 是否已销毁
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        if !self.is_destroyed() && !self.table.get_mut().is_empty() {
            log::warn!("{:?}: dropped without destroy", self.asid);
        }
    }
}
