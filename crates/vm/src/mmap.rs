//! 文件内存映射
//!
//! [`AddressSpace::mmap`] 把整个文件映射到一段页对齐的地址上。
//! 建立映射时只登记补充页表项，内容在缺页时按需读取；
//! [`AddressSpace::munmap`] 把脏页写回文件后撤销这些表项。
//!
//! 映射持有自己打开的文件句柄，撤销映射时关闭。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::Ordering;

use crate::address::{Vaddr, Vpn, VpnRange};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::file::{VmFile, write_back};
use crate::hal::PteFlags;
use crate::page::{BackingKind, PageEntry, PageState};
use crate::space::AddressSpace;

/// 映射标识符，在地址空间内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapId(pub usize);

/// 映射记录
pub struct MmapRecord {
    id: MapId,
    base: Vaddr,
    length: usize,
    pages: VpnRange,
    file: Arc<dyn VmFile>,
}

impl MmapRecord {
    /// 标识符
    pub fn id(&self) -> MapId {
        self.id
    }

    /// 起始地址
    pub fn base(&self) -> Vaddr {
        self.base
    }

    /// 映射的字节数，即建立映射时的文件长度
    pub fn length(&self) -> usize {
        self.length
    }

    /// 覆盖的页
    pub fn pages(&self) -> VpnRange {
        self.pages
    }
}

impl fmt::Debug for MmapRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapRecord")
            .field("id", &self.id)
            .field("base", &self.base)
            .field("length", &self.length)
            .field("file", &"<dyn VmFile>")
            .finish()
    }
}

impl AddressSpace {
    /// 把 `file` 映射到 `addr`
    ///
    /// 整个页范围在修改任何状态之前先检查一遍，失败时地址空间保持不变。
    ///
    /// # Errors
    ///
    /// - `addr` 为 0：[`VmError::InvalidAddress`]
    /// - `addr` 未按页对齐：[`VmError::Unaligned`]
    /// - 文件为空：[`VmError::EmptyFile`]
    /// - 范围与已有页或栈区域重叠：[`VmError::Overlap`]
    /// - 无法重新打开文件：[`VmError::FileError`]
    pub fn mmap(&self, file: &Arc<dyn VmFile>, addr: Vaddr) -> VmResult<MapId> {
        if addr.as_usize() == 0 {
            return Err(VmError::InvalidAddress);
        }
        if !addr.is_page_aligned() {
            return Err(VmError::Unaligned);
        }
        let length = file.len();
        if length == 0 {
            return Err(VmError::EmptyFile);
        }
        let Some(range) = VpnRange::covering(addr, length) else {
            return Err(VmError::InvalidAddress);
        };

        let config = self.system().config();
        let stack = VpnRange::new(
            Vaddr::from_usize(config.stack_floor()).floor(),
            Vaddr::from_usize(config.user_stack_top).floor(),
        );
        if range.intersects(&stack) {
            return Err(VmError::Overlap);
        }

        let handle = file.reopen().map_err(|errno| {
            log::warn!("{:?}: reopening mapped file failed: {}", self.asid(), errno);
            VmError::FileError
        })?;

        {
            let mut table = self.table().lock();
            if table.overlaps(&range) {
                return Err(VmError::Overlap);
            }
            let mut remaining = length;
            for (i, vpn) in range.iter().enumerate() {
                let page_len = remaining.min(PAGE_SIZE);
                remaining -= page_len;
                table.insert(PageEntry::file_backed(
                    vpn,
                    BackingKind::MappedFile,
                    handle.clone(),
                    i * PAGE_SIZE,
                    page_len,
                    true,
                ))?;
            }
        }

        let id = MapId(self.next_map_id.fetch_add(1, Ordering::Relaxed));
        self.mappings.lock().insert(
            id,
            MmapRecord {
                id,
                base: addr,
                length,
                pages: range,
                file: handle,
            },
        );
        log::debug!(
            "{:?}: mapped {:?} at {:?}, {} bytes",
            self.asid(),
            id,
            addr,
            length
        );
        Ok(id)
    }

    /// 撤销映射
    ///
    /// 驻留的脏页写回文件；被换出到交换区的页与文件内容一致，只释放其交换槽。
    ///
    /// # Errors
    ///
    /// - 没有该映射：[`VmError::NotFound`]
    /// - 写回失败：[`VmError::FileError`]，为致命错误
    pub fn munmap(&self, id: MapId) -> VmResult<()> {
        let Some(record) = self.mappings.lock().remove(&id) else {
            return Err(VmError::NotFound);
        };
        for vpn in record.pages().iter() {
            self.unmap_page(vpn)?;
        }
        log::debug!("{:?}: unmapped {:?}", self.asid(), id);
        // 记录在此 drop，关闭映射自己的文件句柄
        drop(record);
        Ok(())
    }

    /// 当前所有映射的标识符
    pub fn mapping_ids(&self) -> Vec<MapId> {
        self.mappings.lock().keys().copied().collect()
    }

    /// 查询映射记录
    pub fn mapping(&self, id: MapId) -> Option<(Vaddr, usize)> {
        self.mappings
            .lock()
            .get(&id)
            .map(|record| (record.base(), record.length()))
    }

    fn unmap_page(&self, vpn: Vpn) -> VmResult<()> {
        let system = self.system();
        loop {
            let mut pool = system.frames().lock();
            let mut table = self.table().lock();
            let Some(entry) = table.lookup_mut(vpn) else {
                return Ok(());
            };
            match entry.state() {
                PageState::Loading | PageState::Evicting => {
                    drop(table);
                    drop(pool);
                    sync::relax();
                    continue;
                }
                PageState::Resident => {
                    let Some((ppn, flags)) = system.mmu().unmap(self.asid(), vpn) else {
                        panic!("{:?}: resident {:?} is not mapped", self.asid(), vpn);
                    };
                    if flags.contains(PteFlags::DIRTY) {
                        if let Some(file) = entry.file() {
                            // SAFETY: 映射已清除，帧仍由池持有
                            let bytes = unsafe { crate::hal::frame_bytes(system.phys(), ppn) };
                            write_back(file.as_ref(), entry.offset(), &bytes[..entry.length()])?;
                        }
                    }
                    system.frames().release_locked(&mut pool, self.asid(), vpn);
                    entry.drop_residency();
                }
                PageState::NotResident => {
                    // 脏的映射页驱逐时写回文件，进入交换区的必是干净页，直接丢弃
                    if let Some(slot) = entry.take_swap_slot() {
                        system.swap().release_slot(slot);
                    }
                }
            }
            table.remove(vpn);
            return Ok(());
        }
    }
}
