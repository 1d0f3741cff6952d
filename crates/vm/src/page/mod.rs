//! 补充页表
//!
//! 每个地址空间一张，记录每个虚拟页的后备存储、文件位置、交换槽与驻留状态。
//! 硬件页表只描述已驻留的页，补充页表描述所有“存在”的页。
//!
//! 表本身不加锁，由 [`crate::AddressSpace`] 用自旋锁包裹。
//! 驱逐会跨地址空间修改受害页的表项，因此必须经过同一把锁。

mod entry;

pub use entry::{BackingKind, PageEntry, PageState};
pub(crate) use entry::LoadJob;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::address::{Vpn, VpnRange};
use crate::error::{VmError, VmResult};

/// 补充页表
#[derive(Debug, Default)]
pub struct SupplementalPageTable {
    entries: BTreeMap<Vpn, PageEntry>,
}

impl SupplementalPageTable {
    /// 创建空表
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// 插入表项
    ///
    /// 该页已有表项时返回 [`VmError::AlreadyExists`]，表不变。
    /// 插入一段范围前，调用方应先用 [`Self::overlaps`] 检查整个范围。
    pub fn insert(&mut self, entry: PageEntry) -> VmResult<()> {
        let vpn = entry.vpn();
        if self.entries.contains_key(&vpn) {
            return Err(VmError::AlreadyExists);
        }
        self.entries.insert(vpn, entry);
        Ok(())
    }

    /// 查找表项
    pub fn lookup(&self, vpn: Vpn) -> Option<&PageEntry> {
        self.entries.get(&vpn)
    }

    /// 查找表项（可变）
    pub fn lookup_mut(&mut self, vpn: Vpn) -> Option<&mut PageEntry> {
        self.entries.get_mut(&vpn)
    }

    /// 移除表项
    pub fn remove(&mut self, vpn: Vpn) -> Option<PageEntry> {
        self.entries.remove(&vpn)
    }

    /// 范围内是否已有任何表项
    pub fn overlaps(&self, range: &VpnRange) -> bool {
        self.entries
            .range(range.start()..range.end())
            .next()
            .is_some()
    }

    /// 表项数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按页序遍历
    pub fn iter(&self) -> impl Iterator<Item = &PageEntry> {
        self.entries.values()
    }

    /// 所有表项的页号
    pub fn vpns(&self) -> Vec<Vpn> {
        self.entries.keys().copied().collect()
    }

    /// 销毁所有表项
    ///
    /// 调用方必须已释放全部驻留帧和交换槽。
    pub fn destroy(&mut self) {
        debug_assert!(
            self.entries
                .values()
                .all(|e| e.state() == PageState::NotResident && e.swap_slot().is_none()),
            "destroying a page table that still holds frames or swap slots"
        );
        self.entries.clear();
    }
}
