//! 补充页表项

use alloc::sync::Arc;
use core::fmt;

use crate::address::Vpn;
use crate::config::PAGE_SIZE;
use crate::file::VmFile;
use crate::swap::SwapSlot;

/// 页的后备存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    /// 可执行文件段
    Executable,
    /// 文件映射
    MappedFile,
    /// 交换槽
    Swap,
    /// 首次访问时清零
    ZeroFill,
}

impl BackingKind {
    /// 是否以文件为后备
    pub fn is_file(&self) -> bool {
        matches!(self, BackingKind::Executable | BackingKind::MappedFile)
    }
}

/// 页的驻留状态
///
/// 状态只在持有所属补充页表锁时修改。`Loading` 与 `Evicting`
/// 是过渡状态，此时其他缺页必须等待，不能重复加载。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// 有后备存储但不在内存中
    NotResident,
    /// 正在加载，目标帧被钉住
    Loading,
    /// 已驻留并已安装硬件映射
    Resident,
    /// 正在被驱逐
    Evicting,
}

/// 加载一页所需的信息，在页表锁外使用
pub(crate) struct LoadJob {
    pub kind: BackingKind,
    pub file: Option<Arc<dyn VmFile>>,
    pub offset: usize,
    pub length: usize,
    pub writable: bool,
    pub slot: Option<SwapSlot>,
}

/// 驱逐一页所需的信息，在页表锁外使用
pub(crate) struct EvictJob {
    pub kind: BackingKind,
    pub file: Option<Arc<dyn VmFile>>,
    pub offset: usize,
    pub length: usize,
}

/// 补充页表项
///
/// `origin` 记录页最初的后备类型；页被换出后 `swap_slot` 非空，
/// 此时 [`PageEntry::kind`] 为 [`BackingKind::Swap`]，换入后恢复为 `origin`。
/// 文件句柄与偏移在换出期间保留，解除映射时仍可写回文件。
pub struct PageEntry {
    vpn: Vpn,
    origin: BackingKind,
    file: Option<Arc<dyn VmFile>>,
    offset: usize,
    length: usize,
    writable: bool,
    state: PageState,
    swap_slot: Option<SwapSlot>,
}

impl PageEntry {
    /// 以文件内容为后备的页
    ///
    /// 加载时从 `offset` 读取 `length` 字节，其余部分补零。
    pub fn file_backed(
        vpn: Vpn,
        kind: BackingKind,
        file: Arc<dyn VmFile>,
        offset: usize,
        length: usize,
        writable: bool,
    ) -> Self {
        assert!(kind.is_file(), "{:?} is not a file-backed kind", kind);
        assert!(length <= PAGE_SIZE);
        Self {
            vpn,
            origin: kind,
            file: Some(file),
            offset,
            length,
            writable,
            state: PageState::NotResident,
            swap_slot: None,
        }
    }

    /// 首次访问时清零的页
    pub fn zero_fill(vpn: Vpn, writable: bool) -> Self {
        Self {
            vpn,
            origin: BackingKind::ZeroFill,
            file: None,
            offset: 0,
            length: 0,
            writable,
            state: PageState::NotResident,
            swap_slot: None,
        }
    }

    /// 虚拟页
    pub fn vpn(&self) -> Vpn {
        self.vpn
    }

    /// 当前后备类型
    pub fn kind(&self) -> BackingKind {
        if self.swap_slot.is_some() {
            BackingKind::Swap
        } else {
            self.origin
        }
    }

    /// 最初的后备类型
    pub fn origin(&self) -> BackingKind {
        self.origin
    }

    /// 文件句柄
    pub fn file(&self) -> Option<&Arc<dyn VmFile>> {
        self.file.as_ref()
    }

    /// 文件偏移
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 从文件读取的字节数
    pub fn length(&self) -> usize {
        self.length
    }

    /// 是否可写
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// 驻留状态
    pub fn state(&self) -> PageState {
        self.state
    }

    /// 是否驻留
    pub fn is_resident(&self) -> bool {
        self.state == PageState::Resident
    }

    /// 是否正在被驱逐
    pub fn eviction_in_progress(&self) -> bool {
        self.state == PageState::Evicting
    }

    /// 持有的交换槽
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        self.swap_slot
    }

    pub(crate) fn take_swap_slot(&mut self) -> Option<SwapSlot> {
        self.swap_slot.take()
    }

    /// NotResident → Loading
    pub(crate) fn begin_load(&mut self) -> LoadJob {
        assert_eq!(self.state, PageState::NotResident, "load of {:?}", self.vpn);
        self.state = PageState::Loading;
        self.load_job()
    }

    fn load_job(&self) -> LoadJob {
        LoadJob {
            kind: self.kind(),
            file: self.file.clone(),
            offset: self.offset,
            length: self.length,
            writable: self.writable,
            slot: self.swap_slot,
        }
    }

    /// Loading → Resident
    pub(crate) fn finish_load(&mut self) {
        assert_eq!(self.state, PageState::Loading, "finish load of {:?}", self.vpn);
        debug_assert!(self.swap_slot.is_none());
        self.state = PageState::Resident;
    }

    /// Loading → NotResident，加载失败时回退
    pub(crate) fn abort_load(&mut self) {
        assert_eq!(self.state, PageState::Loading, "abort load of {:?}", self.vpn);
        self.state = PageState::NotResident;
    }

    /// Resident → Evicting
    pub(crate) fn begin_eviction(&mut self) -> EvictJob {
        assert_eq!(
            self.state,
            PageState::Resident,
            "victim {:?} is not resident",
            self.vpn
        );
        self.state = PageState::Evicting;
        EvictJob {
            kind: self.kind(),
            file: self.file.clone(),
            offset: self.offset,
            length: self.length,
        }
    }

    /// Evicting → NotResident，换出到交换区时记录槽
    pub(crate) fn finish_eviction(&mut self, slot: Option<SwapSlot>) {
        assert_eq!(self.state, PageState::Evicting, "finish eviction of {:?}", self.vpn);
        self.swap_slot = slot;
        self.state = PageState::NotResident;
    }

    /// Resident → NotResident，帧已由调用方释放（解除映射或销毁）
    pub(crate) fn drop_residency(&mut self) {
        assert_eq!(self.state, PageState::Resident);
        self.state = PageState::NotResident;
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageEntry")
            .field("vpn", &self.vpn)
            .field("kind", &self.kind())
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("writable", &self.writable)
            .field("state", &self.state)
            .field("swap_slot", &self.swap_slot)
            .finish()
    }
}
