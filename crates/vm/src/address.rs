//! 地址与页码
//!
//! 此模块定义子系统使用的地址类型 ([`Vaddr`])、页码类型 ([`Vpn`], [`Ppn`])、
//! 连续页码范围 ([`VpnRange`])，以及地址空间和进程的标识符。
//!
//! 标识符只是不透明的整数，不持有任何所有权；帧描述符通过 [`Asid`]
//! 反向引用其所属地址空间，需要时再经进程注册表解析。

use core::fmt;
use core::ops::Range;

use crate::config::PAGE_SIZE;

/// 虚拟地址
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Vaddr(usize);

impl Vaddr {
    /// 从 usize 创建
    pub const fn from_usize(addr: usize) -> Self {
        Self(addr)
    }

    /// 转换为 usize
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// 是否页对齐
    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    /// 页内偏移
    pub const fn page_offset(self) -> usize {
        self.0 % PAGE_SIZE
    }

    /// 包含该地址的页（向下取整）
    pub const fn floor(self) -> Vpn {
        Vpn(self.0 / PAGE_SIZE)
    }

    /// 不小于该地址的第一个页边界（向上取整）
    pub const fn ceil(self) -> Vpn {
        Vpn(self.0.div_ceil(PAGE_SIZE))
    }
}

impl fmt::Debug for Vaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vaddr({:#x})", self.0)
    }
}

/// 虚拟页码
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Vpn(usize);

impl Vpn {
    /// 从 usize 创建
    pub const fn from_usize(vpn: usize) -> Self {
        Self(vpn)
    }

    /// 转换为 usize
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// 页的起始虚拟地址
    pub const fn start_addr(self) -> Vaddr {
        Vaddr(self.0 * PAGE_SIZE)
    }

    /// 向后偏移 `count` 页
    pub const fn add(self, count: usize) -> Self {
        Self(self.0 + count)
    }
}

impl fmt::Debug for Vpn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vpn({:#x})", self.0)
    }
}

/// 物理页码
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ppn(usize);

impl Ppn {
    /// 从 usize 创建
    pub const fn from_usize(ppn: usize) -> Self {
        Self(ppn)
    }

    /// 转换为 usize
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// 页的起始物理地址
    pub const fn start_paddr(self) -> usize {
        self.0 * PAGE_SIZE
    }
}

impl fmt::Debug for Ppn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ppn({:#x})", self.0)
    }
}

/// 左闭右开的虚拟页码范围
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VpnRange {
    start: Vpn,
    end: Vpn,
}

impl VpnRange {
    /// 创建范围 `[start, end)`
    pub fn new(start: Vpn, end: Vpn) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// 覆盖 `[addr, addr + len)` 的最小页范围
    ///
    /// 结束地址溢出时返回 None。
    pub fn covering(addr: Vaddr, len: usize) -> Option<Self> {
        let end = Vaddr::from_usize(addr.as_usize().checked_add(len)?);
        Some(Self::new(addr.floor(), end.ceil()))
    }

    /// 起始页
    pub fn start(&self) -> Vpn {
        self.start
    }

    /// 结束页（不包含）
    pub fn end(&self) -> Vpn {
        self.end
    }

    /// 页数
    pub fn len(&self) -> usize {
        self.end.0 - self.start.0
    }

    /// 是否为空范围
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// 是否包含 `vpn`
    pub fn contains(&self, vpn: Vpn) -> bool {
        vpn >= self.start && vpn < self.end
    }

    /// 与另一范围是否相交
    pub fn intersects(&self, other: &VpnRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// 按顺序遍历范围内的页
    pub fn iter(&self) -> impl Iterator<Item = Vpn> + use<> {
        let range: Range<usize> = self.start.0..self.end.0;
        range.map(Vpn)
    }
}

/// 地址空间标识符
///
/// 帧描述符以此反向引用所属地址空间，不构成所有权关系。
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Asid(pub usize);

/// 进程标识符
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub usize);
