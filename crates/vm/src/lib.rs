//! 虚拟内存子系统
//!
//! 提供按需分页所需的全部组件：固定容量的物理帧池、每个地址空间的补充页表、
//! 时钟（二次机会）置换、交换区，以及文件内存映射。
//!
//! # 组件
//!
//! - [`swap`]：基于位图的交换槽管理
//! - [`page`]：补充页表（每个虚拟页的后备存储与状态）
//! - [`frame`]：帧池与时钟驱逐
//! - [`fault`]：缺页处理与按需加载
//! - [`mmap`]：文件映射的建立与撤销
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与外部协作者解耦（见 [`hal`] 与 [`file`]）：
//! - [`PhysAllocator`]：物理帧来源
//! - [`Mmu`]：硬件页表操作
//! - [`ProcessRegistry`]：地址空间与进程之间的解析
//! - [`VmFile`] / [`SwapDevice`]：文件系统与交换设备
//!
//! 子系统在初始化时构造一次 [`VmSystem`]，之后以 `Arc` 句柄传给每个
//! [`AddressSpace`]。
//!
//! # 锁顺序
//!
//! 帧池 → 补充页表 → 交换区。缺页路径在进入帧池前必须释放自己的补充页表锁。

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod config;
mod error;
mod system;

pub mod address;
pub mod fault;
pub mod file;
pub mod frame;
pub mod hal;
pub mod mmap;
pub mod page;
pub mod space;
pub mod swap;

#[cfg(test)]
mod tests;

pub use config::{
    DEFAULT_FRAME_CAPACITY, DEFAULT_MAX_STACK_SIZE, PAGE_SIZE, STACK_FAULT_SLACK, VmConfig,
};
pub use error::{VmError, VmResult};
pub use system::VmSystem;

pub use address::{Asid, Pid, Ppn, Vaddr, Vpn, VpnRange};
pub use fault::{FaultOutcome, TerminateReason};
pub use file::VmFile;
pub use frame::{FrameDescriptor, FramePool};
pub use hal::{Mmu, PhysAllocator, ProcessRegistry, PteFlags, VmHal};
pub use mmap::{MapId, MmapRecord};
pub use page::{BackingKind, PageEntry, PageState, SupplementalPageTable};
pub use space::AddressSpace;
pub use swap::{SwapDevice, SwapSlot, SwapStore};
