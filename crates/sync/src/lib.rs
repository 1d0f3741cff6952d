//! 虚拟内存子系统使用的锁
//!
//! - [`SpinLock`]：`lock_api` 互斥锁，底层 [`RawSpinLock`] 持锁期间关闭本地中断
//! - [`IntrGuard`]：作用域内关闭中断，drop 时恢复
//! - [`relax`]：等待页面加载或驱逐完成时的退避
//!
//! 中断开关与退避依赖具体架构，由内核在启动时通过 [`register_arch_ops`]
//! 提供一个 [`ArchOps`] 实现；在此之前使用任何锁都会 panic。

#![no_std]

mod intr_guard;
mod raw_spin_lock;
mod spin_lock;

pub use intr_guard::*;
pub use raw_spin_lock::*;
pub use spin_lock::*;

use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构钩子
pub trait ArchOps: Send + Sync {
    /// 关闭本地中断，返回关闭前的中断状态
    ///
    /// # Safety
    /// 返回值只能交给同一 CPU 上的 [`ArchOps::restore_interrupts`]
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 把中断状态恢复为 `flags`
    ///
    /// # Safety
    /// `flags` 来自同一 CPU 上先前的 [`ArchOps::read_and_disable_interrupts`]
    unsafe fn restore_interrupts(&self, flags: usize);

    /// 当前 CPU 编号
    fn cpu_id(&self) -> usize;

    /// 忙等待时的一次退避
    ///
    /// 默认只发出 spin-loop 提示；宿主机测试可以改为让出线程。
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

// `&'static dyn ArchOps` 拆成数据指针和虚表指针分别保存
static OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 安装架构钩子
///
/// # Safety
/// 只能在启动阶段、其他 CPU 运行之前调用一次
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    // SAFETY: `*const dyn ArchOps` 与 `(usize, usize)` 大小相同
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ops as *const _) };
    OPS_VTABLE.store(vtable, Ordering::Release);
    OPS_DATA.store(data, Ordering::Release);
}

/// 架构钩子是否已经安装
pub fn arch_ops_registered() -> bool {
    OPS_DATA.load(Ordering::Acquire) != 0
}

fn installed_ops() -> Option<&'static dyn ArchOps> {
    let data = OPS_DATA.load(Ordering::Acquire);
    if data == 0 {
        return None;
    }
    let vtable = OPS_VTABLE.load(Ordering::Acquire);
    // SAFETY: 两部分均来自 register_arch_ops 中的 `&'static dyn ArchOps`
    Some(unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) })
}

#[inline]
pub(crate) fn arch_ops() -> &'static dyn ArchOps {
    if let Some(ops) = installed_ops() {
        return ops;
    }
    #[cfg(test)]
    {
        extern crate test_support;
        return &test_support::mock::arch::MOCK_ARCH_OPS;
    }
    #[cfg(not(test))]
    panic!("sync: arch hooks are not installed");
}

/// 忙等待退避，具体行为由架构钩子决定
#[inline]
pub fn relax() {
    arch_ops().relax();
}
