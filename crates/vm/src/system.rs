//! 虚拟内存子系统实例

use alloc::sync::Arc;

use crate::address::Pid;
use crate::config::VmConfig;
use crate::frame::FramePool;
use crate::hal::{Mmu, PhysAllocator, ProcessRegistry, VmHal};
use crate::space::AddressSpace;
use crate::swap::SwapStore;

/// 虚拟内存子系统
///
/// 在内核初始化时构造一次，之后以 `Arc` 句柄传给每个地址空间。
/// 帧池与交换区是全系统共享的，各自由自己的锁保护。
pub struct VmSystem {
    config: VmConfig,
    frames: FramePool,
    swap: Arc<SwapStore>,
    hal: VmHal,
}

impl VmSystem {
    /// 创建子系统
    pub fn new(config: VmConfig, hal: VmHal) -> Arc<Self> {
        assert!(
            config.user_stack_top % crate::PAGE_SIZE == 0,
            "user stack top {:#x} is not page aligned",
            config.user_stack_top
        );
        let swap = Arc::new(SwapStore::new(hal.swap_device.clone()));
        let frames = FramePool::new(
            config.frame_capacity,
            hal.phys.clone(),
            hal.mmu.clone(),
            hal.registry.clone(),
            swap.clone(),
        );
        log::info!(
            "vm: {} frames, {} swap slots, stack {:#x} (max {:#x} bytes)",
            config.frame_capacity,
            swap.total_slots(),
            config.user_stack_top,
            config.max_stack_size
        );
        Arc::new(Self {
            config,
            frames,
            swap,
            hal,
        })
    }

    /// 配置
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// 帧池
    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    /// 交换区
    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    /// 硬件页表
    pub fn mmu(&self) -> &dyn Mmu {
        self.hal.mmu.as_ref()
    }

    /// 进程注册表
    pub fn registry(&self) -> &dyn ProcessRegistry {
        self.hal.registry.as_ref()
    }

    pub(crate) fn phys(&self) -> &dyn PhysAllocator {
        self.hal.phys.as_ref()
    }

    /// 查找进程的地址空间
    pub fn space_of(&self, pid: Pid) -> Option<Arc<AddressSpace>> {
        let registry = self.registry();
        registry.resolve(registry.asid_of(pid)?)
    }

    /// 关闭子系统
    ///
    /// # Panics
    ///
    /// 仍有帧驻留或交换槽未释放时 panic，说明有地址空间没有被销毁。
    pub fn shutdown(&self) {
        let resident = self.frames.resident_count();
        let swapped = self.swap.used_slots();
        assert!(
            resident == 0 && swapped == 0,
            "vm: shutdown with {} resident frames and {} swap slots in use",
            resident,
            swapped
        );
        log::info!("vm: shut down");
    }
}
