//! 缺页处理与按需加载
//!
//! 每个虚拟页的状态机：
//!
//! ```text
//! Unbacked ──fault──> (栈增长区域内) Loading ──> Resident
//!                     (否则)         Terminated(Unmapped)
//! NotResident ──fault──> Loading ──填充、安装映射──> Resident
//! Resident ──驱逐──> Evicting ──> NotResident
//! ```
//!
//! 观察到 `Loading` 或 `Evicting` 的缺页会释放页表锁并等待，不会重复加载。
//! 加载文件内容时读取不足视为该进程的致命错误：释放帧、表项回退，
//! 由上层根据 [`FaultOutcome::Terminated`] 终止进程。

use crate::address::{Vaddr, Vpn};
use crate::config::STACK_FAULT_SLACK;
use crate::error::VmResult;
use crate::frame::{Frame, FramePool};
use crate::hal::{PteFlags, frame_bytes};
use crate::page::{BackingKind, LoadJob, PageEntry, PageState};
use crate::space::AddressSpace;

/// 缺页处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// 页已驻留，可以重新执行访问
    Loaded,
    /// 进程必须被终止
    Terminated(TerminateReason),
}

/// 终止进程的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// 访问了没有任何后备的地址
    Unmapped {
        /// 缺页地址
        addr: Vaddr,
    },
    /// 向只读页写入
    ReadOnly {
        /// 缺页地址
        addr: Vaddr,
    },
    /// 加载文件内容时读取不足
    CorruptedLoad {
        /// 应读取的字节数
        expected: usize,
        /// 实际读取的字节数
        actual: usize,
    },
    /// 文件读取失败，附带错误码
    ReadFailed(isize),
}

enum Lookup {
    Done(FaultOutcome),
    Wait,
    Load(LoadJob),
    Unbacked,
}

impl AddressSpace {
    /// 处理 `addr` 处的缺页
    ///
    /// `sp` 是触发缺页时的用户栈指针，用于识别栈增长。
    ///
    /// # Errors
    ///
    /// 只返回致命错误（帧耗尽、交换区满、设备错误），调用方应停机。
    pub fn handle_fault(&self, addr: Vaddr, sp: Vaddr, write: bool) -> VmResult<FaultOutcome> {
        let vpn = addr.floor();
        let job = loop {
            let lookup = {
                let mut table = self.table().lock();
                match table.lookup_mut(vpn) {
                    None => Lookup::Unbacked,
                    Some(entry) if write && !entry.writable() => {
                        Lookup::Done(FaultOutcome::Terminated(TerminateReason::ReadOnly { addr }))
                    }
                    Some(entry) => match entry.state() {
                        PageState::Resident => Lookup::Done(FaultOutcome::Loaded),
                        PageState::Loading | PageState::Evicting => Lookup::Wait,
                        PageState::NotResident => Lookup::Load(entry.begin_load()),
                    },
                }
            };

            match lookup {
                Lookup::Done(outcome) => return Ok(outcome),
                Lookup::Wait => sync::relax(),
                Lookup::Load(job) => break job,
                Lookup::Unbacked => {
                    if !self.is_stack_growth(addr, sp) {
                        log::debug!("{:?}: fault at unmapped {:?}", self.asid(), addr);
                        return Ok(FaultOutcome::Terminated(TerminateReason::Unmapped { addr }));
                    }
                    // 插入失败说明另一线程刚刚建立了该页，重新查找
                    if let Some(job) = self.grow_stack(vpn) {
                        break job;
                    }
                }
            }
        };
        self.load_page(vpn, job)
    }

    fn is_stack_growth(&self, addr: Vaddr, sp: Vaddr) -> bool {
        let addr = addr.as_usize();
        self.system().config().in_stack_region(addr)
            && addr.saturating_add(STACK_FAULT_SLACK) >= sp.as_usize()
    }

    fn grow_stack(&self, vpn: Vpn) -> Option<LoadJob> {
        let mut entry = PageEntry::zero_fill(vpn, true);
        let job = entry.begin_load();
        self.table().lock().insert(entry).ok()?;
        log::debug!("{:?}: stack grows to {:?}", self.asid(), vpn);
        Some(job)
    }

    /// 把处于 Loading 状态的页装入内存并安装映射
    fn load_page(&self, vpn: Vpn, job: LoadJob) -> VmResult<FaultOutcome> {
        let system = self.system();
        let frame = match system.frames().allocate(self.asid(), vpn) {
            Ok(frame) => frame,
            Err(err) => {
                self.abort_load(vpn);
                return Err(err);
            }
        };

        // SAFETY: 帧被钉住且尚未映射，只有当前线程访问
        let bytes = unsafe { frame_bytes(system.phys(), frame.ppn()) };
        match job.kind {
            BackingKind::Executable | BackingKind::MappedFile => {
                let Some(file) = job.file.as_ref() else {
                    panic!("{:?}: file-backed page without a file", vpn);
                };
                let expected = job.length;
                let reason = match file.read_at(job.offset, &mut bytes[..expected]) {
                    Ok(actual) if actual == expected => None,
                    Ok(actual) => Some(TerminateReason::CorruptedLoad { expected, actual }),
                    Err(errno) => Some(TerminateReason::ReadFailed(errno)),
                };
                if let Some(reason) = reason {
                    log::warn!(
                        "{:?}: loading {:?} at offset {:#x} failed: {:?}",
                        self.asid(),
                        vpn,
                        job.offset,
                        reason
                    );
                    self.abandon_load(vpn, frame);
                    return Ok(FaultOutcome::Terminated(reason));
                }
            }
            BackingKind::ZeroFill => {}
            BackingKind::Swap => {
                let Some(slot) = job.slot else {
                    panic!("{:?}: swap-backed page without a slot", vpn);
                };
                if let Err(err) = system.swap().read_slot(slot, bytes) {
                    self.abandon_load(vpn, frame);
                    return Err(err);
                }
                let mut table = self.table().lock();
                if let Some(entry) = table.lookup_mut(vpn) {
                    entry.take_swap_slot();
                }
                system.swap().release_slot(slot);
            }
        }

        if let Err(err) = system
            .mmu()
            .map(self.asid(), vpn, frame.ppn(), PteFlags::user(job.writable))
        {
            log::error!("{:?}: installing {:?} failed: {}", self.asid(), vpn, err);
            self.abandon_load(vpn, frame);
            return Err(err);
        }

        {
            let mut pool = system.frames().lock();
            let mut table = self.table().lock();
            let Some(entry) = table.lookup_mut(vpn) else {
                panic!("{:?}: {:?} vanished while loading", self.asid(), vpn);
            };
            entry.finish_load();
            FramePool::unpin_locked(&mut pool, frame);
        }
        log::trace!("{:?}: {:?} loaded into {:?}", self.asid(), vpn, frame.ppn());
        Ok(FaultOutcome::Loaded)
    }

    fn abandon_load(&self, vpn: Vpn, frame: Frame) {
        self.system().frames().free(frame);
        self.abort_load(vpn);
    }

    fn abort_load(&self, vpn: Vpn) {
        if let Some(entry) = self.table().lock().lookup_mut(vpn) {
            entry.abort_load();
        }
    }
}
