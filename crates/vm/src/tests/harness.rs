//! 测试装置

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::BTreeSet;
use std::sync::Mutex;

use sync::ArchOps;
use test_support::mock::device::MockBlockDevice;
use test_support::mock::fs::MockFile;
use test_support::mock::mm::{MockMmu, MockPhysMemory};

use crate::{
    AddressSpace, Asid, FaultOutcome, PAGE_SIZE, PageState, Pid, ProcessRegistry,
    TerminateReason, Vaddr, VmConfig, VmFile, VmHal, VmSystem, Vpn,
};

struct DummyArchOps;

impl ArchOps for DummyArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        0
    }

    unsafe fn restore_interrupts(&self, _flags: usize) {}

    fn cpu_id(&self) -> usize {
        0
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

static DUMMY_ARCH_OPS: DummyArchOps = DummyArchOps;
// 0 = uninit, 1 = initializing, 2 = ready
static SYNC_INIT: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn init_sync_arch_ops() {
    match SYNC_INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            // Safety: tests use a single global dummy ArchOps.
            unsafe { sync::register_arch_ops(&DUMMY_ARCH_OPS) };
            SYNC_INIT.store(2, Ordering::Release);
        }
        Err(_) => {
            while SYNC_INIT.load(Ordering::Acquire) != 2 {
                core::hint::spin_loop();
            }
        }
    }
}

/// 以弱引用登记地址空间的注册表
#[derive(Default)]
pub(crate) struct TestRegistry {
    spaces: Mutex<BTreeMap<Asid, (Pid, Weak<AddressSpace>)>>,
}

impl TestRegistry {
    fn register(&self, pid: Pid, space: &Arc<AddressSpace>) {
        self.spaces
            .lock()
            .unwrap()
            .insert(space.asid(), (pid, Arc::downgrade(space)));
    }
}

impl ProcessRegistry for TestRegistry {
    fn resolve(&self, asid: Asid) -> Option<Arc<AddressSpace>> {
        self.spaces.lock().unwrap().get(&asid)?.1.upgrade()
    }

    fn owner(&self, asid: Asid) -> Option<Pid> {
        self.spaces.lock().unwrap().get(&asid).map(|(pid, _)| *pid)
    }

    fn asid_of(&self, pid: Pid) -> Option<Asid> {
        self.spaces
            .lock()
            .unwrap()
            .iter()
            .find(|(_, (p, _))| *p == pid)
            .map(|(asid, _)| *asid)
    }
}

pub(crate) const STACK_TOP: usize = 0x8000_0000;
pub(crate) const MAX_STACK: usize = 16 * PAGE_SIZE;
/// 远离栈区域的映射基址
pub(crate) const MAP_BASE: usize = 0x1000_0000;

pub(crate) struct Harness {
    pub system: Arc<VmSystem>,
    pub phys: Arc<MockPhysMemory>,
    pub mmu: Arc<MockMmu>,
    pub registry: Arc<TestRegistry>,
    pub device: Arc<MockBlockDevice>,
    next_id: AtomicUsize,
}

impl Harness {
    pub fn new(capacity: usize) -> Self {
        Self::with_swap_slots(capacity, 64)
    }

    pub fn with_swap_slots(capacity: usize, slots: usize) -> Self {
        init_sync_arch_ops();
        let phys = Arc::new(MockPhysMemory::new(capacity + 4));
        let mmu = Arc::new(MockMmu::new());
        let device = Arc::new(MockBlockDevice::new(slots * 8, 512));
        let registry = Arc::new(TestRegistry::default());
        let config = VmConfig {
            frame_capacity: capacity,
            user_stack_top: STACK_TOP,
            max_stack_size: MAX_STACK,
        };
        let hal = VmHal {
            phys: phys.clone(),
            mmu: mmu.clone(),
            registry: registry.clone(),
            swap_device: device.clone(),
        };
        Self {
            system: VmSystem::new(config, hal),
            phys,
            mmu,
            registry,
            device,
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn new_space(&self) -> Arc<AddressSpace> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let space = AddressSpace::new(self.system.clone(), Asid(id));
        self.registry.register(Pid(100 + id), &space);
        space
    }

    /// 模拟用户态访问一页内的 `[addr, addr + len)`，必要时缺页并重试
    fn access_page<R>(
        &self,
        space: &AddressSpace,
        addr: usize,
        write: bool,
        mut f: impl FnMut(*mut u8) -> R,
    ) -> Result<R, TerminateReason> {
        let vpn = addr / PAGE_SIZE;
        let offset = addr % PAGE_SIZE;
        loop {
            let result = self.mmu.access(space.asid().0, vpn, write, |paddr| {
                let va = self.phys.paddr_to_vaddr(paddr) + offset;
                f(va as *mut u8)
            });
            if let Some(result) = result {
                return Ok(result);
            }
            let outcome = space
                .handle_fault(Vaddr::from_usize(addr), Vaddr::from_usize(STACK_TOP), write)
                .unwrap();
            if let FaultOutcome::Terminated(reason) = outcome {
                return Err(reason);
            }
        }
    }

    pub fn write_user(
        &self,
        space: &AddressSpace,
        addr: usize,
        data: &[u8],
    ) -> Result<(), TerminateReason> {
        let mut done = 0;
        while done < data.len() {
            let cur = addr + done;
            let n = (PAGE_SIZE - cur % PAGE_SIZE).min(data.len() - done);
            let chunk = &data[done..done + n];
            self.access_page(space, cur, true, |dst| unsafe {
                core::ptr::copy_nonoverlapping(chunk.as_ptr(), dst, n);
            })?;
            done += n;
        }
        Ok(())
    }

    pub fn read_user(
        &self,
        space: &AddressSpace,
        addr: usize,
        len: usize,
    ) -> Result<Vec<u8>, TerminateReason> {
        let mut out = vec![0u8; len];
        let mut done = 0;
        while done < len {
            let cur = addr + done;
            let n = (PAGE_SIZE - cur % PAGE_SIZE).min(len - done);
            let dst = &mut out[done..done + n];
            self.access_page(space, cur, false, |src| unsafe {
                core::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), n);
            })?;
            done += n;
        }
        Ok(out)
    }

    pub fn is_resident(&self, space: &AddressSpace, addr: usize) -> bool {
        self.system
            .frames()
            .lookup(space.asid(), Vpn::from_usize(addr / PAGE_SIZE))
            .is_some()
    }

    /// 检查帧池、补充页表与交换区之间的一致性，只在没有并发操作时调用
    pub fn check_invariants(&self, spaces: &[&Arc<AddressSpace>]) {
        let frames = self.system.frames();
        let swap = self.system.swap();
        let mut resident = 0;
        let mut slots = BTreeSet::new();
        for space in spaces {
            let entries: Vec<_> = space.with_table(|table| {
                table
                    .iter()
                    .map(|e| (e.vpn(), e.state(), e.swap_slot()))
                    .collect()
            });
            for (vpn, state, slot) in entries {
                let frame = frames.lookup(space.asid(), vpn);
                match state {
                    PageState::Resident => {
                        let desc = frame.expect("resident page without a frame");
                        assert!(!desc.is_pinned());
                        resident += 1;
                    }
                    PageState::NotResident => assert!(frame.is_none()),
                    state => panic!("{:?} left in {:?}", vpn, state),
                }
                if let Some(slot) = slot {
                    assert!(swap.is_reserved(slot));
                    assert!(slots.insert(slot), "slot {:?} claimed twice", slot);
                }
            }
        }
        assert_eq!(frames.resident_count(), resident);
        assert_eq!(swap.used_slots(), slots.len());
        assert_eq!(self.phys.allocated(), resident);
        assert_eq!(self.mmu.mapping_count(), resident);
    }
}

/// 内容为 `len` 字节、可从外部观察的文件，以及交给子系统的句柄
pub(crate) fn patterned_file(len: usize, seed: u8) -> (MockFile, Arc<dyn VmFile>) {
    let data = (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    let mock = MockFile::new(data);
    let handle: Arc<dyn VmFile> = Arc::new(mock.reopen());
    (mock, handle)
}
