//! 虚拟内存子系统的场景测试
//!
//! 使用 test-support 提供的内存、MMU、文件与块设备模拟，
//! 通过 [`harness::Harness`] 以“用户态访问 → 缺页 → 重试”的方式驱动子系统。

mod harness;

mod mmap;

pub(crate) use harness::init_sync_arch_ops;
