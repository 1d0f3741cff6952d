//! 块设备的 Mock 实现
//!
//! 内存模拟的扇区设备，用作交换区后端。支持注入写失败。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// 内存模拟的块设备
pub struct MockBlockDevice {
    data: Mutex<Vec<u8>>,
    sector_size: usize,
    fail_io: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MockBlockDevice {
    /// 创建一个包含 `sectors` 个扇区的设备
    pub fn new(sectors: usize, sector_size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; sectors * sector_size]),
            sector_size,
            fail_io: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn read_block(&self, sector: usize, buf: &mut [u8]) -> bool {
        if buf.len() != self.sector_size || self.fail_io.load(Ordering::SeqCst) {
            return false;
        }
        let data = self.data.lock().unwrap();
        let offset = sector * self.sector_size;
        if offset + self.sector_size > data.len() {
            return false;
        }
        buf.copy_from_slice(&data[offset..offset + self.sector_size]);
        self.reads.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn write_block(&self, sector: usize, buf: &[u8]) -> bool {
        if buf.len() != self.sector_size || self.fail_io.load(Ordering::SeqCst) {
            return false;
        }
        let mut data = self.data.lock().unwrap();
        let offset = sector * self.sector_size;
        if offset + self.sector_size > data.len() {
            return false;
        }
        data[offset..offset + self.sector_size].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn total_sectors(&self) -> usize {
        self.data.lock().unwrap().len() / self.sector_size
    }

    /// 之后的读写全部失败
    pub fn set_fail_io(&self, fail: bool) {
        self.fail_io.store(fail, Ordering::SeqCst);
    }

    /// 成功读取的扇区数
    pub fn sector_reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// 成功写入的扇区数
    pub fn sector_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}
