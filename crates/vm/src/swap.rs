//! 交换区
//!
//! 交换区把块设备划分为页大小的槽，每个槽由 `PAGE_SIZE / sector_size`
//! 个连续扇区组成。分配状态用位图跟踪：
//!
//! - **bitmap**：每个 bit 表示一个扇区（0=空闲，1=已占用）
//! - **预留**：在槽边界上扫描连续空闲的扇区并整体置位
//! - **释放**：整体清零，仅当没有任何帧再持有该槽的数据时才可释放
//!
//! 所有操作（包括扇区 I/O）都在同一把交换区锁内串行执行。

use alloc::sync::Arc;
use alloc::vec::Vec;

use sync::SpinLock;

use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};

/// 交换设备
///
/// 读写以扇区为单位，返回是否成功。
pub trait SwapDevice: Send + Sync {
    /// 读取一个扇区
    fn read_block(&self, sector: usize, buf: &mut [u8]) -> bool;

    /// 写入一个扇区
    fn write_block(&self, sector: usize, buf: &[u8]) -> bool;

    /// 扇区大小（字节）
    fn sector_size(&self) -> usize;

    /// 总扇区数
    fn total_sectors(&self) -> usize;
}

/// 交换槽
///
/// 由预留它的页表项独占，直到被释放。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(usize);

impl SwapSlot {
    /// 槽编号
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 扇区位图
struct SectorBitmap {
    bits: Vec<u64>,
    total_sectors: usize,
    used_sectors: usize,
}

impl SectorBitmap {
    fn new(total_sectors: usize) -> Self {
        Self {
            bits: alloc::vec![0u64; total_sectors.div_ceil(64)],
            total_sectors,
            used_sectors: 0,
        }
    }

    #[inline]
    fn is_free(&self, sector: usize) -> bool {
        let word_idx = sector / 64;
        let bit_idx = sector % 64;
        (self.bits[word_idx] & (1u64 << bit_idx)) == 0
    }

    #[inline]
    fn mark_used(&mut self, sector: usize) {
        let word_idx = sector / 64;
        let bit_idx = sector % 64;
        self.bits[word_idx] |= 1u64 << bit_idx;
    }

    #[inline]
    fn mark_free(&mut self, sector: usize) {
        let word_idx = sector / 64;
        let bit_idx = sector % 64;
        self.bits[word_idx] &= !(1u64 << bit_idx);
    }

    /// 查找 `count` 个连续空闲扇区（起点按 `count` 对齐）并置位
    fn scan_and_flip(&mut self, count: usize) -> Option<usize> {
        let mut start = 0;
        while start + count <= self.total_sectors {
            if (start..start + count).all(|s| self.is_free(s)) {
                (start..start + count).for_each(|s| self.mark_used(s));
                self.used_sectors += count;
                return Some(start);
            }
            start += count;
        }
        None
    }

    fn all_used(&self, start: usize, count: usize) -> bool {
        (start..start + count).all(|s| !self.is_free(s))
    }

    fn clear(&mut self, start: usize, count: usize) {
        (start..start + count).for_each(|s| self.mark_free(s));
        self.used_sectors -= count;
    }
}

/// 交换区
pub struct SwapStore {
    device: Arc<dyn SwapDevice>,
    sector_size: usize,
    sectors_per_slot: usize,
    bitmap: SpinLock<SectorBitmap>,
}

impl SwapStore {
    /// 在设备上创建交换区
    ///
    /// # Panics
    ///
    /// 扇区大小不能整除页大小时 panic。
    pub fn new(device: Arc<dyn SwapDevice>) -> Self {
        let sector_size = device.sector_size();
        assert!(
            sector_size != 0 && PAGE_SIZE % sector_size == 0,
            "swap sector size {} does not divide the page size",
            sector_size
        );
        let sectors_per_slot = PAGE_SIZE / sector_size;
        let total_sectors = device.total_sectors();
        log::debug!(
            "swap: {} sectors of {} bytes, {} slots",
            total_sectors,
            sector_size,
            total_sectors / sectors_per_slot
        );
        Self {
            device,
            sector_size,
            sectors_per_slot,
            bitmap: SpinLock::new(SectorBitmap::new(total_sectors)),
        }
    }

    /// 预留一个空闲槽
    pub fn reserve_slot(&self) -> VmResult<SwapSlot> {
        let mut bitmap = self.bitmap.lock();
        match bitmap.scan_and_flip(self.sectors_per_slot) {
            Some(first) => Ok(SwapSlot(first / self.sectors_per_slot)),
            None => {
                log::error!("swap: no free slot left");
                Err(VmError::SwapFull)
            }
        }
    }

    /// 把一页数据写入槽
    pub fn write_slot(&self, slot: SwapSlot, page: &[u8]) -> VmResult<()> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let bitmap = self.bitmap.lock();
        let first = self.first_sector(&bitmap, slot);
        for (i, chunk) in page.chunks_exact(self.sector_size).enumerate() {
            if !self.device.write_block(first + i, chunk) {
                log::error!("swap: write of sector {} failed", first + i);
                return Err(VmError::DeviceError);
            }
        }
        Ok(())
    }

    /// 把槽中的数据读入一页
    pub fn read_slot(&self, slot: SwapSlot, page: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let bitmap = self.bitmap.lock();
        let first = self.first_sector(&bitmap, slot);
        for (i, chunk) in page.chunks_exact_mut(self.sector_size).enumerate() {
            if !self.device.read_block(first + i, chunk) {
                log::error!("swap: read of sector {} failed", first + i);
                return Err(VmError::DeviceError);
            }
        }
        Ok(())
    }

    /// 释放槽
    ///
    /// # Panics
    ///
    /// 槽未被预留时 panic。
    pub fn release_slot(&self, slot: SwapSlot) {
        let mut bitmap = self.bitmap.lock();
        let first = self.first_sector(&bitmap, slot);
        bitmap.clear(first, self.sectors_per_slot);
    }

    /// 槽总数
    pub fn total_slots(&self) -> usize {
        self.bitmap.lock().total_sectors / self.sectors_per_slot
    }

    /// 已预留的槽数
    pub fn used_slots(&self) -> usize {
        self.bitmap.lock().used_sectors / self.sectors_per_slot
    }

    /// 槽是否已被预留
    pub fn is_reserved(&self, slot: SwapSlot) -> bool {
        let bitmap = self.bitmap.lock();
        let first = slot.0 * self.sectors_per_slot;
        first + self.sectors_per_slot <= bitmap.total_sectors
            && bitmap.all_used(first, self.sectors_per_slot)
    }

    fn first_sector(&self, bitmap: &SectorBitmap, slot: SwapSlot) -> usize {
        let first = slot.0 * self.sectors_per_slot;
        assert!(
            first + self.sectors_per_slot <= bitmap.total_sectors
                && bitmap.all_used(first, self.sectors_per_slot),
            "swap slot {} is not reserved",
            slot.0
        );
        first
    }
}

#[cfg(test)]
mod test_mock {
    use super::*;
    use test_support::mock::device::MockBlockDevice;

    impl SwapDevice for MockBlockDevice {
        fn read_block(&self, sector: usize, buf: &mut [u8]) -> bool {
            MockBlockDevice::read_block(self, sector, buf)
        }

        fn write_block(&self, sector: usize, buf: &[u8]) -> bool {
            MockBlockDevice::write_block(self, sector, buf)
        }

        fn sector_size(&self) -> usize {
            MockBlockDevice::sector_size(self)
        }

        fn total_sectors(&self) -> usize {
            MockBlockDevice::total_sectors(self)
        }
    }
}
