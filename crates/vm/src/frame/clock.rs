//! 时钟（二次机会）置换
//!
//! 指针在固定的帧数组上循环：
//! - 空闲或被钉住的帧直接跳过；
//! - accessed 位为 1 的帧清零后跳过（第二次机会）；
//! - 第一个 accessed 位已为 0 的帧即为受害者。
//!
//! 每转满一圈，所有已占用帧的 accessed 位被一次性清零再继续扫描。
//! 这会让所有页同时获得新的机会，弱于逐帧清零的经典二次机会算法，但保持不变。

use super::{FrameDescriptor, PoolInner};
use crate::hal::Mmu;

/// 选择受害帧，返回其下标
///
/// 整圈都没有可驱逐的帧（全部空闲或被钉住）时返回 None，由调用方决定等待还是报错。
pub(super) fn select_victim(inner: &mut PoolInner, mmu: &dyn Mmu) -> Option<usize> {
    let capacity = inner.frames.len();
    if capacity == 0 {
        return None;
    }

    let mut scanned = 0;
    let mut candidates = 0;
    loop {
        if scanned == capacity {
            if candidates == 0 {
                return None;
            }
            reset_accessed_bits(&inner.frames, mmu);
            scanned = 0;
            candidates = 0;
        }

        let idx = inner.hand;
        inner.hand = (inner.hand + 1) % capacity;
        scanned += 1;

        let Some((asid, vpn)) = inner.frames[idx].evictable() else {
            continue;
        };
        candidates += 1;
        if mmu.is_accessed(asid, vpn) {
            mmu.clear_accessed(asid, vpn);
            continue;
        }
        return Some(idx);
    }
}

fn reset_accessed_bits(frames: &[FrameDescriptor], mmu: &dyn Mmu) {
    for (asid, vpn) in frames.iter().filter_map(FrameDescriptor::evictable) {
        mmu.clear_accessed(asid, vpn);
    }
}
