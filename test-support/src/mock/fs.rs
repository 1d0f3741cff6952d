//! 文件的 Mock 实现
//!
//! 同一文件的多个句柄共享内容和计数器，方便测试从外部观察写回结果、
//! 读取次数以及句柄是否被关闭。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Shared {
    data: Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    open_handles: AtomicUsize,
    read_delay_ms: AtomicUsize,
}

/// 内存中的文件句柄
///
/// drop 即关闭句柄。
pub struct MockFile {
    shared: Arc<Shared>,
}

impl MockFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            shared: Arc::new(Shared {
                data: Mutex::new(data),
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                open_handles: AtomicUsize::new(1),
                read_delay_ms: AtomicUsize::new(0),
            }),
        }
    }

    /// 从 `offset` 读取，返回实际读取的字节数（文件末尾处截断）
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let delay = self.shared.read_delay_ms.load(Ordering::SeqCst);
        if delay != 0 {
            std::thread::sleep(Duration::from_millis(delay as u64));
        }
        self.shared.reads.fetch_add(1, Ordering::SeqCst);
        let data = self.shared.data.lock().unwrap();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    /// 写入 `offset`，不会扩展文件长度
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        let mut data = self.shared.data.lock().unwrap();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        n
    }

    pub fn len(&self) -> usize {
        self.shared.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 打开同一文件的新句柄
    pub fn reopen(&self) -> MockFile {
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        MockFile {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 截断或扩展文件，用于模拟读取时的短读
    pub fn set_len(&self, len: usize) {
        self.shared.data.lock().unwrap().resize(len, 0);
    }

    /// 文件当前内容的拷贝
    pub fn contents(&self) -> Vec<u8> {
        self.shared.data.lock().unwrap().clone()
    }

    pub fn read_count(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.shared.writes.load(Ordering::SeqCst)
    }

    /// 仍处于打开状态的句柄数
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    /// 每次读取前睡眠，用于放大并发窗口
    pub fn set_read_delay_ms(&self, ms: usize) {
        self.shared.read_delay_ms.store(ms, Ordering::SeqCst);
    }
}

impl Drop for MockFile {
    fn drop(&mut self) {
        self.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
