//! 文件协作者接口
//!
//! 可执行文件段和文件映射通过 [`VmFile`] 按偏移读写文件内容。
//! 底层的块缓存对本子系统透明。关闭文件即丢弃最后一个句柄。

use alloc::sync::Arc;

use crate::error::{VmError, VmResult};

/// 可被按需加载或映射的文件
pub trait VmFile: Send + Sync {
    /// 从 `offset` 处读取到 `buf`，返回实际读取的字节数
    ///
    /// 读到文件末尾时返回的字节数可能小于 `buf.len()`。
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 从 `offset` 处写入 `buf`，返回实际写入的字节数
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;

    /// 文件长度
    fn len(&self) -> usize;

    /// 文件是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 打开一个指向同一文件的独立句柄
    ///
    /// 映射持有自己的句柄，因此调用方关闭原句柄不影响映射。
    fn reopen(&self) -> Result<Arc<dyn VmFile>, isize>;
}

/// 把一页中的 `data` 写回文件的 `offset` 处
///
/// 写入不完整视为 [`VmError::FileError`]。
pub(crate) fn write_back(file: &dyn VmFile, offset: usize, data: &[u8]) -> VmResult<()> {
    match file.write_at(offset, data) {
        Ok(written) if written == data.len() => Ok(()),
        Ok(written) => {
            log::error!(
                "write-back at offset {:#x}: {} of {} bytes written",
                offset,
                written,
                data.len()
            );
            Err(VmError::FileError)
        }
        Err(errno) => {
            log::error!("write-back at offset {:#x} failed: {}", offset, errno);
            Err(VmError::FileError)
        }
    }
}
