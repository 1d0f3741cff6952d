//! 虚拟内存错误类型
//!
//! 错误分为两类：
//! - 致命错误（[`VmError::is_fatal`]）：帧或交换区耗尽、驱逐期间的 I/O 失败，
//!   调用方必须停机；
//! - 调用方错误：映射请求参数非法等，返回失败且不修改任何状态。
//!
//! 缺页导致的进程终止不是错误，见 [`crate::FaultOutcome`]。

use core::fmt;

/// 虚拟内存错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 帧池已满且没有可驱逐的页
    OutOfFrames,
    /// 交换区没有空闲槽
    SwapFull,
    /// 交换设备读写失败
    DeviceError,
    /// 文件读写失败或写入不完整
    FileError,
    /// 地址非法（例如空地址）
    InvalidAddress,
    /// 地址未按页对齐
    Unaligned,
    /// 文件长度为 0
    EmptyFile,
    /// 与已有的页或保留区域重叠
    Overlap,
    /// 补充页表中已存在该页
    AlreadyExists,
    /// 找不到对应的页或映射
    NotFound,
}

impl VmError {
    /// 是否为必须停机的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::OutOfFrames | VmError::SwapFull | VmError::DeviceError | VmError::FileError
        )
    }

    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            VmError::NotFound => -2,
            VmError::DeviceError | VmError::FileError => -5,
            VmError::OutOfFrames => -12,
            VmError::InvalidAddress => -14,
            VmError::AlreadyExists | VmError::Overlap => -17,
            VmError::Unaligned | VmError::EmptyFile => -22,
            VmError::SwapFull => -28,
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VmError::OutOfFrames => "no free frame and no evictable page",
            VmError::SwapFull => "swap space exhausted",
            VmError::DeviceError => "swap device I/O error",
            VmError::FileError => "file I/O error",
            VmError::InvalidAddress => "invalid address",
            VmError::Unaligned => "address not page aligned",
            VmError::EmptyFile => "file is empty",
            VmError::Overlap => "range overlaps an existing mapping",
            VmError::AlreadyExists => "page already described",
            VmError::NotFound => "no such page or mapping",
        };
        f.write_str(msg)
    }
}

/// 虚拟内存操作的结果类型
pub type VmResult<T> = Result<T, VmError>;
