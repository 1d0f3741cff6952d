//! 各个协作者的模拟实现
//!
//! - [`arch`]：中断开关与退避
//! - [`device`]：扇区设备（交换区后端）
//! - [`fs`]：共享内容的文件句柄
//! - [`mm`]：物理内存与 MMU

pub mod arch;
pub mod device;
pub mod fs;
pub mod mm;
