//! 测试支持 crate
//!
//! 提供虚拟内存子系统在宿主机上测试所需的 Mock 实现：
//! 物理内存、MMU、文件、块设备和架构操作。
//!
//! 这里不依赖被测 crate（避免循环依赖），各 crate 在 `cfg(test)` 下
//! 为这些 Mock 类型实现自己的 trait。

pub mod mock;
