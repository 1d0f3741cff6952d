//! 虚拟内存配置

/// 页大小
pub const PAGE_SIZE: usize = 4096;

/// 默认帧池容量（帧数）
pub const DEFAULT_FRAME_CAPACITY: usize = 384;

/// 默认最大用户栈大小
pub const DEFAULT_MAX_STACK_SIZE: usize = 8 * 1024 * 1024;

/// 缺页地址低于栈指针多少字节以内仍视为栈增长
pub const STACK_FAULT_SLACK: usize = PAGE_SIZE;

/// 默认用户栈顶地址
const DEFAULT_USER_STACK_TOP: usize = 0xC000_0000;

/// 运行时配置
///
/// 在构造 [`crate::VmSystem`] 时传入，之后不可修改。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// 帧池容量，即可同时驻留的用户页数
    pub frame_capacity: usize,
    /// 用户栈顶地址（不包含），必须页对齐
    pub user_stack_top: usize,
    /// 用户栈允许增长到的最大大小
    pub max_stack_size: usize,
}

impl VmConfig {
    /// 栈区域的最低地址
    pub fn stack_floor(&self) -> usize {
        self.user_stack_top.saturating_sub(self.max_stack_size)
    }

    /// `addr` 是否位于保留的栈区域内
    pub fn in_stack_region(&self, addr: usize) -> bool {
        addr >= self.stack_floor() && addr < self.user_stack_top
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            user_stack_top: DEFAULT_USER_STACK_TOP,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
        }
    }
}
