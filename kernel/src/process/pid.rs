//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! PID 管理
//!
//! PID 从 1 开始单调递增，不复用。PID 1 总是第一个进程（init）。
//! 回收后的槽位 pid 被清零，所以 0 表示“没有进程”。

use crate::config::PID_MAX;

/// 进程标识
pub type Pid = u32;

/// init 进程
pub const PID_INIT: Pid = 1;

/// PID 分配器
///
/// 只在进程表锁内使用，不需要原子操作。
#[derive(Debug)]
pub struct PidAllocator {
    next: Pid,
    max: Pid,
}

impl PidAllocator {
    pub const fn new() -> Self {
        Self::with_max(PID_MAX)
    }

    /// 指定上限，`max` 本身不会被分配
    pub const fn with_max(max: Pid) -> Self {
        Self {
            next: PID_INIT,
            max,
        }
    }

    /// 分配一个新的 PID，耗尽时返回 `None`
    ///
    /// 对应 Linux 内核的 alloc_pid() (kernel/pid.c)
    pub fn alloc(&mut self) -> Option<Pid> {
        if self.next >= self.max {
            return None;
        }
        let pid = self.next;
        self.next += 1;
        Some(pid)
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        Self::new()
    }
}
