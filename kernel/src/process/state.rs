//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 进程状态与等待通道

use core::fmt;

/// 进程状态
///
/// 每个状态对应进程表里的一条链表，进程所在的链表永远和它的状态一致。
/// 取值顺序与 xv6 的 `enum procstate` 相同。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ProcState {
    /// 空闲槽位 (UNUSED)
    Free = 0,

    /// 正在创建 (EMBRYO)
    Embryo = 1,

    /// 等待某个通道 (SLEEPING)
    Blocked = 2,

    /// 就绪，在 Runnable 链表里排队 (RUNNABLE)
    Runnable = 3,

    /// 正在某个 CPU 上运行 (RUNNING)
    Running = 4,

    /// 已退出，等待父进程回收 (ZOMBIE)
    Zombie = 5,
}

impl ProcState {
    /// 状态个数，也就是状态链表的条数
    pub const COUNT: usize = 6;

    pub const ALL: [ProcState; Self::COUNT] = [
        ProcState::Free,
        ProcState::Embryo,
        ProcState::Blocked,
        ProcState::Runnable,
        ProcState::Running,
        ProcState::Zombie,
    ];

    /// 对应状态链表的下标
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// procdump 使用的定宽名字
    pub const fn name(self) -> &'static str {
        match self {
            ProcState::Free => "unused",
            ProcState::Embryo => "embryo",
            ProcState::Blocked => "sleep ",
            ProcState::Runnable => "runble",
            ProcState::Running => "run   ",
            ProcState::Zombie => "zombie",
        }
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().trim_end())
    }
}

/// 等待通道
///
/// 和 xv6 一样只是一个地址，睡眠者与唤醒者约定同一个值即可。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitChannel(usize);

impl WaitChannel {
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// 以对象地址作为通道
    pub fn of<T>(obj: &T) -> Self {
        Self(obj as *const T as usize)
    }

    pub const fn id(self) -> usize {
        self.0
    }
}
