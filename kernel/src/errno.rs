//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 标准错误代码定义
//!
//! 取值和 include/uapi/asm-generic/errno.h 一致，只保留进程表会用到的部分

use core::fmt;

/// 进程表操作的错误代码
///
/// 使用方法：
/// ```rust
/// use ptable::errno::Errno;
///
/// // 系统调用风格，返回负数
/// assert_eq!(Errno::NoChild.as_neg_i32(), -10);
/// ```
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Errno {
    /// No such process (ESRCH, 3)
    NoSuchProcess = 3,

    /// No child process (ECHILD, 10)
    NoChild = 10,

    /// Try again (EAGAIN, 11)
    ///
    /// 进程表满或 PID 耗尽
    TryAgain = 11,

    /// Out of memory (ENOMEM, 12)
    OutOfMemory = 12,

    /// Invalid argument (EINVAL, 22)
    InvalidArgument = 22,

    /// Too many open files (EMFILE, 24)
    TooManyOpenFiles = 24,
}

impl Errno {
    /// 获取错误代码的正数值（用于比较）
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// 获取错误代码的负数值（用于系统调用返回）
    #[inline]
    pub const fn as_neg_i32(self) -> i32 {
        -(self as i32)
    }

    /// 获取错误代码的负数值（u64，用于系统调用返回）
    #[inline]
    pub const fn as_neg_u64(self) -> u64 {
        (-(self as i32)) as u64
    }

    /// 对应的 errno 宏名
    pub const fn name(self) -> &'static str {
        match self {
            Errno::NoSuchProcess => "ESRCH",
            Errno::NoChild => "ECHILD",
            Errno::TryAgain => "EAGAIN",
            Errno::OutOfMemory => "ENOMEM",
            Errno::InvalidArgument => "EINVAL",
            Errno::TooManyOpenFiles => "EMFILE",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}

/// 常用的错误代码常量
pub mod constants {
    pub const ESRCH: i32 = 3;
    pub const ECHILD: i32 = 10;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EINVAL: i32 = 22;
    pub const EMFILE: i32 = 24;
}
