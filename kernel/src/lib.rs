//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! ptable：按状态划分的进程表
//!
//! 固定容量的 PCB 数组，六条状态链表，每 CPU 轮转调度，以及
//! fork/exit/wait/sleep/wakeup/kill 等生命周期操作。
//!
//! 内存管理、文件系统和上下文切换由内核通过 [`Arch`]、[`Mm`]、[`Fs`]
//! 三个 trait 提供。库本身是 `no_std` 的，测试时在宿主机上运行。
//!
//! ```ignore
//! static TABLE: spin::Once<ProcTable<Board>> = spin::Once::new();
//!
//! let table = TABLE.call_once(|| ProcTable::new(Board::new()));
//! log::set_max_level(ptable::log_level());
//! table.userinit(INIT_CODE);
//! table.scheduler();
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod errno;
pub mod fs;
pub mod list;
pub mod mm;
pub mod process;

#[cfg(test)]
mod tests;

pub use arch::Arch;
pub use errno::Errno;
pub use fs::Fs;
pub use mm::Mm;
pub use process::{DumpFlags, Pid, ProcInfo, ProcState, ProcTable, WaitChannel};

/// 进程表需要的全部平台能力
pub trait Platform: Arch + Mm + Fs {}

impl<T: Arch + Mm + Fs> Platform for T {}

/// Kernel.toml 中配置的日志级别
pub fn log_level() -> log::LevelFilter {
    match config::LOG_LEVEL {
        "off" => log::LevelFilter::Off,
        "error" => log::LevelFilter::Error,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Warn,
    }
}
