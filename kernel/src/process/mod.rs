//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 进程管理模块
//!
//! - `table`: 进程表、状态链表、allocproc/userinit
//! - `sched`: 每 CPU 调度循环、sched/yield/forkret
//! - `wait`: sleep/wakeup
//! - `fork`: fork/growproc
//! - `exit`: exit/wait/kill
//! - `dump`: 诊断输出与 getprocs
//! - `syscall`: 系统调用入口

pub mod dump;
pub mod pid;
pub mod state;
pub mod table;

mod exit;
mod fork;
mod sched;
mod syscall;
mod wait;

pub use dump::{DumpFlags, ProcInfo};
pub use pid::{Pid, PID_INIT};
pub use state::{ProcState, WaitChannel};
pub use table::ProcTable;
