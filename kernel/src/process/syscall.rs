//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 进程相关的系统调用
//!
//! 参数和返回值沿用 trap 分发的约定：`[u64; 6]` 个参数寄存器，
//! 返回 u64，失败时是负的 errno。

use super::table::ProcTable;
use crate::errno::Errno;
use crate::Platform;

#[inline]
fn ret<T: Into<u64>>(result: Result<T, Errno>) -> u64 {
    match result {
        Ok(v) => v.into(),
        Err(e) => e.as_neg_u64(),
    }
}

impl<P: Platform> ProcTable<P> {
    pub fn sys_fork(&self, _args: [u64; 6]) -> u64 {
        ret(self.fork())
    }

    pub fn sys_exit(&self, _args: [u64; 6]) -> ! {
        self.exit()
    }

    pub fn sys_wait(&self, _args: [u64; 6]) -> u64 {
        ret(self.wait())
    }

    pub fn sys_kill(&self, args: [u64; 6]) -> u64 {
        // 负数和超出 i32 的值都不是合法 pid，不能截断高位
        let pid = args[0] as i64;
        if pid <= 0 || pid > i64::from(i32::MAX) {
            return Errno::InvalidArgument.as_neg_u64();
        }
        ret(self.kill(pid as u32).map(|()| 0u64))
    }

    pub fn sys_getpid(&self, _args: [u64; 6]) -> u64 {
        self.current_pid().map(u64::from).unwrap_or(0)
    }

    pub fn sys_getppid(&self, _args: [u64; 6]) -> u64 {
        self.current_ppid().map(u64::from).unwrap_or(0)
    }

    /// 返回扩展前的堆顶
    pub fn sys_sbrk(&self, args: [u64; 6]) -> u64 {
        let n = args[0] as i64 as isize;
        ret(self.growproc(n).map(|old| old as u64))
    }

    /// 返回用户态前调用：被 kill 的进程在这里退出
    ///
    /// 对应 xv6 trap() 末尾的 `if(proc && proc->killed) exit();`
    pub fn exit_if_killed(&self) {
        if self.killed() {
            self.exit();
        }
    }
}
