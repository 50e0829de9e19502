//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 进程表诊断输出
//!
//! 所有快照都在进程表锁内一次取完，输出时已经释放锁。

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use bitflags::bitflags;

use super::pid::Pid;
use super::state::ProcState;
use super::table::ProcTable;
use crate::errno::Errno;
use crate::Platform;

bitflags! {
    /// `dump()` 输出哪些部分
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DumpFlags: u32 {
        const PROCS  = 1 << 0;  /* procdump 表格 */
        const READY  = 1 << 1;  /* Runnable 链表 */
        const FREE   = 1 << 2;  /* Free 链表长度 */
        const SLEEP  = 1 << 3;  /* Blocked 链表 */
        const ZOMBIE = 1 << 4;  /* Zombie 链表 */
    }
}

/// getprocs 返回的进程信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: Pid,
    pub uid: u32,
    pub gid: u32,
    /// 没有父进程时等于自己的 pid
    pub ppid: Pid,
    pub elapsed_ticks: u64,
    pub cpu_total_ticks: u64,
    pub size: usize,
    pub state: ProcState,
    pub name: String,
}

/// 以“秒.毫秒”格式输出滴答数（1 tick = 1ms）
struct Millis(u64);

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}

fn write_chain<W: Write, T: fmt::Display>(w: &mut W, items: &[T]) -> fmt::Result {
    if items.is_empty() {
        return w.write_str("None\n");
    }
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            w.write_str("->")?;
        }
        write!(w, "{}", item)?;
    }
    w.write_str("\n")
}

/// (pid,ppid)
struct PidPair(Pid, Pid);

impl fmt::Display for PidPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.0, self.1)
    }
}

impl<P: Platform> ProcTable<P> {
    fn pids_of(&self, state: ProcState) -> Vec<Pid> {
        let table = self.lock();
        table
            .list(state)
            .iter(&table.procs)
            .map(|idx| table.procs[idx].pid)
            .collect()
    }

    /// Runnable 链表上的 pid，按调度顺序
    pub fn ready_list(&self) -> Vec<Pid> {
        self.pids_of(ProcState::Runnable)
    }

    /// Blocked 链表上的 pid
    pub fn sleep_list(&self) -> Vec<Pid> {
        self.pids_of(ProcState::Blocked)
    }

    /// Running 链表上的 pid
    pub fn running_list(&self) -> Vec<Pid> {
        self.pids_of(ProcState::Running)
    }

    /// Zombie 链表上的 (pid, ppid)
    pub fn zombie_list(&self) -> Vec<(Pid, Pid)> {
        let table = self.lock();
        table
            .list(ProcState::Zombie)
            .iter(&table.procs)
            .map(|idx| (table.procs[idx].pid, table.ppid_of(idx)))
            .collect()
    }

    /// 空闲槽位个数
    pub fn free_count(&self) -> usize {
        let table = self.lock();
        table.list(ProcState::Free).len(&table.procs)
    }

    /// 按 pid 查询状态，Free 槽位不算
    pub fn state_of(&self, pid: Pid) -> Option<ProcState> {
        let table = self.lock();
        table
            .find_in(&ProcState::ALL[1..], |p| p.pid == pid)
            .map(|(_, state)| state)
    }

    pub fn readydump<W: Write>(&self, w: &mut W) -> fmt::Result {
        let pids = self.ready_list();
        w.write_str("\nReady list processes:\n")?;
        write_chain(w, &pids)
    }

    pub fn freedump<W: Write>(&self, w: &mut W) -> fmt::Result {
        let count = self.free_count();
        let noun = if count == 1 { "process" } else { "processes" };
        write!(w, "\nFree list size: {} {}\n", count, noun)
    }

    pub fn sleepdump<W: Write>(&self, w: &mut W) -> fmt::Result {
        let pids = self.sleep_list();
        w.write_str("\nSleep list processes:\n")?;
        write_chain(w, &pids)
    }

    pub fn zombiedump<W: Write>(&self, w: &mut W) -> fmt::Result {
        let pairs: Vec<PidPair> = self
            .zombie_list()
            .into_iter()
            .map(|(pid, ppid)| PidPair(pid, ppid))
            .collect();
        w.write_str("\nZombie list processes\n")?;
        write_chain(w, &pairs)
    }

    /// 按槽位顺序收集最多 `max` 个满足 `keep` 的进程信息
    fn collect_infos(&self, max: usize, keep: impl Fn(ProcState) -> bool) -> Vec<ProcInfo> {
        let now = self.platform().ticks();
        let table = self.lock();
        table
            .procs
            .iter()
            .enumerate()
            .filter(|(_, p)| keep(p.state()))
            .take(max)
            .map(|(idx, p)| {
                let data = self.data(idx).lock();
                ProcInfo {
                    pid: p.pid,
                    uid: p.uid,
                    gid: p.gid,
                    ppid: table.ppid_of(idx),
                    elapsed_ticks: now.saturating_sub(p.start_ticks),
                    cpu_total_ticks: p.cpu_ticks_total,
                    size: data.sz,
                    state: p.state(),
                    name: String::from(data.name()),
                }
            })
            .collect()
    }

    /// 最多 `max` 个进程的信息，跳过 Free 和 Embryo
    pub fn getprocs(&self, max: usize) -> Result<Vec<ProcInfo>, Errno> {
        if max == 0 {
            return Err(Errno::InvalidArgument);
        }
        Ok(self.collect_infos(max, |state| {
            !matches!(state, ProcState::Free | ProcState::Embryo)
        }))
    }

    /// 所有非 Free 进程的表格，时间以“秒.毫秒”显示
    pub fn procdump<W: Write>(&self, w: &mut W) -> fmt::Result {
        let infos = self.collect_infos(usize::MAX, |state| state != ProcState::Free);

        w.write_str("\nPID\tName\tUID\tGID\tPPID\tElapsed\tCPU\tState\tSize\n")?;
        for info in infos {
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                info.pid,
                info.name,
                info.uid,
                info.gid,
                info.ppid,
                Millis(info.elapsed_ticks),
                Millis(info.cpu_total_ticks),
                info.state.name(),
                info.size,
            )?;
        }
        Ok(())
    }

    /// 按 `flags` 输出多个部分
    pub fn dump<W: Write>(&self, w: &mut W, flags: DumpFlags) -> fmt::Result {
        if flags.contains(DumpFlags::PROCS) {
            self.procdump(w)?;
        }
        if flags.contains(DumpFlags::READY) {
            self.readydump(w)?;
        }
        if flags.contains(DumpFlags::FREE) {
            self.freedump(w)?;
        }
        if flags.contains(DumpFlags::SLEEP) {
            self.sleepdump(w)?;
        }
        if flags.contains(DumpFlags::ZOMBIE) {
            self.zombiedump(w)?;
        }
        Ok(())
    }
}
