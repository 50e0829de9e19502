//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 调度器
//!
//! 每个 CPU 各跑一个调度循环，共同消费同一条 Runnable 链表。
//! 取链表头运行，用完时间片或主动让出后挂回链表尾，所以是简单的轮转调度。
//!
//! 进程表锁跨上下文切换交接：
//! - 调度器持锁切到进程，进程在 `sched()` 返回后（或在 `forkret` 中）释放
//! - 进程持锁调用 `sched()` 切回调度器，调度器在 `switch` 返回后释放
//!
//! 持锁期间本 CPU 的中断一直是关的。

use super::pid::Pid;
use super::state::ProcState;
use super::table::{ProcTable, TableGuard};
use crate::Platform;

impl<P: Platform> ProcTable<P> {
    /// 调度循环，永不返回
    ///
    /// 对应 xv6 的 scheduler()。每个 CPU 启动完成后调用。
    pub fn scheduler(&self) -> ! {
        loop {
            self.schedule_once();
        }
    }

    /// 调度循环的一轮
    ///
    /// 有可运行进程时运行它，直到它切回调度器，返回 true；
    /// 没有时等待下一次中断，返回 false。
    pub fn schedule_once(&self) -> bool {
        // 打开中断，避免所有进程都在等 I/O 时死锁
        self.platform().intr_on();

        let cpu = self.platform().cpu_id();
        let mut table = self.lock();
        let Some(idx) = table.list(ProcState::Runnable).head() else {
            drop(table);
            self.platform().wait_for_interrupt();
            return false;
        };

        table.transition(idx, ProcState::Runnable, ProcState::Running);
        table.cpus[cpu].proc = Some(idx);
        if let Some(space) = self.data(idx).lock().pgdir.as_ref() {
            self.platform().switch_uvm(space);
        }
        table.procs[idx].cpu_ticks_in = self.platform().ticks();

        let from = &mut table.cpus[cpu].scheduler as *mut P::Context;
        let to = &table.procs[idx].context as *const P::Context;
        // SAFETY: 上下文都在进程表里，不会移动；锁交给进程
        unsafe { self.platform().switch(from, to) };

        // 进程已经切回来，锁又回到调度器手里
        self.platform().switch_kvm();
        table.cpus[cpu].proc = None;
        drop(table);
        true
    }

    /// 切回本 CPU 的调度器
    ///
    /// 调用者持有进程表锁，并且已经把当前进程移出 Running。
    /// 返回时进程被重新调度，锁仍然持有。
    pub(super) fn sched<'a>(&'a self, mut table: TableGuard<'a, P>) -> TableGuard<'a, P> {
        if !self.holding() {
            panic!("sched: table lock not held");
        }
        let cpu = self.platform().cpu_id();
        let Some(idx) = table.myproc(cpu) else {
            panic!("sched: no current process");
        };
        if self.intr_depth(cpu) != 1 {
            panic!("sched: locks");
        }
        if table.procs[idx].state() == ProcState::Running {
            panic!("sched: pid {} still running", table.procs[idx].pid);
        }
        if self.platform().intr_enabled() {
            panic!("sched: interruptible");
        }

        let now = self.platform().ticks();
        let p = &mut table.procs[idx];
        p.cpu_ticks_total += now.saturating_sub(p.cpu_ticks_in);

        // 中断状态属于这个进程，不属于 CPU
        let intena = self.saved_intr(cpu);
        let from = &mut table.procs[idx].context as *mut P::Context;
        let to = &table.cpus[cpu].scheduler as *const P::Context;
        // SAFETY: 同上，锁交给调度器
        unsafe { self.platform().switch(from, to) };

        // 可能已经换了 CPU
        let cpu = self.platform().cpu_id();
        self.restore_saved_intr(cpu, intena);
        table
    }

    /// 主动让出 CPU：Running -> Runnable，排到链表尾
    pub fn yield_cpu(&self) {
        let cpu = self.platform().cpu_id();
        let mut table = self.lock();
        let Some(idx) = table.myproc(cpu) else {
            panic!("yield: no current process");
        };
        table.transition(idx, ProcState::Running, ProcState::Runnable);
        let table = self.sched(table);
        drop(table);
    }

    /// 新进程第一次被调度时执行
    ///
    /// 平台的初始上下文必须先调用这里，再返回用户态。
    pub fn forkret(&self) {
        // SAFETY: 调度器切过来时持有进程表锁，由这里释放
        unsafe { self.release_inherited_lock() };

        if self.take_first() {
            // 文件系统初始化要睡眠，只能在进程上下文里做
            self.platform().init_in_process();
        }
    }

    /// 当前进程的 pid
    pub fn current_pid(&self) -> Option<Pid> {
        let cpu = self.platform().cpu_id();
        let table = self.lock();
        table.myproc(cpu).map(|idx| table.procs[idx].pid)
    }

    /// 当前进程的父进程 pid，init 返回自己的 pid
    pub fn current_ppid(&self) -> Option<Pid> {
        let cpu = self.platform().cpu_id();
        let table = self.lock();
        table.myproc(cpu).map(|idx| table.ppid_of(idx))
    }

    /// 当前进程是否已经被 kill
    pub fn killed(&self) -> bool {
        let cpu = self.platform().cpu_id();
        let table = self.lock();
        table
            .myproc(cpu)
            .map(|idx| table.procs[idx].killed)
            .unwrap_or(false)
    }
}
