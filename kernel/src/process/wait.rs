//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 睡眠与唤醒
//!
//! 睡眠者在持有进程表锁时变成 Blocked，唤醒者也必须拿到进程表锁才能扫描
//! Blocked 链表，所以“检查条件 -> 睡眠”和“修改条件 -> 唤醒”之间不会丢失唤醒。

use spin::{Mutex, MutexGuard};

use super::state::{ProcState, WaitChannel};
use super::table::{ProcTable, TableGuard, TableInner};
use crate::list::Link;
use crate::Platform;

impl<P: Platform> TableInner<P> {
    /// 唤醒 `chan` 上的所有进程，调用者持有进程表锁
    ///
    /// 返回被唤醒的进程数
    pub(super) fn wakeup1(&mut self, chan: WaitChannel) -> usize {
        let mut woken = 0;
        let mut cur = self.list(ProcState::Blocked).head();
        while let Some(idx) = cur {
            // 迁移会改写 next，先记下来
            cur = self.procs[idx].next();
            if self.procs[idx].chan == Some(chan) {
                self.transition(idx, ProcState::Blocked, ProcState::Runnable);
                woken += 1;
            }
        }
        woken
    }
}

impl<P: Platform> ProcTable<P> {
    /// 在 `chan` 上睡眠，直到被 wakeup 或 kill
    pub fn sleep(&self, chan: WaitChannel) {
        let table = self.lock();
        let table = self.sleep_locked(table, chan);
        drop(table);
    }

    /// 在 `chan` 上睡眠，同时释放调用者的锁，醒来后重新获取
    ///
    /// 先拿进程表锁再放 `guard`，这样在放锁和睡眠之间到来的 wakeup
    /// 一定会看到本进程处于 Blocked。
    pub fn sleep_on<'m, T>(
        &self,
        chan: WaitChannel,
        lock: &'m Mutex<T>,
        guard: MutexGuard<'m, T>,
    ) -> MutexGuard<'m, T> {
        let table = self.lock();
        drop(guard);

        let table = self.sleep_locked(table, chan);
        drop(table);

        lock.lock()
    }

    /// 调用者已经持有进程表锁时的睡眠
    pub(super) fn sleep_locked<'a>(
        &'a self,
        mut table: TableGuard<'a, P>,
        chan: WaitChannel,
    ) -> TableGuard<'a, P> {
        let cpu = self.platform().cpu_id();
        let Some(idx) = table.myproc(cpu) else {
            panic!("sleep: no current process");
        };

        table.procs[idx].chan = Some(chan);
        table.transition(idx, ProcState::Running, ProcState::Blocked);

        let mut table = self.sched(table);

        table.procs[idx].chan = None;
        table
    }

    /// 唤醒 `chan` 上的所有进程，返回被唤醒的个数
    ///
    /// 没有等待者不算错误。
    pub fn wakeup(&self, chan: WaitChannel) -> usize {
        let mut table = self.lock();
        table.wakeup1(chan)
    }
}
