//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 进程退出、回收与 kill
//!
//! exit 不释放内核栈和地址空间：进程此时还运行在自己的内核栈上。
//! 它只变成 Zombie，由父进程在 wait 里回收。父进程先退出时，
//! 子进程被过继给 init。

use super::pid::Pid;
use super::state::ProcState;
use super::table::ProcTable;
use crate::errno::Errno;
use crate::list::Link;
use crate::Platform;

/// exit 时检查这些链表，寻找需要过继给 init 的子进程
const REPARENT_ORDER: [ProcState; 5] = [
    ProcState::Embryo,
    ProcState::Running,
    ProcState::Runnable,
    ProcState::Blocked,
    ProcState::Zombie,
];

/// wait 时在这些链表里寻找还活着的子进程（Zombie 单独处理）
const LIVE_CHILD_ORDER: [ProcState; 4] = [
    ProcState::Embryo,
    ProcState::Runnable,
    ProcState::Running,
    ProcState::Blocked,
];

/// kill 查找目标的顺序
const KILL_ORDER: [ProcState; 5] = [
    ProcState::Runnable,
    ProcState::Running,
    ProcState::Zombie,
    ProcState::Embryo,
    ProcState::Blocked,
];

impl<P: Platform> ProcTable<P> {
    /// 退出当前进程，永不返回
    ///
    /// init 退出是致命错误。
    pub fn exit(&self) -> ! {
        let cpu = self.platform().cpu_id();
        let idx = {
            let table = self.lock();
            let Some(idx) = table.myproc(cpu) else {
                panic!("exit: no current process");
            };
            if table.init == Some(idx) {
                panic!("init exiting");
            }
            idx
        };

        // 关闭所有打开的文件，放下当前目录
        let (files, cwd) = {
            let mut data = self.data(idx).lock();
            let files = core::mem::replace(&mut data.ofile, core::array::from_fn(|_| None));
            (files, data.cwd.take())
        };
        for file in files.into_iter().flatten() {
            self.platform().file_close(file);
        }
        if let Some(cwd) = cwd {
            self.platform().inode_put(cwd);
        }

        let mut table = self.lock();

        // 父进程可能正在 wait() 里睡眠
        if let Some(parent) = table.procs[idx].parent {
            let chan = table.chan_of(parent);
            table.wakeup1(chan);
        }

        // 子进程过继给 init
        let Some(init) = table.init else {
            panic!("exit: no init process");
        };
        let init_chan = table.chan_of(init);
        for state in REPARENT_ORDER {
            let mut cur = table.list(state).head();
            while let Some(child) = cur {
                cur = table.procs[child].next();
                if table.procs[child].parent == Some(idx) {
                    table.procs[child].parent = Some(init);
                    if state == ProcState::Zombie {
                        table.wakeup1(init_chan);
                    }
                }
            }
        }

        let pid = table.procs[idx].pid;
        table.transition(idx, ProcState::Running, ProcState::Zombie);
        log::debug!("[ptable] exit: pid {}", pid);

        // 切走后不会再被调度
        let _table = self.sched(table);
        panic!("zombie exit");
    }

    /// 等待一个子进程退出，返回它的 pid
    ///
    /// 没有子进程，或者调用者已经被 kill，返回 `NoChild`。
    pub fn wait(&self) -> Result<Pid, Errno> {
        let cpu = self.platform().cpu_id();
        let mut table = self.lock();
        let Some(idx) = table.myproc(cpu) else {
            panic!("wait: no current process");
        };

        loop {
            let is_child = |p: &super::table::Proc<P>| p.parent == Some(idx);

            // Zombie 链表从头到尾，先退出的先回收
            if let Some((child, _)) = table.find_in(&[ProcState::Zombie], is_child) {
                let pid = table.procs[child].pid;
                table.transition(child, ProcState::Zombie, ProcState::Free);
                table.procs[child].clear();

                let (kstack, pgdir) = {
                    let mut data = self.data(child).lock();
                    data.sz = 0;
                    data.name.fill(0);
                    (data.kstack.take(), data.pgdir.take())
                };
                drop(table);

                if let Some(page) = kstack {
                    self.platform().free_page(page);
                }
                if let Some(space) = pgdir {
                    self.platform().destroy_address_space(space);
                }
                log::debug!("[ptable] wait: reaped pid {}", pid);
                return Ok(pid);
            }

            let have_kids = table.find_in(&LIVE_CHILD_ORDER, is_child).is_some();
            if !have_kids || table.procs[idx].killed {
                return Err(Errno::NoChild);
            }

            // 等子进程 exit 唤醒
            let chan = table.chan_of(idx);
            table = self.sleep_locked(table, chan);
        }
    }

    /// 标记进程被 kill
    ///
    /// 进程在下一次从内核返回用户态时退出（见 `exit_if_killed`）。
    /// 正在睡眠的进程会被直接唤醒。
    pub fn kill(&self, pid: Pid) -> Result<(), Errno> {
        let mut table = self.lock();
        let Some((idx, state)) = table.find_in(&KILL_ORDER, |p| p.pid == pid) else {
            return Err(Errno::NoSuchProcess);
        };

        table.procs[idx].killed = true;
        if state == ProcState::Blocked {
            table.transition(idx, ProcState::Blocked, ProcState::Runnable);
        }
        log::debug!("[ptable] kill: pid {} ({:?})", pid, state);
        Ok(())
    }
}
