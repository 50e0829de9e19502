//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! fork 与用户内存伸缩
//!
//! 子进程复制父进程的地址空间、打开的文件、当前目录、名字和 uid/gid，
//! 从 fork 返回 0；父进程得到子进程的 pid。

use super::pid::Pid;
use super::state::ProcState;
use super::table::ProcTable;
use crate::config::NOFILE;
use crate::errno::Errno;
use crate::Platform;

impl<P: Platform> ProcTable<P> {
    /// 复制当前进程
    ///
    /// 失败时父进程不受影响：
    /// - 没有空闲槽位或 PID 耗尽：`TryAgain`
    /// - 内核栈或地址空间分配失败：`OutOfMemory`
    pub fn fork(&self) -> Result<Pid, Errno> {
        let Some(parent) = self.current() else {
            panic!("fork: no current process");
        };
        let child = self.allocproc()?;

        // 先复制地址空间，成功了再增加文件引用
        let copied = {
            let pdata = self.data(parent).lock();
            pdata
                .pgdir
                .as_ref()
                .and_then(|space| self.platform().duplicate_address_space(space, pdata.sz))
                .map(|pgdir| {
                    let ofile: [Option<P::File>; NOFILE] = core::array::from_fn(|fd| {
                        pdata.ofile[fd]
                            .as_ref()
                            .map(|file| self.platform().file_dup(file))
                    });
                    let cwd = pdata
                        .cwd
                        .as_ref()
                        .map(|inode| self.platform().inode_dup(inode));
                    (pgdir, pdata.sz, pdata.tf.clone(), ofile, cwd, pdata.name)
                })
        };

        let Some((pgdir, sz, mut tf, ofile, cwd, name)) = copied else {
            let kstack = self.data(child).lock().kstack.take();
            if let Some(page) = kstack {
                self.platform().free_page(page);
            }
            let mut table = self.lock();
            let pid = table.procs[child].pid;
            table.procs[child].clear();
            table.transition(child, ProcState::Embryo, ProcState::Free);
            log::warn!("[ptable] fork: cannot copy address space for pid {}", pid);
            return Err(Errno::OutOfMemory);
        };

        // 子进程从 fork 返回 0
        self.platform().set_return_value(&mut tf, 0);
        {
            let mut cdata = self.data(child).lock();
            cdata.pgdir = Some(pgdir);
            cdata.sz = sz;
            cdata.tf = tf;
            cdata.ofile = ofile;
            cdata.cwd = cwd;
            cdata.name = name;
        }

        let mut table = self.lock();
        let (uid, gid, ppid) = {
            let p = &table.procs[parent];
            (p.uid, p.gid, p.pid)
        };
        let c = &mut table.procs[child];
        c.parent = Some(parent);
        c.uid = uid;
        c.gid = gid;
        let pid = c.pid;
        table.transition(child, ProcState::Embryo, ProcState::Runnable);

        log::debug!("[ptable] fork: pid {} -> child {}", ppid, pid);
        Ok(pid)
    }

    /// 把当前进程的用户内存扩展或收缩 `n` 字节，返回原来的大小
    pub fn growproc(&self, n: isize) -> Result<usize, Errno> {
        let Some(idx) = self.current() else {
            panic!("growproc: no current process");
        };

        let mut data = self.data(idx).lock();
        let old = data.sz;
        let Some(space) = data.pgdir.as_mut() else {
            return Err(Errno::OutOfMemory);
        };

        let new = if n > 0 {
            let target = old.checked_add(n.unsigned_abs()).ok_or(Errno::OutOfMemory)?;
            self.platform()
                .grow(space, old, target)
                .ok_or(Errno::OutOfMemory)?
        } else if n < 0 {
            let target = old
                .checked_sub(n.unsigned_abs())
                .ok_or(Errno::InvalidArgument)?;
            self.platform()
                .shrink(space, old, target)
                .ok_or(Errno::OutOfMemory)?
        } else {
            old
        };

        self.platform().switch_uvm(space);
        data.sz = new;
        Ok(old)
    }
}
