//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 进程表
//!
//! 固定大小的 PCB 数组，按状态划分成六条链表：
//!
//! ```text
//!   Free ──allocproc──> Embryo ──fork/userinit──> Runnable <──> Running ──exit──> Zombie
//!     ^                                              ^            |                   |
//!     |                                              └─ Blocked <─┘                   |
//!     └───────────────────────────────wait──────────────────────────────────────────┘
//! ```
//!
//! 每个槽位在任意时刻都恰好位于一条链表上，而且链表和 `state` 字段一致。
//! 状态只能通过 [`TableInner::transition`] 修改：先从旧链表摘下，检查状态，
//! 再改状态并挂到新链表尾部，整个过程在进程表锁内完成。
//!
//! 锁：
//! - 进程表锁保护 [`TableInner`]（链表、状态、pid、parent、chan、killed、上下文、统计）
//! - 每个槽位还有一把私有数据锁，保护 [`ProcData`]（内核栈、页表、打开文件等）
//! - 持有进程表锁时可以再拿私有数据锁，反过来不行
//! - 拿进程表锁之前先关本 CPU 的中断（`push_off`），放锁之后再恢复，
//!   中断处理程序里的 wakeup 不会在同一个 CPU 上自旋等自己

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use super::pid::{Pid, PidAllocator};
use super::state::{ProcState, WaitChannel};
use crate::config::{DEFAULT_GID, DEFAULT_UID, NOFILE, PAGE_SIZE, PROC_NAME_LEN};
use crate::errno::Errno;
use crate::list::{Link, StateList};
use crate::Platform;

/// 进程控制块中受进程表锁保护的部分
pub struct Proc<P: Platform> {
    state: ProcState,
    next: Option<usize>,

    pub(super) pid: Pid,
    /// 父进程槽位，init 没有父进程
    pub(super) parent: Option<usize>,
    /// 只在 Blocked 时有意义
    pub(super) chan: Option<WaitChannel>,
    pub(super) killed: bool,
    pub(super) context: P::Context,

    pub(super) uid: u32,
    pub(super) gid: u32,

    // 统计
    pub(super) start_ticks: u64,
    pub(super) cpu_ticks_total: u64,
    pub(super) cpu_ticks_in: u64,
}

impl<P: Platform> Proc<P> {
    fn new() -> Self {
        Self {
            state: ProcState::Free,
            next: None,
            pid: 0,
            parent: None,
            chan: None,
            killed: false,
            context: P::Context::default(),
            uid: 0,
            gid: 0,
            start_ticks: 0,
            cpu_ticks_total: 0,
            cpu_ticks_in: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> ProcState {
        self.state
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// 回到 Free 时清空身份信息
    pub(super) fn clear(&mut self) {
        self.pid = 0;
        self.parent = None;
        self.chan = None;
        self.killed = false;
        self.context = P::Context::default();
    }
}

impl<P: Platform> Link for Proc<P> {
    fn next(&self) -> Option<usize> {
        self.next
    }

    fn set_next(&mut self, next: Option<usize>) {
        self.next = next;
    }
}

/// 进程私有数据
///
/// 从 allocproc 到被 wait 回收，这些资源只属于这个槽位。
pub struct ProcData<P: Platform> {
    pub(super) kstack: Option<P::Page>,
    pub(super) pgdir: Option<P::AddressSpace>,
    /// 用户内存大小（字节）
    pub(super) sz: usize,
    pub(super) tf: P::TrapFrame,
    pub(super) ofile: [Option<P::File>; NOFILE],
    pub(super) cwd: Option<P::Inode>,
    pub(super) name: [u8; PROC_NAME_LEN],
}

impl<P: Platform> ProcData<P> {
    fn new() -> Self {
        Self {
            kstack: None,
            pgdir: None,
            sz: 0,
            tf: P::TrapFrame::default(),
            ofile: core::array::from_fn(|_| None),
            cwd: None,
            name: [0; PROC_NAME_LEN],
        }
    }

    /// 设置进程名，超长截断
    pub(super) fn set_name(&mut self, name: &str) {
        self.name = [0; PROC_NAME_LEN];
        // 保留一个结尾的 0
        let mut len = name.len().min(PROC_NAME_LEN - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        self.name[..len].copy_from_slice(&name.as_bytes()[..len]);
    }

    pub(super) fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(PROC_NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

/// 每个 CPU 的调度状态
pub struct Cpu<P: Platform> {
    /// 正在这个 CPU 上运行的进程
    pub(super) proc: Option<usize>,
    /// 调度器自己的上下文，进程 sched() 时切回这里
    pub(super) scheduler: P::Context,
}

/// 进程表锁保护的全部状态
pub struct TableInner<P: Platform> {
    pub(super) procs: Box<[Proc<P>]>,
    pub(super) lists: [StateList; ProcState::COUNT],
    pub(super) cpus: Box<[Cpu<P>]>,
    pub(super) pids: PidAllocator,
    /// init 进程的槽位
    pub(super) init: Option<usize>,
}

impl<P: Platform> TableInner<P> {
    #[inline]
    pub(super) fn list(&self, state: ProcState) -> &StateList {
        &self.lists[state.index()]
    }

    /// 状态迁移：从 `from` 链表摘下，检查状态，改为 `to` 并挂到 `to` 链表尾部
    ///
    /// 槽位不在 `from` 链表上或状态不符都说明进程表已经损坏，直接 panic。
    pub(super) fn transition(&mut self, idx: usize, from: ProcState, to: ProcState) {
        if self.lists[from.index()].remove(&mut self.procs, idx).is_err() {
            panic!(
                "[ptable] slot {} (pid {}) not on {:?} list",
                idx, self.procs[idx].pid, from
            );
        }
        let state = self.procs[idx].state;
        if state != from {
            panic!(
                "[ptable] slot {} (pid {}) on {:?} list but state is {:?}",
                idx, self.procs[idx].pid, from, state
            );
        }
        self.procs[idx].state = to;
        self.lists[to.index()].push_back(&mut self.procs, idx);

        #[cfg(feature = "debug_log")]
        log::trace!(
            "[ptable] pid {}: {:?} -> {:?}",
            self.procs[idx].pid,
            from,
            to
        );
    }

    /// 当前 CPU 上运行的进程
    #[inline]
    pub(super) fn myproc(&self, cpu: usize) -> Option<usize> {
        self.cpus[cpu].proc
    }

    /// 进程自己的等待通道，wait() 在上面睡眠，子进程退出时唤醒
    #[inline]
    pub(super) fn chan_of(&self, idx: usize) -> WaitChannel {
        WaitChannel::of(&self.procs[idx])
    }

    /// 有效父进程 pid：init 返回自己的 pid
    pub(super) fn ppid_of(&self, idx: usize) -> Pid {
        match self.procs[idx].parent {
            Some(parent) => self.procs[parent].pid,
            None => self.procs[idx].pid,
        }
    }

    /// 在给定的几条链表里按顺序查找第一个满足条件的槽位
    pub(super) fn find_in(
        &self,
        states: &[ProcState],
        mut pred: impl FnMut(&Proc<P>) -> bool,
    ) -> Option<(usize, ProcState)> {
        for &state in states {
            if let Some(idx) = self.list(state).iter(&self.procs).find(|&i| pred(&self.procs[i])) {
                return Some((idx, state));
            }
        }
        None
    }
}

/// 每个 CPU 的关中断嵌套
///
/// 只被所在 CPU 在关中断时访问，原子类型只是为了满足 `Sync`。
struct IntrState {
    /// push_off 嵌套深度
    depth: AtomicUsize,
    /// 最外层 push_off 之前中断是否打开
    enabled: AtomicBool,
}

impl IntrState {
    fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
            enabled: AtomicBool::new(false),
        }
    }
}

/// 进程表
///
/// 对外的所有操作都定义在这个类型上，分散在 `process` 的各个子模块里。
pub struct ProcTable<P: Platform> {
    lock: Mutex<()>,
    inner: UnsafeCell<TableInner<P>>,
    data: Box<[Mutex<ProcData<P>>]>,
    intr: Box<[IntrState]>,
    platform: P,
    /// 第一次 forkret 还没发生
    first: AtomicBool,
}

// inner 只在持有 lock 时访问
unsafe impl<P: Platform> Sync for ProcTable<P> {}
unsafe impl<P: Platform> Send for ProcTable<P> {}

/// 进程表锁
///
/// 和 `spin::MutexGuard` 不同，这把锁可以跨上下文切换交接：
/// 调度器拿着锁切到进程，由进程释放；进程拿着锁切回调度器，由调度器释放。
/// 所以释放时用 `force_unlock`，不要求是加锁的那条执行流。
pub(super) struct TableGuard<'a, P: Platform> {
    table: &'a ProcTable<P>,
}

impl<P: Platform> Deref for TableGuard<'_, P> {
    type Target = TableInner<P>;

    fn deref(&self) -> &TableInner<P> {
        // SAFETY: 持有进程表锁
        unsafe { &*self.table.inner.get() }
    }
}

impl<P: Platform> DerefMut for TableGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut TableInner<P> {
        // SAFETY: 持有进程表锁
        unsafe { &mut *self.table.inner.get() }
    }
}

impl<P: Platform> Drop for TableGuard<'_, P> {
    fn drop(&mut self) {
        // SAFETY: guard 存在说明锁被持有
        unsafe { self.table.lock.force_unlock() }
        self.table.pop_off();
    }
}

impl<P: Platform> ProcTable<P> {
    /// 使用 Kernel.toml 中的 NPROC 和 MAX_CPUS
    pub fn new(platform: P) -> Self {
        Self::with_capacity(platform, crate::config::NPROC, crate::config::MAX_CPUS)
    }

    pub fn with_capacity(platform: P, nproc: usize, ncpu: usize) -> Self {
        assert!(nproc > 0, "process table needs at least one slot");
        assert!(ncpu > 0, "process table needs at least one cpu");

        let mut procs: Box<[Proc<P>]> = (0..nproc).map(|_| Proc::new()).collect();
        let mut lists = [StateList::new(); ProcState::COUNT];
        for idx in 0..nproc {
            lists[ProcState::Free.index()].push_back(&mut procs, idx);
        }

        let cpus = (0..ncpu)
            .map(|_| Cpu {
                proc: None,
                scheduler: P::Context::default(),
            })
            .collect();

        Self {
            lock: Mutex::new(()),
            inner: UnsafeCell::new(TableInner {
                procs,
                lists,
                cpus,
                pids: PidAllocator::new(),
                init: None,
            }),
            data: (0..nproc).map(|_| Mutex::new(ProcData::new())).collect(),
            intr: (0..ncpu).map(|_| IntrState::new()).collect(),
            platform,
            first: AtomicBool::new(true),
        }
    }

    /// 限制可分配的 PID，`max` 本身不会被分配
    pub fn with_pid_limit(mut self, max: Pid) -> Self {
        self.inner.get_mut().pids = PidAllocator::with_max(max);
        self
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// 槽位总数
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn cpus(&self) -> usize {
        self.lock().cpus.len()
    }

    pub(super) fn lock(&self) -> TableGuard<'_, P> {
        self.push_off();
        core::mem::forget(self.lock.lock());
        TableGuard { table: self }
    }

    /// 放弃从调度器继承来的锁，只在新进程第一次运行时使用
    pub(super) unsafe fn release_inherited_lock(&self) {
        self.lock.force_unlock();
        self.pop_off();
    }

    /// 关中断，可以嵌套
    ///
    /// 对应 xv6 的 pushcli：最外层记下原来的中断状态，
    /// 要两次 pop_off 才能抵消两次 push_off。
    pub(super) fn push_off(&self) {
        let was_enabled = self.platform.intr_enabled();
        self.platform.intr_off();
        // 关中断之后才能确定自己在哪个 CPU 上
        let intr = &self.intr[self.platform.cpu_id()];
        if intr.depth.load(Ordering::Relaxed) == 0 {
            intr.enabled.store(was_enabled, Ordering::Relaxed);
        }
        intr.depth.fetch_add(1, Ordering::Relaxed);
    }

    /// 抵消一次 push_off，最外层恢复原来的中断状态
    pub(super) fn pop_off(&self) {
        if self.platform.intr_enabled() {
            panic!("pop_off: interruptible");
        }
        let intr = &self.intr[self.platform.cpu_id()];
        let depth = intr.depth.load(Ordering::Relaxed);
        if depth == 0 {
            panic!("pop_off: not pushed");
        }
        intr.depth.store(depth - 1, Ordering::Relaxed);
        if depth == 1 && intr.enabled.load(Ordering::Relaxed) {
            self.platform.intr_on();
        }
    }

    /// 本 CPU 的 push_off 嵌套深度
    pub(super) fn intr_depth(&self, cpu: usize) -> usize {
        self.intr[cpu].depth.load(Ordering::Relaxed)
    }

    /// 本 CPU 最外层 push_off 之前的中断状态，sched 跨切换保存它
    pub(super) fn saved_intr(&self, cpu: usize) -> bool {
        self.intr[cpu].enabled.load(Ordering::Relaxed)
    }

    pub(super) fn restore_saved_intr(&self, cpu: usize, enabled: bool) {
        self.intr[cpu].enabled.store(enabled, Ordering::Relaxed);
    }

    pub(super) fn holding(&self) -> bool {
        self.lock.is_locked()
    }

    pub(super) fn data(&self, idx: usize) -> &Mutex<ProcData<P>> {
        &self.data[idx]
    }

    /// 第一次 forkret 返回 true，之后都返回 false
    pub(super) fn take_first(&self) -> bool {
        self.first.swap(false, Ordering::AcqRel)
    }

    /// 当前 CPU 上运行的进程槽位
    pub(super) fn current(&self) -> Option<usize> {
        let cpu = self.platform.cpu_id();
        self.lock().myproc(cpu)
    }

    /// 分配槽位和内核栈，成功后槽位处于 Embryo
    ///
    /// 对应 xv6 的 allocproc。PID 在拿到槽位时就分配，之后即使内核栈分配失败
    /// 也不会归还。
    pub(super) fn allocproc(&self) -> Result<usize, Errno> {
        let mut table = self.lock();
        let Some(idx) = table.list(ProcState::Free).head() else {
            log::warn!("[ptable] allocproc: no free slot");
            return Err(Errno::TryAgain);
        };
        let Some(pid) = table.pids.alloc() else {
            log::warn!("[ptable] allocproc: pid space exhausted");
            return Err(Errno::TryAgain);
        };
        table.transition(idx, ProcState::Free, ProcState::Embryo);
        table.procs[idx].pid = pid;
        drop(table);

        let Some(kstack) = self.platform.alloc_page() else {
            let mut table = self.lock();
            table.procs[idx].clear();
            table.transition(idx, ProcState::Embryo, ProcState::Free);
            log::warn!("[ptable] allocproc: no kernel stack for pid {}", pid);
            return Err(Errno::OutOfMemory);
        };

        // 第一次被调度时从 forkret 开始执行
        let context = self
            .platform
            .prepare_initial_context(self.platform.kstack_top(&kstack));
        {
            let mut data = self.data[idx].lock();
            data.kstack = Some(kstack);
            data.sz = 0;
            data.tf = P::TrapFrame::default();
        }

        let now = self.platform.ticks();
        let mut table = self.lock();
        let p = &mut table.procs[idx];
        p.context = context;
        p.start_ticks = now;
        p.cpu_ticks_total = 0;
        p.cpu_ticks_in = 0;
        Ok(idx)
    }

    /// 创建第一个用户进程
    ///
    /// `init_code` 被装入地址 0 处的第一页，进程从地址 0 开始执行。
    /// 只能调用一次，资源不足时 panic。
    pub fn userinit(&self, init_code: &[u8]) -> Pid {
        if self.lock().init.is_some() {
            panic!("userinit: init process already exists");
        }

        let idx = match self.allocproc() {
            Ok(idx) => idx,
            Err(e) => panic!("userinit: allocproc failed: {}", e),
        };
        let Some(pgdir) = self.platform.create_address_space(init_code) else {
            panic!("userinit: out of memory");
        };

        {
            let mut data = self.data[idx].lock();
            data.pgdir = Some(pgdir);
            data.sz = PAGE_SIZE;
            data.tf = self.platform.init_user_trap_frame(0, PAGE_SIZE);
            data.set_name("initcode");
            data.cwd = Some(self.platform.root_dir());
        }

        let mut table = self.lock();
        let p = &mut table.procs[idx];
        p.parent = None;
        p.uid = DEFAULT_UID;
        p.gid = DEFAULT_GID;
        let pid = p.pid;
        table.init = Some(idx);
        table.transition(idx, ProcState::Embryo, ProcState::Runnable);

        log::debug!("[ptable] userinit: pid {}", pid);
        pid
    }

    /// 把打开的文件放进当前进程第一个空闲的描述符
    ///
    /// 描述符表已满时关闭 `file` 并返回 `TooManyOpenFiles`。
    pub fn fdalloc(&self, file: P::File) -> Result<usize, Errno> {
        let idx = self
            .current()
            .unwrap_or_else(|| panic!("fdalloc: no current process"));

        let mut data = self.data[idx].lock();
        match data.ofile.iter().position(|f| f.is_none()) {
            Some(fd) => {
                data.ofile[fd] = Some(file);
                Ok(fd)
            }
            None => {
                drop(data);
                self.platform.file_close(file);
                Err(Errno::TooManyOpenFiles)
            }
        }
    }

    /// 检查进程表不变式，违反时 panic
    ///
    /// - 每个槽位恰好在一条链表上，且链表与状态一致
    /// - 链表尾的 next 为空，空链表 head/tail 都为空
    /// - 非 Free 槽位的 pid 唯一且非零
    /// - parent 指向非 Free 槽位
    pub fn check_invariants(&self) {
        let table = self.lock();
        let nproc = table.procs.len();
        let mut seen = alloc::vec![false; nproc];

        for state in ProcState::ALL {
            let list = table.list(state);
            if list.is_empty() {
                assert!(list.tail().is_none(), "{:?} list: empty with tail", state);
                continue;
            }
            let mut last = None;
            for idx in list.iter(&table.procs) {
                assert!(!seen[idx], "slot {} on more than one list", idx);
                seen[idx] = true;
                assert_eq!(
                    table.procs[idx].state, state,
                    "slot {} state does not match its list",
                    idx
                );
                last = Some(idx);
            }
            assert_eq!(list.tail(), last, "{:?} list: stale tail", state);
        }
        assert!(seen.iter().all(|&s| s), "slot missing from every list");

        let mut pids = alloc::vec::Vec::new();
        for (idx, p) in table.procs.iter().enumerate() {
            if p.state == ProcState::Free {
                continue;
            }
            assert_ne!(p.pid, 0, "slot {} live with pid 0", idx);
            pids.push(p.pid);
            if let Some(parent) = p.parent {
                assert_ne!(
                    table.procs[parent].state,
                    ProcState::Free,
                    "pid {} has a free parent slot",
                    p.pid
                );
            }
        }
        let live = pids.len();
        pids.sort_unstable();
        pids.dedup();
        assert_eq!(pids.len(), live, "duplicate pid");
    }
}
