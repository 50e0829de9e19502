//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 宿主机上的平台模拟
//!
//! 每个进程跑在自己的宿主线程上，`switch` 是一次接力：把 CPU 号交给目标上下文，
//! 然后在自己的接力棒上等待，直到有人切回来。这样上下文切换真的挂起了调用者，
//! 进程表锁也真的跨线程交接。
//!
//! 测试线程就是 CPU 0 的调度器，每调用一次 [`Harness::step`] 运行一个进程，
//! 直到它切回调度器，所以单 CPU 的交错是确定的。其他 CPU 由辅助线程驱动。

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::PAGE_SIZE;
use crate::errno::Errno;
use crate::process::{Pid, ProcTable, WaitChannel, PID_INIT};
use crate::{Arch, Fs, Mm};

/// 调度器等待进程切回的最长时间，超时说明进程卡死
const SCHED_TIMEOUT: Duration = Duration::from_secs(10);

/// 用户内存上限，超过时 grow 失败
pub const USER_LIMIT: usize = 64 * PAGE_SIZE;

/// park() 睡眠的通道，没有人会唤醒它
const PARK_CHAN: WaitChannel = WaitChannel::new(usize::MAX);

/// 模拟的 CPU 个数上限
const SIM_CPUS: usize = 8;

thread_local! {
    static CPU: Cell<usize> = const { Cell::new(0) };
}

fn set_cpu(cpu: usize) {
    CPU.with(|c| c.set(cpu));
}

/// 进程要执行的代码
pub type Program = Box<dyn FnOnce(&ProcTable<Sim>) + Send>;

/// 中断处理程序
pub type Handler = Box<dyn FnOnce(&ProcTable<Sim>) + Send>;

/// 发给某个 CPU 的中断
///
/// 在目标 CPU 下一次读时钟时到达；到达时中断是关的就一直挂着，
/// 等中断打开再处理。
struct Interrupt {
    cpu: usize,
    arrived: bool,
    handler: Handler,
}

/// 接力棒：`post` 交出 CPU 号，`take` 等待
pub struct Baton {
    slot: Mutex<Option<usize>>,
    cv: Condvar,
    started: AtomicBool,
}

impl Baton {
    /// `started` 为 false 时，第一次切过来会为它启动进程线程
    fn new(started: bool) -> Self {
        Self {
            slot: Mutex::new(None),
            cv: Condvar::new(),
            started: AtomicBool::new(started),
        }
    }

    fn post(&self, cpu: usize) {
        *self.slot.lock().unwrap() = Some(cpu);
        self.cv.notify_all();
    }

    /// 调度器上下文 `watch` 为 true：进程 panic 或长时间不切回时报错
    fn take(&self, state: &SimState, watch: bool) -> usize {
        let start = Instant::now();
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(cpu) = slot.take() {
                return cpu;
            }
            if watch {
                if let Some(msg) = state.poison.lock().unwrap().clone() {
                    panic!("simulated process panicked: {}", msg);
                }
                if start.elapsed() > SCHED_TIMEOUT {
                    panic!("scheduler timed out waiting for a process to switch back");
                }
            }
            slot = self
                .cv
                .wait_timeout(slot, Duration::from_millis(5))
                .unwrap()
                .0;
        }
    }
}

/// 模拟的上下文
///
/// 进程上下文在 `prepare_initial_context` 中创建接力棒；
/// 调度器上下文在第一次切出时创建。
#[derive(Default)]
pub struct SimContext {
    baton: Option<Arc<Baton>>,
    process: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimTrapFrame {
    pub entry: usize,
    pub sp: usize,
    pub ret: usize,
}

#[derive(Debug)]
pub struct SimPage {
    id: usize,
}

#[derive(Debug)]
pub struct SimSpace {
    pub size: usize,
}

/// 打开的文件，引用计数就是 Arc 的强引用数
#[derive(Debug)]
pub struct SimFile(pub Arc<()>);

#[derive(Debug)]
pub struct SimInode(pub Arc<()>);

pub struct SimState {
    table: OnceLock<Weak<dyn Any + Send + Sync>>,
    programs: Mutex<HashMap<Pid, Program>>,
    poison: Mutex<Option<String>>,
    ticks: AtomicU64,
    /// 还能分配的页数，usize::MAX 表示不限
    page_budget: AtomicUsize,
    pages_live: AtomicUsize,
    spaces_live: AtomicUsize,
    fail_next_dup: AtomicBool,
    root: Arc<()>,
    fs_inits: AtomicUsize,
    uvm_switches: AtomicUsize,
    next_page: AtomicUsize,
    threads_started: AtomicUsize,
    intr: [AtomicBool; SIM_CPUS],
    interrupts: Mutex<Vec<Interrupt>>,
    interrupts_delivered: AtomicUsize,
}

impl SimState {
    fn table(&self) -> Arc<ProcTable<Sim>> {
        self.table
            .get()
            .and_then(Weak::upgrade)
            .and_then(|t| t.downcast::<ProcTable<Sim>>().ok())
            .expect("sim: table not attached")
    }
}

/// 模拟平台
#[derive(Clone)]
pub struct Sim {
    state: Arc<SimState>,
}

impl Sim {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SimState {
                table: OnceLock::new(),
                programs: Mutex::new(HashMap::new()),
                poison: Mutex::new(None),
                ticks: AtomicU64::new(0),
                page_budget: AtomicUsize::new(usize::MAX),
                pages_live: AtomicUsize::new(0),
                spaces_live: AtomicUsize::new(0),
                fail_next_dup: AtomicBool::new(false),
                root: Arc::new(()),
                fs_inits: AtomicUsize::new(0),
                uvm_switches: AtomicUsize::new(0),
                next_page: AtomicUsize::new(1),
                threads_started: AtomicUsize::new(0),
                intr: std::array::from_fn(|_| AtomicBool::new(false)),
                interrupts: Mutex::new(Vec::new()),
                interrupts_delivered: AtomicUsize::new(0),
            }),
        }
    }

    pub fn advance(&self, ticks: u64) {
        self.state.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    /// 之后最多再分配 `pages` 页
    pub fn set_page_budget(&self, pages: usize) {
        self.state.page_budget.store(pages, Ordering::SeqCst);
    }

    /// 下一次复制地址空间失败
    pub fn fail_next_dup(&self) {
        self.state.fail_next_dup.store(true, Ordering::SeqCst);
    }

    pub fn pages_live(&self) -> usize {
        self.state.pages_live.load(Ordering::SeqCst)
    }

    pub fn spaces_live(&self) -> usize {
        self.state.spaces_live.load(Ordering::SeqCst)
    }

    /// 进程持有的根目录引用数
    pub fn root_refs(&self) -> usize {
        Arc::strong_count(&self.state.root) - 1
    }

    pub fn fs_inits(&self) -> usize {
        self.state.fs_inits.load(Ordering::SeqCst)
    }

    pub fn uvm_switches(&self) -> usize {
        self.state.uvm_switches.load(Ordering::SeqCst)
    }

    pub fn new_file(&self) -> SimFile {
        SimFile(Arc::new(()))
    }

    /// 启动过的进程线程数，应该等于被调度过的进程数
    pub fn threads_started(&self) -> usize {
        self.state.threads_started.load(Ordering::SeqCst)
    }

    /// 向 `cpu` 发一个中断
    pub fn raise_interrupt(
        &self,
        cpu: usize,
        handler: impl FnOnce(&ProcTable<Sim>) + Send + 'static,
    ) {
        self.state.interrupts.lock().unwrap().push(Interrupt {
            cpu,
            arrived: false,
            handler: Box::new(handler),
        });
    }

    pub fn interrupts_delivered(&self) -> usize {
        self.state.interrupts_delivered.load(Ordering::SeqCst)
    }

    /// 时钟走动：本 CPU 的中断到达，中断打开时立即处理
    fn interrupts_arrive(&self) {
        let cpu = self.cpu_id();
        for irq in self.state.interrupts.lock().unwrap().iter_mut() {
            if irq.cpu == cpu {
                irq.arrived = true;
            }
        }
        self.deliver_interrupts();
    }

    /// 处理本 CPU 上已经到达的中断
    ///
    /// 和硬件一样，处理程序运行时中断是关的。
    fn deliver_interrupts(&self) {
        let cpu = self.cpu_id();
        loop {
            if !self.state.intr[cpu].load(Ordering::SeqCst) {
                return;
            }
            let handler = {
                let mut pending = self.state.interrupts.lock().unwrap();
                let Some(pos) = pending.iter().position(|irq| irq.cpu == cpu && irq.arrived)
                else {
                    return;
                };
                pending.remove(pos).handler
            };
            self.state.intr[cpu].store(false, Ordering::SeqCst);
            handler(&self.state.table());
            self.state.interrupts_delivered.fetch_add(1, Ordering::SeqCst);
            self.state.intr[cpu].store(true, Ordering::SeqCst);
        }
    }

    fn start_process(&self, baton: Arc<Baton>) {
        self.state.threads_started.fetch_add(1, Ordering::SeqCst);
        let state = self.state.clone();
        thread::Builder::new()
            .name("sim-proc".to_string())
            .spawn(move || {
                let cpu = baton.take(&state, false);
                set_cpu(cpu);

                let table = state.table();
                table.forkret();
                let pid = table.current_pid().expect("sim: process without pid");
                // fork 方在登记完程序之前一直持有 programs 锁
                let program = state.programs.lock().unwrap().remove(&pid);

                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    if let Some(program) = program {
                        program(&table);
                    }
                    table.exit();
                }));
                if let Err(payload) = result {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    *state.poison.lock().unwrap() = Some(msg);
                }
            })
            .expect("sim: cannot spawn process thread");
    }
}

impl Default for Sim {
    fn default() -> Self {
        Self::new()
    }
}

impl Arch for Sim {
    type Context = SimContext;
    type TrapFrame = SimTrapFrame;

    fn cpu_id(&self) -> usize {
        CPU.with(|c| c.get())
    }

    fn intr_on(&self) {
        self.state.intr[self.cpu_id()].store(true, Ordering::SeqCst);
        self.deliver_interrupts();
    }

    fn intr_off(&self) {
        self.state.intr[self.cpu_id()].store(false, Ordering::SeqCst);
    }

    fn intr_enabled(&self) -> bool {
        self.state.intr[self.cpu_id()].load(Ordering::SeqCst)
    }

    fn wait_for_interrupt(&self) {
        thread::yield_now();
    }

    fn ticks(&self) -> u64 {
        self.interrupts_arrive();
        self.state.ticks.load(Ordering::SeqCst)
    }

    fn prepare_initial_context(&self, _kstack_top: usize) -> SimContext {
        SimContext {
            baton: Some(Arc::new(Baton::new(false))),
            process: true,
        }
    }

    unsafe fn switch(&self, from: *mut SimContext, to: *const SimContext) {
        let (mine, watch) = {
            let from = &mut *from;
            // 调度器上下文由当前线程自己运行，不需要再启动线程
            let baton = from.baton.get_or_insert_with(|| Arc::new(Baton::new(true)));
            (baton.clone(), !from.process)
        };
        let target = (*to).baton.clone().expect("sim: switch to empty context");

        if !target.started.swap(true, Ordering::SeqCst) {
            self.start_process(target.clone());
        }
        target.post(self.cpu_id());

        let cpu = mine.take(&self.state, watch);
        set_cpu(cpu);
    }

    fn init_user_trap_frame(&self, entry: usize, sp: usize) -> SimTrapFrame {
        SimTrapFrame { entry, sp, ret: 0 }
    }

    fn set_return_value(&self, tf: &mut SimTrapFrame, value: usize) {
        tf.ret = value;
    }
}

impl Mm for Sim {
    type Page = SimPage;
    type AddressSpace = SimSpace;

    fn alloc_page(&self) -> Option<SimPage> {
        self.state
            .page_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |budget| match budget {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .ok()?;
        self.state.pages_live.fetch_add(1, Ordering::SeqCst);
        Some(SimPage {
            id: self.state.next_page.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn free_page(&self, _page: SimPage) {
        self.state.pages_live.fetch_sub(1, Ordering::SeqCst);
    }

    fn kstack_top(&self, page: &SimPage) -> usize {
        (page.id + 1) * PAGE_SIZE
    }

    fn create_address_space(&self, init_code: &[u8]) -> Option<SimSpace> {
        assert!(init_code.len() <= PAGE_SIZE, "sim: init code larger than a page");
        self.state.spaces_live.fetch_add(1, Ordering::SeqCst);
        Some(SimSpace { size: PAGE_SIZE })
    }

    fn duplicate_address_space(&self, _space: &SimSpace, size: usize) -> Option<SimSpace> {
        if self.state.fail_next_dup.swap(false, Ordering::SeqCst) {
            return None;
        }
        self.state.spaces_live.fetch_add(1, Ordering::SeqCst);
        Some(SimSpace { size })
    }

    fn destroy_address_space(&self, _space: SimSpace) {
        self.state.spaces_live.fetch_sub(1, Ordering::SeqCst);
    }

    fn grow(&self, space: &mut SimSpace, _old: usize, new: usize) -> Option<usize> {
        if new > USER_LIMIT {
            return None;
        }
        space.size = new;
        Some(new)
    }

    fn shrink(&self, space: &mut SimSpace, _old: usize, new: usize) -> Option<usize> {
        space.size = new;
        Some(new)
    }

    fn switch_uvm(&self, _space: &SimSpace) {
        self.state.uvm_switches.fetch_add(1, Ordering::SeqCst);
    }

    fn switch_kvm(&self) {}
}

impl Fs for Sim {
    type File = SimFile;
    type Inode = SimInode;

    fn file_dup(&self, file: &SimFile) -> SimFile {
        SimFile(file.0.clone())
    }

    fn file_close(&self, file: SimFile) {
        drop(file);
    }

    fn inode_dup(&self, inode: &SimInode) -> SimInode {
        SimInode(inode.0.clone())
    }

    fn inode_put(&self, inode: SimInode) {
        drop(inode);
    }

    fn root_dir(&self) -> SimInode {
        SimInode(self.state.root.clone())
    }

    fn init_in_process(&self) {
        self.state.fs_inits.fetch_add(1, Ordering::SeqCst);
    }
}

/// fork 一个运行 `program` 的子进程
///
/// 子进程第一次运行时取走自己的程序；fork 和登记在同一把锁内完成，
/// 子进程即使在别的 CPU 上立刻运行也能拿到。
pub fn spawn(
    table: &ProcTable<Sim>,
    program: impl FnOnce(&ProcTable<Sim>) + Send + 'static,
) -> Result<Pid, Errno> {
    let mut programs = table.platform().state.programs.lock().unwrap();
    let pid = table.fork()?;
    programs.insert(pid, Box::new(program));
    Ok(pid)
}

/// 永远睡眠，init 的程序用它结尾
pub fn park(table: &ProcTable<Sim>) -> ! {
    loop {
        table.sleep(PARK_CHAN);
    }
}

/// 测试夹具：进程表加上驱动它的调度器
pub struct Harness {
    pub table: Arc<ProcTable<Sim>>,
}

impl Harness {
    pub fn new(nproc: usize) -> Self {
        Self::with_cpus(nproc, 1)
    }

    pub fn with_cpus(nproc: usize, ncpu: usize) -> Self {
        Self::attach(ProcTable::with_capacity(Sim::new(), nproc, ncpu))
    }

    /// `max` 之前的 PID 可用
    pub fn with_pid_limit(nproc: usize, max: Pid) -> Self {
        Self::attach(ProcTable::with_capacity(Sim::new(), nproc, 1).with_pid_limit(max))
    }

    fn attach(table: ProcTable<Sim>) -> Self {
        let state = table.platform().state.clone();
        let table = Arc::new(table);
        let erased: Arc<dyn Any + Send + Sync> = table.clone();
        let _ = state.table.set(Arc::downgrade(&erased));
        set_cpu(0);
        Self { table }
    }

    pub fn sim(&self) -> &Sim {
        self.table.platform()
    }

    /// 创建 init，它第一次被调度时运行 `init`
    ///
    /// init 不能退出，程序应以 [`park`] 结尾。
    pub fn boot(&self, init: impl FnOnce(&ProcTable<Sim>) + Send + 'static) -> Pid {
        self.sim()
            .state
            .programs
            .lock()
            .unwrap()
            .insert(PID_INIT, Box::new(init));
        self.table.userinit(b"\x00init")
    }

    /// 在 CPU 0 上调度一轮
    pub fn step(&self) -> bool {
        set_cpu(0);
        self.table.schedule_once()
    }

    /// 一直调度到没有可运行进程，返回运行的轮数
    pub fn run_until_idle(&self) -> usize {
        let mut steps = 0;
        while self.step() {
            steps += 1;
            assert!(steps < 100_000, "scheduler never went idle");
        }
        steps
    }

    /// 在辅助线程上以 CPU `cpu` 的身份调度一轮
    ///
    /// 测试线程的查询也算在 CPU 0 上，CPU 0 被辅助线程占用时不要查询。
    pub fn step_on(&self, cpu: usize) -> JoinHandle<bool> {
        let table = self.table.clone();
        thread::spawn(move || {
            set_cpu(cpu);
            table.schedule_once()
        })
    }

    /// 在辅助线程上以 CPU `cpu` 的身份持续调度，直到 `stop` 被置位
    pub fn run_cpu(&self, cpu: usize, stop: Arc<AtomicBool>) -> JoinHandle<usize> {
        let table = self.table.clone();
        thread::spawn(move || {
            set_cpu(cpu);
            let mut ran = 0;
            while !stop.load(Ordering::SeqCst) {
                if table.schedule_once() {
                    ran += 1;
                }
            }
            ran
        })
    }
}
