//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 架构相关接口
//!
//! 进程表本身与架构无关，上下文切换、中断开关、时钟等都通过 [`Arch`] 交给
//! 具体平台实现。对应 Linux 中 arch/*/kernel/process.c 提供给调度器的那部分：
//! - `switch` 对应 `__switch_to()` / `cpu_switch_to`
//! - `prepare_initial_context` 对应 `copy_thread()` 里设置 ra/sp 的部分
//! - `wait_for_interrupt` 对应 idle 循环里的 `wfi` / `hlt`

/// 平台的 CPU 与上下文切换原语
pub trait Arch: Send + Sync {
    /// 内核态保存的上下文（callee-saved 寄存器）
    type Context: Default + Send;

    /// 用户态陷入时保存的寄存器
    type TrapFrame: Default + Clone + Send;

    /// 当前 CPU 编号，范围 `0..ncpu`
    fn cpu_id(&self) -> usize;

    /// 打开本 CPU 的中断
    fn intr_on(&self);

    /// 关闭本 CPU 的中断
    fn intr_off(&self);

    /// 本 CPU 的中断是否打开
    fn intr_enabled(&self) -> bool;

    /// 空闲等待，直到下一次中断
    fn wait_for_interrupt(&self);

    /// 单调递增的时钟滴答
    fn ticks(&self) -> u64;

    /// 为新进程布置初始上下文
    ///
    /// 第一次切换到这个上下文时，平台的跳板代码必须先调用
    /// [`ProcTable::forkret`](crate::ProcTable::forkret)，再返回用户态。
    fn prepare_initial_context(&self, kstack_top: usize) -> Self::Context;

    /// 保存当前上下文到 `from`，恢复 `to`
    ///
    /// 返回时说明有别的执行流切回了 `from`。
    ///
    /// # Safety
    ///
    /// - `from` 与 `to` 必须指向有效的上下文，且在切换期间不被移动
    /// - 调用者持有进程表锁，锁的所有权随切换交给被恢复的一方
    unsafe fn switch(&self, from: *mut Self::Context, to: *const Self::Context);

    /// 构造第一个用户进程的陷入帧：从 `entry` 开始执行，用户栈顶为 `sp`
    fn init_user_trap_frame(&self, entry: usize, sp: usize) -> Self::TrapFrame;

    /// 设置系统调用返回值（a0 / eax）
    fn set_return_value(&self, tf: &mut Self::TrapFrame, value: usize);
}
