//! ptable 配置（自动生成）
//!
//! 此文件由 build.rs 根据 Kernel.toml 自动生成，请勿手动修改

// ============================================================
// 基本信息
// ============================================================

/// 内核名称
pub const KERNEL_NAME: &str = "ptable";

/// 内核版本
pub const KERNEL_VERSION: &str = "0.1.0";

// ============================================================
// 进程配置
// ============================================================

/// 进程表槽位数
pub const NPROC: usize = 64;

/// 每个进程的打开文件数
pub const NOFILE: usize = 16;

/// 进程名长度（字节）
pub const PROC_NAME_LEN: usize = 16;

/// PID 上限
pub const PID_MAX: u32 = 4194304;

/// init 进程的 uid
pub const DEFAULT_UID: u32 = 0;

/// init 进程的 gid
pub const DEFAULT_GID: u32 = 0;

// ============================================================
// SMP 配置
// ============================================================

/// 最大CPU数量
pub const MAX_CPUS: usize = 4;

// ============================================================
// 内存配置
// ============================================================

/// 页大小
pub const PAGE_SIZE: usize = 4096;

// ============================================================
// 调试配置
// ============================================================

/// 日志级别
pub const LOG_LEVEL: &str = "warn";
