//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 文件系统接口
//!
//! fork 复制打开的文件和当前目录，exit 关闭它们。引用计数由实现者维护。

/// 文件与 inode 引用
pub trait Fs: Send + Sync {
    /// 打开文件的句柄
    type File: Send;

    /// inode 引用（当前工作目录）
    type Inode: Send;

    /// 增加文件引用，对应 filedup
    fn file_dup(&self, file: &Self::File) -> Self::File;

    /// 释放文件引用，对应 fileclose
    fn file_close(&self, file: Self::File);

    /// 增加 inode 引用，对应 idup
    fn inode_dup(&self, inode: &Self::Inode) -> Self::Inode;

    /// 释放 inode 引用，对应 iput
    fn inode_put(&self, inode: Self::Inode);

    /// 根目录，第一个进程的 cwd
    fn root_dir(&self) -> Self::Inode;

    /// 第一个进程首次被调度时调用一次
    ///
    /// 文件系统初始化可能睡眠，必须在进程上下文中运行，不能放在启动流程里。
    fn init_in_process(&self) {}
}
