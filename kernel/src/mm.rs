//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 内存管理接口
//!
//! 进程表只拥有句柄，页分配和页表操作由 [`Mm`] 的实现者负责。

/// 物理页与用户地址空间
pub trait Mm: Send + Sync {
    /// 一页物理内存（内核栈）
    type Page: Send;

    /// 用户地址空间（页表）
    type AddressSpace: Send;

    /// 分配一页，失败返回 `None`
    fn alloc_page(&self) -> Option<Self::Page>;

    /// 归还一页
    fn free_page(&self, page: Self::Page);

    /// 内核栈的栈顶地址
    fn kstack_top(&self, page: &Self::Page) -> usize;

    /// 创建地址空间，并把 `init_code` 装入地址 0 处的第一页
    fn create_address_space(&self, init_code: &[u8]) -> Option<Self::AddressSpace>;

    /// 复制 `[0, size)` 范围的用户内存，对应 xv6 的 copyuvm
    fn duplicate_address_space(
        &self,
        space: &Self::AddressSpace,
        size: usize,
    ) -> Option<Self::AddressSpace>;

    /// 释放整个地址空间
    fn destroy_address_space(&self, space: Self::AddressSpace);

    /// 从 `old_size` 扩展到 `new_size`，返回新的大小
    fn grow(&self, space: &mut Self::AddressSpace, old_size: usize, new_size: usize)
        -> Option<usize>;

    /// 从 `old_size` 收缩到 `new_size`，返回新的大小
    fn shrink(
        &self,
        space: &mut Self::AddressSpace,
        old_size: usize,
        new_size: usize,
    ) -> Option<usize>;

    /// 切换到用户地址空间
    fn switch_uvm(&self, space: &Self::AddressSpace);

    /// 切回内核地址空间
    fn switch_kvm(&self);
}
