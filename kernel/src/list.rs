//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 状态链表
//!
//! 和 Linux 的 list_head 一样是侵入式链表，只不过节点之间用数组下标相连：
//! - 节点本身存放在一个固定大小的数组（arena）里，链接字段嵌在元素中
//! - 链表头只记录 head/tail 两个下标
//! - 单向链接，尾插 O(1)，删除需要从头扫描
//!
//! 同一个 arena 上可以挂多条链表，只要保证每个节点同一时刻最多在一条链表上。

/// 可以挂到 [`StateList`] 上的节点
pub trait Link {
    /// 下一个节点的下标
    fn next(&self) -> Option<usize>;

    /// 设置下一个节点的下标
    fn set_next(&mut self, next: Option<usize>);
}

/// 要删除的节点不在链表上
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotInList(pub usize);

/// 以下标相连的单向链表头
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateList {
    head: Option<usize>,
    tail: Option<usize>,
}

impl StateList {
    /// 创建空链表
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    #[inline]
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<usize> {
        self.tail
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// 尾插
    ///
    /// 调用者保证 `idx` 当前不在任何链表上
    pub fn push_back<T: Link>(&mut self, arena: &mut [T], idx: usize) {
        arena[idx].set_next(None);
        match self.tail {
            Some(tail) => arena[tail].set_next(Some(idx)),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// 从链表中摘下 `idx`
    ///
    /// 节点不在链表上时返回 `Err(NotInList)`，链表保持不变。
    /// 成功后节点的 next 被清空。
    pub fn remove<T: Link>(&mut self, arena: &mut [T], idx: usize) -> Result<(), NotInList> {
        let mut prev: Option<usize> = None;
        let mut cur = self.head;

        while let Some(c) = cur {
            if c == idx {
                let next = arena[c].next();
                match prev {
                    Some(p) => arena[p].set_next(next),
                    None => self.head = next,
                }
                if self.tail == Some(c) {
                    self.tail = prev;
                }
                arena[c].set_next(None);
                return Ok(());
            }
            prev = cur;
            cur = arena[c].next();
        }

        Err(NotInList(idx))
    }

    /// 按链表顺序遍历下标
    pub fn iter<'a, T: Link>(&self, arena: &'a [T]) -> Iter<'a, T> {
        Iter {
            arena,
            cur: self.head,
        }
    }

    pub fn len<T: Link>(&self, arena: &[T]) -> usize {
        self.iter(arena).count()
    }
}

/// [`StateList::iter`] 返回的迭代器
pub struct Iter<'a, T> {
    arena: &'a [T],
    cur: Option<usize>,
}

impl<'a, T: Link> Iterator for Iter<'a, T> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let cur = self.cur?;
        self.cur = self.arena[cur].next();
        Some(cur)
    }
}
