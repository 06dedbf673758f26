//! # 遍历原语
//!
//! 挂载、调试列表、删除与碎片整理都要按顺序走过 inode 表，
//! 或者某个文件寻址的全部数据块。这里把两种游标做成显式的
//! 迭代器对象，位置由持有者各自保管，不存在模块级的隐藏状态，
//! 嵌套遍历因此是安全的。

use alloc::sync::Arc;
use core::mem;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::block_cache::{BlockCache, BlockCacheManager};
use crate::layout::{DiskInode, IndirectBlock, DIRECT_CAP, INDIRECT_CAP, INODES_PER_BLOCK};

/// inode 表游标：从给定 inumber 起，依次产出每个槽位的
/// `(inumber, 记录副本)`，无论记录是否有效。
/// 起点越界时一个元素也不产出。
pub struct InodeCursor<'a> {
    cache: &'a BlockCacheManager,
    block_device: &'a Arc<dyn BlockDevice>,
    /// 表的槽位总数，到达即停
    ninodes: u32,
    next: u32,
    /// 当前停留的 inode 表块，跨越块边界时才更换
    block: Option<(usize, Arc<Mutex<BlockCache>>)>,
}

impl<'a> InodeCursor<'a> {
    pub fn new(
        cache: &'a BlockCacheManager,
        block_device: &'a Arc<dyn BlockDevice>,
        ninodes: u32,
        start: u32,
    ) -> Self {
        Self {
            cache,
            block_device,
            ninodes,
            next: start,
            block: None,
        }
    }
}

impl Iterator for InodeCursor<'_> {
    type Item = (u32, DiskInode);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.ninodes {
            return None;
        }

        let inumber = self.next;
        self.next += 1;

        // inode 表紧跟在超级块之后
        let block_id = 1 + inumber as usize / INODES_PER_BLOCK;
        let block = match self.block.take() {
            Some((id, block)) if id == block_id => block,
            _ => self.cache.get(block_id, self.block_device.clone()),
        };

        let offset = inumber as usize % INODES_PER_BLOCK * mem::size_of::<DiskInode>();
        let inode = block.lock().map(offset, |inode: &DiskInode| *inode);
        self.block = Some((block_id, block));

        Some((inumber, inode))
    }
}

/// 数据块游标：按直接在前、间接在后的顺序产出一个 inode
/// 寻址的物理块号，字节计数到达 size 或指针容量耗尽即停。
/// 间接索引块推迟到首次需要时才读。
pub struct DataCursor<'a> {
    cache: &'a BlockCacheManager,
    block_device: &'a Arc<dyn BlockDevice>,
    /// 被遍历 inode 的记录副本
    inode: DiskInode,
    /// 逻辑块索引
    index: usize,
    /// size 决定的数据块总数
    total: usize,
    /// 惰性载入的间接索引块
    indirect: Option<Arc<Mutex<BlockCache>>>,
}

impl<'a> DataCursor<'a> {
    pub fn new(
        cache: &'a BlockCacheManager,
        block_device: &'a Arc<dyn BlockDevice>,
        inode: DiskInode,
    ) -> Self {
        Self {
            cache,
            block_device,
            total: DiskInode::count_data_block(inode.size).min(INDIRECT_CAP),
            inode,
            index: 0,
            indirect: None,
        }
    }
}

impl Iterator for DataCursor<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.total {
            return None;
        }

        let block_id = if self.index < DIRECT_CAP {
            self.inode.direct[self.index]
        } else {
            let entry = self.index - DIRECT_CAP;
            let indirect = self.indirect.get_or_insert_with(|| {
                self.cache
                    .get(self.inode.indirect as usize, self.block_device.clone())
            });
            indirect
                .lock()
                .map(0, |indirect: &IndirectBlock| indirect[entry])
        };

        self.index += 1;
        Some(block_id)
    }
}
