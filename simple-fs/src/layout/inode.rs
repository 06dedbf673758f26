//! 文件的块索引
//! - 直接索引：inode 内连续存储**块编号**，每个编号都指向一个**数据块**
//! - 一级间接索引：inode 指向一个索引块，整个块连续存储块编号
//!
//! 一个有效 inode 的 size 唯一决定它有多少个编号有意义：
//! 前 `ceil(size / BLOCK_SIZE)` 个，直接在前、间接在后。
//! 指针字段本身不携带有效性，一切判断以 size 为准。

use alloc::sync::Arc;
use core::mem;

use block_dev::BlockDevice;

use crate::block_cache::BlockCacheManager;
use crate::DataBlock;
use crate::BLOCK_SIZE;

/// 间接索引块的编号容量
pub const INDIRECT_COUNT: usize = BLOCK_SIZE / 4;
/// 间接索引块
pub type IndirectBlock = [u32; INDIRECT_COUNT];

/// 直接索引的编号数量
pub const DIRECT_COUNT: usize = 5;
/// 仅用直接索引时的编号容量
pub const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上间接索引时的编号容量
pub const INDIRECT_CAP: usize = DIRECT_CAP + INDIRECT_COUNT;

/// 每个 inode 表块存放的记录数
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / mem::size_of::<DiskInode>();

/// inode 表的一个块
pub type InodeBlock = [DiskInode; INODES_PER_BLOCK];

#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct DiskInode {
    /// 有效标志：0 表示槽位空闲或文件已删除
    valid: u32,
    // 不用usize是为了严控布局
    pub size: u32,
    /// 直接索引，存储容量：DIRECT_CAP * BLOCK_SIZE 字节
    pub direct: [u32; DIRECT_COUNT],
    /// 指向一个间接索引块
    pub indirect: u32,
}

impl DiskInode {
    /// 全新的空文件记录。指针字段一并清零，
    /// 之后由写入在分配块时逐个建立。
    #[inline]
    pub fn init(&mut self) {
        *self = Self {
            valid: 1,
            ..Default::default()
        };
    }

    #[inline]
    pub fn invalidate(&mut self) {
        self.valid = 0;
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid != 0
    }

    /// 容纳指定数据量需要多少个**数据块**
    #[inline]
    pub fn count_data_block(size: u32) -> usize {
        (size as usize).div_ceil(BLOCK_SIZE)
    }

    /// 数据块数拆成直接与间接两份
    #[inline]
    pub fn split_data_block(size: u32) -> (usize, usize) {
        let data_blocks = Self::count_data_block(size);
        (
            data_blocks.min(DIRECT_CAP),
            data_blocks.saturating_sub(DIRECT_CAP),
        )
    }

    /// 数据越过直接容量后才持有间接索引块
    #[inline]
    pub fn has_indirect(&self) -> bool {
        Self::count_data_block(self.size) > DIRECT_CAP
    }

    /// 逻辑上 inode 指向一系列数据块，此处传入的是这些数据块的索引（逻辑索引），
    /// 然后返回给**块缓存层**使用的ID
    pub fn block_id(
        &self,
        block_index: usize,
        cache: &BlockCacheManager,
        block_device: &Arc<dyn BlockDevice>,
    ) -> u32 {
        if block_index < DIRECT_CAP {
            self.direct[block_index]
        } else {
            cache
                .get(self.indirect as usize, block_device.clone())
                .lock()
                .map(0, |indirect: &IndirectBlock| {
                    // 剔去直接索引的部分
                    indirect[block_index - DIRECT_CAP]
                })
        }
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，到文件末尾为止
    pub fn read_at(
        &self,
        offset: usize,
        buf: &mut [u8],
        cache: &BlockCacheManager,
        block_device: &Arc<dyn BlockDevice>,
    ) -> usize {
        let mut start = offset;
        let end = (start + buf.len())
            .min(self.size as usize)
            .min(INDIRECT_CAP * BLOCK_SIZE);

        if start >= end {
            return 0;
        }

        // 已读取多少字节
        let mut read_size = 0;
        loop {
            // 当前块的逻辑索引
            let block_index = start / BLOCK_SIZE;
            // 当前块的末地址(字节)
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_read_size = current_block_end - start;
            let dest = &mut buf[read_size..read_size + block_read_size];

            cache
                .get(
                    self.block_id(block_index, cache, block_device) as usize,
                    block_device.clone(),
                )
                .lock()
                .map(0, |data_block: &DataBlock| {
                    // 绝对地址 % 块大小 = 块内偏移
                    let src = &data_block[start % BLOCK_SIZE..start % BLOCK_SIZE + block_read_size];
                    dest.copy_from_slice(src);
                });

            read_size += block_read_size;

            if current_block_end == end {
                break;
            }

            start = current_block_end;
        }

        read_size
    }
}
