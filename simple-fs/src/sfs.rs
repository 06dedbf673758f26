//! # 文件系统管理层
//!
//! 构建出卷的布局并使用：块 0 是超级块，其后十分之一的块交给
//! inode 表，余下的全部是数据区。文件没有名字，以 inumber 指称。
//!
//! 空闲空间位图是挂载时扫描 inode 表派生出来的内存缓存，
//! 一切修改操作都以**先挂载**为前提；这一点由所有权保证，
//! 操作只能通过 [`SimpleFileSystem::mount`] 返回的值发起。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use block_dev::BlockDevice;

use crate::bitmap::Bitmap;
use crate::block_cache::BlockCacheManager;
use crate::cursor::{DataCursor, InodeCursor};
use crate::error::{FsError, Result};
use crate::layout::{
    DiskInode, IndirectBlock, InodeBlock, SuperBlock, DIRECT_CAP, INDIRECT_CAP, INDIRECT_COUNT,
    INODES_PER_BLOCK,
};
use crate::{DataBlock, BLOCK_SIZE};

/// 一个已挂载的卷
#[derive(Debug)]
pub struct SimpleFileSystem {
    block_device: Arc<dyn BlockDevice>,
    cache: BlockCacheManager,
    /// 挂载时从超级块取出的布局参数
    nblocks: u32,
    ninodeblocks: u32,
    ninodes: u32,
    /// inode 槽位的占用情况，槽位 0 永久占用
    inode_bitmap: Bitmap,
    /// 设备块的占用情况，超级块与 inode 表永久占用
    block_bitmap: Bitmap,
}

/// 写入结果。短写是正常结局而非异常；
/// `out_of_space` 记录短写是否因为空闲块耗尽。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub bytes: usize,
    pub out_of_space: bool,
}

/// [`SimpleFileSystem::inspect`] 产出的卷面貌，如何呈现由调用方决定
#[derive(Debug)]
pub struct VolumeReport {
    pub magic_valid: bool,
    pub nblocks: u32,
    pub ninodeblocks: u32,
    pub ninodes: u32,
    pub inodes: Vec<InodeReport>,
}

/// 一个有效 inode 的寻址情况
#[derive(Debug)]
pub struct InodeReport {
    pub inumber: u32,
    pub size: u32,
    pub direct: Vec<u32>,
    pub indirect: Option<u32>,
    pub indirect_blocks: Vec<u32>,
    /// 声称的大小超出了直接加间接的全部指针容量
    pub exceeds_capacity: bool,
}

impl SimpleFileSystem {
    /// 格式化设备：写入超级块并清空 inode 表的每个槽位。
    /// 数据区的内容保持原样，只是不再被任何记录寻址。
    ///
    /// 已挂载的卷不允许格式化，调用方持有挂载值时不应调用。
    pub fn format(block_device: &Arc<dyn BlockDevice>) {
        let cache = BlockCacheManager::new();
        let nblocks = block_device.num_blocks() as u32;
        // 十分之一的块交给 inode 表
        let ninodeblocks = nblocks / 10;
        let ninodes = ninodeblocks * INODES_PER_BLOCK as u32;

        cache
            .get(0, block_device.clone())
            .lock()
            .map_mut(0, |super_block: &mut SuperBlock| {
                super_block.init(nblocks, ninodeblocks, ninodes)
            });

        for block_id in 1..=ninodeblocks as usize {
            cache
                .get(block_id, block_device.clone())
                .lock()
                .map_mut(0, |data_block: &mut DataBlock| data_block.fill(0));
        }

        cache.sync_all();
        log::info!("formatted volume: {nblocks} blocks, {ninodes} inode slots");
    }

    /// 校验超级块并重建两张位图，返回挂载好的卷。
    pub fn mount(block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let cache = BlockCacheManager::new();
        let (nblocks, ninodeblocks, ninodes) = cache
            .get(0, block_device.clone())
            .lock()
            .map(0, |super_block: &SuperBlock| {
                super_block.is_valid().then(|| {
                    (
                        super_block.nblocks,
                        super_block.ninodeblocks,
                        super_block.ninodes,
                    )
                })
            })
            .ok_or(FsError::InvalidSuperblock)?;

        // 退化布局当作坏卷：inode 表或数据区一块都分不到
        if ninodeblocks == 0 || nblocks <= ninodeblocks + 1 {
            return Err(FsError::InvalidSuperblock);
        }

        let mut inode_bitmap = Bitmap::new(ninodes as usize);
        let mut block_bitmap = Bitmap::new(nblocks as usize);

        // 超级块与 inode 表永久占用
        for block_id in 0..=ninodeblocks as usize {
            block_bitmap.set(block_id, true);
        }
        // 槽位 0 永不分配
        inode_bitmap.set(0, true);

        // 全表扫描：有效记录占住槽位，它寻址的块连同间接索引块占住块
        let mut files = 0;
        for (inumber, inode) in InodeCursor::new(&cache, &block_device, ninodes, 1) {
            if !inode.is_valid() {
                continue;
            }
            inode_bitmap.set(inumber as usize, true);
            for block_id in DataCursor::new(&cache, &block_device, inode) {
                block_bitmap.set(block_id as usize, true);
            }
            if inode.has_indirect() {
                block_bitmap.set(inode.indirect as usize, true);
            }
            files += 1;
        }

        log::info!("mounted volume: {nblocks} blocks, {ninodes} inode slots, {files} files");

        Ok(Self {
            block_device,
            cache,
            nblocks,
            ninodeblocks,
            ninodes,
            inode_bitmap,
            block_bitmap,
        })
    }

    /// 占住编号最小的空闲槽位，写入一条全新的空文件记录。
    pub fn create(&mut self) -> Result<u32> {
        // 槽位 0 在挂载时已永久占用，首次适应扫描天然跳过它
        let inumber = self.inode_bitmap.alloc().ok_or(FsError::NoFreeInodes)? as u32;
        self.on_disk_mut(inumber, DiskInode::init);
        self.cache.sync_all();
        Ok(inumber)
    }

    /// 删除一个文件：失效其记录并回收全部空间。失败时没有任何效果。
    pub fn delete(&mut self, inumber: u32) -> Result<()> {
        let inode = self.checked(inumber)?;

        // 先落盘失效标志，再回收空间
        self.on_disk_mut(inumber, DiskInode::invalidate);

        for block_id in DataCursor::new(&self.cache, &self.block_device, inode) {
            self.block_bitmap.set(block_id as usize, false);
        }
        // 数据跨入间接区时，间接索引块本身一并回收
        if inode.has_indirect() {
            self.block_bitmap.set(inode.indirect as usize, false);
        }
        self.inode_bitmap.set(inumber as usize, false);
        self.cache.sync_all();
        Ok(())
    }

    /// 文件的字节大小。空文件的 0 与错误是两回事，后者走 `Err`。
    pub fn getsize(&self, inumber: u32) -> Result<usize> {
        Ok(self.checked(inumber)?.size as usize)
    }

    /// 从 `offset` 起读出至多 `buf.len()` 字节，返回实际读出的字节数。
    /// 读取从不越过文件末尾，偏移在末尾之后时读出 0 字节。
    pub fn read(&self, inumber: u32, buf: &mut [u8], offset: usize) -> Result<usize> {
        let inode = self.checked(inumber)?;
        Ok(inode.read_at(offset, buf, &self.cache, &self.block_device))
    }

    /// 从 `offset` 起写入 `buf`，返回实际写入的字节数。
    ///
    /// 写入可以延长文件但不能在末尾之后留下空洞。需要的块在途中
    /// 逐个向位图申请；空闲块耗尽时就地停笔，把 size 推进到实际
    /// 写到的位置并落盘，以 [`WriteOutcome::out_of_space`] 告知。
    /// 短写是完全合法的结果。
    pub fn write(&mut self, inumber: u32, buf: &[u8], offset: usize) -> Result<WriteOutcome> {
        let mut inode = self.checked(inumber)?;
        let size = inode.size as usize;
        if offset > size {
            return Err(FsError::WriteGap { offset, size });
        }

        // 现有 size 已覆盖的块不再重新分配
        let allocated = DiskInode::count_data_block(inode.size);
        let mut has_indirect = allocated > DIRECT_CAP;
        let mut fresh_indirect = false;

        let mut start = offset;
        let end = offset + buf.len();
        let mut written = 0;
        let mut out_of_space = false;

        while start < end {
            let block_index = start / BLOCK_SIZE;
            // 指针容量用尽，只能就此短写
            if block_index >= INDIRECT_CAP {
                break;
            }

            let block_id = if block_index < DIRECT_CAP {
                if block_index >= allocated {
                    let Some(block_id) = self.alloc_block() else {
                        out_of_space = true;
                        break;
                    };
                    inode.direct[block_index] = block_id;
                }
                inode.direct[block_index]
            } else {
                // 首次越过直接容量时建立间接索引块，表项先全部清零
                if !has_indirect {
                    let Some(block_id) = self.alloc_block() else {
                        out_of_space = true;
                        break;
                    };
                    self.cache
                        .get(block_id as usize, self.block_device.clone())
                        .lock()
                        .map_mut(0, |indirect: &mut IndirectBlock| indirect.fill(0));
                    inode.indirect = block_id;
                    has_indirect = true;
                    fresh_indirect = true;
                }

                let entry = block_index - DIRECT_CAP;
                if block_index >= allocated {
                    let Some(block_id) = self.alloc_block() else {
                        out_of_space = true;
                        break;
                    };
                    self.cache
                        .get(inode.indirect as usize, self.block_device.clone())
                        .lock()
                        .map_mut(0, |indirect: &mut IndirectBlock| indirect[entry] = block_id);
                    block_id
                } else {
                    self.cache
                        .get(inode.indirect as usize, self.block_device.clone())
                        .lock()
                        .map(0, |indirect: &IndirectBlock| indirect[entry])
                }
            };

            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let len = current_block_end - start;
            self.cache
                .get(block_id as usize, self.block_device.clone())
                .lock()
                .map_mut(0, |data_block: &mut DataBlock| {
                    data_block[start % BLOCK_SIZE..start % BLOCK_SIZE + len]
                        .copy_from_slice(&buf[written..written + len]);
                });

            written += len;
            start = current_block_end;
        }

        // 写到哪里 size 就延伸到哪里，从不隐式截断
        inode.size = inode.size.max((offset + written) as u32);

        // 间接块一个表项都没挂上就退回，位图只记录可达块
        if fresh_indirect && !inode.has_indirect() {
            self.block_bitmap.set(inode.indirect as usize, false);
            inode.indirect = 0;
        }

        self.on_disk_mut(inumber, |disk_inode| *disk_inode = inode);
        self.cache.sync_all();

        if out_of_space {
            log::debug!(
                "volume full: write to inode {inumber} stopped at {written}/{} bytes",
                buf.len()
            );
        }

        Ok(WriteOutcome {
            bytes: written,
            out_of_space,
        })
    }

    /// 重写 inode 表与数据区，消除删除留下的空洞。
    ///
    /// 存活文件按 inumber 顺序搬进最低的空闲位置，**inumber 会被
    /// 重新指派**：文件身份不跨越碎片整理，调用方此前记下的
    /// inumber 一律作废，之后必须重新枚举。
    ///
    /// 两张全尺寸镜像在内存里备好后整体落盘；中途断电会留下
    /// 新旧混杂的卷，这里不做任何恢复。
    pub fn defragment(&mut self) -> Result<()> {
        let ninodeblocks = self.ninodeblocks as usize;
        let ndatablocks = self.nblocks as usize - ninodeblocks - 1;
        let data_start = ninodeblocks as u32 + 1;

        // 镜像：inode 表从全无效开始，数据区从全零开始
        let mut table = vec![DiskInode::default(); self.ninodes as usize];
        let mut data: Vec<DataBlock> = vec![[0; BLOCK_SIZE]; ndatablocks];

        // 压缩序号即新 inumber
        let mut next_inumber: u32 = 1;
        // 数据镜像内下一个空槽
        let mut next_slot: usize = 0;

        for (inumber, inode) in
            InodeCursor::new(&self.cache, &self.block_device, self.ninodes, 1)
        {
            if !self.inode_bitmap.test(inumber as usize) {
                continue;
            }

            let mut moved = inode;
            let (direct_share, indirect_share) = DiskInode::split_data_block(inode.size);

            for ptr in moved.direct.iter_mut().take(direct_share) {
                self.copy_block(*ptr, &mut data[next_slot]);
                *ptr = data_start + next_slot as u32;
                next_slot += 1;
            }

            if indirect_share > 0 {
                // 原间接块只读一次，表项在副本里就地改写
                let mut entries = self
                    .cache
                    .get(inode.indirect as usize, self.block_device.clone())
                    .lock()
                    .map(0, |entries: &IndirectBlock| *entries);
                for entry in entries.iter_mut().take(indirect_share) {
                    self.copy_block(*entry, &mut data[next_slot]);
                    *entry = data_start + next_slot as u32;
                    next_slot += 1;
                }
                // 改写完的间接块本身也搬进数据镜像
                for (k, entry) in entries.iter().enumerate() {
                    data[next_slot][k * 4..(k + 1) * 4].copy_from_slice(&entry.to_ne_bytes());
                }
                moved.indirect = data_start + next_slot as u32;
                next_slot += 1;
            }

            table[next_inumber as usize] = moved;
            next_inumber += 1;
        }

        // inode 位图重建：保留槽位与压缩后的前缀占用，其余空闲
        self.inode_bitmap = Bitmap::new(self.ninodes as usize);
        for inumber in 0..next_inumber as usize {
            self.inode_bitmap.set(inumber, true);
        }

        // inode 表镜像落盘
        for block_index in 0..ninodeblocks {
            self.cache
                .get(1 + block_index, self.block_device.clone())
                .lock()
                .map_mut(0, |block: &mut InodeBlock| {
                    for (slot, inode) in block.iter_mut().enumerate() {
                        *inode = table[block_index * INODES_PER_BLOCK + slot];
                    }
                });
        }

        // 块位图重建：元数据加上数据区的已用前缀
        self.block_bitmap = Bitmap::new(self.nblocks as usize);
        for block_id in 0..=ninodeblocks {
            self.block_bitmap.set(block_id, true);
        }
        for slot in 0..next_slot {
            self.block_bitmap.set(data_start as usize + slot, true);
        }

        // 数据区镜像落盘
        for (slot, block) in data.iter().enumerate() {
            self.cache
                .get(data_start as usize + slot, self.block_device.clone())
                .lock()
                .map_mut(0, |data_block: &mut DataBlock| *data_block = *block);
        }

        self.cache.sync_all();
        log::info!(
            "defragmented: {} files packed into {} data blocks",
            next_inumber - 1,
            next_slot
        );
        Ok(())
    }

    /// 读出卷的超级块概要与每个有效 inode 的寻址情况。
    /// 不要求挂载，直接取自设备。
    pub fn inspect(block_device: &Arc<dyn BlockDevice>) -> VolumeReport {
        let cache = BlockCacheManager::new();
        let (magic_valid, nblocks, ninodeblocks, ninodes) =
            cache
                .get(0, block_device.clone())
                .lock()
                .map(0, |super_block: &SuperBlock| {
                    (
                        super_block.is_valid(),
                        super_block.nblocks,
                        super_block.ninodeblocks,
                        super_block.ninodes,
                    )
                });

        let mut report = VolumeReport {
            magic_valid,
            nblocks,
            ninodeblocks,
            ninodes,
            inodes: Vec::new(),
        };
        if !magic_valid {
            // 布局参数不可信，不再去碰 inode 表
            return report;
        }

        for (inumber, inode) in InodeCursor::new(&cache, block_device, ninodes, 1) {
            if !inode.is_valid() {
                continue;
            }

            let (direct_share, indirect_share) = DiskInode::split_data_block(inode.size);
            let mut indirect = None;
            let mut indirect_blocks = Vec::new();
            if indirect_share > 0 {
                indirect = Some(inode.indirect);
                indirect_blocks = cache
                    .get(inode.indirect as usize, block_device.clone())
                    .lock()
                    .map(0, |entries: &IndirectBlock| {
                        entries[..indirect_share.min(INDIRECT_COUNT)].to_vec()
                    });
            }

            report.inodes.push(InodeReport {
                inumber,
                size: inode.size,
                direct: inode.direct[..direct_share].to_vec(),
                indirect,
                indirect_blocks,
                exceeds_capacity: DiskInode::count_data_block(inode.size) > INDIRECT_CAP,
            });
        }

        report
    }

    /// 从 `start` 槽位起遍历 inode 表
    pub fn inodes(&self, start: u32) -> InodeCursor<'_> {
        InodeCursor::new(&self.cache, &self.block_device, self.ninodes, start)
    }

    /// 遍历一条记录当前寻址的全部数据块
    pub fn data_blocks(&self, inode: DiskInode) -> DataCursor<'_> {
        DataCursor::new(&self.cache, &self.block_device, inode)
    }

    /// 同上，记录由 inumber 换取
    pub fn data_blocks_of(&self, inumber: u32) -> Result<DataCursor<'_>> {
        Ok(self.data_blocks(self.checked(inumber)?))
    }

    #[inline]
    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }

    #[inline]
    pub fn ninodes(&self) -> u32 {
        self.ninodes
    }
}

impl SimpleFileSystem {
    /// 读取 inumber 指称的记录，校验范围与有效性
    fn checked(&self, inumber: u32) -> Result<DiskInode> {
        if inumber == 0 || inumber >= self.ninodes {
            return Err(FsError::BadInumber(inumber));
        }
        let inode = self.on_disk(inumber, |inode: &DiskInode| *inode);
        if inode.is_valid() {
            Ok(inode)
        } else {
            Err(FsError::InvalidInode(inumber))
        }
    }

    /// 通过ID获取 inode 在磁盘上的位置：**块ID**以及**块内偏移**
    fn disk_inode_pos(&self, inumber: u32) -> (usize, usize) {
        (
            1 + inumber as usize / INODES_PER_BLOCK,
            inumber as usize % INODES_PER_BLOCK * mem::size_of::<DiskInode>(),
        )
    }

    /// 读取 inode 对磁盘的映射并处理
    fn on_disk<V>(&self, inumber: u32, f: impl FnOnce(&DiskInode) -> V) -> V {
        let (block_id, offset) = self.disk_inode_pos(inumber);
        self.cache
            .get(block_id, self.block_device.clone())
            .lock()
            .map(offset, f)
    }

    /// 以某种方式修改 inode 对磁盘的映射
    fn on_disk_mut<V>(&self, inumber: u32, f: impl FnOnce(&mut DiskInode) -> V) -> V {
        let (block_id, offset) = self.disk_inode_pos(inumber);
        self.cache
            .get(block_id, self.block_device.clone())
            .lock()
            .map_mut(offset, f)
    }

    /// 数据块分配：位图首次适应，最低块号胜出
    fn alloc_block(&mut self) -> Option<u32> {
        self.block_bitmap.alloc().map(|block_id| block_id as u32)
    }

    fn copy_block(&self, block_id: u32, dst: &mut DataBlock) {
        self.cache
            .get(block_id as usize, self.block_device.clone())
            .lock()
            .map(0, |src: &DataBlock| *dst = *src);
    }
}
