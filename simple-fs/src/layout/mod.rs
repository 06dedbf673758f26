//! # 磁盘数据结构层
//!
//! 卷的布局（块号从小到大）：
//! 超级块 | inode 表 | 数据区
//!
//! 空闲空间位图不在其中：它只存在于内存，由挂载过程重建。

mod super_block;
pub use super_block::SuperBlock;

mod inode;
pub use inode::{
    DiskInode, IndirectBlock, InodeBlock, DIRECT_CAP, DIRECT_COUNT, INDIRECT_CAP, INDIRECT_COUNT,
    INODES_PER_BLOCK,
};
