use crate::layout::INODES_PER_BLOCK;
use crate::MAGIC;

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 记录 inode 表与数据区的规模
///
/// 只在格式化时写入一次，此后除重新格式化外只读。
#[derive(Debug)]
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    /// 卷占据的总块数
    pub nblocks: u32,
    /// inode 表占据的块数
    pub ninodeblocks: u32,
    /// inode 表的槽位总数
    pub ninodes: u32,
}

impl SuperBlock {
    #[inline]
    pub fn init(&mut self, nblocks: u32, ninodeblocks: u32, ninodes: u32) {
        *self = Self {
            magic: MAGIC,
            nblocks,
            ninodeblocks,
            ninodes,
        };
    }

    /// 魔数正确，且槽位数与表块数吻合
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC && self.ninodes == self.ninodeblocks * INODES_PER_BLOCK as u32
    }
}
