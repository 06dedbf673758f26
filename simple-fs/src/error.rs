use core::fmt;

/// 各操作的可恢复错误。
///
/// 资源耗尽与前置条件不满足都会落到这里，交由调用方自行处理；
/// 只有内存位图本身分配失败才会中止进程，那条路走的是全局分配器。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 魔数不符，或超级块字段自相矛盾
    InvalidSuperblock,
    /// inumber 不在 `[1, ninodes)` 之内
    BadInumber(u32),
    /// 槽位上没有有效的 inode
    InvalidInode(u32),
    /// 写偏移越过了文件末尾，文件不允许出现空洞
    WriteGap { offset: usize, size: usize },
    /// inode 表没有空槽
    NoFreeInodes,
}

pub type Result<T> = core::result::Result<T, FsError>;

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSuperblock => write!(f, "not a valid volume"),
            Self::BadInumber(inumber) => write!(f, "inumber {inumber} out of range"),
            Self::InvalidInode(inumber) => write!(f, "inode {inumber} is not created"),
            Self::WriteGap { offset, size } => {
                write!(f, "write at offset {offset} would leave a gap (size is {size})")
            }
            Self::NoFreeInodes => write!(f, "no free slot in the inode table"),
        }
    }
}

impl core::error::Error for FsError {}
