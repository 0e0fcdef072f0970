//! inode记录恰好占据一个扇区，编号空间分三层：
//! - 直接索引：记录内122个扇区号
//! - 一级间接：1个索引块，128个扇区号
//! - 二级间接：1个顶层索引块，其128个子项各指向一个索引块
//!
//! 一级与二级的索引扇区在创建时即预留，与长度无关。

use crate::SectorId;
use crate::MAGIC;
use crate::SECTOR_SIZE;

/// 索引块的编号容量
pub(crate) const INDEX_COUNT: usize = SECTOR_SIZE / 4;
/// 间接索引块：一个扇区视作128个扇区号
pub type IndexBlock = [u32; INDEX_COUNT];

/// 直接索引的编号数量
pub(crate) const DIRECT_COUNT: usize = 122;
/// 用上一级间接时的编号容量
pub(crate) const SINGLE_CAP: usize = DIRECT_COUNT + INDEX_COUNT;
/// 用上二级间接时的编号容量
pub(crate) const DOUBLE_CAP: usize = SINGLE_CAP + INDEX_COUNT * INDEX_COUNT;

/// 单文件最大扇区数：122 + 128 + 128×128
pub const MAX_SECTORS: usize = DOUBLE_CAP;
/// 单文件最大字节长度
pub const MAX_LENGTH: u32 = (MAX_SECTORS * SECTOR_SIZE) as u32;

/// 磁盘上的inode记录
// 不用usize是为了严控布局
#[repr(C)]
#[derive(Clone, Copy)]
pub struct InodeRecord {
    magic: u32,
    /// 文件字节长度
    pub length: u32,
    /// 类型
    pub kind: InodeKind,
    /// 父目录inode所在扇区
    parent: u32,
    /// 直接索引，存储容量：DIRECT_COUNT * SECTOR_SIZE 字节
    pub(crate) direct: [u32; DIRECT_COUNT],
    /// 指向一级间接索引块
    pub(crate) indirect1: u32,
    /// 指向二级间接的顶层索引块
    pub(crate) indirect2: u32,
}

#[repr(u32)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    #[default]
    File = 0,
    Directory = 1,
}

impl InodeRecord {
    pub fn new(kind: InodeKind, parent: SectorId) -> Self {
        Self {
            magic: MAGIC,
            length: 0,
            kind,
            parent: parent.raw() as u32,
            direct: [0; DIRECT_COUNT],
            indirect1: 0,
            indirect2: 0,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    #[inline]
    pub fn parent(&self) -> SectorId {
        SectorId::new(self.parent as usize)
    }

    /// 容纳指定字节数需要的**数据**扇区数
    #[inline]
    pub fn count_sectors(length: u32) -> usize {
        (length as usize).div_ceil(SECTOR_SIZE)
    }
}
