//! # 磁盘数据结构层
//!
//! 本层只有inode记录与间接索引块两种磁盘结构；
//! 超级块、目录项、位图等格式均归上游各层。

mod inode;
pub use inode::{IndexBlock, InodeKind, InodeRecord};
pub(crate) use inode::{DIRECT_COUNT, DOUBLE_CAP, INDEX_COUNT, SINGLE_CAP};
pub use inode::{MAX_LENGTH, MAX_SECTORS};
