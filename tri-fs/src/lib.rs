//! # 三级索引存储层
//!
//! 定长块设备上的持久文件存储，自下而上：
//! 扇区缓存（时钟置换、写回）、
//! 三级索引的extent映射（直接/一级间接/二级间接）、
//! 引用计数的inode句柄表。
//!
//! 目录编码、路径解析与空闲位图的磁盘格式均不在本层，
//! 位图分配器只通过 [`FreeMap`] 契约使用。

#![no_std]

extern crate alloc;

// 索引节点层：打开、读写、删除等句柄操作
mod vfs;
pub use vfs::{Inode, Stat, StatKind, TriFs};

// extent映射层：字节偏移到扇区的翻译与文件伸缩
mod extent;

// 磁盘数据结构层
mod layout;
pub use layout::{IndexBlock, InodeKind, InodeRecord, MAX_LENGTH, MAX_SECTORS};

// 扇区缓存层
mod cache;
pub use cache::SectorCache;

// 空闲扇区分配契约
mod free_map;
pub use free_map::FreeMap;

mod error;
pub use error::Error;

pub const MAGIC: u32 = 0x54524653;
pub const SECTOR_SIZE: usize = 512;

/// 扇区号
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Add,
    derive_more::From,
    derive_more::Into,
)]
#[repr(transparent)]
pub struct SectorId(usize);

impl SectorId {
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for SectorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

type SectorBuf = [u8; SECTOR_SIZE];
