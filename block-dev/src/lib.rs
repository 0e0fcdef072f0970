//! # 块设备接口层
//!
//! [`BlockDevice`] 是对同步读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 设备I/O失败在本层视为不可恢复：驱动直接panic，
//! 上层不重试、不降级。

#![no_std]

use core::any::Any;

/// 块设备驱动特质，一次读写恰好一个扇区
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    fn write_block(&self, block_id: usize, buf: &[u8]);
}
