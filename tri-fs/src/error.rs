//! 软错误一律以显式结果返回；
//! 设备I/O失败视为致命，由块设备驱动直接中止。

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 分配器空间耗尽；中途已分配的扇区不回滚
    NoSpace,
    /// 目标长度超出三级索引的最大可表示范围
    TooLarge,
    /// `extend`严格单调，不接受收缩
    ShrinkForbidden,
}
