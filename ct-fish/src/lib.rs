#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供斑马鱼 uCT 扫描 (TIFF 堆栈) 的结构化读取、样品管检测、
//! 多鱼扫描的单鱼裁剪, 以及裁剪结果、元数据和器官标签的持久化.
//!
//! 该 crate 仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 所有路径均由 [`dataset::DatasetLayout`] 显式注入, 库内部不存在任何硬编码的数据集路径.
//! 2. 检测、缩放、裁剪均为纯函数, 不依赖文件系统, 可以无界面运行.
//!
//! # 开发计划
//!
//! ### 扫描堆栈与切片视图 ✅
//!
//! `(z, h, w, c)` 布局的 `u8`/`u16` 灰度或 RGB 堆栈.
//!
//! 实现位于 `ct-fish/src/data`.
//!
//! ### 灰度阈值化 (Otsu + 强度窗口) ✅
//!
//! 实现位于 `ct-fish/src/detect/threshold.rs`.
//!
//! ### 样品管 Hough 圆检测 ✅
//!
//! 梯度法 Hough 变换的纯 Rust 实现: 边缘像素沿梯度方向投票,
//! 在累加器中选取局部极大值作为圆心, 再用边缘距离直方图估计半径.
//!
//! 实现位于 `ct-fish/src/detect/hough.rs`.
//!
//! ### 尺度映射与越界安全的裁剪 ✅
//!
//! 实现位于 `ct-fish/src/crop`.
//!
//! ### 元数据盖章 (mastersheet + xtekct) ✅
//!
//! 实现位于 `ct-fish/src/meta`.
//!
//! ### 数据集读写 ✅
//!
//! 原始扫描、清洗后的单鱼目录、`crop_data.json`、npz 标签归档.
//!
//! 实现位于 `ct-fish/src/dataset`.
//!
//! ### 裁剪流水线 ✅
//!
//! 单扫描失败互相隔离的批处理.
//!
//! 实现位于 `ct-fish/src/pipeline`.
//!
//! ### 交互式对齐 / 查看器 ⌛️
//!
//! 核心库只定义 [`pipeline::Reviewer`] 能力接口, 具体界面由上层提供.

/// 二维索引 (高, 宽).
pub type Idx2d = (usize, usize);

/// 三维索引 (z, 高, 宽).
pub type Idx3d = (usize, usize, usize);

pub mod consts;

/// 扫描堆栈基础数据结构.
mod data;

pub use data::{
    Channels, ImgWriteRaw, ImgWriteVis, IntensityWindow, OwnedStackSlice, Sample, ScanStack,
    StackSlice,
};

pub mod crop;
pub mod dataset;
pub mod detect;
pub mod meta;
pub mod pipeline;
pub mod prelude;

#[cfg(test)]
mod test_utils;
