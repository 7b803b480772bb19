//! 扫描元数据与单鱼元数据盖章.
//!
//! 元数据有两个来源: 扫描仪配置文件 (`*.xtekct`) 提供体素尺寸,
//! mastersheet 表格按鱼编号提供年龄、基因型等描述信息.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

mod mastersheet;
mod stamp;
mod xtekct;

pub use mastersheet::{Mastersheet, MastersheetRow};
pub use stamp::{stamp, FishMetadata};
pub use xtekct::{find_xtekct, parse_voxel_sizes, read_voxel_sizes};

/// 元数据错误.
#[derive(Debug)]
pub enum MetaError {
    /// 扫描仪配置文件不存在或无法读取. 携带被查找的路径.
    MissingConfigFile(PathBuf),

    /// 扫描仪配置文件缺少体素尺寸, 或其值不是数字.
    MalformedConfig(String),

    /// mastersheet 行的编号与待盖章的鱼编号不一致.
    RowMismatch {
        /// 待盖章的鱼编号.
        expected: u32,

        /// 行中的编号.
        found: u32,
    },

    /// mastersheet 解析错误.
    Csv(csv::Error),

    /// 其他底层 I/O 错误.
    Io(std::io::Error),
}

impl fmt::Display for MetaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaError::MissingConfigFile(p) => write!(f, "找不到扫描仪配置文件: {}", p.display()),
            MetaError::MalformedConfig(why) => write!(f, "扫描仪配置文件格式错误: {why}"),
            MetaError::RowMismatch { expected, found } => {
                write!(f, "mastersheet 行编号 {found} 与鱼编号 {expected} 不一致")
            }
            MetaError::Csv(e) => write!(f, "mastersheet 解析错误: {e}"),
            MetaError::Io(e) => write!(f, "I/O 错误: {e}"),
        }
    }
}

impl std::error::Error for MetaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MetaError::Csv(e) => Some(e),
            MetaError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<csv::Error> for MetaError {
    fn from(e: csv::Error) -> Self {
        MetaError::Csv(e)
    }
}

impl From<std::io::Error> for MetaError {
    fn from(e: std::io::Error) -> Self {
        MetaError::Io(e)
    }
}

/// 一次原始扫描的元数据, 随扫描堆栈一一对应, 并传递给由它裁剪出的每条鱼.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    /// 原始扫描目录.
    pub path: PathBuf,

    /// 堆栈相对于原始分辨率的缩放百分比.
    pub scale: u32,

    /// 宽方向体素尺寸.
    pub x_voxel_size: f64,

    /// 高方向体素尺寸.
    pub y_voxel_size: f64,

    /// 切片方向体素尺寸.
    pub z_voxel_size: f64,
}
