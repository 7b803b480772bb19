//! 流水线错误.

use crate::crop::CropError;
use crate::dataset::DatasetError;
use crate::detect::DetectError;
use crate::meta::MetaError;
use std::fmt;
use std::path::PathBuf;

/// 处理一次扫描时所在的阶段.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    /// 读取原始扫描或裁剪决策.
    Reading,

    /// 检测切片的二值化.
    Thresholding,

    /// 样品管检测.
    Detection,

    /// 人工确认与数量核对.
    Review,

    /// 坐标换算与裁剪.
    Cropping,

    /// 元数据盖章.
    Stamping,

    /// 写入单鱼目录和裁剪决策.
    Writing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Reading => "读取",
            Stage::Thresholding => "二值化",
            Stage::Detection => "检测",
            Stage::Review => "确认",
            Stage::Cropping => "裁剪",
            Stage::Stamping => "盖章",
            Stage::Writing => "写入",
        };
        f.write_str(s)
    }
}

/// 失败原因.
#[derive(Debug)]
pub enum FailureKind {
    /// 二值化或检测失败.
    Detect(DetectError),

    /// 裁剪失败.
    Crop(CropError),

    /// 元数据失败.
    Meta(MetaError),

    /// 数据集读写失败.
    Dataset(DatasetError),

    /// 确认后的圆个数与扫描覆盖的鱼条数不符.
    CountMismatch {
        /// 扫描覆盖的鱼条数.
        expected: usize,

        /// 圆的个数.
        found: usize,
    },

    /// 人工确认时被拒绝, 附带原因.
    Rejected(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Detect(e) => write!(f, "{e}"),
            FailureKind::Crop(e) => write!(f, "{e}"),
            FailureKind::Meta(e) => write!(f, "{e}"),
            FailureKind::Dataset(e) => write!(f, "{e}"),
            FailureKind::CountMismatch { expected, found } => {
                write!(f, "应有 {expected} 条鱼, 实际得到 {found} 个圆")
            }
            FailureKind::Rejected(why) => write!(f, "被拒绝: {why}"),
        }
    }
}

macro_rules! impl_from_failure {
    ($($src: ty => $variant: ident),+ $(,)?) => {
        $(
            impl From<$src> for FailureKind {
                #[inline]
                fn from(e: $src) -> Self {
                    FailureKind::$variant(e)
                }
            }
        )+
    };
}

impl_from_failure!(
    DetectError => Detect,
    CropError => Crop,
    MetaError => Meta,
    DatasetError => Dataset,
);

/// 一次扫描处理失败: 哪个扫描, 哪条鱼 (若已知), 哪个阶段, 什么原因.
#[derive(Debug)]
pub struct PipelineError {
    /// 原始扫描目录.
    pub scan: PathBuf,

    /// 出错的鱼编号. 整个扫描层面的错误为 `None`.
    pub fish: Option<u32>,

    /// 出错阶段.
    pub stage: Stage,

    /// 失败原因.
    pub kind: FailureKind,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "扫描 {} ", self.scan.display())?;
        if let Some(n) = self.fish {
            write!(f, "(鱼 {n}) ")?;
        }
        write!(f, "在{}阶段失败: {}", self.stage, self.kind)
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            FailureKind::Detect(e) => Some(e),
            FailureKind::Crop(e) => Some(e),
            FailureKind::Meta(e) => Some(e),
            FailureKind::Dataset(e) => Some(e),
            _ => None,
        }
    }
}
