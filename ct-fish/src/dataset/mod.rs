//! 数据集操作.
//!
//! 所有路径都由 [`DatasetLayout`] 给出, 本模块不假设任何固定的数据集位置.

use crate::consts::{fish_dir_name, CLEAN_TIF_DIR, METADATA_FILE};
use crate::meta::MetaError;
use itertools::Itertools;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod clean;
pub mod crop_data;
pub mod projections;
pub mod raw;

mod label_archive;

pub use label_archive::{
    read_label, read_scan, read_template, write_label, write_scan, LabelArchive, OpenArchiveError,
};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 文件名的自然排序片段: 连续数字按数值比较, 其余按字符串比较.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum NameChunk {
    Number(u64),
    Text(String),
}

fn natural_key(name: &str) -> Vec<NameChunk> {
    name.chars()
        .group_by(|c| c.is_ascii_digit())
        .into_iter()
        .map(|(digit, group)| {
            let s: String = group.collect();
            match (digit, s.parse()) {
                (true, Ok(v)) => NameChunk::Number(v),
                _ => NameChunk::Text(s),
            }
        })
        .collect()
}

/// 按自然顺序比较两个文件名, 例如 `EK_9 < EK_10`.
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b)).then_with(|| a.cmp(b))
}

/// 列出目录 `dir` 下满足 `keep` 的非隐藏条目, 按文件名自然排序.
pub(crate) fn sorted_entries<F>(dir: &Path, keep: F) -> std::io::Result<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    let mut v = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|s| s.to_str())
            .map_or(true, |s| s.starts_with('.'));
        if !hidden && keep(&path) {
            v.push(path);
        }
    }
    v.sort_by(|a, b| natural_cmp(&file_name_lossy(a), &file_name_lossy(b)));
    Ok(v)
}

/// 路径 `p` 的最后一项, 不能转换为 UTF-8 的部分会被替换.
pub(crate) fn file_name_lossy(p: &Path) -> String {
    p.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 路径 `p` 的扩展名是否为 `ext` (不区分大小写)?
pub(crate) fn has_extension(p: &Path, ext: &str) -> bool {
    p.extension()
        .and_then(|s| s.to_str())
        .map_or(false, |s| s.eq_ignore_ascii_case(ext))
}

/// 数据集读写错误.
#[derive(Debug)]
pub enum DatasetError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// 图像编解码错误.
    Image(image::ImageError),

    /// JSON 读写错误.
    Json(serde_json::Error),

    /// 读取 npz 归档错误.
    ReadNpz(ndarray_npy::ReadNpzError),

    /// 写入 npz 归档错误.
    WriteNpz(ndarray_npy::WriteNpzError),

    /// 目录中没有可读取的切片.
    NoImages(PathBuf),

    /// 读取的扫描全为 0.
    EmptyScan(PathBuf),

    /// 切片之间形状或通道不一致, 或切片范围越界.
    SliceShapeMismatch(PathBuf),

    /// 未知的器官名称.
    UnknownOrgan(String),

    /// 归档中已经存在该键, 且未要求覆盖.
    KeyExists(String),

    /// 归档或 JSON 文件中找不到该键.
    KeyNotFound(String),

    /// 记录内容不合法, 例如裁剪决策中的鱼编号范围无法解析.
    InvalidRecord(String),

    /// 元数据错误.
    Meta(MetaError),
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetError::Io(e) => write!(f, "I/O 错误: {e}"),
            DatasetError::Image(e) => write!(f, "图像编解码错误: {e}"),
            DatasetError::Json(e) => write!(f, "JSON 错误: {e}"),
            DatasetError::ReadNpz(e) => write!(f, "读取 npz 错误: {e}"),
            DatasetError::WriteNpz(e) => write!(f, "写入 npz 错误: {e}"),
            DatasetError::NoImages(p) => write!(f, "目录 {} 中没有切片", p.display()),
            DatasetError::EmptyScan(p) => write!(f, "扫描 {} 全为 0", p.display()),
            DatasetError::SliceShapeMismatch(p) => {
                write!(f, "{} 中的切片形状不一致或范围越界", p.display())
            }
            DatasetError::UnknownOrgan(o) => write!(f, "未知器官 `{o}`"),
            DatasetError::KeyExists(k) => write!(f, "键 `{k}` 已存在"),
            DatasetError::KeyNotFound(k) => write!(f, "找不到键 `{k}`"),
            DatasetError::InvalidRecord(m) => write!(f, "记录不合法: {m}"),
            DatasetError::Meta(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DatasetError::Io(e) => Some(e),
            DatasetError::Image(e) => Some(e),
            DatasetError::Json(e) => Some(e),
            DatasetError::ReadNpz(e) => Some(e),
            DatasetError::WriteNpz(e) => Some(e),
            DatasetError::Meta(e) => Some(e),
            _ => None,
        }
    }
}

macro_rules! impl_from_error {
    ($($src: ty => $variant: ident),+ $(,)?) => {
        $(
            impl From<$src> for DatasetError {
                #[inline]
                fn from(e: $src) -> Self {
                    DatasetError::$variant(e)
                }
            }
        )+
    };
}

impl_from_error!(
    std::io::Error => Io,
    image::ImageError => Image,
    serde_json::Error => Json,
    ndarray_npy::ReadNpzError => ReadNpz,
    ndarray_npy::WriteNpzError => WriteNpz,
    MetaError => Meta,
);

/// 已知的器官标签.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Organ {
    /// 耳石.
    Otoliths,
}

impl Organ {
    /// 器官名称, 同时用作归档文件名.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Organ::Otoliths => "Otoliths",
        }
    }
}

impl fmt::Display for Organ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Organ {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Otoliths" => Ok(Organ::Otoliths),
            other => Err(DatasetError::UnknownOrgan(other.to_string())),
        }
    }
}

/// 最大值投影的方向.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ProjectionAxis {
    /// 沿 z 轴 (轴向).
    Z,

    /// 沿高方向.
    Y,

    /// 沿宽方向.
    X,
}

impl ProjectionAxis {
    /// 按 [`crate::ScanStack::max_projections`] 的返回顺序排列.
    pub const ALL: [ProjectionAxis; 3] = [ProjectionAxis::Z, ProjectionAxis::Y, ProjectionAxis::X];

    /// 目录名和文件名前缀.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            ProjectionAxis::Z => "z",
            ProjectionAxis::Y => "y",
            ProjectionAxis::X => "x",
        }
    }
}

/// 数据集目录布局. 由调用者注入, 每一项都可以单独覆盖.
///
/// [`DatasetLayout::new`] 给出的默认布局为:
///
/// ```text
/// {root}/low_res/                          原始扫描, 每个扫描一个目录
/// {root}/low_res_clean/NNN/                单鱼目录
/// {root}/uCT_mastersheet.csv               mastersheet
/// {root}/Metadata/angles.json              人工对齐角度
/// {root}/Labels/Organs/{organ}/{organ}.npz 器官标签
/// {root}/Labels/Templates/{organ}.npz      模板标签
/// {root}/Compressed/{dataset}.npz          压缩扫描
/// {root}/output/Crops/                     裁剪决策备份
/// {root}/projections/{z,y,x}/              最大值投影
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    /// 数据集根目录.
    pub root: PathBuf,

    /// 原始扫描目录.
    pub raw: PathBuf,

    /// 单鱼目录的父目录.
    pub clean: PathBuf,

    /// mastersheet 文件.
    pub mastersheet: PathBuf,

    /// 人工对齐角度文件.
    pub angles: PathBuf,

    /// 器官标签归档的父目录.
    pub labels: PathBuf,

    /// 模板标签归档目录.
    pub templates: PathBuf,

    /// 压缩扫描归档目录.
    pub compressed: PathBuf,

    /// 裁剪决策备份目录.
    pub crop_backup: PathBuf,

    /// 最大值投影目录.
    pub projections: PathBuf,
}

impl DatasetLayout {
    /// 以 `root` 为根目录的默认布局.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_owned();
        Self {
            raw: root.join("low_res"),
            clean: root.join("low_res_clean"),
            mastersheet: root.join("uCT_mastersheet.csv"),
            angles: root.join("Metadata").join("angles.json"),
            labels: root.join("Labels").join("Organs"),
            templates: root.join("Labels").join("Templates"),
            compressed: root.join("Compressed"),
            crop_backup: root.join("output").join("Crops"),
            projections: root.join("projections"),
            root,
        }
    }

    /// 以 `{用户主目录}/dataset/uCT` 为根目录的默认布局.
    pub fn from_home() -> Option<Self> {
        home_dataset_dir_with(["uCT"]).map(Self::new)
    }

    /// 单鱼目录, 如 `low_res_clean/077`.
    pub fn fish_dir(&self, n: u32) -> PathBuf {
        self.clean.join(fish_dir_name(n))
    }

    /// 单鱼切片目录.
    pub fn clean_tif_dir(&self, n: u32) -> PathBuf {
        self.fish_dir(n).join(CLEAN_TIF_DIR)
    }

    /// 单鱼元数据文件.
    pub fn metadata_path(&self, n: u32) -> PathBuf {
        self.fish_dir(n).join(METADATA_FILE)
    }

    /// 器官标签归档.
    pub fn label_path(&self, organ: Organ) -> PathBuf {
        self.labels
            .join(organ.name())
            .join(format!("{}.npz", organ.name()))
    }

    /// 模板标签归档.
    pub fn template_path(&self, organ: Organ) -> PathBuf {
        self.templates.join(format!("{}.npz", organ.name()))
    }

    /// 压缩扫描归档.
    pub fn compressed_path(&self, dataset: &str) -> PathBuf {
        self.compressed.join(format!("{dataset}.npz"))
    }

    /// 覆盖 `first..=last` 的裁剪决策备份文件.
    pub fn crop_backup_path(&self, first: u32, last: u32) -> PathBuf {
        self.crop_backup
            .join(format!("{first}-{last}_crop_data.json"))
    }

    /// 鱼 `n` 在 `axis` 方向上的最大值投影图片.
    pub fn projection_path(&self, axis: ProjectionAxis, n: u32) -> PathBuf {
        self.projections
            .join(axis.name())
            .join(format!("{}_{n}.png", axis.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::{natural_cmp, sorted_entries, DatasetLayout, Organ, ProjectionAxis};
    use std::cmp::Ordering;
    use std::path::Path;

    #[test]
    fn test_natural_order() {
        assert_eq!(natural_cmp("EK_9", "EK_10"), Ordering::Less);
        assert_eq!(natural_cmp("a2b", "a2b"), Ordering::Equal);
        assert_eq!(natural_cmp("040_043", "40_43"), Ordering::Less);
        let mut names = vec!["s10.tif", "s2.tif", "s1.tif"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, ["s1.tif", "s2.tif", "s10.tif"]);
    }

    #[test]
    fn test_sorted_entries_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_10", "b_9", ".DS_Store"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let v = sorted_entries(dir.path(), |_| true).unwrap();
        let names: Vec<_> = v.iter().map(|p| super::file_name_lossy(p)).collect();
        assert_eq!(names, ["b_9", "b_10"]);
    }

    #[test]
    fn test_layout_paths() {
        let layout = DatasetLayout::new("/data/uCT");
        assert_eq!(layout.fish_dir(7), Path::new("/data/uCT/low_res_clean/007"));
        assert_eq!(
            layout.clean_tif_dir(77),
            Path::new("/data/uCT/low_res_clean/077/reconstructed_tifs")
        );
        assert_eq!(
            layout.label_path(Organ::Otoliths),
            Path::new("/data/uCT/Labels/Organs/Otoliths/Otoliths.npz")
        );
        assert_eq!(
            layout.template_path(Organ::Otoliths),
            Path::new("/data/uCT/Labels/Templates/Otoliths.npz")
        );
        assert_eq!(
            layout.crop_backup_path(77, 78),
            Path::new("/data/uCT/output/Crops/77-78_crop_data.json")
        );
        assert_eq!(
            layout.projection_path(ProjectionAxis::Y, 40),
            Path::new("/data/uCT/projections/y/y_40.png")
        );
    }

    #[test]
    fn test_layout_override() {
        let mut layout = DatasetLayout::new("/data/uCT");
        layout.clean = "/fast/clean".into();
        assert_eq!(layout.metadata_path(1), Path::new("/fast/clean/001/metadata.json"));
    }

    #[test]
    fn test_organ_from_str() {
        assert_eq!("Otoliths".parse::<Organ>().unwrap(), Organ::Otoliths);
        assert!("Heart".parse::<Organ>().is_err());
    }
}
