//! 原始扫描的发现与读取.
//!
//! 一个原始扫描目录对应一次扫描, 其中可能同时放着多条鱼 (每根样品管一条).
//! 目录名中以 `_` 分隔的数字给出这些鱼的编号.

use super::{file_name_lossy, has_extension, sorted_entries, DatasetError};
use crate::consts::{RAW_SLICE_EXT, VENDOR_PREFIX};
use crate::meta::{find_xtekct, read_voxel_sizes, ScanMetadata};
use crate::{Channels, OwnedStackSlice, Sample, ScanStack};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// 从原始扫描目录名解析其覆盖的鱼编号.
///
/// 以 `_` 分隔, 只保留纯数字的字段. 恰好两个数字 `a`, `b` (且 `a <= b`) 表示闭区间
/// `a..=b`, 其余情况按出现顺序列出.
///
/// ```
/// use ct_fish::dataset::raw::parse_fish_numbers;
///
/// assert_eq!(parse_fish_numbers("EK_040_043"), vec![40, 41, 42, 43]);
/// assert_eq!(parse_fish_numbers("EK_5_9_12"), vec![5, 9, 12]);
/// assert!(parse_fish_numbers("phantom").is_empty());
/// ```
pub fn parse_fish_numbers(name: &str) -> Vec<u32> {
    let v: Vec<u32> = name
        .split('_')
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|s| s.parse().ok())
        .collect();
    match v.as_slice() {
        &[a, b] if a <= b => (a..=b).collect(),
        _ => v,
    }
}

/// 一个原始扫描目录.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawScanDir {
    /// 目录路径.
    pub path: PathBuf,

    /// 目录覆盖的鱼编号, 顺序见 [`parse_fish_numbers`].
    pub fish: Vec<u32>,
}

impl RawScanDir {
    /// 由目录路径创建, 鱼编号从目录名解析.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_owned();
        let fish = parse_fish_numbers(&file_name_lossy(&path));
        Self { path, fish }
    }

    /// 鱼编号范围 `(首, 末)`. 目录名中没有编号时返回 `None`.
    pub fn fish_range(&self) -> Option<(u32, u32)> {
        Some((*self.fish.first()?, *self.fish.last()?))
    }
}

/// 按自然顺序列出 `raw` 下所有原始扫描目录. 隐藏目录和名字中没有编号的目录被跳过.
pub fn list_raw_scans<P: AsRef<Path>>(raw: P) -> Result<Vec<RawScanDir>, DatasetError> {
    let dirs = sorted_entries(raw.as_ref(), |p| p.is_dir())?;
    let mut ans = Vec::with_capacity(dirs.len());
    for d in dirs {
        let scan = RawScanDir::new(&d);
        if scan.fish.is_empty() {
            log::warn!("跳过没有鱼编号的目录 {}", d.display());
            continue;
        }
        ans.push(scan);
    }
    Ok(ans)
}

/// 读取选项.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    /// 只读取排序后的这些切片. 越界部分会被截掉.
    pub range: Option<Range<usize>>,

    /// 读取后缩放到的百分比. `100` 表示不缩放.
    pub scale: u32,

    /// 解码后转换到的通道布局.
    pub channels: Channels,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            range: None,
            scale: 100,
            channels: Channels::Gray,
        }
    }
}

impl ReadOptions {
    /// 以给定百分比读取全部切片.
    pub fn with_scale(scale: u32) -> Self {
        Self {
            scale,
            ..Self::default()
        }
    }
}

/// 读入内存的原始扫描.
#[derive(Debug, Clone, PartialEq)]
pub struct RawScan<T: Sample> {
    /// 扫描堆栈.
    pub stack: ScanStack<T>,

    /// 扫描元数据. `scale` 为读取时使用的缩放百分比.
    pub meta: ScanMetadata,
}

/// 存放切片的目录: 第一个名字以厂商前缀开头的子目录, 否则为扫描目录本身.
pub fn slice_dir<P: AsRef<Path>>(scan_dir: P) -> Result<PathBuf, DatasetError> {
    let scan_dir = scan_dir.as_ref();
    let sub = sorted_entries(scan_dir, |p| {
        p.is_dir() && file_name_lossy(p).starts_with(VENDOR_PREFIX)
    })?;
    Ok(sub
        .into_iter()
        .next()
        .unwrap_or_else(|| scan_dir.to_owned()))
}

/// 原始扫描的切片文件, 取自 [`slice_dir`], 按文件名自然排序. 返回切片目录和文件列表.
pub fn slice_files<P: AsRef<Path>>(scan_dir: P) -> Result<(PathBuf, Vec<PathBuf>), DatasetError> {
    let dir = slice_dir(scan_dir)?;
    let files = sorted_entries(&dir, |p| p.is_file() && has_extension(p, RAW_SLICE_EXT))?;
    Ok((dir, files))
}

/// 读取扫描目录中唯一的扫描仪配置文件, 得到尚未读入堆栈的扫描元数据.
pub fn scan_metadata<P: AsRef<Path>>(scan_dir: P, scale: u32) -> Result<ScanMetadata, DatasetError> {
    let scan_dir = scan_dir.as_ref();
    let [x, y, z] = read_voxel_sizes(find_xtekct(scan_dir)?)?;
    Ok(ScanMetadata {
        path: scan_dir.to_owned(),
        scale,
        x_voxel_size: x,
        y_voxel_size: y,
        z_voxel_size: z,
    })
}

/// 截取 `range` 与 `0..len` 的交集.
pub(crate) fn clamp_range(range: Option<&Range<usize>>, len: usize) -> Range<usize> {
    match range {
        None => 0..len,
        Some(r) => r.start.min(len)..r.end.min(len).max(r.start.min(len)),
    }
}

/// 按顺序解码 `files` 中的切片, 并缩放到 `scale` 百分比.
pub(crate) fn decode_slices<T: Sample>(
    files: &[PathBuf],
    channels: Channels,
    scale: u32,
) -> Result<Vec<OwnedStackSlice<T>>, DatasetError> {
    let decode = |p: &PathBuf| -> Result<OwnedStackSlice<T>, DatasetError> {
        let s = OwnedStackSlice::from_dynamic(image::open(p)?, channels);
        if scale == 100 {
            return Ok(s);
        }
        s.as_immut()
            .resized(scale)
            .ok_or_else(|| DatasetError::SliceShapeMismatch(p.clone()))
    };

    #[cfg(feature = "rayon")]
    let slices = {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
        files.par_iter().map(decode).collect::<Result<Vec<_>, _>>()?
    };
    #[cfg(not(feature = "rayon"))]
    let slices = files.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
    Ok(slices)
}

/// 读取一个原始扫描目录.
///
/// # 注意
///
/// 1. 切片取自 [`slice_dir`], 只读取扩展名为 `tif` 的文件, 按文件名自然排序.
/// 2. 体素尺寸取自扫描目录下唯一的 `*.xtekct` 文件, 缺失时返回
///    [`crate::meta::MetaError::MissingConfigFile`].
/// 3. 读取结果全为 0 时返回 [`DatasetError::EmptyScan`].
pub fn read_raw<T: Sample, P: AsRef<Path>>(
    scan_dir: P,
    options: &ReadOptions,
) -> Result<RawScan<T>, DatasetError> {
    let scan_dir = scan_dir.as_ref();
    let (dir, files) = slice_files(scan_dir)?;
    let files = &files[clamp_range(options.range.as_ref(), files.len())];
    if files.is_empty() {
        return Err(DatasetError::NoImages(dir));
    }
    log::info!("读取原始扫描 {} ({} 层)", dir.display(), files.len());

    let meta = scan_metadata(scan_dir, options.scale)?;
    let slices = decode_slices::<T>(files, options.channels, options.scale)?;
    let stack =
        ScanStack::from_slices(&slices).ok_or_else(|| DatasetError::SliceShapeMismatch(dir))?;
    if stack.count_nonzero() == 0 {
        return Err(DatasetError::EmptyScan(scan_dir.to_owned()));
    }
    Ok(RawScan { stack, meta })
}
