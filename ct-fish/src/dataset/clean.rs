//! 单鱼目录的读写.
//!
//! 每条鱼一个目录 `NNN/`, 其中 `reconstructed_tifs/NNN_IIII.tiff` 为裁剪后的切片,
//! `metadata.json` 为 [`FishMetadata`].

use super::raw::{clamp_range, decode_slices};
use super::{file_name_lossy, has_extension, sorted_entries, DatasetError, DatasetLayout};
use crate::consts::{fish_dir_name, SLICE_NAME_WIDTH};
use crate::meta::FishMetadata;
use crate::{Channels, ImgWriteRaw, Sample, ScanStack};
use imageproc::geometric_transformations::Interpolation;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::marker::PhantomData;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// 切片文件名, 例如 `077_0012.tiff`.
fn slice_file_name(n: u32, i: usize) -> String {
    format!(
        "{}_{i:0width$}.tiff",
        fish_dir_name(n),
        width = SLICE_NAME_WIDTH
    )
}

fn write_json<P: AsRef<Path>, V: serde::Serialize>(path: P, v: &V) -> Result<(), DatasetError> {
    let text = serde_json::to_string_pretty(v)?;
    fs::write(path, text)?;
    Ok(())
}

/// 写入一条鱼的切片与元数据. 鱼编号取自 `meta.number`, 返回单鱼目录.
///
/// # 注意
///
/// 切片先写入同级的临时目录, 全部成功后才替换原有的切片目录,
/// 因此重写后目录中只有本次的切片. 元数据文件被覆盖.
pub fn write_clean<T: Sample>(
    layout: &DatasetLayout,
    stack: &ScanStack<T>,
    meta: &FishMetadata,
) -> Result<PathBuf, DatasetError> {
    let n = meta.number;
    let tif_dir = layout.clean_tif_dir(n);
    let staging = tif_dir.with_extension("tmp");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;
    for (i, s) in stack.slice_iter().enumerate() {
        s.save_raw(staging.join(slice_file_name(n, i)))?;
    }
    if tif_dir.exists() {
        fs::remove_dir_all(&tif_dir)?;
    }
    fs::rename(&staging, &tif_dir)?;
    write_json(layout.metadata_path(n), meta)?;
    log::info!("写入鱼 {n}: {} 层, 目录 {}", stack.len_z(), tif_dir.display());
    Ok(layout.fish_dir(n))
}

/// 读取鱼 `n` 的元数据.
pub fn read_metadata(layout: &DatasetLayout, n: u32) -> Result<FishMetadata, DatasetError> {
    let text = fs::read_to_string(layout.metadata_path(n))?;
    Ok(serde_json::from_str(&text)?)
}

/// 把 `entries` 合并进鱼 `n` 已有的 `metadata.json`, 同名键被覆盖. 返回合并后的元数据.
///
/// 合并结果必须仍然是合法的元数据, 否则文件保持不变并返回错误.
pub fn append_metadata(
    layout: &DatasetLayout,
    n: u32,
    entries: Map<String, Value>,
) -> Result<FishMetadata, DatasetError> {
    let path = layout.metadata_path(n);
    let mut map: Map<String, Value> = serde_json::from_str(&fs::read_to_string(&path)?)?;
    map.extend(entries);
    let merged = Value::Object(map);
    let meta: FishMetadata = serde_json::from_value(merged.clone())?;
    write_json(&path, &merged)?;
    Ok(meta)
}

/// 读取人工对齐角度文件. 键为鱼编号的十进制字符串, 值为逆时针角度 (度).
pub fn read_angles<P: AsRef<Path>>(path: P) -> Result<HashMap<String, f64>, DatasetError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// 鱼 `n` 的对齐角度: 优先取 `meta` 中的 `angle`, 否则查 `angles.json`.
pub fn alignment_angle(
    layout: &DatasetLayout,
    n: u32,
    meta: Option<&FishMetadata>,
) -> Result<f64, DatasetError> {
    if let Some(angle) = meta.and_then(|m| m.angle) {
        return Ok(angle);
    }
    let key = n.to_string();
    read_angles(&layout.angles)?
        .get(&key)
        .copied()
        .ok_or(DatasetError::KeyNotFound(key))
}

/// 单鱼读取选项.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanReadOptions {
    /// 只读取这些切片. 越界部分会被截掉.
    pub range: Option<Range<usize>>,

    /// 是否按对齐角度旋转每一层切片 (双线性插值).
    pub align: bool,

    /// 解码后转换到的通道布局.
    pub channels: Channels,
}

impl Default for CleanReadOptions {
    fn default() -> Self {
        Self {
            range: None,
            align: false,
            channels: Channels::Gray,
        }
    }
}

/// 读取鱼 `n` 的切片和元数据.
///
/// # 注意
///
/// 1. 切片目录中只读取扩展名为 `tiff` 或 `tif` 的文件, 按文件名自然排序.
/// 2. `options.align` 为真时, 角度来源见 [`alignment_angle`].
pub fn read_clean<T: Sample>(
    layout: &DatasetLayout,
    n: u32,
    options: &CleanReadOptions,
) -> Result<(ScanStack<T>, FishMetadata), DatasetError> {
    let meta = read_metadata(layout, n)?;
    let dir = layout.clean_tif_dir(n);
    let files = sorted_entries(&dir, |p| {
        p.is_file() && (has_extension(p, "tiff") || has_extension(p, "tif"))
    })?;
    let files = &files[clamp_range(options.range.as_ref(), files.len())];
    if files.is_empty() {
        return Err(DatasetError::NoImages(dir));
    }
    log::info!("读取鱼 {n} ({} 层)", files.len());

    let slices = decode_slices::<T>(files, options.channels, 100)?;
    let mut stack = ScanStack::from_slices(&slices)
        .ok_or_else(|| DatasetError::SliceShapeMismatch(dir.clone()))?;
    if options.align {
        let angle = alignment_angle(layout, n, Some(&meta))?;
        stack = stack
            .rotated(angle, Interpolation::Bilinear)
            .ok_or(DatasetError::SliceShapeMismatch(dir))?;
    }
    Ok((stack, meta))
}

/// 列出已写入的所有鱼编号, 按升序. 名字不是纯数字的目录被忽略.
pub fn list_clean(layout: &DatasetLayout) -> Result<Vec<u32>, DatasetError> {
    if !layout.clean.is_dir() {
        return Ok(Vec::new());
    }
    let mut v: Vec<u32> = sorted_entries(&layout.clean, |p| p.is_dir())?
        .iter()
        .map(|p| file_name_lossy(p))
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|s| s.parse().ok())
        .collect();
    v.sort_unstable();
    Ok(v)
}

/// 从指定鱼编号创建单鱼数据加载器.
///
/// # 注意
///
/// `fish` 中的每个编号都必须已经写入, 否则加载器在迭代时会返回 `Result::Err`.
pub fn clean_loader<T: Sample, I: IntoIterator<Item = u32>>(
    layout: &DatasetLayout,
    fish: I,
    options: CleanReadOptions,
) -> CleanLoader<T> {
    let mut data: Vec<u32> = fish.into_iter().collect();
    data.reverse();

    CleanLoader {
        layout: layout.clone(),
        options,
        data_rev: data,
        _sample: PhantomData,
    }
}

/// 单鱼数据加载器, 逐条读取切片和元数据.
#[derive(Debug)]
pub struct CleanLoader<T: Sample> {
    layout: DatasetLayout,
    options: CleanReadOptions,
    data_rev: Vec<u32>,
    _sample: PhantomData<T>,
}

impl<T: Sample> Iterator for CleanLoader<T> {
    type Item = (u32, Result<(ScanStack<T>, FishMetadata), DatasetError>);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.data_rev.pop()?;
        Some((n, read_clean(&self.layout, n, &self.options)))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.data_rev.len(), Some(self.data_rev.len()))
    }
}

impl<T: Sample> ExactSizeIterator for CleanLoader<T> {
    #[inline]
    fn len(&self) -> usize {
        self.data_rev.len()
    }
}
