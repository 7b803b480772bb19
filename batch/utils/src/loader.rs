//! 对 `ct-fish::dataset` 的更一层封装. 提供更直接的数据集定位.

use ct_fish::dataset::raw::{list_raw_scans, RawScanDir};
use ct_fish::dataset::{DatasetError, DatasetLayout};
use std::env;
use std::path::PathBuf;

/// 获取 uCT 数据集根目录.
///
/// 1. 若环境变量 `$CT_FISH_DATASET` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/uCT`;
/// 3. 连主目录都无法确定时返回 `None`.
pub fn dataset_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("CT_FISH_DATASET") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => ct_fish::dataset::home_dataset_dir_with(["uCT"]),
    }
}

/// 以 [`dataset_dir_from_env_or_home`] 为根目录的数据集布局.
#[inline]
pub fn layout_from_env_or_home() -> Option<DatasetLayout> {
    dataset_dir_from_env_or_home().map(DatasetLayout::new)
}

/// 列出 `layout` 下的全部原始扫描.
#[inline]
pub fn raw_scans(layout: &DatasetLayout) -> Result<Vec<RawScanDir>, DatasetError> {
    list_raw_scans(&layout.raw)
}
