//! 扫描仪配置文件 (`*.xtekct`) 的读取.
//!
//! 该文件是 INI 格式, 体素尺寸位于 `[XTekCT]` 节的 `VoxelSizeX/Y/Z` 键.

use super::MetaError;
use crate::consts::{XTEKCT_EXT, XTEKCT_SECTION};
use std::fs;
use std::path::{Path, PathBuf};

const VOXEL_KEYS: [&str; 3] = ["VoxelSizeX", "VoxelSizeY", "VoxelSizeZ"];

/// 在目录 `dir` 中查找扫描仪配置文件. 有多个时取文件名最小的一个.
///
/// 找不到时返回 [`MetaError::MissingConfigFile`].
pub fn find_xtekct<P: AsRef<Path>>(dir: P) -> Result<PathBuf, MetaError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|_| MetaError::MissingConfigFile(dir.to_owned()))?;
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == XTEKCT_EXT))
        .collect();
    found.sort();
    found
        .into_iter()
        .next()
        .ok_or_else(|| MetaError::MissingConfigFile(dir.join(format!("*.{XTEKCT_EXT}"))))
}

/// 读取配置文件 `path` 中的体素尺寸 `[x, y, z]`.
pub fn read_voxel_sizes<P: AsRef<Path>>(path: P) -> Result<[f64; 3], MetaError> {
    let path = path.as_ref();
    let text =
        fs::read_to_string(path).map_err(|_| MetaError::MissingConfigFile(path.to_owned()))?;
    parse_voxel_sizes(&text)
}

/// 从配置文件内容中解析体素尺寸 `[x, y, z]`.
///
/// 节名和键名区分大小写; `;` 或 `#` 开头的行为注释.
pub fn parse_voxel_sizes(text: &str) -> Result<[f64; 3], MetaError> {
    let mut ans = [None; 3];
    let mut in_section = false;
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_section = name.trim() == XTEKCT_SECTION;
            continue;
        }
        if !in_section {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if let Some(k) = VOXEL_KEYS.iter().position(|v| *v == key.trim()) {
            let value = value.trim();
            let v = value.parse::<f64>().map_err(|_| {
                MetaError::MalformedConfig(format!("{} 的值 `{value}` 不是数字", VOXEL_KEYS[k]))
            })?;
            ans[k] = Some(v);
        }
    }
    let mut out = [0.0; 3];
    for (k, v) in ans.into_iter().enumerate() {
        out[k] = v.ok_or_else(|| {
            MetaError::MalformedConfig(format!("[{XTEKCT_SECTION}] 缺少 {}", VOXEL_KEYS[k]))
        })?;
    }
    Ok(out)
}
