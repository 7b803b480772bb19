//! 裁剪决策 (`crop_data.json`) 的持久化.
//!
//! 记录一次原始扫描裁剪时使用的鱼编号范围、排好序的样品管圆和检测比例,
//! 无需重新检测即可复现或审核裁剪结果.

use super::{DatasetError, DatasetLayout};
use crate::consts::CROP_DATA_FILE;
use crate::detect::{Circle, CircleSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 一次原始扫描的裁剪决策.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRecord {
    /// 覆盖的鱼编号范围, 形如 `"77-78"`.
    pub n: String,

    /// 按鱼编号顺序排列的样品管圆, 坐标位于 `scale` 比例下.
    pub ordered_circles: CircleSet,

    /// 检测时的缩放百分比.
    pub scale: u32,

    /// 原始扫描目录.
    pub path: PathBuf,
}

impl CropRecord {
    /// 由鱼编号范围 `first..=last` 创建.
    pub fn new<P: AsRef<Path>>(
        (first, last): (u32, u32),
        ordered_circles: &[Circle],
        scale: u32,
        path: P,
    ) -> Self {
        Self {
            n: format!("{first}-{last}"),
            ordered_circles: ordered_circles.to_vec(),
            scale,
            path: path.as_ref().to_owned(),
        }
    }

    /// 解析 `n` 得到鱼编号范围. 格式不对时返回 `None`.
    pub fn fish_range(&self) -> Option<(u32, u32)> {
        let (a, b) = self.n.split_once('-')?;
        Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
    }
}

/// 原始扫描目录 `scan_dir` 下的裁剪决策文件.
#[inline]
pub fn crop_data_path<P: AsRef<Path>>(scan_dir: P) -> PathBuf {
    scan_dir.as_ref().join(CROP_DATA_FILE)
}

/// 保存裁剪决策: 写入 `record.path` 下的 `crop_data.json`, 并在备份目录中再写一份.
///
/// 返回两个文件的路径.
pub fn save_crop_data(
    layout: &DatasetLayout,
    record: &CropRecord,
) -> Result<[PathBuf; 2], DatasetError> {
    let (first, last) = validate(record)?;
    let text = serde_json::to_string(record)?;

    let main = crop_data_path(&record.path);
    fs::write(&main, &text)?;

    fs::create_dir_all(&layout.crop_backup)?;
    let backup = layout.crop_backup_path(first, last);
    fs::write(&backup, &text)?;
    log::info!("保存裁剪决策 {} -> {}", record.n, main.display());
    Ok([main, backup])
}

/// 检查鱼编号范围和缩放比例, 返回 `(首, 末)`.
fn validate(record: &CropRecord) -> Result<(u32, u32), DatasetError> {
    if record.scale == 0 {
        return Err(DatasetError::InvalidRecord(format!(
            "鱼 `{}` 的缩放比例为 0",
            record.n
        )));
    }
    record
        .fish_range()
        .ok_or_else(|| DatasetError::InvalidRecord(format!("鱼编号范围 `{}`", record.n)))
}

/// 读取原始扫描目录 `scan_dir` 下的裁剪决策.
///
/// 鱼编号范围无法解析或缩放比例为 0 时返回 [`DatasetError::InvalidRecord`].
pub fn load_crop_data<P: AsRef<Path>>(scan_dir: P) -> Result<CropRecord, DatasetError> {
    let text = fs::read_to_string(crop_data_path(scan_dir))?;
    let record: CropRecord = serde_json::from_str(&text)?;
    validate(&record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::{load_crop_data, save_crop_data, CropRecord};
    use crate::dataset::{DatasetError, DatasetLayout};
    use crate::detect::Circle;
    use serde_json::json;
    use std::fs;

    #[test]
    fn test_save_and_load() {
        let root = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(root.path());
        let scan = layout.raw.join("EK_077_078");
        fs::create_dir_all(&scan).unwrap();

        let circles = [Circle::new(100, 100, 40), Circle::new(400, 400, 30)];
        let record = CropRecord::new((77, 78), &circles, 40, &scan);
        let [main, backup] = save_crop_data(&layout, &record).unwrap();
        assert_eq!(main, scan.join("crop_data.json"));
        assert_eq!(backup, root.path().join("output/Crops/77-78_crop_data.json"));

        let v: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&backup).unwrap()).unwrap();
        assert_eq!(v["n"], json!("77-78"));
        assert_eq!(v["ordered_circles"], json!([[100, 100, 40], [400, 400, 30]]));
        assert_eq!(v["scale"], json!(40));

        assert_eq!(load_crop_data(&scan).unwrap(), record);
    }

    #[test]
    fn test_fish_range() {
        let mut record = CropRecord::new((5, 9), &[], 40, "/x");
        assert_eq!(record.fish_range(), Some((5, 9)));
        record.n = "5".into();
        assert_eq!(record.fish_range(), None);
        let layout = DatasetLayout::new("/nonexistent");
        assert!(matches!(
            save_crop_data(&layout, &record),
            Err(DatasetError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_zero_scale_rejected() {
        let root = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(root.path());
        let scan = layout.raw.join("EK_077_078");
        fs::create_dir_all(&scan).unwrap();

        let record = CropRecord::new((77, 78), &[Circle::new(10, 10, 5)], 0, &scan);
        assert!(matches!(
            save_crop_data(&layout, &record),
            Err(DatasetError::InvalidRecord(_))
        ));
        assert!(!scan.join("crop_data.json").exists());

        fs::write(
            scan.join("crop_data.json"),
            r#"{"n": "77-78", "ordered_circles": [[10, 10, 5]], "scale": 0, "path": "/x"}"#,
        )
        .unwrap();
        assert!(matches!(
            load_crop_data(&scan),
            Err(DatasetError::InvalidRecord(_))
        ));
    }
}
