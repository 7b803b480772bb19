//! 单鱼元数据盖章.

use super::{Mastersheet, MastersheetRow, MetaError, ScanMetadata};
use crate::{Sample, ScanStack};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// 与一条鱼的裁剪结果一一对应的元数据记录, 以 `metadata.json` 的形式持久化.
///
/// 字段名与已有数据集的 `metadata.json` 保持一致. 不认识的键保存在 `extra` 中,
/// 读取后再写回不会丢失信息.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FishMetadata {
    /// 鱼编号.
    pub number: u32,

    /// 是否跳过.
    #[serde(rename = "Skip", default)]
    pub skip: Option<Value>,

    /// 年龄.
    #[serde(rename = "Age", default)]
    pub age: Option<f64>,

    /// 基因型.
    #[serde(rename = "Genotype", default)]
    pub genotype: Option<String>,

    /// 品系.
    #[serde(rename = "Strain", default)]
    pub strain: Option<String>,

    /// 名称.
    #[serde(rename = "Name", default)]
    pub name: Option<String>,

    /// 宽方向体素尺寸.
    #[serde(rename = "VoxelSizeX", deserialize_with = "lenient_f64")]
    pub x_voxel_size: f64,

    /// 高方向体素尺寸.
    #[serde(rename = "VoxelSizeY", deserialize_with = "lenient_f64")]
    pub y_voxel_size: f64,

    /// 切片方向体素尺寸.
    #[serde(rename = "VoxelSizeZ", deserialize_with = "lenient_f64")]
    pub z_voxel_size: f64,

    /// 备注.
    #[serde(rename = "Comments", default)]
    pub comments: Option<Value>,

    /// 体模.
    #[serde(rename = "Phantom", default)]
    pub phantom: Option<Value>,

    /// 缩放值.
    #[serde(rename = "Scaling Value", default)]
    pub scaling_value: Option<Value>,

    /// 任意值.
    #[serde(rename = "Arb Value", default)]
    pub arb_value: Option<Value>,

    /// 裁剪时堆栈的缩放百分比.
    #[serde(default)]
    pub scale: u32,

    /// 原始扫描目录.
    #[serde(default)]
    pub path: PathBuf,

    /// 对齐角度 (逆时针, 度). 人工对齐后才会有.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,

    /// 其他键.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 旧数据集中体素尺寸以字符串保存, 两种形式都接受.
fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("体素尺寸 {n} 无法表示为浮点数"))),
        Value::String(s) => s.trim().parse().map_err(D::Error::custom),
        other => Err(D::Error::custom(format!("体素尺寸应为数字, 实际为 {other}"))),
    }
}

impl FishMetadata {
    /// 由鱼编号、扫描元数据和 (可选的) mastersheet 行构建记录.
    ///
    /// `row` 的编号必须等于 `fish`, 否则返回 [`MetaError::RowMismatch`].
    /// `row` 为 `None` 时描述字段均为空.
    pub fn new(
        fish: u32,
        scan: &ScanMetadata,
        row: Option<&MastersheetRow>,
    ) -> Result<Self, MetaError> {
        if let Some(row) = row {
            if row.n != fish {
                return Err(MetaError::RowMismatch {
                    expected: fish,
                    found: row.n,
                });
            }
        }
        let empty = MastersheetRow::new(fish);
        let row = row.unwrap_or(&empty);
        Ok(Self {
            number: fish,
            skip: row.skip.clone(),
            age: row.age,
            genotype: row.genotype.clone(),
            strain: row.strain.clone(),
            name: row.name.clone(),
            x_voxel_size: scan.x_voxel_size,
            y_voxel_size: scan.y_voxel_size,
            z_voxel_size: scan.z_voxel_size,
            comments: row.comments.clone(),
            phantom: row.phantom.clone(),
            scaling_value: row.scaling_value.clone(),
            arb_value: row.arb_value.clone(),
            scale: scan.scale,
            path: scan.path.clone(),
            angle: None,
            extra: Map::new(),
        })
    }
}

/// 为一条鱼的裁剪结果盖章: 把鱼编号、扫描元数据与 mastersheet 中
/// **该鱼自己的** 描述信息合并为一条记录.
///
/// mastersheet 中没有该鱼时只记录警告, 描述字段留空.
pub fn stamp<T: Sample>(
    stack: ScanStack<T>,
    fish: u32,
    scan: &ScanMetadata,
    sheet: &Mastersheet,
) -> Result<(ScanStack<T>, FishMetadata), MetaError> {
    let row = sheet.row(fish);
    if row.is_none() {
        log::warn!("mastersheet 中没有鱼 {fish}, 描述字段留空");
    }
    let meta = FishMetadata::new(fish, scan, row)?;
    Ok((stack, meta))
}
