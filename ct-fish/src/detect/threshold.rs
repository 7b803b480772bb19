//! 检测切片的二值化.

use super::DetectError;
use crate::{IntensityWindow, Sample, StackSlice};
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;

/// 将一张切片二值化, 作为圆检测的输入.
///
/// 切片先被转换为 8 位单通道灰度 (RGB 按 BT.601 求亮度), 再用 Otsu
/// 方法求出自动门限. 灰度严格大于门限的像素取 `high`, 其余取 0.
///
/// # 注意
///
/// 1. 门限完全由 Otsu 方法决定, 不受 `low` 影响; `low` 只参与窗口合法性检查.
/// 2. 切片为空, 或 `low >= high` 时返回 [`DetectError::InvalidImage`].
/// 3. 结果只取决于像素值, 相同输入必定得到相同输出.
pub fn threshold<T: Sample>(
    slice: &StackSlice<'_, T>,
    low: u8,
    high: u8,
) -> Result<GrayImage, DetectError> {
    if slice.is_empty() {
        return Err(DetectError::InvalidImage("切片为空".to_string()));
    }
    threshold_gray(&slice.to_gray8(), low, high)
}

/// 对已经是 8 位灰度的图像执行 [`threshold`].
pub fn threshold_gray(gray: &GrayImage, low: u8, high: u8) -> Result<GrayImage, DetectError> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Err(DetectError::InvalidImage("切片为空".to_string()));
    }
    if IntensityWindow::from_gray8(low, high).is_none() {
        return Err(DetectError::InvalidImage(format!(
            "阈值窗口 [{low}, {high}] 不合法"
        )));
    }
    let level = otsu_level(gray);
    log::debug!("Otsu 门限 {level}, 前景取 {high}");

    let mut ans = gray.clone();
    ans.pixels_mut()
        .for_each(|p| *p = Luma([if p.0[0] > level { high } else { 0 }]));
    Ok(ans)
}
