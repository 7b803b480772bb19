//! 测试用的合成数据.

use crate::ScanStack;
use image::{GrayImage, Luma};
use ndarray::Array3;

/// 两根样品管的 `(x, y, r)`.
pub(crate) const TUBES: [(i64, i64, i64); 2] = [(100, 100, 40), (400, 400, 30)];

/// 在 500×500 黑色背景上绘制 [`TUBES`] 两个实心圆, 亮度 200.
pub(crate) fn two_tubes() -> GrayImage {
    GrayImage::from_fn(500, 500, |x, y| {
        let inside = TUBES.iter().any(|&(cx, cy, r)| {
            let (dx, dy) = (x as i64 - cx, y as i64 - cy);
            dx * dx + dy * dy <= r * r
        });
        Luma([if inside { 200 } else { 0 }])
    })
}

/// 每层都是 [`two_tubes`] 的 `z` 层单通道堆栈.
pub(crate) fn two_tube_stack(z: usize) -> ScanStack<u8> {
    let img = two_tubes();
    let data = Array3::from_shape_fn((z, 500, 500), |(_, y, x)| {
        img.get_pixel(x as u32, y as u32).0[0]
    });
    ScanStack::from_gray(data)
}
