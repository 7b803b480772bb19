//! 检测结果的标注预览图.

use super::Circle;
use crate::consts::rgb;
use crate::{Sample, StackSlice};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_circle_mut};
use imageproc::rect::Rect;

/// 圆轮廓线宽.
const OUTLINE_WIDTH: i32 = 2;

/// 圆心方块的半边长.
const CENTER_HALF: i32 = 5;

/// 在 `slice` 的 8 位 RGB 副本上标注 `circles`: 红色轮廓圆, 以及标记圆心的橙色实心方块.
///
/// 供人工在裁剪前核对检测结果. 部分或完全超出图像的圆只绘制图像内的部分.
pub fn annotate<T: Sample>(slice: &StackSlice<'_, T>, circles: &[Circle]) -> RgbImage {
    let mut canvas = slice.to_rgb8();
    for c in circles {
        for k in 0..OUTLINE_WIDTH {
            draw_hollow_circle_mut(&mut canvas, (c.x, c.y), (c.r - k).max(0), Rgb(rgb::CIRCLE));
        }
        let side = (2 * CENTER_HALF + 1) as u32;
        let rect = Rect::at(c.x - CENTER_HALF, c.y - CENTER_HALF).of_size(side, side);
        draw_filled_rect_mut(&mut canvas, rect, Rgb(rgb::CENTER));
    }
    canvas
}
