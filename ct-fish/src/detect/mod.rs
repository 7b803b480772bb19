//! 样品管检测.
//!
//! 检测分两步: 先用 [`threshold`] 将检测切片二值化, 再用 [`detect_tubes`]
//! 在二值图像上做 Hough 圆检测. [`find_tubes`] 将两步串联起来, 并生成标注预览.

use crate::{Sample, ScanStack};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;

mod hough;
mod preview;
mod threshold;

pub use preview::annotate;
pub use threshold::{threshold, threshold_gray};

/// 检测错误.
#[derive(Debug)]
pub enum DetectError {
    /// 输入切片为空或参数不合法.
    InvalidImage(String),
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectError::InvalidImage(why) => write!(f, "无效的检测图像: {why}"),
        }
    }
}

impl std::error::Error for DetectError {}

/// 像素坐标下的圆 `(x, y, r)`. 序列化为 `[x, y, r]`.
///
/// 坐标总是相对于某个参考缩放比例而言, 见 [`crate::crop::rescale_circles`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 3]", into = "[i32; 3]")]
pub struct Circle {
    /// 圆心横坐标 (宽方向).
    pub x: i32,

    /// 圆心纵坐标 (高方向).
    pub y: i32,

    /// 半径.
    pub r: i32,
}

impl Circle {
    /// 直接创建.
    #[inline]
    pub const fn new(x: i32, y: i32, r: i32) -> Self {
        Self { x, y, r }
    }
}

impl From<[i32; 3]> for Circle {
    #[inline]
    fn from([x, y, r]: [i32; 3]) -> Self {
        Self { x, y, r }
    }
}

impl From<Circle> for [i32; 3] {
    #[inline]
    fn from(c: Circle) -> Self {
        [c.x, c.y, c.r]
    }
}

/// 一次检测得到的有序圆集合.
///
/// 顺序为检测顺序 (票数从高到低), 仅在同一次运行中稳定;
/// 需要与鱼编号对应时, 应由 [`crate::pipeline::Reviewer`] 重新排序.
pub type CircleSet = Vec<Circle>;

/// 样品管检测参数.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TubeParams {
    /// 两个圆心之间的最小距离 (像素).
    pub min_distance: u32,

    /// 最小半径 (像素).
    pub min_radius: u32,

    /// 最大半径 (像素). 0 表示不限制.
    pub max_radius: u32,

    /// 二值化窗口 `(low, high)`, 8 位强度.
    pub thresh: (u8, u8),

    /// 用于检测的切片下标.
    pub slice_to_detect: usize,

    /// 累加器分辨率与图像分辨率之比的倒数. 越大累加器越粗糙, 检测越灵敏.
    pub dp: f32,

    /// 检测后加到每个半径上的余量, 用于把管壁包含进来.
    pub pad: u32,

    /// 成为圆心所需的最少票数.
    pub accumulator_threshold: u32,

    /// 求梯度方向前的高斯平滑标准差. 0 表示不平滑.
    pub blur_sigma: f32,
}

impl Default for TubeParams {
    fn default() -> Self {
        Self {
            min_distance: 200,
            min_radius: 0,
            max_radius: 150,
            thresh: (50, 100),
            slice_to_detect: 0,
            dp: 1.3,
            pad: 0,
            accumulator_threshold: 30,
            blur_sigma: 2.0,
        }
    }
}

/// 在二值切片 `binary` 上检测样品管.
///
/// 找到的圆心和半径被四舍五入为整数, 每个半径再加上 `params.pad`.
/// 没有找到任何圆时返回 `Ok(None)`, 这是正常结果而不是错误.
/// 相同的输入和参数总是得到相同的输出.
///
/// # 注意
///
/// `binary` 为空时返回 [`DetectError::InvalidImage`].
pub fn detect_tubes(
    binary: &GrayImage,
    params: &TubeParams,
) -> Result<Option<CircleSet>, DetectError> {
    let (w, h) = binary.dimensions();
    if w == 0 || h == 0 {
        return Err(DetectError::InvalidImage("二值图像为空".to_string()));
    }
    let pad = params.pad as i32;
    let circles: CircleSet = hough::hough_circles(binary, params)
        .into_iter()
        .map(|c| Circle {
            x: c.x.round() as i32,
            y: c.y.round() as i32,
            r: c.r.round() as i32 + pad,
        })
        .filter(|c| c.r > 0)
        .collect();
    if circles.is_empty() {
        log::debug!("没有检测到样品管");
        return Ok(None);
    }
    Ok(Some(circles))
}

/// 一次成功的样品管检测.
#[derive(Debug, Clone)]
pub struct Detection {
    /// 检测到的圆, 坐标相对于被检测的堆栈.
    pub circles: CircleSet,

    /// 检测切片的标注预览图.
    pub preview: RgbImage,
}

/// 在堆栈 `stack` 的第 `params.slice_to_detect` 层上检测样品管.
///
/// 依次执行 [`threshold`], [`detect_tubes`] 和 [`annotate`].
/// 没有找到任何圆时返回 `Ok(None)`.
pub fn find_tubes<T: Sample>(
    stack: &ScanStack<T>,
    params: &TubeParams,
) -> Result<Option<Detection>, DetectError> {
    let slice = stack.slice_at(params.slice_to_detect).ok_or_else(|| {
        DetectError::InvalidImage(format!(
            "检测切片 {} 越界 (共 {} 层)",
            params.slice_to_detect,
            stack.len_z()
        ))
    })?;
    let (low, high) = params.thresh;
    let binary = threshold(&slice, low, high)?;
    let Some(circles) = detect_tubes(&binary, params)? else {
        return Ok(None);
    };
    let preview = annotate(&slice, &circles);
    Ok(Some(Detection { circles, preview }))
}

#[cfg(test)]
mod tests {
    use super::{detect_tubes, find_tubes, threshold_gray, Circle, DetectError, TubeParams};
    use crate::test_utils::{two_tube_stack, two_tubes};
    use crate::ScanStack;
    use image::GrayImage;
    use ndarray::Array3;

    fn e2e_params() -> TubeParams {
        TubeParams {
            min_distance: 200,
            min_radius: 20,
            max_radius: 50,
            pad: 0,
            ..Default::default()
        }
    }

    fn sorted(mut v: Vec<Circle>) -> Vec<Circle> {
        v.sort_by_key(|c| (c.x, c.y));
        v
    }

    #[test]
    fn test_two_tubes() {
        let binary = threshold_gray(&two_tubes(), 50, 100).unwrap();
        let circles = sorted(detect_tubes(&binary, &e2e_params()).unwrap().unwrap());
        assert_eq!(circles.len(), 2);
        let expected = [(100, 100, 40), (400, 400, 30)];
        for (c, (x, y, r)) in circles.iter().zip(expected) {
            assert!((c.x - x).abs() <= 5 && (c.y - y).abs() <= 5, "{c:?}");
            assert!((c.r - r).abs() <= 1, "{c:?}");
        }
    }

    #[test]
    fn test_deterministic_and_padded() {
        let binary = threshold_gray(&two_tubes(), 50, 100).unwrap();
        let a = detect_tubes(&binary, &e2e_params()).unwrap().unwrap();
        let b = detect_tubes(&binary, &e2e_params()).unwrap().unwrap();
        assert_eq!(a, b);

        let padded = detect_tubes(
            &binary,
            &TubeParams {
                pad: 7,
                ..e2e_params()
            },
        )
        .unwrap()
        .unwrap();
        for (c, p) in a.iter().zip(padded.iter()) {
            assert_eq!((c.x, c.y, c.r + 7), (p.x, p.y, p.r));
        }
    }

    #[test]
    fn test_no_tubes_is_not_error() {
        let blank = GrayImage::new(300, 300);
        assert_eq!(detect_tubes(&blank, &e2e_params()).unwrap(), None);

        let stack = ScanStack::from_gray(Array3::<u8>::zeros((2, 64, 64)));
        assert!(find_tubes(&stack, &e2e_params()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            detect_tubes(&GrayImage::new(0, 0), &e2e_params()),
            Err(DetectError::InvalidImage(_))
        ));
        let stack = ScanStack::from_gray(Array3::<u8>::zeros((2, 64, 64)));
        let params = TubeParams {
            slice_to_detect: 2,
            ..e2e_params()
        };
        assert!(find_tubes(&stack, &params).is_err());
    }

    #[test]
    fn test_find_tubes_with_preview() {
        let stack = two_tube_stack(3);
        let det = find_tubes(&stack, &e2e_params()).unwrap().unwrap();
        assert_eq!(det.circles.len(), 2);
        assert_eq!(det.preview.dimensions(), (500, 500));
    }

    #[test]
    fn test_circle_json_shape() {
        let c = Circle::new(3, 4, 5);
        assert_eq!(serde_json::to_string(&c).unwrap(), "[3,4,5]");
        let back: Circle = serde_json::from_str("[3,4,5]").unwrap();
        assert_eq!(back, c);
    }
}
