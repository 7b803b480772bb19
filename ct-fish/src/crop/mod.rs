//! 尺度映射与越界安全的裁剪.
//!
//! 检测通常在缩小后的预览堆栈上进行, 而裁剪需要作用于更高分辨率的堆栈.
//! [`rescale_circles`] 负责在两种比例之间换算坐标, [`crop`] 负责按圆裁剪.

use crate::detect::{Circle, CircleSet};
use crate::{Idx2d, Idx3d, Sample, ScanStack};
use std::fmt;
use std::ops::Range;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 裁剪错误.
#[derive(Debug)]
pub enum CropError {
    /// 源堆栈没有体素或全为 0, 或某个裁剪结果面积为 0.
    EmptyCrop(String),

    /// 裁剪窗口边长 `2r` 超过源切片的宽或高 `(高, 宽)`.
    WindowTooLarge {
        /// 越界的圆.
        circle: Circle,

        /// 源切片形状.
        shape: Idx2d,
    },
}

impl fmt::Display for CropError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CropError::EmptyCrop(why) => write!(f, "空裁剪: {why}"),
            CropError::WindowTooLarge { circle, shape } => write!(
                f,
                "圆 ({}, {}, {}) 的裁剪窗口边长 {} 超过切片形状 {:?}",
                circle.x,
                circle.y,
                circle.r,
                2 * circle.r as i64,
                shape
            ),
        }
    }
}

impl std::error::Error for CropError {}

/// 按比例换算圆的坐标和半径: 每个分量乘以 `to / from` 后向零截断.
///
/// 比例为正的百分数, 例如 40 表示原始分辨率的 40%. `from == 0` 时原样返回.
///
/// # 注意
///
/// 先换算到较大比例再换算回来, 每个分量与原值的误差不超过 1 像素.
/// 反过来 (先缩小再放大) 的误差最多为 `from / to` 像素.
pub fn rescale_circles(circles: &[Circle], from: u32, to: u32) -> CircleSet {
    if from == 0 {
        log::warn!("缩放比例的分母为 0, 坐标保持不变");
        return circles.to_vec();
    }
    let scale = |v: i32| (v as i64 * to as i64 / from as i64) as i32;
    circles
        .iter()
        .map(|c| Circle::new(scale(c.x), scale(c.y), scale(c.r)))
        .collect()
}

/// 裁剪窗口 `[y0, y1) × [x0, x1)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CropWindow {
    /// 左边界 (包含).
    pub x0: usize,

    /// 右边界 (不包含).
    pub x1: usize,

    /// 上边界 (包含).
    pub y0: usize,

    /// 下边界 (不包含).
    pub y1: usize,
}

/// 将长度为 `len` 的区间 `[start, start + len)` 平移到 `[0, bound)` 之内. 调用者保证 `len <= bound`.
#[inline]
fn shift_into(start: i64, len: i64, bound: i64) -> Range<usize> {
    let mut lo = start;
    if lo < 0 {
        lo = 0;
    }
    if lo + len > bound {
        lo = bound - len;
    }
    lo as usize..(lo + len) as usize
}

impl CropWindow {
    /// 计算以 `circle` 为中心、边长 `2r` 的窗口, 并在不改变大小的前提下平移到切片 `(高, 宽)` 之内.
    ///
    /// 半径不为正时返回 [`CropError::EmptyCrop`], 边长超过切片宽或高时返回
    /// [`CropError::WindowTooLarge`].
    pub fn fit(circle: &Circle, (height, width): Idx2d) -> Result<Self, CropError> {
        if circle.r <= 0 {
            return Err(CropError::EmptyCrop(format!("半径 {} 不为正", circle.r)));
        }
        let len = 2 * circle.r as i64;
        if len > width as i64 || len > height as i64 {
            return Err(CropError::WindowTooLarge {
                circle: *circle,
                shape: (height, width),
            });
        }
        let r = circle.r as i64;
        let xs = shift_into(circle.x as i64 - r, len, width as i64);
        let ys = shift_into(circle.y as i64 - r, len, height as i64);
        Ok(Self {
            x0: xs.start,
            x1: xs.end,
            y0: ys.start,
            y1: ys.end,
        })
    }

    /// 窗口宽.
    #[inline]
    pub fn width(&self) -> usize {
        self.x1 - self.x0
    }

    /// 窗口高.
    #[inline]
    pub fn height(&self) -> usize {
        self.y1 - self.y0
    }

    /// 从 `stack` 的每一层中提取窗口. 窗口越界或面积为 0 时返回 [`CropError::EmptyCrop`].
    pub fn extract<T: Sample>(&self, stack: &ScanStack<T>) -> Result<ScanStack<T>, CropError> {
        let ans = stack
            .window(self.y0..self.y1, self.x0..self.x1)
            .ok_or_else(|| CropError::EmptyCrop(format!("窗口 {self:?} 越界")))?;
        if ans.is_empty() {
            return Err(CropError::EmptyCrop(format!("窗口 {self:?} 面积为 0")));
        }
        Ok(ans)
    }
}

/// 检查源堆栈, 并为每个圆计算窗口. 任一失败则整体失败.
fn fit_all<T: Sample>(
    stack: &ScanStack<T>,
    circles: &[Circle],
) -> Result<Vec<CropWindow>, CropError> {
    if stack.is_empty() {
        return Err(CropError::EmptyCrop(format!(
            "源堆栈没有体素, 形状 {:?}",
            stack.shape()
        )));
    }
    if stack.is_blank() {
        return Err(CropError::EmptyCrop("源堆栈全为 0".to_string()));
    }
    let shape = stack.slice_shape();
    circles.iter().map(|c| CropWindow::fit(c, shape)).collect()
}

/// 为每个圆从 `stack` 中裁剪出一个子堆栈, 顺序与 `circles` 一致.
///
/// 每个子堆栈的层数、样本类型和通道数与源堆栈相同, 切片形状为 `2r × 2r`.
/// 靠近边缘的窗口会被平移回图像内, 大小不变.
///
/// # 注意
///
/// 1. 源堆栈为空或全为 0 时返回 [`CropError::EmptyCrop`].
/// 2. 前置条件 `2r <= min(宽, 高)` 不满足时返回 [`CropError::WindowTooLarge`].
/// 3. 所有窗口都在提取之前计算完毕, 任一窗口不合法时不会产生任何结果.
pub fn crop<T: Sample>(
    stack: &ScanStack<T>,
    circles: &[Circle],
) -> Result<Vec<ScanStack<T>>, CropError> {
    let windows = fit_all(stack, circles)?;
    log::info!("按 {} 个窗口裁剪堆栈 {:?}", windows.len(), stack.shape());
    windows.iter().map(|w| w.extract(stack)).collect()
}

/// 借助 `rayon`, 并行地执行 [`crop`].
#[cfg(feature = "rayon")]
pub fn par_crop<T: Sample>(
    stack: &ScanStack<T>,
    circles: &[Circle],
) -> Result<Vec<ScanStack<T>>, CropError> {
    let windows = fit_all(stack, circles)?;
    log::info!("按 {} 个窗口并行裁剪堆栈 {:?}", windows.len(), stack.shape());
    windows.par_iter().map(|w| w.extract(stack)).collect()
}

/// 以 `center` `(z, 高, 宽)` 为中心, 裁剪出边长为 `roi` 的立方体; z 方向边长可由 `roi_z` 单独指定.
///
/// `center` 缺省为堆栈中心. 越界的部分会被平移回堆栈内, 大小不变.
/// 任一方向的边长为 0 或超过堆栈对应维度时返回 `None`.
pub fn crop_around_center<T: Sample>(
    stack: &ScanStack<T>,
    roi: usize,
    center: Option<Idx3d>,
    roi_z: Option<usize>,
) -> Option<ScanStack<T>> {
    let (z, h, w) = stack.shape();
    let roi_z = roi_z.unwrap_or(roi);
    if roi == 0 || roi_z == 0 || roi > h || roi > w || roi_z > z {
        return None;
    }
    let (cz, ch, cw) = center.unwrap_or((z / 2, h / 2, w / 2));
    let half = |v: usize, len: usize| v as i64 - (len / 2) as i64;
    let zs = shift_into(half(cz, roi_z), roi_z as i64, z as i64);
    let ys = shift_into(half(ch, roi), roi as i64, h as i64);
    let xs = shift_into(half(cw, roi), roi as i64, w as i64);
    stack.z_range(zs)?.window(ys, xs)
}

#[cfg(test)]
mod tests {
    use super::{crop, crop_around_center, rescale_circles, CropError, CropWindow};
    use crate::detect::{detect_tubes, threshold_gray, Circle, TubeParams};
    use crate::test_utils::{two_tube_stack, two_tubes};
    use crate::ScanStack;
    use ndarray::{Array3, Array4};

    #[test]
    fn test_window_inside() {
        let w = CropWindow::fit(&Circle::new(100, 100, 40), (500, 500)).unwrap();
        assert_eq!((w.x0, w.x1, w.y0, w.y1), (60, 140, 60, 140));
        assert_eq!((w.width(), w.height()), (80, 80));
    }

    #[test]
    fn test_window_anchored_to_edges() {
        let w = CropWindow::fit(&Circle::new(10, 490, 40), (500, 500)).unwrap();
        assert_eq!((w.x0, w.x1), (0, 80));
        assert_eq!((w.y0, w.y1), (420, 500));

        let w = CropWindow::fit(&Circle::new(-30, 2000, 25), (100, 300)).unwrap();
        assert_eq!((w.x0, w.x1), (0, 50));
        assert_eq!((w.y0, w.y1), (50, 100));
    }

    #[test]
    fn test_window_sizes_exhaustive() {
        let shape = (60, 90);
        for r in 1..=30 {
            for x in (-20..120).step_by(7) {
                for y in (-20..90).step_by(7) {
                    let w = CropWindow::fit(&Circle::new(x, y, r), shape).unwrap();
                    assert_eq!(w.width(), 2 * r as usize);
                    assert_eq!(w.height(), 2 * r as usize);
                    assert!(w.x1 <= 90 && w.y1 <= 60);
                }
            }
        }
    }

    #[test]
    fn test_window_too_large() {
        let err = CropWindow::fit(&Circle::new(50, 50, 31), (60, 90)).unwrap_err();
        assert!(matches!(err, CropError::WindowTooLarge { .. }));
        assert!(matches!(
            CropWindow::fit(&Circle::new(50, 50, 0), (60, 90)),
            Err(CropError::EmptyCrop(_))
        ));
    }

    #[test]
    fn test_rescale() {
        let c = [Circle::new(100, 100, 40)];
        assert_eq!(rescale_circles(&c, 40, 100), vec![Circle::new(250, 250, 100)]);
        assert_eq!(rescale_circles(&c, 40, 40), c.to_vec());
        assert_eq!(rescale_circles(&c, 0, 40), c.to_vec());
        // 截断.
        assert_eq!(
            rescale_circles(&[Circle::new(7, 9, 3)], 100, 40),
            vec![Circle::new(2, 3, 1)]
        );
    }

    #[test]
    fn test_rescale_round_trip() {
        for (a, b) in [(40, 100), (25, 60), (33, 100), (100, 100)] {
            for v in 0..300 {
                let c = [Circle::new(v, v + 13, v / 2 + 1)];
                let back = rescale_circles(&rescale_circles(&c, a, b), b, a)[0];
                assert!((back.x - c[0].x).abs() <= 1);
                assert!((back.y - c[0].y).abs() <= 1);
                assert!((back.r - c[0].r).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_crop_keeps_depth_and_channels() {
        let data = Array4::<u16>::from_shape_fn((4, 50, 70, 3), |(z, h, w, c)| {
            (z + h + w + c) as u16 + 1
        });
        let stack = ScanStack::from_array(data).unwrap();
        let out = crop(&stack, &[Circle::new(0, 0, 10), Circle::new(69, 49, 25)]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].shape(), (4, 20, 20));
        assert_eq!(out[1].shape(), (4, 50, 50));
        assert_eq!(out[1].channels(), stack.channels());
        // 第二个窗口被平移到右下角: x0 = 20, y0 = 0.
        assert_eq!(out[1][(3, 0, 0, 2)], stack[(3, 0, 20, 2)]);
    }

    #[test]
    fn test_empty_crop() {
        let blank = ScanStack::from_gray(Array3::<u8>::zeros((3, 40, 40)));
        assert!(matches!(
            crop(&blank, &[Circle::new(20, 20, 10)]),
            Err(CropError::EmptyCrop(_))
        ));
        let nothing = ScanStack::from_gray(Array3::<u8>::zeros((0, 40, 40)));
        assert!(matches!(
            crop(&nothing, &[Circle::new(20, 20, 10)]),
            Err(CropError::EmptyCrop(_))
        ));
    }

    #[test]
    fn test_invalid_window_aborts_whole_crop() {
        let stack = two_tube_stack(1);
        let res = crop(&stack, &[Circle::new(100, 100, 40), Circle::new(0, 0, 300)]);
        assert!(matches!(res, Err(CropError::WindowTooLarge { .. })));
    }

    #[test]
    fn test_detect_then_crop() {
        let binary = threshold_gray(&two_tubes(), 50, 100).unwrap();
        let params = TubeParams {
            min_distance: 200,
            min_radius: 20,
            max_radius: 50,
            ..Default::default()
        };
        let mut circles = detect_tubes(&binary, &params).unwrap().unwrap();
        circles.sort_by_key(|c| c.x);

        let stack = two_tube_stack(3);
        let out = crop(&stack, &circles).unwrap();
        assert_eq!(out[0].shape(), (3, 80, 80));
        assert_eq!(out[1].shape(), (3, 60, 60));

        #[cfg(feature = "rayon")]
        assert_eq!(super::par_crop(&stack, &circles).unwrap(), out);
    }

    #[test]
    fn test_crop_around_center() {
        let stack = ScanStack::from_gray(Array3::<u8>::from_shape_fn((10, 20, 30), |(z, _, _)| {
            z as u8
        }));
        let roi = crop_around_center(&stack, 8, None, Some(4)).unwrap();
        assert_eq!(roi.shape(), (4, 8, 8));
        assert_eq!(roi[(0, 0, 0, 0)], 3);

        let roi = crop_around_center(&stack, 8, Some((0, 0, 29)), None).unwrap();
        assert_eq!(roi.shape(), (8, 8, 8));
        assert_eq!(roi[(0, 0, 0, 0)], 0);
        assert!(crop_around_center(&stack, 21, None, None).is_none());
    }
}
