use std::ops::{Index, Range};

use imageproc::geometric_transformations::Interpolation;
use itertools::{Itertools, MinMaxResult};
use ndarray::{Array3, Array4, ArrayView4, Axis};

use crate::{Idx2d, Idx3d};

mod sample;
pub mod slice;
pub mod window;

pub use sample::{Channels, Sample};

pub use slice::{ImgWriteRaw, ImgWriteVis, OwnedStackSlice, StackSlice};

pub use window::IntensityWindow;

/// 3D uCT 扫描堆栈, 由若干形状一致的二维切片组成.
///
/// 底层数据按 `(z, 高, 宽, 通道)` 布局, 通道数为 1 (灰度) 或 3 (RGB).
/// 样本类型由 [`Sample`] 约束, 目前支持 `u8` 和 `u16`.
///
/// # 注意
///
/// 堆栈在创建后不会被原地修改. 阈值化、缩放、旋转、裁剪等操作均返回新的堆栈.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanStack<T: Sample> {
    data: Array4<T>,
}

impl<T: Sample> Index<(usize, usize, usize, usize)> for ScanStack<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: (usize, usize, usize, usize)) -> &Self::Output {
        &self.data[index]
    }
}

impl<T: Sample> ScanStack<T> {
    /// 由 `(z, 高, 宽, 通道)` 数组直接创建. 通道数不是 1 或 3 时返回 `None`.
    pub fn from_array(data: Array4<T>) -> Option<Self> {
        Channels::from_len(data.len_of(Axis(3)))?;
        Some(Self { data })
    }

    /// 由 `(z, 高, 宽)` 单通道数组创建.
    #[inline]
    pub fn from_gray(data: Array3<T>) -> Self {
        Self {
            data: data.insert_axis(Axis(3)),
        }
    }

    /// 将若干切片按顺序拼接为堆栈.
    ///
    /// 若 `slices` 为空, 或切片之间形状、通道不一致, 则返回 `None`.
    pub fn from_slices(slices: &[OwnedStackSlice<T>]) -> Option<Self> {
        let views: Vec<_> = slices.iter().map(|s| s.data()).collect();
        let data = ndarray::stack(Axis(0), &views).ok()?;
        Self::from_array(data)
    }

    /// 沿 z 方向依次拼接若干堆栈.
    ///
    /// 若 `parts` 为空, 或切片形状、通道不一致, 则返回 `None`.
    pub fn concat(parts: &[ScanStack<T>]) -> Option<Self> {
        let views: Vec<_> = parts.iter().map(|s| s.data.view()).collect();
        let data = ndarray::concatenate(Axis(0), &views).ok()?;
        Self::from_array(data)
    }

    /// 获取数据形状 `(z, 高, 宽)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let (z, h, w, _) = self.data.dim();
        (z, h, w)
    }

    /// 通道布局.
    #[inline]
    pub fn channels(&self) -> Channels {
        Channels::from_len(self.data.len_of(Axis(3))).unwrap_or(Channels::Gray)
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取切片形状 `(高, 宽)`.
    #[inline]
    pub fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 获取体素个数 (不计通道).
    #[inline]
    pub fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 堆栈是否没有任何体素?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// 获取第 `z_index` 层切片视图. 越界时返回 `None`.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> Option<StackSlice<'_, T>> {
        (z_index < self.len_z()).then(|| StackSlice::new(self.data.index_axis(Axis(0), z_index)))
    }

    /// 获取能按升序迭代水平切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = StackSlice<'_, T>> {
        self.data.axis_iter(Axis(0)).map(StackSlice::new)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView4<'_, T> {
        self.data.view()
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array4<T> {
        self.data
    }

    /// 非零样本个数.
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| !v.is_zero()).count()
    }

    /// 所有样本是否都为 0?
    #[inline]
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|v| v.is_zero())
    }

    /// 复制 `[ys) × [xs)` 窗口内的数据, 作用于每一层切片. 窗口越界时返回 `None`.
    pub fn window(&self, ys: Range<usize>, xs: Range<usize>) -> Option<ScanStack<T>> {
        let (_, h, w) = self.shape();
        if ys.start > ys.end || xs.start > xs.end || ys.end > h || xs.end > w {
            return None;
        }
        let data = self
            .data
            .slice(ndarray::s![.., ys, xs, ..])
            .as_standard_layout()
            .into_owned();
        Some(Self { data })
    }

    /// 复制 `zs` 范围内的切片. 越界时返回 `None`.
    pub fn z_range(&self, zs: Range<usize>) -> Option<ScanStack<T>> {
        if zs.start > zs.end || zs.end > self.len_z() {
            return None;
        }
        let data = self.data.slice(ndarray::s![zs, .., .., ..]).to_owned();
        Some(Self { data })
    }

    /// 计算三个方向的最大值投影, 依次为轴向 (沿 z), 冠状 (沿高), 矢状 (沿宽).
    ///
    /// 投影形状分别为 `(高, 宽)`, `(z, 宽)`, `(z, 高)`.
    pub fn max_projections(&self) -> [OwnedStackSlice<T>; 3] {
        let max = |acc: &T, v: &T| if *v > *acc { *v } else { *acc };
        let project = |axis: usize| {
            let data = self.data.fold_axis(Axis(axis), T::min_value(), max);
            OwnedStackSlice::from_raw(data)
                .unwrap_or_else(|| OwnedStackSlice::from_gray(ndarray::Array2::zeros((0, 0))))
        };
        [project(0), project(1), project(2)]
    }

    /// 将不超过 8 位阈值 `thresh` (按样本范围等比放大) 的样本置 0, 其余保持不变.
    pub fn threshold_below(&self, thresh: u8) -> ScanStack<T> {
        let t = T::from_gray8(thresh);
        let data = self.data.mapv(|v| if v > t { v } else { T::zero() });
        Self { data }
    }

    /// 将堆栈按自身的最小值和最大值线性拉伸为 8 位.
    pub fn to_8bit(&self) -> ScanStack<u8> {
        let window = match self.data.iter().filter_map(|v| v.to_f32()).minmax() {
            MinMaxResult::NoElements => IntensityWindow::from_range(0.0, 0.0),
            MinMaxResult::OneElement(v) => IntensityWindow::from_range(v, v),
            MinMaxResult::MinMax(lo, hi) => IntensityWindow::from_range(lo, hi),
        };
        let data = self
            .data
            .mapv(|v| v.to_f32().and_then(|f| window.eval(f)).unwrap_or(0));
        ScanStack { data }
    }

    /// 将每一层切片绕切片中心逆时针旋转 `angle` 度.
    ///
    /// 堆栈为空时返回 `None`.
    pub fn rotated(&self, angle: f64, interpolation: Interpolation) -> Option<ScanStack<T>> {
        self.map_slices(|s| s.rotated(angle, None, interpolation))
    }

    /// 将每一层切片按百分比缩放. 切片个数不变.
    ///
    /// 堆栈为空时返回 `None`.
    pub fn resized(&self, percent: u32) -> Option<ScanStack<T>> {
        if percent == 100 {
            return Some(self.clone());
        }
        self.map_slices(|s| s.resized(percent))
    }

    /// 对每一层切片执行 `op`, 再将结果拼接为新的堆栈.
    fn map_slices<F>(&self, op: F) -> Option<ScanStack<T>>
    where
        F: Fn(StackSlice<'_, T>) -> Option<OwnedStackSlice<T>> + Sync + Send,
    {
        #[cfg(feature = "rayon")]
        let slices = {
            use rayon::iter::{IntoParallelIterator, ParallelIterator};
            self.data
                .axis_iter(Axis(0))
                .into_par_iter()
                .map(|v| op(StackSlice::new(v)))
                .collect::<Option<Vec<_>>>()?
        };
        #[cfg(not(feature = "rayon"))]
        let slices = self.slice_iter().map(op).collect::<Option<Vec<_>>>()?;
        Self::from_slices(&slices)
    }
}
