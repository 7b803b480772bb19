//! 切片的持久化存储.

use crate::{IntensityWindow, OwnedStackSlice, Sample, StackSlice};
use image::{ImageError, ImageResult};
use itertools::{Itertools, MinMaxResult};
use std::path::Path;

/// 表明一个可以通过 **可视化友好** 模式持久化存储的图像对象.
///
/// 图像会先按自身的最小值和最大值线性拉伸到 8 位, 再保存.
/// 因此 16 位扫描也能在普通看图软件中看清, 但强度不再可逆.
pub trait ImgWriteVis {
    /// 按照一定的可视化规则将图片保存到 `path` 路径.
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

/// 表明一个可以通过 **按原样** 模式持久化存储的图像对象.
///
/// 样本的位深和通道保持不变, 因此应使用支持 16 位的格式 (如 TIFF, PNG).
pub trait ImgWriteRaw {
    /// 按原样将图片保存到 `path` 路径.
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

/// 空切片无法编码.
fn empty_slice_error() -> ImageError {
    ImageError::Parameter(image::error::ParameterError::from_kind(
        image::error::ParameterErrorKind::DimensionMismatch,
    ))
}

fn save_raw_impl<T: Sample, P: AsRef<Path>>(s: &StackSlice<'_, T>, path: P) -> ImageResult<()> {
    s.to_dynamic().ok_or_else(empty_slice_error)?.save(path)
}

fn save_vis_impl<T: Sample, P: AsRef<Path>>(s: &StackSlice<'_, T>, path: P) -> ImageResult<()> {
    let window = match s.data().iter().filter_map(|v| v.to_f32()).minmax() {
        MinMaxResult::NoElements => return Err(empty_slice_error()),
        MinMaxResult::OneElement(v) => IntensityWindow::from_range(v, v),
        MinMaxResult::MinMax(lo, hi) => IntensityWindow::from_range(lo, hi),
    };
    let (h, w) = s.shape();
    let data = s.data();
    let buf = image::GrayImage::from_fn(w as u32, h as u32, |x, y| {
        // RGB 切片取通道均值.
        let lane = data.slice(ndarray::s![y as usize, x as usize, ..]);
        let mean = lane.iter().filter_map(|v| v.to_f32()).sum::<f32>() / lane.len() as f32;
        image::Luma([window.eval(mean).unwrap_or(0)])
    });
    buf.save(path)
}

macro_rules! impl_save {
    ($($slice: ty),+) => {
        $(
            /// 按原样存储.
            impl<T: Sample> ImgWriteRaw for $slice {
                fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
                    save_raw_impl(&self.as_immut(), path)
                }
            }

            /// 按切片自身的强度范围拉伸到 8 位灰度.
            impl<T: Sample> ImgWriteVis for $slice {
                fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
                    save_vis_impl(&self.as_immut(), path)
                }
            }
        )+
    };
}

impl_save!(StackSlice<'_, T>, OwnedStackSlice<T>);
