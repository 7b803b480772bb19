use crate::data::sample::{Channels, Sample};
use crate::Idx2d;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate, Interpolation};
use ndarray::{Array3, ArrayView3, Axis};

/// 不可变、借用的二维扫描切片, 形状为 (高, 宽, 通道).
pub struct StackSlice<'a, T: Sample> {
    /// 底层数据的轻量级视图, 借用于 [`crate::ScanStack`].
    data: ArrayView3<'a, T>,
}

/// 拥有所有权的二维扫描切片.
///
/// 主要用作读取、缩放、旋转等操作的中间结果, 随后被拼接为 [`crate::ScanStack`].
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedStackSlice<T: Sample> {
    data: Array3<T>,
}

/// BT.601 亮度权重, 与常见的 BGR/RGB 转灰度一致.
#[inline]
fn luma601(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

/// 对 `DynamicImage` 的各个变体统一执行旋转. 只接受 [`Sample::pack`] 产生的变体.
fn rotate_dynamic(
    img: DynamicImage,
    center: (f32, f32),
    theta: f32,
    interpolation: Interpolation,
) -> Option<DynamicImage> {
    let ans = match img {
        DynamicImage::ImageLuma8(b) => {
            DynamicImage::ImageLuma8(rotate(&b, center, theta, interpolation, Luma([0u8])))
        }
        DynamicImage::ImageLuma16(b) => {
            DynamicImage::ImageLuma16(rotate(&b, center, theta, interpolation, Luma([0u16])))
        }
        DynamicImage::ImageRgb8(b) => {
            DynamicImage::ImageRgb8(rotate(&b, center, theta, interpolation, Rgb([0u8; 3])))
        }
        DynamicImage::ImageRgb16(b) => {
            DynamicImage::ImageRgb16(rotate(&b, center, theta, interpolation, Rgb([0u16; 3])))
        }
        _ => return None,
    };
    Some(ans)
}

impl<'a, T: Sample> StackSlice<'a, T> {
    /// 直接初始化.
    #[inline]
    pub(crate) fn new(data: ArrayView3<'a, T>) -> Self {
        Self { data }
    }

    /// 重新借用为生命周期更短的切片.
    #[inline]
    pub fn as_immut(&self) -> StackSlice<'_, T> {
        StackSlice::new(self.data.view())
    }

    /// 获得底层数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 图像的分辨率 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        let (h, w, _) = self.data.dim();
        (h, w)
    }

    /// 通道布局.
    #[inline]
    pub fn channels(&self) -> Channels {
        // `ScanStack` 的构造保证了通道数合法.
        Channels::from_len(self.data.len_of(Axis(2))).unwrap_or(Channels::Gray)
    }

    /// 图像的像素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (h, w) = self.shape();
        h * w
    }

    /// 图像是否没有任何像素?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// 获取给定位置 (高, 宽, 通道) 的样本. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: (usize, usize, usize)) -> Option<&T> {
        self.data.get(pos)
    }

    /// 所有样本是否都为 0?
    #[inline]
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|v| v.is_zero())
    }

    /// 克隆自己, 获得一个拥有所有权的切片对象.
    pub fn to_owned(&self) -> OwnedStackSlice<T> {
        OwnedStackSlice {
            data: self.data.to_owned(),
        }
    }

    /// 转换为 8 位单通道灰度图. RGB 切片按 BT.601 权重求亮度.
    pub fn to_gray8(&self) -> GrayImage {
        let (h, w) = self.shape();
        let channels = self.channels();
        GrayImage::from_fn(w as u32, h as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let v = match channels {
                Channels::Gray => self.data[(y, x, 0)].to_gray8(),
                Channels::Rgb => luma601(
                    self.data[(y, x, 0)].to_gray8(),
                    self.data[(y, x, 1)].to_gray8(),
                    self.data[(y, x, 2)].to_gray8(),
                ),
            };
            Luma([v])
        })
    }

    /// 转换为 8 位 RGB 图. 灰度切片会复制到三个通道.
    pub fn to_rgb8(&self) -> RgbImage {
        let (h, w) = self.shape();
        let channels = self.channels();
        RgbImage::from_fn(w as u32, h as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            match channels {
                Channels::Gray => {
                    let v = self.data[(y, x, 0)].to_gray8();
                    Rgb([v, v, v])
                }
                Channels::Rgb => Rgb([
                    self.data[(y, x, 0)].to_gray8(),
                    self.data[(y, x, 1)].to_gray8(),
                    self.data[(y, x, 2)].to_gray8(),
                ]),
            }
        })
    }

    /// 行优先的样本序列.
    pub fn as_row_major_vec(&self) -> Vec<T> {
        self.data.iter().copied().collect()
    }

    /// 打包为可编码的图像. 仅在切片为空时返回 `None`.
    pub fn to_dynamic(&self) -> Option<DynamicImage> {
        T::pack(self.as_row_major_vec(), self.shape(), self.channels())
    }

    /// 按百分比缩放切片 (面积插值的近似: 三角滤波).
    ///
    /// `percent == 100` 时直接复制. 缩放后的宽高向下取整, 且至少为 1.
    pub fn resized(&self, percent: u32) -> Option<OwnedStackSlice<T>> {
        if percent == 100 {
            return Some(self.to_owned());
        }
        let (h, w) = self.shape();
        let nh = (h * percent as usize / 100).max(1) as u32;
        let nw = (w * percent as usize / 100).max(1) as u32;
        let img = self.to_dynamic()?.resize_exact(nw, nh, FilterType::Triangle);
        Some(OwnedStackSlice::from_dynamic(img, self.channels()))
    }

    /// 将切片逆时针旋转 `angle` 度, 旋转中心 `center` 为 `(x, y)`, 缺省为图像中心.
    ///
    /// 旋转后尺寸不变, 超出部分被裁掉, 空出部分填 0.
    /// 扫描应使用 [`Interpolation::Bilinear`], 标签应使用 [`Interpolation::Nearest`].
    pub fn rotated(
        &self,
        angle: f64,
        center: Option<(f32, f32)>,
        interpolation: Interpolation,
    ) -> Option<OwnedStackSlice<T>> {
        let (h, w) = self.shape();
        let center = center.unwrap_or((w as f32 / 2.0, h as f32 / 2.0));
        // imageproc 以顺时针为正.
        let theta = -(angle.to_radians() as f32);
        let img = rotate_dynamic(self.to_dynamic()?, center, theta, interpolation)?;
        Some(OwnedStackSlice::from_dynamic(img, self.channels()))
    }
}

impl<T: Sample> OwnedStackSlice<T> {
    /// 由 (高, 宽, 通道) 数组直接创建. 通道数必须为 1 或 3, 否则返回 `None`.
    pub fn from_raw(data: Array3<T>) -> Option<Self> {
        Channels::from_len(data.len_of(Axis(2)))?;
        Some(Self { data })
    }

    /// 由单通道 (高, 宽) 数据创建.
    pub fn from_gray(data: ndarray::Array2<T>) -> Self {
        Self {
            data: data.insert_axis(Axis(2)),
        }
    }

    /// 由解码的图像创建, 按 `channels` 转换通道.
    pub fn from_dynamic(img: DynamicImage, channels: Channels) -> Self {
        let (buf, (h, w)) = T::unpack(img, channels);
        let data = Array3::from_shape_vec((h, w, channels.len()), buf)
            .unwrap_or_else(|_| Array3::zeros((0, 0, channels.len())));
        Self { data }
    }

    /// 获得不可变切片引用.
    #[inline]
    pub fn as_immut(&self) -> StackSlice<'_, T> {
        StackSlice::new(self.data.view())
    }

    /// 获得底层数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 图像的分辨率 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.as_immut().shape()
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array3<T> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::OwnedStackSlice;
    use crate::Channels;
    use imageproc::geometric_transformations::Interpolation;
    use ndarray::{Array2, Array3};

    #[test]
    fn test_rgb_to_gray_weights() {
        let mut data = Array3::<u8>::zeros((1, 3, 3));
        data[(0, 0, 0)] = 255;
        data[(0, 1, 1)] = 255;
        data[(0, 2, 2)] = 255;
        let s = OwnedStackSlice::from_raw(data).unwrap();
        let g = s.as_immut().to_gray8();
        assert_eq!(g.get_pixel(0, 0).0[0], 76);
        assert_eq!(g.get_pixel(1, 0).0[0], 150);
        assert_eq!(g.get_pixel(2, 0).0[0], 29);
    }

    #[test]
    fn test_reject_bad_channels() {
        assert!(OwnedStackSlice::from_raw(Array3::<u8>::zeros((2, 2, 2))).is_none());
    }

    #[test]
    fn test_resize_percent() {
        let s = OwnedStackSlice::from_gray(Array2::<u16>::from_elem((100, 50), 1000));
        let r = s.as_immut().resized(40).unwrap();
        assert_eq!(r.shape(), (40, 20));
        // 均匀图像缩放后仍然均匀.
        assert!(r.into_raw().iter().all(|v| *v == 1000));
    }

    #[test]
    fn test_rotate_half_turn() {
        // 上半部分为亮, 旋转半周后应变为下半部分为亮.
        let mut data = Array2::<u8>::zeros((6, 6));
        data.slice_mut(ndarray::s![..3, ..]).fill(200);
        let s = OwnedStackSlice::from_gray(data);
        let r = s
            .as_immut()
            .rotated(180.0, None, Interpolation::Nearest)
            .unwrap();
        assert_eq!(r.as_immut().channels(), Channels::Gray);
        let r = r.into_raw();
        assert_eq!(r[(5, 2, 0)], 200);
        assert_eq!(r[(0, 2, 0)], 0);
    }
}
