//! 体素样本类型与通道布局.

use crate::Idx2d;
use image::{DynamicImage, ImageBuffer};
use num::{Bounded, NumCast, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// 切片的通道布局.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Channels {
    /// 单通道灰度.
    Gray,

    /// 三通道 RGB.
    Rgb,
}

impl Channels {
    /// 每个像素的样本数.
    #[inline]
    pub const fn len(self) -> usize {
        match self {
            Channels::Gray => 1,
            Channels::Rgb => 3,
        }
    }

    /// 由每像素样本数反推通道布局. 仅支持 1 和 3.
    #[inline]
    pub const fn from_len(n: usize) -> Option<Self> {
        match n {
            1 => Some(Channels::Gray),
            3 => Some(Channels::Rgb),
            _ => None,
        }
    }
}

/// 扫描堆栈中单个样本的类型. 目前实现了 `u8` 和 `u16`.
///
/// 8 位强度 `v` 与本类型之间按 `v * (MAX / 255)` 等比换算,
/// 这样阈值可以统一用更直观的 0-255 范围给出.
pub trait Sample:
    Copy
    + Default
    + PartialOrd
    + Debug
    + Send
    + Sync
    + Zero
    + Bounded
    + ToPrimitive
    + NumCast
    + 'static
{
    /// 将解码后的图像转换为行优先 (高, 宽, 通道) 的样本序列, 并返回 (高, 宽).
    fn unpack(img: DynamicImage, channels: Channels) -> (Vec<Self>, Idx2d);

    /// 将行优先样本序列打包为可编码的图像. 长度与形状不符时返回 `None`.
    fn pack(buf: Vec<Self>, shape: Idx2d, channels: Channels) -> Option<DynamicImage>;

    /// 映射到 8 位强度.
    fn to_gray8(self) -> u8;

    /// 将 8 位强度等比放大到本类型的取值范围.
    fn from_gray8(v: u8) -> Self;

    /// 从浮点数饱和转换.
    #[inline]
    fn saturating_from_f32(v: f32) -> Self {
        <Self as NumCast>::from(v.round().clamp(0.0, Self::max_f32())).unwrap_or_else(Self::zero)
    }

    /// 本类型最大值的浮点表示.
    #[inline]
    fn max_f32() -> f32 {
        <Self as Bounded>::max_value().to_f32().unwrap_or(f32::MAX)
    }
}

macro_rules! impl_sample {
    ($t: ty, $luma: ident, $rgb: ident, $gray_var: ident, $rgb_var: ident, $to_gray8: expr, $from_gray8: expr) => {
        impl Sample for $t {
            fn unpack(img: DynamicImage, channels: Channels) -> (Vec<Self>, Idx2d) {
                let (h, w) = (img.height() as usize, img.width() as usize);
                let buf = match channels {
                    Channels::Gray => img.$luma().into_raw(),
                    Channels::Rgb => img.$rgb().into_raw(),
                };
                (buf, (h, w))
            }

            fn pack(buf: Vec<Self>, (h, w): Idx2d, channels: Channels) -> Option<DynamicImage> {
                let (w, h) = (u32::try_from(w).ok()?, u32::try_from(h).ok()?);
                match channels {
                    Channels::Gray => ImageBuffer::from_raw(w, h, buf).map(DynamicImage::$gray_var),
                    Channels::Rgb => ImageBuffer::from_raw(w, h, buf).map(DynamicImage::$rgb_var),
                }
            }

            #[inline]
            fn to_gray8(self) -> u8 {
                ($to_gray8)(self)
            }

            #[inline]
            fn from_gray8(v: u8) -> Self {
                ($from_gray8)(v)
            }
        }
    };
}

impl_sample!(u8, into_luma8, into_rgb8, ImageLuma8, ImageRgb8, |v: u8| v, |v: u8| v);
impl_sample!(
    u16,
    into_luma16,
    into_rgb16,
    ImageLuma16,
    ImageRgb16,
    |v: u16| (v / 257) as u8,
    |v: u8| v as u16 * 257
);

#[cfg(test)]
mod tests {
    use super::{Channels, Sample};

    #[test]
    fn test_u16_scale_round_trip() {
        for v in [0u8, 1, 50, 128, 254, 255] {
            assert_eq!(u16::from_gray8(v).to_gray8(), v);
        }
        assert_eq!(u16::from_gray8(255), u16::MAX);
    }

    #[test]
    fn test_pack_rejects_bad_length() {
        assert!(u8::pack(vec![0; 5], (2, 3), Channels::Gray).is_none());
        assert!(u8::pack(vec![0; 18], (2, 3), Channels::Rgb).is_some());
    }

    #[test]
    fn test_saturating_from_f32() {
        assert_eq!(u8::saturating_from_f32(300.0), 255);
        assert_eq!(u8::saturating_from_f32(-4.0), 0);
        assert_eq!(u16::saturating_from_f32(1000.4), 1000);
    }
}
