/// 强度窗口, 由下限和上限组成.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
/// 它有两种用途: 检查阈值化参数 `[low, high]` 是否合法,
/// 以及作为把任意强度线性拉伸到 8 位灰度的映射.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntensityWindow {
    lower: f32,
    upper: f32,
}

impl IntensityWindow {
    /// 构建强度窗口.
    ///
    /// `lower` 和 `upper` 必须是有限值且 `lower < upper`, 否则返回 `None`.
    pub fn new(lower: f32, upper: f32) -> Option<IntensityWindow> {
        if lower.is_finite() && upper.is_finite() && lower < upper {
            Some(Self { lower, upper })
        } else {
            None
        }
    }

    /// 以 8 位强度构建窗口. `low >= high` 时返回 `None`.
    #[inline]
    pub fn from_gray8(low: u8, high: u8) -> Option<IntensityWindow> {
        Self::new(low as f32, high as f32)
    }

    /// 由数据的最小值和最大值构建拉伸窗口.
    ///
    /// 当 `min == max` 时窗宽退化为 1, 此时所有数据都会映射为 0.
    pub fn from_range(min: f32, max: f32) -> IntensityWindow {
        if max > min {
            Self {
                lower: min,
                upper: max,
            }
        } else {
            Self {
                lower: min,
                upper: min + 1.0,
            }
        }
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.lower
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.upper
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.upper - self.lower
    }

    /// 将 `v` 限制在 `[lower, upper]` 之内.
    #[inline]
    pub fn clamp(&self, v: f32) -> f32 {
        v.clamp(self.lower, self.upper)
    }

    /// 求在当前窗口设置下, `v` 对应的灰度图像素整数值 (0 <= value <= 255).
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval(&self, v: f32) -> Option<u8> {
        if !v.is_finite() {
            return None;
        }
        if v <= self.lower {
            Some(u8::MIN)
        } else if v >= self.upper {
            Some(u8::MAX)
        } else {
            // 255, not 256.
            Some((((v - self.lower) / self.width()) * 255.0) as u8)
        }
    }

    /// 求在当前窗口设置下, `v` 对应的灰度图像素分布点 (0.0 <= value <= 255.0).
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval_f32(&self, v: f32) -> Option<f32> {
        if !v.is_finite() {
            return None;
        }
        Some((self.clamp(v) - self.lower) / self.width() * 255.0)
    }
}
