//! 梯度法 Hough 圆检测.
//!
//! 二值图像中每个边缘像素沿 (平滑后图像的) 梯度方向正反两侧投票,
//! 同一个圆的边缘投票会汇聚于圆心. 累加器中的局部极大值按票数从高到低依次成为圆心,
//! 与已接受圆心距离过近的会被丢弃. 半径由边缘到圆心的距离直方图估计.
//!
//! 坐标均使用连续坐标: 像素 `(x, y)` 覆盖 `[x, x + 1) × [y, y + 1)`,
//! 其中心位于 `(x + 0.5, y + 0.5)`. 输出时换算回像素下标.

use super::TubeParams;
use binary_heap_plus::BinaryHeap;
use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

/// 四邻域偏移.
const NEIGHBOURS4: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// 半径估计时, 与最佳半径相差不超过该值的边缘距离参与求均值.
const RADIUS_BAND: f32 = 1.5;

/// 检测到的圆, 坐标为像素下标 (浮点).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct HoughCircle {
    /// 圆心横坐标.
    pub x: f32,

    /// 圆心纵坐标.
    pub y: f32,

    /// 半径.
    pub r: f32,

    /// 圆心所在累加器单元的票数.
    pub votes: u32,
}

/// 累加器. 单元边长为 `dp` 像素.
struct Accumulator {
    dp: f32,
    width: usize,
    height: usize,
    votes: Vec<u32>,
}

impl Accumulator {
    fn new(img_w: u32, img_h: u32, dp: f32) -> Self {
        let width = (img_w as f32 / dp).ceil() as usize;
        let height = (img_h as f32 / dp).ceil() as usize;
        Self {
            dp,
            width,
            height,
            votes: vec![0; width * height],
        }
    }

    /// 连续坐标 `(cx, cy)` 所在的单元. 越界时返回 `None`.
    #[inline]
    fn cell(&self, cx: f32, cy: f32) -> Option<(usize, usize)> {
        if cx < 0.0 || cy < 0.0 {
            return None;
        }
        let (i, j) = ((cx / self.dp) as usize, (cy / self.dp) as usize);
        (i < self.width && j < self.height).then_some((i, j))
    }

    #[inline]
    fn at(&self, i: usize, j: usize) -> u32 {
        self.votes[j * self.width + i]
    }

    /// 沿 `(dx, dy)` 方向从 `(x0, y0)` 出发, 对 `radii` 中每个距离投一票.
    /// 连续落入同一单元的投票只计一次.
    fn cast(&mut self, (x0, y0): (f32, f32), (dx, dy): (f32, f32), radii: (u32, u32)) {
        let mut last = None;
        for r in radii.0..=radii.1 {
            let r = r as f32;
            let Some(cell) = self.cell(x0 + dx * r, y0 + dy * r) else {
                break;
            };
            if last == Some(cell) {
                continue;
            }
            last = Some(cell);
            self.votes[cell.1 * self.width + cell.0] += 1;
        }
    }

    /// 收集票数不少于 `threshold` 的 8 邻域局部极大单元.
    /// 票数相同的相邻单元中, 只有行优先序最靠前的那个被保留.
    fn local_maxima(&self, threshold: u32) -> Vec<(usize, usize)> {
        let mut ans = Vec::new();
        for j in 0..self.height {
            for i in 0..self.width {
                let v = self.at(i, j);
                if v == 0 || v < threshold {
                    continue;
                }
                let idx = j * self.width + i;
                let is_max = self.neighbours8(i, j).all(|(ni, nj)| {
                    let nv = self.at(ni, nj);
                    nv < v || (nv == v && nj * self.width + ni > idx)
                });
                if is_max {
                    ans.push((i, j));
                }
            }
        }
        ans
    }

    /// 单元 `(i, j)` 的 8 邻域中不越界的单元.
    fn neighbours8(&self, i: usize, j: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        (-1i64..=1)
            .flat_map(|b| (-1i64..=1).map(move |a| (a, b)))
            .filter(|&(a, b)| a != 0 || b != 0)
            .filter_map(move |(a, b)| {
                let (ni, nj) = (i as i64 + a, j as i64 + b);
                (ni >= 0 && nj >= 0 && (ni as usize) < self.width && (nj as usize) < self.height)
                    .then_some((ni as usize, nj as usize))
            })
    }

    /// 以 3×3 邻域票数为权, 求圆心的连续坐标.
    fn refine(&self, i: usize, j: usize) -> (f32, f32) {
        let (mut sw, mut sx, mut sy) = (0.0, 0.0, 0.0);
        for (ni, nj) in self.neighbours8(i, j).chain(std::iter::once((i, j))) {
            let w = self.at(ni, nj) as f32;
            sw += w;
            sx += w * (ni as f32 + 0.5) * self.dp;
            sy += w * (nj as f32 + 0.5) * self.dp;
        }
        (sx / sw, sy / sw)
    }
}

/// 二值图像中的前景边缘.
struct Edges {
    /// 边缘像素的下标.
    pixels: Vec<(u32, u32)>,

    /// 前景像素与其四邻域背景像素之间的边界中点 (连续坐标).
    cracks: Vec<(f32, f32)>,
}

impl Edges {
    /// 非零像素为前景. 至少有一个 (不越界的) 四邻域背景像素的前景像素是边缘像素.
    fn collect(binary: &GrayImage) -> Self {
        let (w, h) = binary.dimensions();
        let is_fg = |x: i64, y: i64| -> Option<bool> {
            (x >= 0 && y >= 0 && x < w as i64 && y < h as i64)
                .then(|| binary.get_pixel(x as u32, y as u32).0[0] != 0)
        };
        let mut pixels = Vec::new();
        let mut cracks = Vec::new();
        for (x, y, p) in binary.enumerate_pixels() {
            if p.0[0] == 0 {
                continue;
            }
            let mut on_edge = false;
            for (a, b) in NEIGHBOURS4 {
                if is_fg(x as i64 + a, y as i64 + b) == Some(false) {
                    on_edge = true;
                    cracks.push((
                        x as f32 + 0.5 + a as f32 * 0.5,
                        y as f32 + 0.5 + b as f32 * 0.5,
                    ));
                }
            }
            if on_edge {
                pixels.push((x, y));
            }
        }
        Self { pixels, cracks }
    }
}

/// 估计圆心 `(cx, cy)` 对应的半径.
///
/// 边界中点到圆心的距离按整数分箱, 取三箱滑动和最大的箱 (并列时取较大半径),
/// 再对距该箱不超过 [`RADIUS_BAND`] 的距离求均值. 范围内没有任何边界点时返回 `None`.
fn estimate_radius(cracks: &[(f32, f32)], (cx, cy): (f32, f32), radii: (u32, u32)) -> Option<f32> {
    let (lo, hi) = radii;
    let dist: Vec<f32> = cracks
        .iter()
        .map(|&(x, y)| ((x - cx).powi(2) + (y - cy).powi(2)).sqrt())
        .collect();
    let mut hist = vec![0u32; (hi - lo + 1) as usize];
    for d in dist.iter() {
        let bin = d.round();
        if bin >= lo as f32 && bin <= hi as f32 {
            hist[bin as usize - lo as usize] += 1;
        }
    }
    let support = |k: usize| {
        hist[k] + k.checked_sub(1).map_or(0, |p| hist[p]) + hist.get(k + 1).copied().unwrap_or(0)
    };
    let best = (0..hist.len())
        .filter(|&k| hist[k] > 0)
        .max_by_key(|&k| (support(k), k))?;
    let best = (best as u32 + lo) as f32;

    let (sum, cnt) = dist
        .iter()
        .filter(|d| (**d - best).abs() <= RADIUS_BAND)
        .fold((0.0f32, 0u32), |(s, c), d| (s + d, c + 1));
    (cnt > 0).then(|| sum / cnt as f32)
}

/// 在二值图像 `binary` 上检测圆, 结果按票数从高到低排列.
///
/// 使用 `params` 中的 `dp`, `min_distance`, `min_radius`, `max_radius`,
/// `accumulator_threshold` 与 `blur_sigma`. `max_radius == 0` 表示不限制 (取图像长边),
/// 小于 1 的 `dp` 按 1 处理.
pub(crate) fn hough_circles(binary: &GrayImage, params: &TubeParams) -> Vec<HoughCircle> {
    let (w, h) = binary.dimensions();
    let r_lo = params.min_radius.max(1);
    let r_hi = if params.max_radius == 0 {
        w.max(h)
    } else {
        params.max_radius
    };
    if w < 3 || h < 3 || r_hi < r_lo {
        return Vec::new();
    }
    // 累加器不能比图像更精细.
    let dp = params.dp.max(1.0);

    let edges = Edges::collect(binary);
    if edges.pixels.is_empty() {
        return Vec::new();
    }

    // 梯度在平滑后的图像上求, 以获得平滑的法向.
    let smoothed = if params.blur_sigma > 0.0 {
        gaussian_blur_f32(binary, params.blur_sigma)
    } else {
        binary.clone()
    };
    let gx = horizontal_sobel(&smoothed);
    let gy = vertical_sobel(&smoothed);

    let mut acc = Accumulator::new(w, h, dp);
    for &(x, y) in edges.pixels.iter() {
        let (dx, dy) = (gx.get_pixel(x, y).0[0] as f32, gy.get_pixel(x, y).0[0] as f32);
        let mag = (dx * dx + dy * dy).sqrt();
        if mag == 0.0 {
            continue;
        }
        let (dx, dy) = (dx / mag, dy / mag);
        let origin = (x as f32 + 0.5, y as f32 + 0.5);
        acc.cast(origin, (dx, dy), (r_lo, r_hi));
        acc.cast(origin, (-dx, -dy), (r_lo, r_hi));
    }

    // 堆顶票数最多; 票数相同时行优先序靠前者优先.
    let mut heap = BinaryHeap::new_by(|a: &(u32, usize, usize), b: &(u32, usize, usize)| {
        a.0.cmp(&b.0)
            .then_with(|| (b.2, b.1).cmp(&(a.2, a.1)))
    });
    for (i, j) in acc.local_maxima(params.accumulator_threshold) {
        heap.push((acc.at(i, j), i, j));
    }
    log::debug!(
        "Hough: {} 个边缘像素, {} 个候选圆心",
        edges.pixels.len(),
        heap.len()
    );

    let min_dist_sq = (params.min_distance as f32).powi(2);
    let mut ans: Vec<HoughCircle> = Vec::new();
    while let Some((votes, i, j)) = heap.pop() {
        let (cx, cy) = acc.refine(i, j);
        let crowded = ans.iter().any(|c| {
            let (ox, oy) = (c.x + 0.5, c.y + 0.5);
            (ox - cx).powi(2) + (oy - cy).powi(2) < min_dist_sq
        });
        if crowded {
            continue;
        }
        let Some(r) = estimate_radius(&edges.cracks, (cx, cy), (r_lo, r_hi)) else {
            continue;
        };
        log::debug!("Hough: 圆心 ({cx:.1}, {cy:.1}), 半径 {r:.2}, 票数 {votes}");
        ans.push(HoughCircle {
            x: cx - 0.5,
            y: cy - 0.5,
            r,
            votes,
        });
    }
    ans
}
