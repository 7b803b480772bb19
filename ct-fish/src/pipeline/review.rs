//! 检测结果的确认.
//!
//! 检测得到的圆按票数排序, 与样品管中鱼的编号顺序无关. 确认者查看标注预览图,
//! 把圆排成与鱼编号一一对应的顺序, 或者拒绝本次检测.

use crate::detect::{Circle, CircleSet};
use image::RgbImage;

/// 确认检测结果的能力. 交互式界面和无人值守的批处理都通过它接入流水线.
pub trait Reviewer {
    /// 查看 `preview` 和检测到的 `circles`, 返回与 `fish` 一一对应的圆.
    ///
    /// 返回 `Err` 表示拒绝, 附带原因. 返回的圆个数不必等于 `fish.len()`,
    /// 流水线会在之后核对数量.
    fn review(&self, fish: &[u32], preview: &RgbImage, circles: &[Circle])
        -> Result<CircleSet, String>;
}

/// 无人值守: 按检测顺序接受.
#[derive(Copy, Clone, Debug, Default)]
pub struct Headless;

impl Reviewer for Headless {
    fn review(&self, _: &[u32], _: &RgbImage, circles: &[Circle]) -> Result<CircleSet, String> {
        Ok(circles.to_vec())
    }
}

/// 按阅读顺序 (先上后下, 同一行先左后右) 排列.
///
/// 圆心纵坐标相差不超过 `row_tolerance` 像素的圆视为同一行.
#[derive(Copy, Clone, Debug, Default)]
pub struct ReadingOrder {
    /// 同一行允许的纵坐标差.
    pub row_tolerance: i32,
}

impl Reviewer for ReadingOrder {
    fn review(&self, _: &[u32], _: &RgbImage, circles: &[Circle]) -> Result<CircleSet, String> {
        let mut v = circles.to_vec();
        v.sort_by_key(|c| (c.y, c.x));
        // 把纵坐标相近的圆归为一行, 行内按横坐标排序.
        let mut rows: Vec<Vec<Circle>> = Vec::new();
        for c in v {
            match rows.last_mut() {
                Some(row) if (c.y - row[0].y).abs() <= self.row_tolerance => row.push(c),
                _ => rows.push(vec![c]),
            }
        }
        Ok(rows
            .into_iter()
            .flat_map(|mut row| {
                row.sort_by_key(|c| c.x);
                row
            })
            .collect())
    }
}

/// 按事先给定的下标重新排列, 第 `i` 条鱼取检测结果中的第 `order[i]` 个圆.
#[derive(Clone, Debug, Default)]
pub struct FixedOrder(pub Vec<usize>);

impl Reviewer for FixedOrder {
    fn review(&self, _: &[u32], _: &RgbImage, circles: &[Circle]) -> Result<CircleSet, String> {
        self.0
            .iter()
            .map(|&i| {
                circles
                    .get(i)
                    .copied()
                    .ok_or_else(|| format!("下标 {i} 越界 (共 {} 个圆)", circles.len()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{FixedOrder, Headless, ReadingOrder, Reviewer};
    use crate::detect::Circle;
    use image::RgbImage;

    fn circles() -> Vec<Circle> {
        vec![
            Circle::new(400, 105, 30),
            Circle::new(100, 400, 30),
            Circle::new(100, 100, 30),
        ]
    }

    #[test]
    fn test_headless_keeps_order() {
        let preview = RgbImage::new(1, 1);
        assert_eq!(Headless.review(&[1, 2, 3], &preview, &circles()).unwrap(), circles());
    }

    #[test]
    fn test_reading_order() {
        let preview = RgbImage::new(1, 1);
        let strict = ReadingOrder { row_tolerance: 0 };
        let v = strict.review(&[], &preview, &circles()).unwrap();
        assert_eq!(v, vec![circles()[2], circles()[0], circles()[1]]);

        // 容差内的两个圆属于同一行, 即使右边的更靠上.
        let loose = ReadingOrder { row_tolerance: 10 };
        let mut input = circles();
        input[0].y = 95;
        let v = loose.review(&[], &preview, &input).unwrap();
        assert_eq!(v, vec![input[2], input[0], input[1]]);
    }

    #[test]
    fn test_fixed_order() {
        let preview = RgbImage::new(1, 1);
        let v = FixedOrder(vec![2, 0]).review(&[], &preview, &circles()).unwrap();
        assert_eq!(v, vec![circles()[2], circles()[0]]);
        assert!(FixedOrder(vec![3]).review(&[], &preview, &circles()).is_err());
    }
}
