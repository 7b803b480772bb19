//! 最大值投影图片的保存与读取.

use super::{DatasetError, DatasetLayout, ProjectionAxis};
use crate::{Channels, ImgWriteRaw, OwnedStackSlice, Sample, ScanStack};
use std::fs;
use std::path::PathBuf;

/// 计算鱼 `n` 的三个最大值投影, 按原样保存为 PNG. 返回三个文件的路径 (z, y, x).
pub fn save_projections<T: Sample>(
    layout: &DatasetLayout,
    n: u32,
    stack: &ScanStack<T>,
) -> Result<[PathBuf; 3], DatasetError> {
    let projections = stack.max_projections();
    let mut paths: [PathBuf; 3] = Default::default();
    for ((axis, projection), path) in ProjectionAxis::ALL
        .iter()
        .zip(projections.iter())
        .zip(paths.iter_mut())
    {
        let p = layout.projection_path(*axis, n);
        if let Some(dir) = p.parent() {
            fs::create_dir_all(dir)?;
        }
        projection.save_raw(&p)?;
        *path = p;
    }
    log::debug!("保存鱼 {n} 的最大值投影");
    Ok(paths)
}

/// 读取已保存的投影 (z, y, x), 不重新计算.
pub fn read_projections<T: Sample>(
    layout: &DatasetLayout,
    n: u32,
    channels: Channels,
) -> Result<[OwnedStackSlice<T>; 3], DatasetError> {
    let read = |axis: ProjectionAxis| -> Result<OwnedStackSlice<T>, DatasetError> {
        let img = image::open(layout.projection_path(axis, n))?;
        Ok(OwnedStackSlice::from_dynamic(img, channels))
    };
    Ok([
        read(ProjectionAxis::Z)?,
        read(ProjectionAxis::Y)?,
        read(ProjectionAxis::X)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::{read_projections, save_projections};
    use crate::dataset::DatasetLayout;
    use crate::{Channels, ScanStack};
    use ndarray::Array3;

    #[test]
    fn test_projection_files() {
        let root = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(root.path());
        let mut data = Array3::<u16>::zeros((3, 4, 5));
        data[(1, 2, 3)] = 60000;
        let stack = ScanStack::from_gray(data);

        let paths = save_projections(&layout, 40, &stack).unwrap();
        assert_eq!(paths[0], root.path().join("projections/z/z_40.png"));
        assert_eq!(paths[2], root.path().join("projections/x/x_40.png"));

        let [z, y, x] = read_projections::<u16>(&layout, 40, Channels::Gray).unwrap();
        assert_eq!(z.shape(), (4, 5));
        assert_eq!(y.shape(), (3, 5));
        assert_eq!(x.shape(), (3, 4));
        assert_eq!(z.data()[(2, 3, 0)], 60000);
        assert_eq!(y.data()[(1, 3, 0)], 60000);
        assert_eq!(x.data()[(1, 2, 0)], 60000);
        assert!(read_projections::<u16>(&layout, 41, Channels::Gray).is_err());
    }
}
