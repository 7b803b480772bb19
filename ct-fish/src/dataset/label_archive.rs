//! 器官标签与压缩扫描的 npz 归档.
//!
//! 每个器官一个归档文件, 以鱼编号 (`{n}.npy`) 为键保存 `(z, 高, 宽)` 的 `u8` 标签;
//! 模板标签保存在单独的模板归档中, 键为 `0`. 压缩扫描按数据集名称分别归档,
//! 以 `(z, 高, 宽, 通道)` 的 `u16` 数组保存.

use super::clean::{alignment_angle, read_metadata};
use super::{DatasetError, DatasetLayout, Organ};
use crate::consts::TEMPLATE_KEY;
use crate::{Sample, ScanStack};
use imageproc::geometric_transformations::Interpolation;
use ndarray::{Array, Array3, Array4, Axis, Dimension, Ix3, Ix4, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, ReadableElement, WritableElement};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// 归档中鱼 `n` 对应的文件名.
#[inline]
fn entry_name(n: u32) -> String {
    format!("{n}.npy")
}

/// 打开 `LabelArchive` 错误.
#[derive(Debug)]
pub enum OpenArchiveError {
    /// workers 太大. 最多支持 64.
    TooManyWorkers(usize),

    /// 打开 npz 文件错误.
    ReadNpzError(ReadNpzError),

    /// 其他底层 I/O 错误.
    IoError(std::io::Error),
}

impl fmt::Display for OpenArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenArchiveError::TooManyWorkers(n) => write!(f, "工作通道过多: {n} (最多 64)"),
            OpenArchiveError::ReadNpzError(e) => write!(f, "打开 npz 错误: {e}"),
            OpenArchiveError::IoError(e) => write!(f, "I/O 错误: {e}"),
        }
    }
}

impl std::error::Error for OpenArchiveError {}

impl From<OpenArchiveError> for DatasetError {
    fn from(e: OpenArchiveError) -> Self {
        match e {
            OpenArchiveError::TooManyWorkers(n) => {
                DatasetError::InvalidRecord(format!("工作通道过多: {n}"))
            }
            OpenArchiveError::ReadNpzError(e) => DatasetError::ReadNpz(e),
            OpenArchiveError::IoError(e) => DatasetError::Io(e),
        }
    }
}

/// 标签归档.
///
/// 该结构可用于建模硬盘上已存储的某个器官的全部 3D 标签. 内部持有同一文件的多个
/// 只读句柄, 多个线程可以同时读取不同的标签.
pub struct LabelArchive {
    entries: Vec<Mutex<NpzReader<File>>>,
    turn: AtomicUsize,
}

impl LabelArchive {
    /// 初始化.
    ///
    /// `workers` 指定了底层工作通道的个数, 最大为 64. 系统会从路径 `p` 打开文件
    /// `workers` 次, 并为每个打开通道指定一个排他入口点 (以期获得更高的并行度).
    pub fn open<P: AsRef<Path>>(workers: NonZeroUsize, p: P) -> Result<Self, OpenArchiveError> {
        let workers = workers.get();
        if workers > 64 {
            return Err(OpenArchiveError::TooManyWorkers(workers));
        }
        let mut v = Vec::with_capacity(workers);
        for _ in 0..workers {
            let file = OpenOptions::new()
                .read(true)
                .open(p.as_ref())
                .map_err(OpenArchiveError::IoError)?;
            v.push(Mutex::new(
                NpzReader::new(file).map_err(OpenArchiveError::ReadNpzError)?,
            ));
        }
        Ok(Self {
            entries: v,
            turn: AtomicUsize::new(0),
        })
    }

    /// 获取鱼 `n` 的 3D 标签.
    pub fn label(&self, n: u32) -> Result<Array3<u8>, ReadNpzError> {
        self.with_reader(|r| r.by_name::<OwnedRepr<u8>, Ix3>(&entry_name(n)))
    }

    /// 归档中所有标签的鱼编号, 按升序. 不符合 `{n}.npy` 形式的文件被忽略.
    pub fn keys(&self) -> Result<Vec<u32>, ReadNpzError> {
        let names = self.with_reader(|r| r.names())?;
        let mut v: Vec<u32> = names
            .iter()
            .filter_map(|s| s.strip_suffix(".npy")?.parse().ok())
            .collect();
        v.sort_unstable();
        Ok(v)
    }

    /// 工作通道个数.
    #[inline]
    pub fn worker_len(&self) -> usize {
        self.entries.len()
    }

    /// 获取底层 npz 文件的 3D 标签个数.
    pub fn label_len(&self) -> usize {
        self.with_reader(|r| r.len())
    }

    fn with_reader<R, F: FnOnce(&mut NpzReader<File>) -> R>(&self, op: F) -> R {
        let slot = self.turn.fetch_add(1, Ordering::Relaxed) % self.worker_len();
        // 读取失败不会破坏 reader 的状态, 中毒后继续使用.
        let mut reader = self.entries[slot]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        op(&mut *reader)
    }
}

/// 把 `array` 以 `key` 写入 npz 文件 `path`, 保留其中已有的其他数组.
///
/// 先写入同目录下的临时文件再重命名, 中途失败不会破坏原归档.
/// `key` 已存在且 `overwrite` 为假时返回 [`DatasetError::KeyExists`].
fn rewrite_npz<A, D>(
    path: &Path,
    key: &str,
    array: &Array<A, D>,
    overwrite: bool,
) -> Result<(), DatasetError>
where
    A: ReadableElement + WritableElement,
    D: Dimension,
{
    let mut kept: Vec<(String, Array<A, D>)> = Vec::new();
    if path.is_file() {
        let mut reader = NpzReader::new(File::open(path)?)?;
        for name in reader.names()? {
            if name == key {
                if !overwrite {
                    return Err(DatasetError::KeyExists(key.to_string()));
                }
                continue;
            }
            let a = reader.by_name::<OwnedRepr<A>, D>(&name)?;
            kept.push((name, a));
        }
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let tmp = path.with_extension("npz.tmp");
    let mut writer = NpzWriter::new_compressed(File::create(&tmp)?);
    for (name, a) in kept.iter() {
        writer.add_array(name.as_str(), a)?;
    }
    writer.add_array(key, array)?;
    writer.finish()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// 保存鱼 `n` 的器官标签. `n` 为 0 时保存为模板标签. 返回归档路径.
///
/// # 注意
///
/// 写入会重写整个归档, 调用者需保证同一时间只有一个写者.
pub fn write_label(
    layout: &DatasetLayout,
    organ: Organ,
    n: u32,
    label: &Array3<u8>,
    overwrite: bool,
) -> Result<PathBuf, DatasetError> {
    let path = if n == TEMPLATE_KEY {
        layout.template_path(organ)
    } else {
        layout.label_path(organ)
    };
    rewrite_npz(&path, &entry_name(n), label, overwrite)?;
    log::info!("写入 {organ} 标签 {n} -> {}", path.display());
    Ok(path)
}

/// 读取 `organ` 的模板标签.
pub fn read_template(layout: &DatasetLayout, organ: Organ) -> Result<Array3<u8>, DatasetError> {
    let archive = LabelArchive::open(NonZeroUsize::MIN, layout.template_path(organ))?;
    Ok(archive.label(TEMPLATE_KEY)?)
}

/// 读取鱼 `n` 的器官标签. `n` 为 0 时读取模板标签.
///
/// `align` 为真时, 按鱼的对齐角度旋转每一层 (最近邻插值, 类别值保持不变);
/// 模板标签不旋转. 角度来源见 [`alignment_angle`].
pub fn read_label(
    layout: &DatasetLayout,
    organ: Organ,
    n: u32,
    align: bool,
) -> Result<Array3<u8>, DatasetError> {
    if n == TEMPLATE_KEY {
        return read_template(layout, organ);
    }
    let path = layout.label_path(organ);
    log::info!("读取 {organ} 标签 {n} ({})", path.display());
    let archive = LabelArchive::open(NonZeroUsize::MIN, &path)?;
    let label = archive.label(n)?;
    if !align {
        return Ok(label);
    }

    let meta = read_metadata(layout, n).ok();
    let angle = alignment_angle(layout, n, meta.as_ref())?;
    let rotated = ScanStack::from_gray(label)
        .rotated(angle, Interpolation::Nearest)
        .ok_or(DatasetError::SliceShapeMismatch(path))?;
    Ok(rotated.into_raw().remove_axis(Axis(3)))
}

/// 将整条鱼的扫描以 `u16` 保存到 `Compressed/{dataset}.npz`, 键为鱼编号. 返回归档路径.
pub fn write_scan<T: Sample>(
    layout: &DatasetLayout,
    dataset: &str,
    n: u32,
    stack: &ScanStack<T>,
    overwrite: bool,
) -> Result<PathBuf, DatasetError> {
    let path = layout.compressed_path(dataset);
    let data: Array4<u16> = stack.data().mapv(|v| v.to_u16().unwrap_or(u16::MAX));
    rewrite_npz(&path, &entry_name(n), &data, overwrite)?;
    log::info!("写入压缩扫描 {dataset}/{n} -> {}", path.display());
    Ok(path)
}

/// 读取 `write_scan` 保存的扫描.
pub fn read_scan(
    layout: &DatasetLayout,
    dataset: &str,
    n: u32,
) -> Result<ScanStack<u16>, DatasetError> {
    let path = layout.compressed_path(dataset);
    let mut reader = NpzReader::new(File::open(&path)?)?;
    let data = reader.by_name::<OwnedRepr<u16>, Ix4>(&entry_name(n))?;
    ScanStack::from_array(data).ok_or(DatasetError::SliceShapeMismatch(path))
}

#[cfg(test)]
mod tests {
    use super::{read_label, read_scan, write_label, write_scan, LabelArchive};
    use crate::dataset::{DatasetError, DatasetLayout, Organ};
    use crate::ScanStack;
    use ndarray::{s, Array3};
    use std::fs;
    use std::num::NonZeroUsize;

    fn label(z: usize, class: u8) -> Array3<u8> {
        let mut a = Array3::<u8>::zeros((z, 6, 6));
        a.slice_mut(s![.., ..3, ..]).fill(class);
        a
    }

    #[test]
    fn test_label_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(root.path());
        let organ = Organ::Otoliths;

        let path = write_label(&layout, organ, 77, &label(2, 1), false).unwrap();
        assert_eq!(path, layout.label_path(organ));
        write_label(&layout, organ, 78, &label(3, 2), false).unwrap();
        assert!(matches!(
            write_label(&layout, organ, 77, &label(2, 3), false),
            Err(DatasetError::KeyExists(_))
        ));
        assert_eq!(read_label(&layout, organ, 77, false).unwrap(), label(2, 1));

        write_label(&layout, organ, 77, &label(4, 3), true).unwrap();
        let back = read_label(&layout, organ, 77, false).unwrap();
        assert_eq!(back.dim(), (4, 6, 6));
        assert_eq!(back, label(4, 3));
        assert_eq!(read_label(&layout, organ, 78, false).unwrap(), label(3, 2));
        assert!(!path.with_extension("npz.tmp").exists());
    }

    #[test]
    fn test_template_archive() {
        let root = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(root.path());
        let organ = Organ::Otoliths;
        let path = write_label(&layout, organ, 0, &label(1, 5), false).unwrap();
        assert_eq!(path, layout.template_path(organ));
        assert!(!layout.label_path(organ).exists());
        // 模板不旋转, 因此不需要角度文件.
        assert_eq!(read_label(&layout, organ, 0, true).unwrap(), label(1, 5));
    }

    #[test]
    fn test_aligned_label_keeps_classes() {
        let root = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(root.path());
        let organ = Organ::Otoliths;
        write_label(&layout, organ, 7, &label(1, 2), false).unwrap();
        fs::create_dir_all(layout.angles.parent().unwrap()).unwrap();
        fs::write(&layout.angles, r#"{"7": 180.0}"#).unwrap();

        let rotated = read_label(&layout, organ, 7, true).unwrap();
        assert_eq!(rotated[(0, 5, 2)], 2);
        assert_eq!(rotated[(0, 0, 2)], 0);
        assert!(rotated.iter().all(|v| *v == 0 || *v == 2));
    }

    #[test]
    fn test_archive_pool() {
        let root = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(root.path());
        let organ = Organ::Otoliths;
        for n in [12, 3, 40] {
            write_label(&layout, organ, n, &label(1, n as u8), false).unwrap();
        }

        let archive =
            LabelArchive::open(NonZeroUsize::new(3).unwrap(), layout.label_path(organ)).unwrap();
        assert_eq!(archive.worker_len(), 3);
        assert_eq!(archive.label_len(), 3);
        assert_eq!(archive.keys().unwrap(), vec![3, 12, 40]);

        std::thread::scope(|s| {
            for n in [12u32, 3, 40, 12, 3, 40] {
                let archive = &archive;
                s.spawn(move || {
                    let a = archive.label(n).unwrap();
                    assert_eq!(a[(0, 0, 0)], n as u8);
                });
            }
        });
        assert!(archive.label(99).is_err());
        assert!(LabelArchive::open(NonZeroUsize::new(65).unwrap(), layout.label_path(organ)).is_err());
    }

    #[test]
    fn test_scan_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(root.path());
        let stack = ScanStack::from_gray(Array3::<u8>::from_shape_fn((2, 3, 4), |(z, h, w)| {
            (z * 100 + h * 10 + w) as u8
        }));
        let path = write_scan(&layout, "v4", 77, &stack, false).unwrap();
        assert_eq!(path, root.path().join("Compressed/v4.npz"));

        let back = read_scan(&layout, "v4", 77).unwrap();
        assert_eq!(back.shape(), (2, 3, 4));
        assert_eq!(back[(1, 2, 3, 0)], 123);
        assert!(write_scan(&layout, "v4", 77, &stack, false).is_err());
        assert!(read_scan(&layout, "v4", 78).is_err());
    }
}
