//! 裁剪流水线.
//!
//! 对每个原始扫描依次执行: 读取 → 二值化 → 检测 → 确认 → 数量核对 → 坐标换算 →
//! 裁剪 → 盖章 → 写入. 所有几何和元数据检查都在第一次写入之前完成,
//! 因此失败的扫描不会留下半成品.

mod error;
mod review;

pub use error::{FailureKind, PipelineError, Stage};
pub use review::{FixedOrder, Headless, ReadingOrder, Reviewer};

use crate::crop::{rescale_circles, CropWindow};
use crate::dataset::clean::write_clean;
use crate::dataset::crop_data::{crop_data_path, load_crop_data, save_crop_data, CropRecord};
use crate::dataset::raw::{
    clamp_range, decode_slices, read_raw, scan_metadata, slice_files, RawScan, RawScanDir,
    ReadOptions,
};
use crate::dataset::{DatasetError, DatasetLayout};
use crate::detect::{annotate, detect_tubes, threshold, CircleSet, DetectError, TubeParams};
use crate::meta::{stamp, FishMetadata, Mastersheet, MetaError, ScanMetadata};
use crate::{Channels, Idx2d, Sample, ScanStack};
use std::ops::Range;
use std::path::{Path, PathBuf};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use crate::crop::par_crop as crop_stack;
    } else {
        use crate::crop::crop as crop_stack;
    }
}

/// 流水线配置.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// 检测时读取扫描的缩放百分比.
    pub detection_scale: u32,

    /// 裁剪时读取扫描的缩放百分比.
    pub crop_scale: u32,

    /// 裁剪时每次读入的切片数. `None` 表示一次读入整个扫描.
    pub chunk_size: Option<usize>,

    /// 扫描目录下已有 `crop_data.json` 时, 直接复用其中的裁剪决策, 不再检测.
    pub reuse_crop_data: bool,

    /// 只处理这些切片. 检测切片的下标相对于该范围.
    pub range: Option<Range<usize>>,

    /// 解码后转换到的通道布局.
    pub channels: Channels,

    /// 样品管检测参数.
    pub tubes: TubeParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detection_scale: 40,
            crop_scale: 100,
            chunk_size: None,
            reuse_crop_data: true,
            range: None,
            channels: Channels::Gray,
            tubes: TubeParams::default(),
        }
    }
}

/// 一次扫描的正常结果.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// 已裁剪并写入这些鱼.
    Cropped {
        /// 鱼编号, 与写入顺序一致.
        fish: Vec<u32>,
    },

    /// 检测切片上没有找到样品管, 什么也没有写入.
    NoTubes,
}

/// 批处理报告. 每个扫描一项, 顺序与输入一致.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// `(扫描目录, 结果)`.
    pub outcomes: Vec<(PathBuf, Result<ScanOutcome, PipelineError>)>,
}

impl BatchReport {
    /// 所有已写入的鱼编号.
    pub fn cropped(&self) -> Vec<u32> {
        self.outcomes
            .iter()
            .filter_map(|(_, r)| match r {
                Ok(ScanOutcome::Cropped { fish }) => Some(fish.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// 没有找到样品管的扫描.
    pub fn no_tubes(&self) -> Vec<&Path> {
        self.outcomes
            .iter()
            .filter(|(_, r)| matches!(r, Ok(ScanOutcome::NoTubes)))
            .map(|(p, _)| p.as_path())
            .collect()
    }

    /// 失败的扫描.
    pub fn failures(&self) -> impl Iterator<Item = &PipelineError> {
        self.outcomes.iter().filter_map(|(_, r)| r.as_ref().err())
    }

    /// 是否没有任何失败?
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// 处理的扫描个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// 是否没有处理任何扫描?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl Extend<(PathBuf, Result<ScanOutcome, PipelineError>)> for BatchReport {
    fn extend<I: IntoIterator<Item = (PathBuf, Result<ScanOutcome, PipelineError>)>>(
        &mut self,
        iter: I,
    ) {
        self.outcomes.extend(iter)
    }
}

/// 把阶段 `stage` 的错误包装为整个扫描的 [`PipelineError`].
fn at<E: Into<FailureKind>>(scan: &Path, stage: Stage) -> impl FnOnce(E) -> PipelineError + '_ {
    move |e| PipelineError {
        scan: scan.to_owned(),
        fish: None,
        stage,
        kind: e.into(),
    }
}

/// 把阶段 `stage` 的错误包装为鱼 `fish` 的 [`PipelineError`].
fn at_fish<E: Into<FailureKind>>(
    scan: &Path,
    fish: u32,
    stage: Stage,
) -> impl FnOnce(E) -> PipelineError + '_ {
    move |e| PipelineError {
        scan: scan.to_owned(),
        fish: Some(fish),
        stage,
        kind: e.into(),
    }
}

/// 检测并确认后的裁剪决策.
struct Decision<T: Sample> {
    /// 与鱼编号一一对应的圆, 位于 `scale` 比例下.
    circles: CircleSet,
    scale: u32,

    /// 新检测得到的决策需要保存; 复用的不需要.
    fresh: bool,

    /// 检测时读入的扫描, 比例与裁剪比例相同时可以直接复用.
    scan: Option<RawScan<T>>,
}

/// 裁剪流水线.
///
/// 持有数据集布局、配置和只读的 mastersheet. 多个线程可以共享同一个流水线,
/// 各自处理不同的扫描.
#[derive(Debug, Clone)]
pub struct CropPipeline {
    layout: DatasetLayout,
    config: PipelineConfig,
    mastersheet: Mastersheet,
}

impl CropPipeline {
    /// 创建流水线, mastersheet 从 `layout.mastersheet` 读取.
    pub fn new(layout: DatasetLayout, config: PipelineConfig) -> Result<Self, MetaError> {
        let mastersheet = Mastersheet::open(&layout.mastersheet)?;
        Ok(Self::with_mastersheet(layout, config, mastersheet))
    }

    /// 使用已经读入的 mastersheet 创建流水线.
    pub fn with_mastersheet(
        layout: DatasetLayout,
        config: PipelineConfig,
        mastersheet: Mastersheet,
    ) -> Self {
        Self {
            layout,
            config,
            mastersheet,
        }
    }

    /// 数据集布局.
    #[inline]
    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    /// 流水线配置.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 处理一个原始扫描.
    ///
    /// # 注意
    ///
    /// 1. 检测切片上没有样品管时返回 `Ok(ScanOutcome::NoTubes)`.
    /// 2. 确认后的圆个数必须等于扫描覆盖的鱼条数, 否则返回
    ///    [`FailureKind::CountMismatch`], 且不写入任何文件.
    /// 3. 裁剪窗口、元数据都在写入之前准备完毕; 写入阶段本身的 I/O 失败
    ///    可能留下部分鱼的目录.
    pub fn process_scan<T: Sample, R: Reviewer + ?Sized>(
        &self,
        scan: &RawScanDir,
        reviewer: &R,
    ) -> Result<ScanOutcome, PipelineError> {
        let path = scan.path.as_path();
        let Some(decision) = self.decide::<T, R>(scan, reviewer)? else {
            log::warn!("扫描 {} 上没有检测到样品管", path.display());
            return Ok(ScanOutcome::NoTubes);
        };
        if decision.circles.is_empty() || decision.circles.len() != scan.fish.len() {
            return Err(at(path, Stage::Review)(FailureKind::CountMismatch {
                expected: scan.fish.len(),
                found: decision.circles.len(),
            }));
        }

        let circles = rescale_circles(&decision.circles, decision.scale, self.config.crop_scale);
        let (crops, meta) = match (self.config.chunk_size, decision.scan) {
            (None, Some(raw)) if decision.scale == self.config.crop_scale => {
                let crops = crop_stack(&raw.stack, &circles).map_err(at(path, Stage::Cropping))?;
                (crops, raw.meta)
            }
            (None, _) => {
                let options = ReadOptions {
                    range: self.config.range.clone(),
                    scale: self.config.crop_scale,
                    channels: self.config.channels,
                };
                let raw = read_raw::<T, _>(path, &options).map_err(at(path, Stage::Reading))?;
                let crops = crop_stack(&raw.stack, &circles).map_err(at(path, Stage::Cropping))?;
                (crops, raw.meta)
            }
            (Some(k), _) => self.crop_chunked::<T>(path, &circles, k)?,
        };

        let mut stamped: Vec<(ScanStack<T>, FishMetadata)> = Vec::with_capacity(crops.len());
        for (&n, stack) in scan.fish.iter().zip(crops) {
            let one = stamp(stack, n, &meta, &self.mastersheet)
                .map_err(at_fish(path, n, Stage::Stamping))?;
            stamped.push(one);
        }

        if decision.fresh {
            // 数量核对保证了 `fish` 非空.
            let range = scan.fish_range().unwrap_or_default();
            let record = CropRecord::new(range, &decision.circles, decision.scale, path);
            save_crop_data(&self.layout, &record).map_err(at(path, Stage::Writing))?;
        }
        for (stack, meta) in stamped.iter() {
            write_clean(&self.layout, stack, meta)
                .map_err(at_fish(path, meta.number, Stage::Writing))?;
        }
        Ok(ScanOutcome::Cropped {
            fish: scan.fish.clone(),
        })
    }

    /// 依次处理 `scans`, 单个扫描的失败不影响其他扫描.
    pub fn run_batch<'a, T, R, I>(&self, scans: I, reviewer: &R) -> BatchReport
    where
        T: Sample,
        R: Reviewer + ?Sized,
        I: IntoIterator<Item = &'a RawScanDir>,
    {
        let mut report = BatchReport::default();
        for scan in scans {
            let result = self.process_scan::<T, R>(scan, reviewer);
            match &result {
                Ok(ScanOutcome::Cropped { fish }) => {
                    log::info!("扫描 {} 完成, 鱼 {fish:?}", scan.path.display())
                }
                Ok(ScanOutcome::NoTubes) => {}
                Err(e) => log::error!("{e}"),
            }
            report.outcomes.push((scan.path.clone(), result));
        }
        report
    }

    /// 取得裁剪决策: 优先复用已保存的, 否则检测并交给 `reviewer` 确认.
    fn decide<T: Sample, R: Reviewer + ?Sized>(
        &self,
        scan: &RawScanDir,
        reviewer: &R,
    ) -> Result<Option<Decision<T>>, PipelineError> {
        let path = scan.path.as_path();
        if self.config.reuse_crop_data && crop_data_path(path).is_file() {
            let record = load_crop_data(path).map_err(at(path, Stage::Reading))?;
            if record.fish_range() == scan.fish_range() {
                log::info!("复用裁剪决策 {}", crop_data_path(path).display());
                return Ok(Some(Decision {
                    circles: record.ordered_circles,
                    scale: record.scale,
                    fresh: false,
                    scan: None,
                }));
            }
            log::warn!(
                "裁剪决策的鱼编号范围 `{}` 与目录 {} 不符, 重新检测",
                record.n,
                path.display()
            );
        }

        let options = ReadOptions {
            range: self.config.range.clone(),
            scale: self.config.detection_scale,
            channels: self.config.channels,
        };
        let raw = read_raw::<T, _>(path, &options).map_err(at(path, Stage::Reading))?;

        let params = &self.config.tubes;
        let slice = raw
            .stack
            .slice_at(params.slice_to_detect)
            .ok_or_else(|| {
                DetectError::InvalidImage(format!(
                    "检测切片 {} 越界 (共 {} 层)",
                    params.slice_to_detect,
                    raw.stack.len_z()
                ))
            })
            .map_err(at(path, Stage::Detection))?;
        let (low, high) = params.thresh;
        let binary = threshold(&slice, low, high).map_err(at(path, Stage::Thresholding))?;
        let Some(found) = detect_tubes(&binary, params).map_err(at(path, Stage::Detection))? else {
            return Ok(None);
        };
        log::debug!("检测到 {} 个样品管: {found:?}", found.len());

        let preview = annotate(&slice, &found);
        let circles = reviewer
            .review(&scan.fish, &preview, &found)
            .map_err(|why| at(path, Stage::Review)(FailureKind::Rejected(why)))?;
        Ok(Some(Decision {
            circles,
            scale: self.config.detection_scale,
            fresh: true,
            scan: Some(raw),
        }))
    }

    /// 每次读入 `chunk` 层切片并裁剪, 最后沿 z 方向拼接各条鱼的结果.
    fn crop_chunked<T: Sample>(
        &self,
        path: &Path,
        circles: &CircleSet,
        chunk: usize,
    ) -> Result<(Vec<ScanStack<T>>, ScanMetadata), PipelineError> {
        let reading = |e: DatasetError| at(path, Stage::Reading)(e);
        let (dir, files) = slice_files(path).map_err(reading)?;
        let files = &files[clamp_range(self.config.range.as_ref(), files.len())];
        if files.is_empty() {
            return Err(reading(DatasetError::NoImages(dir)));
        }
        let meta = scan_metadata(path, self.config.crop_scale).map_err(reading)?;

        let mut fitted: Option<(Idx2d, Vec<CropWindow>)> = None;
        let mut parts: Vec<Vec<ScanStack<T>>> = circles.iter().map(|_| Vec::new()).collect();
        let mut nonzero = 0;
        for names in files.chunks(chunk.max(1)) {
            let slices = decode_slices::<T>(names, self.config.channels, self.config.crop_scale)
                .map_err(reading)?;
            let stack = ScanStack::from_slices(&slices)
                .ok_or_else(|| reading(DatasetError::SliceShapeMismatch(dir.clone())))?;
            nonzero += stack.count_nonzero();

            // 窗口只在第一块上计算, 之后的块必须与它形状一致.
            let (shape, windows) = match fitted.take() {
                Some(f) => f,
                None => {
                    let shape = stack.slice_shape();
                    let windows = circles
                        .iter()
                        .map(|c| CropWindow::fit(c, shape))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(at(path, Stage::Cropping))?;
                    (shape, windows)
                }
            };
            if stack.slice_shape() != shape {
                return Err(reading(DatasetError::SliceShapeMismatch(dir)));
            }
            for (w, part) in windows.iter().zip(parts.iter_mut()) {
                part.push(w.extract(&stack).map_err(at(path, Stage::Cropping))?);
            }
            fitted = Some((shape, windows));
        }
        if nonzero == 0 {
            return Err(reading(DatasetError::EmptyScan(path.to_owned())));
        }

        let crops = parts
            .iter()
            .map(|p| ScanStack::concat(p))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| reading(DatasetError::SliceShapeMismatch(dir)))?;
        Ok((crops, meta))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CropPipeline, FailureKind, FixedOrder, Headless, PipelineConfig, ReadingOrder,
        ScanOutcome, Stage,
    };
    use crate::crop::crop;
    use crate::dataset::clean::read_clean;
    use crate::dataset::crop_data::{load_crop_data, save_crop_data, CropRecord};
    use crate::dataset::raw::{list_raw_scans, RawScanDir};
    use crate::dataset::DatasetLayout;
    use crate::detect::{Circle, TubeParams};
    use crate::test_utils::{two_tube_stack, two_tubes};
    use image::{GrayImage, Luma};
    use std::fs;
    use std::path::Path;

    const XTEKCT: &str = "[XTekCT]\nVoxelSizeX=0.02\nVoxelSizeY=0.025\nVoxelSizeZ=0.03\n";
    const SHEET: &str = "n,age,genotype,strain,name,skip\n77,12,wt,AB,a,0\n78,14,mut,AB,b,0\n";

    fn write_scan(layout: &DatasetLayout, name: &str, img: &GrayImage, slices: usize) -> RawScanDir {
        let dir = layout.raw.join(name);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..slices {
            img.save(dir.join(format!("slice_{i:02}.tif"))).unwrap();
        }
        fs::write(dir.join("scan.xtekct"), XTEKCT).unwrap();
        RawScanDir::new(dir)
    }

    fn pipeline(root: &Path, config: PipelineConfig) -> CropPipeline {
        let layout = DatasetLayout::new(root);
        fs::write(&layout.mastersheet, SHEET).unwrap();
        CropPipeline::new(layout, config).unwrap()
    }

    fn full_scale() -> PipelineConfig {
        PipelineConfig {
            detection_scale: 100,
            crop_scale: 100,
            tubes: TubeParams {
                min_radius: 20,
                max_radius: 50,
                ..TubeParams::default()
            },
            ..PipelineConfig::default()
        }
    }

    /// 亮度均匀的切片: 非空, 但没有边缘.
    fn flat() -> GrayImage {
        GrayImage::from_pixel(500, 500, Luma([200]))
    }

    #[test]
    fn test_headless_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let p = pipeline(root.path(), full_scale());
        let scan = write_scan(p.layout(), "EK_077_078", &two_tubes(), 3);

        let reviewer = ReadingOrder { row_tolerance: 10 };
        let outcome = p.process_scan::<u8, _>(&scan, &reviewer).unwrap();
        assert_eq!(outcome, ScanOutcome::Cropped { fish: vec![77, 78] });

        let (big, meta) = read_clean::<u8>(p.layout(), 77, &Default::default()).unwrap();
        let (z, h, w) = big.shape();
        assert_eq!(z, 3);
        assert_eq!(h, w);
        assert!((78..=82).contains(&h), "{h}");
        assert_eq!(big[(1, h / 2, w / 2, 0)], 200);
        assert_eq!(meta.number, 77);
        assert_eq!(meta.genotype.as_deref(), Some("wt"));
        assert_eq!(meta.y_voxel_size, 0.025);
        assert_eq!(meta.scale, 100);
        assert_eq!(meta.path, scan.path);

        let (small, meta) = read_clean::<u8>(p.layout(), 78, &Default::default()).unwrap();
        let (_, h, _) = small.shape();
        assert!((58..=62).contains(&h), "{h}");
        assert_eq!(meta.age, Some(14.0));

        let record = load_crop_data(&scan.path).unwrap();
        assert_eq!(record.n, "77-78");
        assert_eq!(record.scale, 100);
        assert_eq!(record.ordered_circles.len(), 2);
        assert!(p.layout().crop_backup_path(77, 78).is_file());
    }

    #[test]
    fn test_reuse_decision_chunked() {
        let root = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            detection_scale: 50,
            crop_scale: 100,
            chunk_size: Some(2),
            ..PipelineConfig::default()
        };
        let p = pipeline(root.path(), config);
        let scan = write_scan(p.layout(), "EK_077_078", &two_tubes(), 3);

        let saved = [Circle::new(50, 50, 20), Circle::new(200, 200, 15)];
        save_crop_data(p.layout(), &CropRecord::new((77, 78), &saved, 50, &scan.path)).unwrap();

        // 复用已保存的决策时不会询问确认者.
        let outcome = p.process_scan::<u8, _>(&scan, &FixedOrder(vec![9])).unwrap();
        assert_eq!(outcome, ScanOutcome::Cropped { fish: vec![77, 78] });

        let expected = crop(
            &two_tube_stack(3),
            &[Circle::new(100, 100, 40), Circle::new(400, 400, 30)],
        )
        .unwrap();
        let (a, _) = read_clean::<u8>(p.layout(), 77, &Default::default()).unwrap();
        let (b, _) = read_clean::<u8>(p.layout(), 78, &Default::default()).unwrap();
        assert_eq!(a, expected[0]);
        assert_eq!(b, expected[1]);
    }

    #[test]
    fn test_failures_write_nothing() {
        let root = tempfile::tempdir().unwrap();
        let p = pipeline(root.path(), full_scale());

        let three = write_scan(p.layout(), "EK_077_079", &two_tubes(), 2);
        let err = p.process_scan::<u8, _>(&three, &Headless).unwrap_err();
        assert_eq!(err.stage, Stage::Review);
        assert_eq!(err.fish, None);
        assert!(matches!(
            err.kind,
            FailureKind::CountMismatch {
                expected: 3,
                found: 2
            }
        ));

        let two = write_scan(p.layout(), "EK_077_078", &two_tubes(), 2);
        let err = p
            .process_scan::<u8, _>(&two, &FixedOrder(vec![0, 7]))
            .unwrap_err();
        assert!(matches!(err.kind, FailureKind::Rejected(_)));

        assert!(!p.layout().clean.exists());
        assert!(!three.path.join("crop_data.json").exists());
        assert!(!two.path.join("crop_data.json").exists());
    }

    #[test]
    fn test_batch_isolates_failures() {
        let _ = simple_logger::init_with_level(log::Level::Debug);
        let root = tempfile::tempdir().unwrap();
        let p = pipeline(root.path(), full_scale());
        write_scan(p.layout(), "EK_077_078", &two_tubes(), 2);
        write_scan(p.layout(), "EK_080_082", &two_tubes(), 2);
        write_scan(p.layout(), "EK_090", &flat(), 2);

        let scans = list_raw_scans(&p.layout().raw).unwrap();
        assert_eq!(scans.len(), 3);
        let report = p.run_batch::<u8, _, _>(&scans, &Headless);
        assert_eq!(report.len(), 3);
        assert_eq!(report.cropped(), vec![77, 78]);
        assert_eq!(report.no_tubes(), vec![scans[2].path.as_path()]);
        assert_eq!(report.failures().count(), 1);
        assert!(!report.is_success());
        assert!(!p.layout().fish_dir(80).exists());
    }
}
