//! 🐟欢迎光临🐠
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::slice::{ImgWriteRaw, ImgWriteVis, OwnedStackSlice, StackSlice};
pub use crate::data::window::IntensityWindow;
pub use crate::data::{Channels, Sample, ScanStack};

pub use crate::crop::{crop, crop_around_center, rescale_circles, CropError, CropWindow};
pub use crate::detect::{
    annotate, detect_tubes, find_tubes, threshold, Circle, CircleSet, DetectError, TubeParams,
};
pub use crate::meta::{stamp, FishMetadata, Mastersheet, MetaError, ScanMetadata};

pub use crate::dataset::home_dataset_dir_with;
pub use crate::dataset::raw::{list_raw_scans, RawScanDir};
pub use crate::dataset::{self, DatasetError, DatasetLayout, Organ};

pub use crate::pipeline::{
    BatchReport, CropPipeline, Headless, PipelineConfig, PipelineError, Reviewer, ScanOutcome,
};
