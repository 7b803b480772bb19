//! 程序运行函数.

use crate::result::LumpfishResult;
use ct_fish::pipeline::{BatchReport, CropPipeline, PipelineConfig, ReadingOrder};
use std::thread;
use utils::loader;

/// 同一行样品管圆心允许的纵坐标差 (检测比例下的像素).
const ROW_TOLERANCE: i32 = 50;

/// 实际运行.
pub fn run() -> LumpfishResult {
    let layout = loader::layout_from_env_or_home().expect("Cannot locate dataset directory");
    assert!(layout.raw.is_dir(), "{} is not a directory", layout.raw.display());

    let scans = loader::raw_scans(&layout).expect("Listing raw scans error");
    let pipeline =
        CropPipeline::new(layout, PipelineConfig::default()).expect("Loading mastersheet error");
    let jobs = utils::usize_from_env("LUMPFISH_JOBS", 1).min(utils::cpus());
    let reviewer = ReadingOrder {
        row_tolerance: ROW_TOLERANCE,
    };

    println!("Cropping {} raw scans with {jobs} worker(s)...", scans.len());
    if scans.is_empty() {
        return LumpfishResult::new(BatchReport::default());
    }
    let per_job = scans.len().div_ceil(jobs);
    let report = thread::scope(|s| {
        let (p, r) = (&pipeline, &reviewer);
        let handles = scans
            .chunks(per_job)
            .map(|part| s.spawn(move || p.run_batch::<u16, _, _>(part, r)))
            .collect::<Vec<_>>();

        let mut report = BatchReport::default();
        for h in handles {
            report.extend(h.join().expect("Thread joining error").outcomes);
        }
        report
    });
    LumpfishResult::new(report)
}
