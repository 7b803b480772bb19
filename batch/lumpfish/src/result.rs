//! 运行结果.

use ct_fish::pipeline::{BatchReport, ScanOutcome};
use std::io::{self, Write};

/// 将一个扫描的结果写进 `w` 中.
fn describe_into<W: Write>(
    scan: &str,
    outcome: &Result<ScanOutcome, ct_fish::pipeline::PipelineError>,
    w: &mut W,
) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Scan `{scan}`:")?;
    match outcome {
        Ok(ScanOutcome::Cropped { fish }) => {
            write!(w, "{S4}Cropped {} fish: {fish:?}", fish.len())
        }
        Ok(ScanOutcome::NoTubes) => write!(w, "{S4}No tubes detected"),
        Err(e) => {
            writeln!(w, "{S4}Failed at stage `{}`", e.stage)?;
            if let Some(n) = e.fish {
                writeln!(w, "{S4}Fish: {n}")?;
            }
            write!(w, "{S4}Reason: {}", e.kind)
        }
    }
}

/// 批处理最终结果.
pub struct LumpfishResult {
    report: BatchReport,
}

impl LumpfishResult {
    pub fn new(report: BatchReport) -> Self {
        Self { report }
    }

    /// 是否没有任何失败?
    #[inline]
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for (path, outcome) in self.report.outcomes.iter() {
            describe_into(&path.display().to_string(), outcome, &mut buf).unwrap();
            println!("{}", String::from_utf8_lossy(&buf));
            buf.clear();

            utils::sep();
        }
        println!(
            "{} scans, {} fish cropped, {} without tubes, {} failed",
            self.report.len(),
            self.report.cropped().len(),
            self.report.no_tubes().len(),
            self.report.failures().count()
        );
    }
}
