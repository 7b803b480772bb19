//! 对数据集中的每个原始扫描执行裁剪流水线, 并打印逐扫描报告.
//!
//! 数据集根目录取自 `$CT_FISH_DATASET` (缺省为 `$HOME/dataset/uCT`),
//! 工作线程数取自 `$LUMPFISH_JOBS` (缺省为 1), 日志级别取自 `$RUST_LOG` (缺省为 `info`).

mod result;
mod runner;

use simple_logger::SimpleLogger;

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .expect("Logger initialization error");

    let result = runner::run();
    result.analyze();
    if !result.is_success() {
        std::process::exit(1);
    }
}
