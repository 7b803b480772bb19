//! 通用常量.

/// 预览图标注颜色.
pub mod rgb {
    /// 圆轮廓颜色 (红).
    pub const CIRCLE: [u8; 3] = [255, 0, 0];

    /// 圆心方块颜色 (橙).
    pub const CENTER: [u8; 3] = [255, 128, 0];
}

/// 模板标签在归档中使用的保留键.
pub const TEMPLATE_KEY: u32 = 0;

/// 扫描仪厂商子目录前缀. 存在该前缀的子目录时优先读取其中的切片.
pub const VENDOR_PREFIX: &str = "EK";

/// 原始切片扩展名.
pub const RAW_SLICE_EXT: &str = "tif";

/// 扫描仪配置文件扩展名.
pub const XTEKCT_EXT: &str = "xtekct";

/// 扫描仪配置文件中体素尺寸所在的节.
pub const XTEKCT_SECTION: &str = "XTekCT";

/// 单鱼目录下的切片子目录名.
pub const CLEAN_TIF_DIR: &str = "reconstructed_tifs";

/// 单鱼目录下的元数据文件名.
pub const METADATA_FILE: &str = "metadata.json";

/// 原始扫描目录下的裁剪决策文件名.
pub const CROP_DATA_FILE: &str = "crop_data.json";

/// 单鱼目录名的零填充宽度.
pub const FISH_NAME_WIDTH: usize = 3;

/// 切片文件名中序号的零填充宽度.
pub const SLICE_NAME_WIDTH: usize = 4;

/// 将鱼编号格式化为目录名, 例如 `7 -> "007"`.
#[inline]
pub fn fish_dir_name(n: u32) -> String {
    format!("{n:0width$}", width = FISH_NAME_WIDTH)
}
