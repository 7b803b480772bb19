//! mastersheet: 按鱼编号记录描述信息的只读表格.

use super::MetaError;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::path::Path;

/// mastersheet 中的一行. 只解析盖章需要的列, 其余列仍可通过 [`Mastersheet::trim`] 访问.
///
/// 无法解析的数值会被当作缺失, 而不是整张表读取失败.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MastersheetRow {
    /// 鱼编号.
    pub n: u32,

    /// 是否跳过该鱼 (原样保留表格中的值).
    #[serde(default)]
    pub skip: Option<Value>,

    /// 年龄.
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub age: Option<f64>,

    /// 基因型.
    #[serde(default)]
    pub genotype: Option<String>,

    /// 品系.
    #[serde(default)]
    pub strain: Option<String>,

    /// 名称.
    #[serde(default)]
    pub name: Option<String>,

    /// 备注.
    #[serde(default, alias = "Comments")]
    pub comments: Option<Value>,

    /// 体模.
    #[serde(default, alias = "Phantom")]
    pub phantom: Option<Value>,

    /// 缩放值.
    #[serde(default, rename = "scaling value", alias = "Scaling Value")]
    pub scaling_value: Option<Value>,

    /// 任意值.
    #[serde(default, rename = "arb value", alias = "Arb Value")]
    pub arb_value: Option<Value>,
}

impl MastersheetRow {
    /// 只有编号的行.
    pub fn new(n: u32) -> Self {
        Self {
            n,
            skip: None,
            age: None,
            genotype: None,
            strain: None,
            name: None,
            comments: None,
            phantom: None,
            scaling_value: None,
            arb_value: None,
        }
    }
}

/// 只读的 mastersheet 表格. 载入后不再修改, 可以在线程间共享.
#[derive(Debug, Clone)]
pub struct Mastersheet {
    headers: StringRecord,
    records: Vec<StringRecord>,
    rows: Vec<MastersheetRow>,
}

impl Mastersheet {
    /// 打开 CSV 格式的 mastersheet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MetaError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    /// 从任意 CSV 数据源读取 mastersheet. 第一行必须是表头, 且包含 `n` 列.
    pub fn from_reader<R: io::Read>(rdr: R) -> Result<Self, MetaError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
        let headers = rdr.headers()?.clone();
        let mut records = Vec::new();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.deserialize::<MastersheetRow>(Some(&headers))?);
            records.push(record);
        }
        log::debug!("mastersheet: {} 行, 列 {:?}", rows.len(), headers);
        Ok(Self {
            headers,
            records,
            rows,
        })
    }

    /// 行数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 表格是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 按表格顺序迭代所有行.
    #[inline]
    pub fn rows(&self) -> impl ExactSizeIterator<Item = &MastersheetRow> {
        self.rows.iter()
    }

    /// 按鱼编号查找. 有重复编号时返回第一行.
    pub fn row(&self, n: u32) -> Option<&MastersheetRow> {
        self.rows.iter().find(|r| r.n == n)
    }

    /// 保留 `column` 列的值等于 `value` 的行, 例如所有 `age` 为 `12` 的鱼.
    ///
    /// 两边都能解析为数字时按数值比较, 否则按字符串比较.
    /// 表格中没有 `column` 列时返回 `None`.
    pub fn trim(&self, column: &str, value: &str) -> Option<Mastersheet> {
        let col = self.headers.iter().position(|h| h == column)?;
        let wanted = value.trim();
        let matches = |cell: &str| match (cell.parse::<f64>(), wanted.parse::<f64>()) {
            (Ok(a), Ok(b)) => a == b,
            _ => cell == wanted,
        };
        let (records, rows): (Vec<_>, Vec<_>) = self
            .records
            .iter()
            .zip(self.rows.iter())
            .filter(|(rec, _)| rec.get(col).is_some_and(|c| matches(c)))
            .map(|(rec, row)| (rec.clone(), row.clone()))
            .unzip();
        Some(Mastersheet {
            headers: self.headers.clone(),
            records,
            rows,
        })
    }

    /// 按表格顺序列出所有鱼编号.
    pub fn numbers(&self) -> Vec<u32> {
        self.rows.iter().map(|r| r.n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Mastersheet;
    use serde_json::json;

    const SHEET: &str = "\
n,skip,age,genotype,strain,name,Comments
40,0,6,wt,AB,fish40,
41,1,12,het,AB,fish41,bent
77,0,12,wt,TL,fish77,
78,0,unknown,,TL,,
";

    #[test]
    fn test_lookup() {
        let sheet = Mastersheet::from_reader(SHEET.as_bytes()).unwrap();
        assert_eq!(sheet.len(), 4);
        let row = sheet.row(77).unwrap();
        assert_eq!(row.age, Some(12.0));
        assert_eq!(row.genotype.as_deref(), Some("wt"));
        assert_eq!(row.skip, Some(json!(0)));

        let row = sheet.row(78).unwrap();
        assert_eq!(row.age, None);
        assert_eq!(row.genotype, None);
        assert_eq!(sheet.row(41).unwrap().comments, Some(json!("bent")));
        assert!(sheet.row(100).is_none());
    }

    #[test]
    fn test_trim_and_numbers() {
        let sheet = Mastersheet::from_reader(SHEET.as_bytes()).unwrap();
        assert_eq!(sheet.numbers(), vec![40, 41, 77, 78]);
        let twelve = sheet.trim("age", "12").unwrap();
        assert_eq!(twelve.numbers(), vec![41, 77]);
        let wt = twelve.trim("genotype", "wt").unwrap();
        assert_eq!(wt.numbers(), vec![77]);
        assert!(sheet.trim("no-such-column", "1").is_none());
        assert!(sheet.trim("strain", "XX").unwrap().is_empty());
    }

    #[test]
    fn test_missing_n_column() {
        assert!(Mastersheet::from_reader("age,genotype\n1,wt\n".as_bytes()).is_err());
    }
}
