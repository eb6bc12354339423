use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::io::Read;
use std::path::Path;

/// 一行记录，键为列名
pub type Row = Map<String, Value>;

/// 数据集加载错误
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("无法读取数据文件 {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV解析失败: {0}")]
    Csv(#[from] csv::Error),
    #[error("数据源 {0} 中没有任何列")]
    NoColumns(String),
}

/// 表格型数据集，会话中"当前数据"与SQL结果都以此形式在阶段之间传递
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// 数据来源描述（文件路径或"sql"）
    pub source: String,
    /// 列名，保持原始顺序
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Dataset {
    /// 由行记录构建数据集，列顺序按首次出现的顺序
    pub fn from_rows(source: impl Into<String>, rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        Self {
            source: source.into(),
            columns,
            rows,
        }
    }

    /// 从CSV文件加载
    pub fn from_csv_path(path: &Path) -> Result<Self, DatasetError> {
        let file = std::fs::File::open(path).map_err(|e| DatasetError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_csv_reader(path.display().to_string(), file)
    }

    /// 从任意CSV输入加载，首行为表头
    pub fn from_csv_reader<R: Read>(
        source: impl Into<String>,
        reader: R,
    ) -> Result<Self, DatasetError> {
        let source = source.into();
        let mut builder = csv::ReaderBuilder::new();
        let mut rdr = builder.has_headers(true).flexible(true).from_reader(reader);

        let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        if columns.is_empty() || columns.iter().all(|c| c.is_empty()) {
            return Err(DatasetError::NoColumns(source));
        }

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let mut row = Row::new();
            for (i, column) in columns.iter().enumerate() {
                let cell = record.get(i).unwrap_or("");
                row.insert(column.clone(), infer_value(cell));
            }
            rows.push(row);
        }

        Ok(Self {
            source,
            columns,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 数据基本信息，供专家提示词使用
    pub fn describe(&self) -> String {
        format!(
            "数据基本信息:\n- 数据源: {}\n- 行数: {}\n- 列数: {}\n- 列名: {}\n",
            self.source,
            self.rows.len(),
            self.columns.len(),
            self.columns.join(", ")
        )
    }

    /// 以Markdown表格形式预览前`limit`行
    pub fn preview_markdown(&self, limit: usize) -> String {
        if self.columns.is_empty() {
            return String::new();
        }

        let mut table = String::new();
        table.push_str(&format!("| {} |\n", self.columns.join(" | ")));
        table.push_str(&format!(
            "|{}\n",
            self.columns.iter().map(|_| "---|").collect::<String>()
        ));

        for row in self.rows.iter().take(limit) {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|c| row.get(c).map(render_cell).unwrap_or_default())
                .collect();
            table.push_str(&format!("| {} |\n", cells.join(" | ")));
        }

        if self.rows.len() > limit {
            table.push_str(&format!("...(其余 {} 行省略)\n", self.rows.len() - limit));
        }
        table
    }

    /// 取前`limit`行，用于嵌入图表规格等需要控制体积的场景
    pub fn head(&self, limit: usize) -> Vec<Row> {
        self.rows.iter().take(limit).cloned().collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// 非空值全部为数字的列视为数值列
    pub fn is_numeric_column(&self, name: &str) -> bool {
        let mut seen = false;
        for value in self.rows.iter().filter_map(|r| r.get(name)) {
            match value {
                Value::Null => {}
                Value::Number(_) => seen = true,
                _ => return false,
            }
        }
        seen
    }

    /// 数值列的描述性统计（计数、均值、最小值、最大值）
    pub fn numeric_summary(&self) -> String {
        let mut summary = String::new();
        for column in self.columns.iter().filter(|c| self.is_numeric_column(c)) {
            let values: Vec<f64> = self
                .rows
                .iter()
                .filter_map(|r| r.get(column).and_then(Value::as_f64))
                .collect();
            let count = values.len();
            let sum: f64 = values.iter().sum();
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            summary.push_str(&format!(
                "- {}: count={}, mean={:.2}, min={}, max={}\n",
                column,
                count,
                sum / count as f64,
                min,
                max
            ));
        }
        summary
    }
}

/// 单元格类型推断：空值、整数、浮点、布尔，其余为字符串
fn infer_value(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>()
        && let Some(n) = Number::from_f64(f)
    {
        return Value::Number(n);
    }
    match trimmed.to_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(trimmed.to_string()),
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.replace('|', "\\|"),
        other => other.to_string(),
    }
}
