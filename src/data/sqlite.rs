use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Number, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::dataset::Row;
use super::DatabaseHandle;

/// 只读的SQLite数据库连接
pub struct SqliteDatabase {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// 以只读方式打开数据库文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open database: {}", path.display()))?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn read_schema(conn: &Connection) -> Result<String> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut schema = String::new();
        for table in tables {
            schema.push_str(&format!("表名: {}\n", table));
            let mut info = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\"")))?;
            let columns = info
                .query_map([], |row| {
                    Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (name, data_type) in columns {
                schema.push_str(&format!("  - {} ({})\n", name, data_type));
            }
            schema.push('\n');
        }
        Ok(schema)
    }

    fn run_query(conn: &Connection, sql: &str) -> Result<Vec<Row>> {
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(anyhow!("语句会修改数据库，拒绝执行: {}", sql));
        }
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, column) in columns.iter().enumerate() {
                record.insert(column.clone(), to_json(row.get_ref(i)?));
            }
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl DatabaseHandle for SqliteDatabase {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn schema_text(&self) -> Result<String> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            Self::read_schema(&conn)
        })
        .await?
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        if !is_read_only_statement(sql) {
            return Err(anyhow!("只允许执行只读查询（SELECT/WITH）: {}", sql));
        }

        let conn = Arc::clone(&self.conn);
        let sql = sql.trim().trim_end_matches(';').to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            Self::run_query(&conn, &sql)
        })
        .await?
    }
}

/// 仅允许单条SELECT语句，或主体为SELECT的WITH语句
///
/// 只做词法层面的预检，执行前还会由SQLite确认语句只读。
pub fn is_read_only_statement(sql: &str) -> bool {
    let body = sql.trim().trim_end_matches(';').trim();
    let Some(words) = top_level_words(body) else {
        return false;
    };

    match words.first().map(String::as_str) {
        Some("select") => true,
        Some("with") => {
            words
                .iter()
                .skip(1)
                .map(String::as_str)
                .find(|w| matches!(*w, "select" | "insert" | "update" | "delete" | "replace"))
                == Some("select")
        }
        _ => false,
    }
}

/// 括号与引号之外的单词（小写）；出现语句分隔符时返回None
fn top_level_words(sql: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for c in sql.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        if depth == 0 && (c.is_alphanumeric() || c == '_') {
            current.extend(c.to_lowercase());
            continue;
        }
        if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => return None,
            _ => {}
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    Some(words)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}
