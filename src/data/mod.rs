//! 数据源 - 表格数据集与数据库句柄

use anyhow::Result;
use async_trait::async_trait;

pub mod dataset;
pub mod sqlite;

pub use dataset::{Dataset, DatasetError, Row};
pub use sqlite::SqliteDatabase;

/// 会话中的活动数据库，由SQL查询专家使用
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// 数据库标识（通常为文件路径）
    fn name(&self) -> String;

    /// 表结构描述文本，用于生成SQL的提示词
    async fn schema_text(&self) -> Result<String>;

    /// 执行只读查询，返回行记录
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;
}
