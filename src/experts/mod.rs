//! 专家协作者 - 行业知识、SQL查询、数据分析、可视化四类专家的统一契约
//!
//! 流水线只依赖这里定义的trait，专家内部如何调用模型、如何执行SQL、如何生成图表
//! 都由具体实现决定。

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::data::{DatabaseHandle, Dataset, Row};
use crate::i18n::TargetLanguage;
use crate::session::ChatMessage;

pub mod analysis;
pub mod knowledge;
pub mod reasoning;
pub mod registry;
pub mod sql;
pub mod visualization;

pub use registry::ExpertRegistry;

/// 专家类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertKind {
    Knowledge,
    SqlQuery,
    DataAnalysis,
    Visualization,
    /// 未识别出任何专家时，由推理协作者直接作答
    Fallback,
}

impl ExpertKind {
    /// 固定的四阶段顺序，同时也是关键字扫描时的规范顺序
    pub const CANONICAL: [ExpertKind; 4] = [
        ExpertKind::Knowledge,
        ExpertKind::SqlQuery,
        ExpertKind::DataAnalysis,
        ExpertKind::Visualization,
    ];
}

impl std::fmt::Display for ExpertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpertKind::Knowledge => write!(f, "knowledge"),
            ExpertKind::SqlQuery => write!(f, "sql_query"),
            ExpertKind::DataAnalysis => write!(f, "data_analysis"),
            ExpertKind::Visualization => write!(f, "visualization"),
            ExpertKind::Fallback => write!(f, "fallback"),
        }
    }
}

/// 计划中的一个阶段，规划完成后不再变化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertStage {
    pub kind: ExpertKind,
    pub display_name: String,
}

impl ExpertStage {
    pub fn new(kind: ExpertKind, language: TargetLanguage) -> Self {
        Self {
            kind,
            display_name: language.stage_name(kind).to_string(),
        }
    }
}

/// 图表载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ChartImage {
    /// base64编码的位图
    Inline(String),
    /// 指向已保存图片的路径或URL
    Reference(String),
    /// Vega-Lite JSON图表规格
    Spec(String),
}

impl ChartImage {
    /// 传输时使用的字符串形式
    pub fn payload(&self) -> &str {
        match self {
            ChartImage::Inline(data) | ChartImage::Reference(data) | ChartImage::Spec(data) => {
                data
            }
        }
    }
}

/// 可视化阶段的产出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationOutcome {
    pub image: Option<ChartImage>,
    pub description: String,
}

/// 一次专家调用的输入
///
/// 数据集与数据库随请求传入，专家本身不持有任何跨请求的可变状态。
#[derive(Clone)]
pub struct ExpertRequest {
    pub query: String,
    pub history: Vec<ChatMessage>,
    pub dataset: Option<Arc<Dataset>>,
    pub database: Option<Arc<dyn DatabaseHandle>>,
}

impl ExpertRequest {
    pub fn new(query: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            query: query.into(),
            history,
            dataset: None,
            database: None,
        }
    }

    pub fn with_dataset(mut self, dataset: Option<Arc<Dataset>>) -> Self {
        self.dataset = dataset;
        self
    }

    pub fn with_database(mut self, database: Option<Arc<dyn DatabaseHandle>>) -> Self {
        self.database = database;
        self
    }
}

/// 专家调用的输出，四类专家形状一致
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpertReply {
    pub success: bool,
    /// 自然语言回答或解释
    pub text: String,
    /// 仅SQL查询专家返回
    pub rows: Option<Vec<Row>>,
    /// 仅数据分析/可视化专家返回
    pub image: Option<ChartImage>,
    /// 分析过程中产生的代码记录
    pub code_output: Option<String>,
    pub error: Option<String>,
}

impl ExpertReply {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn with_image(mut self, image: ChartImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_code_output(mut self, code: impl Into<String>) -> Self {
        self.code_output = Some(code.into());
        self
    }

    /// 失败原因：优先取error，其次取text
    pub fn failure_reason(&self) -> Option<&str> {
        if self.success {
            return None;
        }
        self.error
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .or(Some(self.text.as_str()).filter(|t| !t.trim().is_empty()))
    }
}

/// 专家协作者契约
#[async_trait]
pub trait ExpertCollaborator: Send + Sync {
    async fn invoke(&self, request: ExpertRequest) -> Result<ExpertReply>;
}

/// 综合报告结尾的建议与总结
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportClosing {
    /// 可执行的业务建议，每条一句话
    pub recommendations: Vec<String>,
    /// 整体结论
    pub summary: String,
}

/// 推理协作者：起草计划、直接作答、给出建议
#[async_trait]
pub trait ReasoningCollaborator: Send + Sync {
    /// 为问题起草自由格式的专家计划文本
    async fn draft_plan(&self, query: &str, history: &[ChatMessage]) -> Result<String>;

    /// 不借助任何专家，直接回答问题
    async fn direct_answer(&self, query: &str, history: &[ChatMessage]) -> Result<String>;

    /// 基于各阶段摘要生成行动建议与总结
    async fn recommend(&self, query: &str, digest: &str) -> Result<ReportClosing>;
}
