//! 流水线共享上下文与阶段结果

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::data::{Dataset, Row};
use crate::experts::{ChartImage, ExpertKind, ExpertStage, VisualizationOutcome};
use crate::i18n::TargetLanguage;

/// 单次查询内在阶段之间累积传递的上下文
///
/// 每个阶段写入自己的字段，并总是覆盖`previous_step_output`。
/// 一个实例只属于一次流水线执行，不在并发查询之间共享。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    pub original_query: String,
    pub knowledge_insights: String,
    /// SQL查询结果，只物化一次，后续阶段复用
    pub sql_results: Option<Arc<Vec<Row>>>,
    pub analysis_findings: String,
    pub previous_step_output: String,
    pub visualization_result: Option<VisualizationOutcome>,
}

impl SharedContext {
    pub fn new(original_query: impl Into<String>) -> Self {
        Self {
            original_query: original_query.into(),
            ..Default::default()
        }
    }
}

/// 阶段的结构化产出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StructuredOutput {
    Rows(Arc<Vec<Row>>),
    Image(ChartImage),
    Error(String),
}

/// 单个阶段的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub success: bool,
    pub text_output: String,
    pub structured_output: Option<StructuredOutput>,
}

impl StageResult {
    pub fn succeeded(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text_output: text.into(),
            structured_output: None,
        }
    }

    /// 软失败：记录原因，流水线继续
    pub fn soft_failure(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            success: false,
            text_output: reason.clone(),
            structured_output: Some(StructuredOutput::Error(reason)),
        }
    }

    pub fn with_output(mut self, output: StructuredOutput) -> Self {
        self.structured_output = Some(output);
        self
    }

    /// 失败原因，成功时为None
    pub fn error_message(&self) -> Option<&str> {
        if self.success {
            return None;
        }
        match &self.structured_output {
            Some(StructuredOutput::Error(message)) => Some(message),
            _ => Some(&self.text_output),
        }
    }
}

/// 阶段状态机：Pending -> Running -> Succeeded | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// 计划中一个阶段的执行记录，供综合报告使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: ExpertStage,
    pub status: StageStatus,
    pub result: Option<StageResult>,
}

impl StageRecord {
    pub fn pending(stage: ExpertStage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            result: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == StageStatus::Pending {
            self.status = StageStatus::Running;
        }
    }

    /// 只有运行中的阶段可以结束
    pub fn finish(&mut self, result: StageResult) {
        if self.status != StageStatus::Running {
            return;
        }
        self.status = if result.success {
            StageStatus::Succeeded
        } else {
            StageStatus::Failed
        };
        self.result = Some(result);
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, StageStatus::Succeeded | StageStatus::Failed)
    }
}

/// 阶段可以预期的失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error("no database connected")]
    MissingDatabase,
    #[error("no dataset loaded for {0}")]
    MissingDataset(ExpertKind),
    #[error("{0}")]
    Collaborator(String),
}

impl StageError {
    /// 面向用户的说明文字
    pub fn describe(&self, language: TargetLanguage) -> String {
        match self {
            StageError::MissingDatabase => language.no_database().to_string(),
            StageError::MissingDataset(kind) => language.no_dataset(*kind).to_string(),
            StageError::Collaborator(message) if message.trim().is_empty() => {
                language.collaborator_failed().to_string()
            }
            StageError::Collaborator(message) => message.clone(),
        }
    }
}

/// 单次执行内的数据集：文件数据集，或由SQL结果转换而来的数据集
#[derive(Debug, Clone, Default)]
pub struct ActiveDataset {
    dataset: Option<Arc<Dataset>>,
}

impl ActiveDataset {
    pub fn new(dataset: Option<Arc<Dataset>>) -> Self {
        Self { dataset }
    }

    pub fn get(&self) -> Option<Arc<Dataset>> {
        self.dataset.clone()
    }

    /// SQL结果覆盖文件数据集，只在本次执行内生效
    pub fn replace(&mut self, dataset: Dataset) {
        self.dataset = Some(Arc::new(dataset));
    }

    pub fn is_from_sql(&self) -> bool {
        self.dataset
            .as_ref()
            .is_some_and(|d| d.source == SQL_DATASET_SOURCE)
    }
}

/// 由SQL结果转换的数据集的来源标识
pub const SQL_DATASET_SOURCE: &str = "sql";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_record_transitions() {
        let stage = ExpertStage::new(ExpertKind::Knowledge, TargetLanguage::English);
        let mut record = StageRecord::pending(stage);

        // 未开始的阶段不能直接结束
        record.finish(StageResult::succeeded("early"));
        assert_eq!(record.status, StageStatus::Pending);
        assert!(record.result.is_none());

        record.start();
        assert_eq!(record.status, StageStatus::Running);
        record.finish(StageResult::soft_failure("boom"));
        assert_eq!(record.status, StageStatus::Failed);
        assert!(record.is_finished());

        // 结束后状态不再变化
        record.start();
        record.finish(StageResult::succeeded("late"));
        assert_eq!(record.status, StageStatus::Failed);
    }

    #[test]
    fn test_error_message() {
        assert_eq!(StageResult::succeeded("ok").error_message(), None);
        assert_eq!(
            StageResult::soft_failure("no database").error_message(),
            Some("no database")
        );
    }

    #[test]
    fn test_stage_error_describe() {
        let en = TargetLanguage::English;
        assert_eq!(
            StageError::MissingDatabase.describe(en),
            "no database connected, stage skipped"
        );
        assert_eq!(
            StageError::MissingDataset(ExpertKind::DataAnalysis).describe(en),
            "no dataset loaded, data analysis stage skipped"
        );
        assert_eq!(
            StageError::Collaborator("  ".to_string()).describe(en),
            en.collaborator_failed()
        );
    }
}
