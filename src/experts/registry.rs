use std::sync::Arc;

use super::analysis::AnalysisExpert;
use super::knowledge::KnowledgeExpert;
use super::sql::SqlExpert;
use super::visualization::VisualizationExpert;
use super::{ExpertCollaborator, ExpertKind};
use crate::i18n::TargetLanguage;
use crate::llm::LLMClient;

/// 专家注册表：每种专家类型固定对应一个协作者
#[derive(Clone)]
pub struct ExpertRegistry {
    knowledge: Arc<dyn ExpertCollaborator>,
    sql: Arc<dyn ExpertCollaborator>,
    analysis: Arc<dyn ExpertCollaborator>,
    visualization: Arc<dyn ExpertCollaborator>,
}

impl ExpertRegistry {
    pub fn new(
        knowledge: Arc<dyn ExpertCollaborator>,
        sql: Arc<dyn ExpertCollaborator>,
        analysis: Arc<dyn ExpertCollaborator>,
        visualization: Arc<dyn ExpertCollaborator>,
    ) -> Self {
        Self {
            knowledge,
            sql,
            analysis,
            visualization,
        }
    }

    /// 使用基于LLM的默认专家实现
    pub fn from_llm(client: LLMClient, language: TargetLanguage) -> Self {
        Self::new(
            Arc::new(KnowledgeExpert::new(client.clone(), language)),
            Arc::new(SqlExpert::new(client.clone(), language)),
            Arc::new(AnalysisExpert::new(client.clone(), language)),
            Arc::new(VisualizationExpert::new(client, language)),
        )
    }

    /// 查找专家；Fallback阶段由推理协作者处理，不在表中
    pub fn get(&self, kind: ExpertKind) -> Option<&Arc<dyn ExpertCollaborator>> {
        match kind {
            ExpertKind::Knowledge => Some(&self.knowledge),
            ExpertKind::SqlQuery => Some(&self.sql),
            ExpertKind::DataAnalysis => Some(&self.analysis),
            ExpertKind::Visualization => Some(&self.visualization),
            ExpertKind::Fallback => None,
        }
    }
}
