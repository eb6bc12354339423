//! 意图规划 - 决定使用固定四阶段计划，还是请推理协作者起草计划

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::plan::{ExecutionPlan, PlanParser};
use crate::config::PlannerConfig;
use crate::experts::ReasoningCollaborator;
use crate::i18n::TargetLanguage;
use crate::session::ChatMessage;

/// 选择固定四阶段计划的策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerPolicy {
    triggers: Vec<String>,
    length_threshold: usize,
}

impl From<&PlannerConfig> for PlannerPolicy {
    fn from(config: &PlannerConfig) -> Self {
        Self::new(config.comprehensive_triggers.clone(), config.length_threshold)
    }
}

impl PlannerPolicy {
    pub fn new(triggers: Vec<String>, length_threshold: usize) -> Self {
        Self {
            triggers: triggers
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            length_threshold,
        }
    }

    /// 是否包含"全面分析"类触发词（大小写不敏感）
    pub fn matches_trigger(&self, query: &str) -> bool {
        let lowered = query.to_lowercase();
        self.triggers.iter().any(|t| lowered.contains(t.as_str()))
    }

    /// 有效字符数：不计空白与标点
    pub fn meaningful_length(query: &str) -> usize {
        query.chars().filter(|c| c.is_alphanumeric()).count()
    }

    pub fn prefers_canonical(&self, query: &str) -> bool {
        self.matches_trigger(query) || Self::meaningful_length(query) > self.length_threshold
    }
}

/// 规划结果
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDecision {
    pub plan: ExecutionPlan,
    /// 推理协作者给出的计划文本，固定计划时为None
    pub plan_text: Option<String>,
}

/// 意图规划器
#[derive(Clone)]
pub struct IntentPlanner {
    policy: PlannerPolicy,
    parser: PlanParser,
    reasoner: Arc<dyn ReasoningCollaborator>,
    language: TargetLanguage,
}

impl IntentPlanner {
    pub fn new(
        policy: PlannerPolicy,
        reasoner: Arc<dyn ReasoningCollaborator>,
        language: TargetLanguage,
    ) -> Self {
        Self {
            policy,
            parser: PlanParser::new(language),
            reasoner,
            language,
        }
    }

    /// 为查询生成执行计划
    ///
    /// 只有在需要起草计划时才调用一次推理协作者，失败或返回空文本都不重试，
    /// 交给解析器退回Fallback计划。
    pub async fn plan(&self, query: &str, history: &[ChatMessage]) -> PlanDecision {
        if self.policy.prefers_canonical(query) {
            info!("🧭 问题涉及多个维度，使用固定的四阶段计划");
            return PlanDecision {
                plan: ExecutionPlan::canonical(self.language),
                plan_text: None,
            };
        }

        let plan_text = match self.reasoner.draft_plan(query, history).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "⚠️ 起草计划失败，按空计划处理");
                String::new()
            }
        };

        let plan = self.parser.parse(&plan_text);
        debug!(plan_text = %plan_text, stages = ?plan.kinds(), "plan parsed");
        info!(stages = ?plan.kinds(), "🧭 计划已确定");
        PlanDecision {
            plan,
            plan_text: Some(plan_text),
        }
    }
}
