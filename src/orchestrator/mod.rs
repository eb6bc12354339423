//! 编排流水线：意图规划 → 执行计划 → 逐阶段执行 → 综合报告
//!
//! 对外暴露为事件流，调用方逐个消费[`StreamEvent`]，最后一个事件总是Final。

use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::config::Config;
use crate::experts::reasoning::LlmReasoner;
use crate::experts::{ExpertRegistry, ReasoningCollaborator};
use crate::i18n::TargetLanguage;
use crate::llm::LLMClient;
use crate::session::SharedSession;

pub mod context;
pub mod events;
pub mod executor;
pub mod plan;
pub mod planner;
pub mod synthesizer;
pub mod text;

pub use context::{SharedContext, StageError, StageRecord, StageResult, StageStatus};
pub use events::{EventSink, FinalResult, StreamEvent, WireLimits};
pub use executor::{Deadline, PipelineExecutor};
pub use plan::{ExecutionPlan, PlanParser};
pub use planner::{IntentPlanner, PlanDecision, PlannerPolicy};
pub use synthesizer::ResponseSynthesizer;

/// 编排器：持有规划器与执行器，可在多个会话间共享
#[derive(Clone)]
pub struct Orchestrator {
    planner: IntentPlanner,
    executor: PipelineExecutor,
    language: TargetLanguage,
    deadline_seconds: u64,
    history_limit: usize,
    event_buffer: usize,
    limits: WireLimits,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        registry: ExpertRegistry,
        reasoner: Arc<dyn ReasoningCollaborator>,
    ) -> Self {
        let language = config.target_language;
        Self {
            planner: IntentPlanner::new(
                PlannerPolicy::from(&config.planner),
                Arc::clone(&reasoner),
                language,
            ),
            executor: PipelineExecutor::new(
                registry,
                reasoner,
                language,
                config.pipeline.history_limit,
            ),
            language,
            deadline_seconds: config.pipeline.deadline_seconds,
            history_limit: config.pipeline.history_limit,
            event_buffer: config.pipeline.event_buffer,
            limits: WireLimits::from(&config.pipeline),
        }
    }

    /// 使用基于LLM的专家与推理协作者
    pub fn from_llm(config: &Config, client: LLMClient) -> Self {
        let language = config.target_language;
        let reasoner: Arc<dyn ReasoningCollaborator> =
            Arc::new(LlmReasoner::new(client.clone(), language));
        Self::new(config, ExpertRegistry::from_llm(client, language), reasoner)
    }

    /// 处理一次查询，把事件写入`sink`，返回最终结果
    ///
    /// 持有会话锁直到结束，同一会话的并发查询因此串行执行。
    pub async fn handle(&self, session: SharedSession, query: &str, sink: &EventSink) -> FinalResult {
        let mut state = session.lock().await;
        let deadline = Deadline::from_secs(self.deadline_seconds);
        info!(session_id = %state.session_id, "📨 收到查询");

        sink.emit(StreamEvent::Start {
            session_id: state.session_id.clone(),
        })
        .await;

        let result = if deadline.is_exceeded() {
            // 没有时间规划，直接由执行器发出超时警告与降级结果
            let plan = ExecutionPlan::fallback(self.language);
            self.executor.run(&plan, query, &state, &deadline, sink).await
        } else {
            sink.emit(StreamEvent::Thinking {
                message: self.language.planning_message().to_string(),
            })
            .await;

            let history = state.recent_history(self.history_limit);
            let decision = self.planner.plan(query, &history).await;
            if let Some(plan_text) = decision.plan_text.as_ref().filter(|t| !t.trim().is_empty()) {
                sink.emit(StreamEvent::Plan {
                    plan_text: plan_text.clone(),
                })
                .await;
            }

            self.executor
                .run(&decision.plan, query, &state, &deadline, sink)
                .await
        };

        state.append_turn(query, &result.response);
        result
    }

    /// 以事件流的形式处理查询
    pub fn stream(&self, session: SharedSession, query: impl Into<String>) -> ReceiverStream<StreamEvent> {
        let (sink, receiver) = EventSink::channel(self.event_buffer, self.limits);
        let orchestrator = self.clone();
        let query = query.into();
        tokio::spawn(async move {
            orchestrator.handle(session, &query, &sink).await;
        });
        ReceiverStream::new(receiver)
    }
}

#[cfg(test)]
mod tests;
