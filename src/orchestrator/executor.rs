//! 流水线执行器 - 按计划顺序调用专家，累积共享上下文并产生流式事件

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::context::{
    ActiveDataset, SQL_DATASET_SOURCE, SharedContext, StageError, StageRecord, StageResult,
    StructuredOutput,
};
use super::events::{EventSink, FinalResult, StreamEvent};
use super::plan::ExecutionPlan;
use super::synthesizer::{ResponseSynthesizer, SynthesisInput};
use super::text::sanitize_prose;
use crate::data::Dataset;
use crate::experts::{
    ChartImage, ExpertKind, ExpertRegistry, ExpertReply, ExpertRequest, ExpertStage,
    ReasoningCollaborator, VisualizationOutcome,
};
use crate::i18n::TargetLanguage;
use crate::session::{ChatMessage, SessionState};

/// 单次查询的处理时限，在每个阶段开始前检查
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn from_secs(seconds: u64) -> Self {
        Self::new(Duration::from_secs(seconds))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_exceeded(&self) -> bool {
        self.elapsed() >= self.budget
    }
}

/// 一次执行独占的状态，执行结束即销毁
struct PipelineRun {
    context: SharedContext,
    /// 数据分析之后可能被改写为绘图指令
    working_query: String,
    dataset: ActiveDataset,
    records: Vec<StageRecord>,
    analysis_chart: Option<ChartImage>,
    code_output: Option<String>,
}

impl PipelineRun {
    fn new(plan: &ExecutionPlan, query: &str, dataset: Option<Arc<Dataset>>) -> Self {
        Self {
            context: SharedContext::new(query),
            working_query: query.to_string(),
            dataset: ActiveDataset::new(dataset),
            records: plan
                .stages()
                .iter()
                .cloned()
                .map(StageRecord::pending)
                .collect(),
            analysis_chart: None,
            code_output: None,
        }
    }

    /// SQL结果只转换一次，之后的阶段共用同一个数据集
    fn ensure_sql_dataset(&mut self) {
        if let Some(rows) = &self.context.sql_results
            && !self.dataset.is_from_sql()
        {
            debug!(rows = rows.len(), "SQL results supersede the file dataset for this run");
            self.dataset
                .replace(Dataset::from_rows(SQL_DATASET_SOURCE, rows.to_vec()));
        }
    }
}

/// 流水线执行器
#[derive(Clone)]
pub struct PipelineExecutor {
    registry: ExpertRegistry,
    reasoner: Arc<dyn ReasoningCollaborator>,
    synthesizer: ResponseSynthesizer,
    language: TargetLanguage,
    history_limit: usize,
}

impl PipelineExecutor {
    pub fn new(
        registry: ExpertRegistry,
        reasoner: Arc<dyn ReasoningCollaborator>,
        language: TargetLanguage,
        history_limit: usize,
    ) -> Self {
        Self {
            registry,
            synthesizer: ResponseSynthesizer::new(Arc::clone(&reasoner), language),
            reasoner,
            language,
            history_limit,
        }
    }

    /// 完整执行：Start → Experts → (ExpertStart → Intermediate)×N → Final
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        query: &str,
        session: &SessionState,
        deadline: &Deadline,
        sink: &EventSink,
    ) -> FinalResult {
        sink.emit(StreamEvent::Start {
            session_id: session.session_id.clone(),
        })
        .await;
        self.run(plan, query, session, deadline, sink).await
    }

    /// 从Experts事件开始执行计划，Start与规划事件由调用方负责
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        query: &str,
        session: &SessionState,
        deadline: &Deadline,
        sink: &EventSink,
    ) -> FinalResult {
        let mut run = PipelineRun::new(plan, query, session.dataset.clone());
        if deadline.is_exceeded() {
            return self.abort(&run, deadline, sink).await;
        }

        let total_steps = plan.len();
        info!(stages = ?plan.kinds(), "🚀 开始执行专家流水线");
        sink.emit(StreamEvent::Experts {
            names: plan.names(),
        })
        .await;

        let history = session.recent_history(self.history_limit);
        for (index, stage) in plan.stages().iter().enumerate() {
            if deadline.is_exceeded() {
                return self.abort(&run, deadline, sink).await;
            }

            let step = index + 1;
            sink.emit(StreamEvent::ExpertStart {
                name: stage.display_name.clone(),
                step,
                total_steps,
            })
            .await;
            info!(step, total_steps, stage = %stage.display_name, "▶️ 阶段开始");
            run.records[index].start();

            let next = plan.stages().get(index + 1).map(|s| s.kind);
            let result = self
                .run_stage(stage, next, &mut run, session, &history)
                .await;
            let summary = self.intermediate_summary(stage, &result);
            if result.success {
                info!(step, stage = %stage.display_name, "✅ 阶段完成");
            } else {
                warn!(
                    step,
                    stage = %stage.display_name,
                    reason = result.error_message().unwrap_or_default(),
                    "⚠️ 阶段未能完成，继续执行后续阶段"
                );
            }
            run.records[index].finish(result);

            sink.emit(StreamEvent::Intermediate {
                name: stage.display_name.clone(),
                result: summary,
                step,
                total_steps,
            })
            .await;
        }

        self.finish(&run, false, sink).await
    }

    /// 执行单个阶段；任何失败都转换为软失败
    async fn run_stage(
        &self,
        stage: &ExpertStage,
        next: Option<ExpertKind>,
        run: &mut PipelineRun,
        session: &SessionState,
        history: &[ChatMessage],
    ) -> StageResult {
        let outcome = match stage.kind {
            ExpertKind::Knowledge => self.run_knowledge(run, history).await,
            ExpertKind::SqlQuery => self.run_sql(run, session, history).await,
            ExpertKind::DataAnalysis => self.run_analysis(run, next, history).await,
            ExpertKind::Visualization => self.run_visualization(run, history).await,
            ExpertKind::Fallback => self.run_fallback(run, history).await,
        };

        match outcome {
            Ok(result) => result,
            Err(error) => {
                let reason = error.describe(self.language);
                run.context.previous_step_output = reason.clone();
                StageResult::soft_failure(reason)
            }
        }
    }

    async fn run_knowledge(
        &self,
        run: &mut PipelineRun,
        history: &[ChatMessage],
    ) -> Result<StageResult, StageError> {
        let labels = self.language.context_labels();
        let query = compose_query(
            &run.context.original_query,
            &[(labels.previous_result, run.context.previous_step_output.as_str())],
        );

        let reply = self
            .consult(ExpertKind::Knowledge, ExpertRequest::new(query, history.to_vec()))
            .await?;
        let insights = reply.text.trim().to_string();
        run.context.knowledge_insights = insights.clone();
        run.context.previous_step_output = insights.clone();
        Ok(StageResult::succeeded(insights))
    }

    async fn run_sql(
        &self,
        run: &mut PipelineRun,
        session: &SessionState,
        history: &[ChatMessage],
    ) -> Result<StageResult, StageError> {
        let Some(database) = session.database.clone() else {
            return Err(StageError::MissingDatabase);
        };

        let labels = self.language.context_labels();
        let query = compose_query(
            &run.context.original_query,
            &[(labels.industry_context, run.context.knowledge_insights.as_str())],
        );
        let request = ExpertRequest::new(query, history.to_vec()).with_database(Some(database));

        let reply = self.consult(ExpertKind::SqlQuery, request).await?;
        run.context.previous_step_output = reply.text.clone();
        let mut result = StageResult::succeeded(reply.text);
        // 没有返回行时保留原有的文件数据集
        if let Some(rows) = reply.rows {
            let rows = Arc::new(rows);
            run.context.sql_results = Some(Arc::clone(&rows));
            result = result.with_output(StructuredOutput::Rows(rows));
        }
        Ok(result)
    }

    async fn run_analysis(
        &self,
        run: &mut PipelineRun,
        next: Option<ExpertKind>,
        history: &[ChatMessage],
    ) -> Result<StageResult, StageError> {
        run.ensure_sql_dataset();
        let Some(dataset) = run.dataset.get() else {
            return Err(StageError::MissingDataset(ExpertKind::DataAnalysis));
        };

        let labels = self.language.context_labels();
        let query = compose_query(
            &run.working_query,
            &[
                (labels.industry_context, run.context.knowledge_insights.as_str()),
                (labels.previous_result, run.context.previous_step_output.as_str()),
            ],
        );
        let request = ExpertRequest::new(query, history.to_vec()).with_dataset(Some(dataset));

        let reply = self.consult(ExpertKind::DataAnalysis, request).await?;
        let findings = sanitize_prose(&reply.text);
        run.context.analysis_findings = findings.clone();
        run.context.previous_step_output = findings.clone();
        if let Some(code) = reply.code_output.filter(|c| !c.trim().is_empty()) {
            run.code_output = Some(code);
        }

        if next == Some(ExpertKind::Visualization) {
            run.working_query = self.language.chart_instruction(&findings);
        }

        let mut result = StageResult::succeeded(findings);
        if let Some(image) = reply.image {
            run.analysis_chart = Some(image.clone());
            result = result.with_output(StructuredOutput::Image(image));
        }
        Ok(result)
    }

    async fn run_visualization(
        &self,
        run: &mut PipelineRun,
        history: &[ChatMessage],
    ) -> Result<StageResult, StageError> {
        run.ensure_sql_dataset();
        let Some(dataset) = run.dataset.get() else {
            return Err(StageError::MissingDataset(ExpertKind::Visualization));
        };

        let labels = self.language.context_labels();
        let rewritten = run.working_query != run.context.original_query;
        let mut parts = vec![(labels.industry_context, run.context.knowledge_insights.as_str())];
        if rewritten {
            parts.insert(0, (labels.original_query, run.context.original_query.as_str()));
        } else {
            parts.push((labels.analysis_findings, run.context.analysis_findings.as_str()));
        }
        let query = compose_query(&run.working_query, &parts);
        let request = ExpertRequest::new(query, history.to_vec()).with_dataset(Some(dataset));

        let reply = self.consult(ExpertKind::Visualization, request).await?;
        let description = reply.text.trim().to_string();
        run.context.previous_step_output = description.clone();
        run.context.visualization_result = Some(VisualizationOutcome {
            image: reply.image.clone(),
            description: description.clone(),
        });

        let mut result = StageResult::succeeded(description);
        if let Some(image) = reply.image {
            result = result.with_output(StructuredOutput::Image(image));
        }
        Ok(result)
    }

    async fn run_fallback(
        &self,
        run: &mut PipelineRun,
        history: &[ChatMessage],
    ) -> Result<StageResult, StageError> {
        let answer = self
            .reasoner
            .direct_answer(&run.context.original_query, history)
            .await
            .map_err(|e| StageError::Collaborator(e.to_string()))?;
        if answer.trim().is_empty() {
            return Err(StageError::Collaborator(String::new()));
        }
        run.context.previous_step_output = answer.clone();
        Ok(StageResult::succeeded(answer))
    }

    /// 调用注册表中的专家，把失败统一为StageError
    async fn consult(
        &self,
        kind: ExpertKind,
        request: ExpertRequest,
    ) -> Result<ExpertReply, StageError> {
        let expert = self
            .registry
            .get(kind)
            .ok_or_else(|| StageError::Collaborator(format!("no collaborator for {}", kind)))?;

        let reply = expert
            .invoke(request)
            .await
            .map_err(|e| StageError::Collaborator(e.to_string()))?;
        if !reply.success {
            return Err(StageError::Collaborator(
                reply.failure_reason().unwrap_or_default().to_string(),
            ));
        }
        Ok(reply)
    }

    /// Intermediate事件中的结果文本；可视化阶段只给出状态行
    fn intermediate_summary(&self, stage: &ExpertStage, result: &StageResult) -> String {
        if stage.kind != ExpertKind::Visualization || !result.success {
            return result.text_output.clone();
        }
        match result.structured_output {
            Some(StructuredOutput::Image(_)) => self.language.visualization_ready().to_string(),
            _ => self.language.visualization_without_image().to_string(),
        }
    }

    /// 超时：发出警告并基于已有上下文生成降级结果
    async fn abort(&self, run: &PipelineRun, deadline: &Deadline, sink: &EventSink) -> FinalResult {
        let pending = run.records.iter().filter(|r| !r.is_finished()).count();
        warn!(
            elapsed_ms = deadline.elapsed().as_millis() as u64,
            pending, "⏱️ 处理超时，提前结束流水线"
        );
        sink.emit(StreamEvent::Warning {
            message: self.language.timeout_warning().to_string(),
        })
        .await;
        self.finish(run, true, sink).await
    }

    async fn finish(&self, run: &PipelineRun, timed_out: bool, sink: &EventSink) -> FinalResult {
        let result = self
            .synthesizer
            .synthesize(SynthesisInput {
                context: &run.context,
                records: &run.records,
                analysis_chart: run.analysis_chart.as_ref(),
                code_output: run.code_output.as_deref(),
                timed_out,
            })
            .await;
        info!(source = %result.source, "🏁 流水线结束");
        sink.emit(StreamEvent::Final(result.clone())).await;
        result
    }
}

/// 主查询后附加非空的上下文段落
fn compose_query(main: &str, parts: &[(&str, &str)]) -> String {
    let mut query = main.trim().to_string();
    for (label, content) in parts {
        let content = content.trim();
        if !content.is_empty() {
            query.push_str(&format!("\n\n{}: {}", label, content));
        }
    }
    query
}
