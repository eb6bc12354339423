use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::*;
use crate::data::{DatabaseHandle, Dataset, Row};
use crate::experts::{
    ChartImage, ExpertCollaborator, ExpertKind, ExpertReply, ExpertRequest, ReportClosing,
};
use crate::session::{ChatMessage, SessionState};

/// 按预设回复应答，并记录收到的请求
struct ScriptedExpert {
    reply: ExpertReply,
    seen: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedExpert {
    fn new(reply: ExpertReply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn queries(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|(q, _)| q.clone()).collect()
    }

    fn dataset_sources(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().iter().map(|(_, d)| d.clone()).collect()
    }
}

#[async_trait]
impl ExpertCollaborator for ScriptedExpert {
    async fn invoke(&self, request: ExpertRequest) -> Result<ExpertReply> {
        self.seen.lock().unwrap().push((
            request.query.clone(),
            request.dataset.as_ref().map(|d| d.source.clone()),
        ));
        Ok(self.reply.clone())
    }
}

struct ScriptedReasoner {
    plan_text: Option<String>,
    closing: Option<ReportClosing>,
    plan_calls: AtomicUsize,
}

impl ScriptedReasoner {
    fn new(plan_text: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            plan_text: plan_text.map(|t| t.to_string()),
            closing: Some(ReportClosing {
                recommendations: vec!["增加第四季度备货".to_string()],
                summary: "整体向好".to_string(),
            }),
            plan_calls: AtomicUsize::new(0),
        })
    }

    fn without_closing(plan_text: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            plan_text: plan_text.map(|t| t.to_string()),
            closing: None,
            plan_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ReasoningCollaborator for ScriptedReasoner {
    async fn draft_plan(&self, _query: &str, _history: &[ChatMessage]) -> Result<String> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.plan_text.clone().ok_or_else(|| anyhow!("planner offline"))
    }

    async fn direct_answer(&self, query: &str, _history: &[ChatMessage]) -> Result<String> {
        Ok(format!("direct answer to {}", query))
    }

    async fn recommend(&self, _query: &str, _digest: &str) -> Result<ReportClosing> {
        self.closing.clone().ok_or_else(|| anyhow!("recommendation service down"))
    }
}

struct StubDatabase;

#[async_trait]
impl DatabaseHandle for StubDatabase {
    fn name(&self) -> String {
        "stub.db".to_string()
    }

    async fn schema_text(&self) -> Result<String> {
        Ok("表名: sales\n".to_string())
    }

    async fn query(&self, _sql: &str) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }
}

fn rows(value: serde_json::Value) -> Vec<Row> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
}

struct Fixture {
    knowledge: Arc<ScriptedExpert>,
    sql: Arc<ScriptedExpert>,
    analysis: Arc<ScriptedExpert>,
    visualization: Arc<ScriptedExpert>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            knowledge: ScriptedExpert::new(ExpertReply::answer("彩妆品类第四季度需求旺盛")),
            sql: ScriptedExpert::new(
                ExpertReply::answer("按月汇总的销售额").with_rows(rows(json!([
                    {"month": "2024-10", "sales": 100},
                    {"month": "2024-11", "sales": 130}
                ]))),
            ),
            analysis: ScriptedExpert::new(
                ExpertReply::answer("```python\ndf.sum()\n```\nQ4 sales +30%")
                    .with_code_output("df.sum()"),
            ),
            visualization: ScriptedExpert::new(
                ExpertReply::answer("月度销售额柱状图")
                    .with_image(ChartImage::Spec("{\"mark\":\"bar\"}".to_string())),
            ),
        }
    }

    fn registry(&self) -> ExpertRegistry {
        ExpertRegistry::new(
            self.knowledge.clone(),
            self.sql.clone(),
            self.analysis.clone(),
            self.visualization.clone(),
        )
    }

    fn executor(&self, reasoner: Arc<ScriptedReasoner>, language: TargetLanguage) -> PipelineExecutor {
        PipelineExecutor::new(self.registry(), reasoner, language, 10)
    }
}

async fn collect(
    executor: &PipelineExecutor,
    plan: &ExecutionPlan,
    query: &str,
    session: &SessionState,
) -> (Vec<StreamEvent>, FinalResult) {
    let (sink, mut receiver) = EventSink::channel(64, WireLimits::default());
    let result = executor
        .execute(plan, query, session, &Deadline::from_secs(60), &sink)
        .await;
    drop(sink);

    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    (events, result)
}

fn file_dataset() -> Dataset {
    Dataset::from_rows(
        "sales.csv",
        rows(json!([{"category": "护肤", "sales": 10}])),
    )
}

#[cfg(test)]
mod planner_tests {
    use super::*;

    fn planner(reasoner: Arc<ScriptedReasoner>, threshold: usize) -> IntentPlanner {
        let config = crate::config::PlannerConfig {
            length_threshold: threshold,
            ..Default::default()
        };
        IntentPlanner::new(PlannerPolicy::from(&config), reasoner, TargetLanguage::English)
    }

    #[tokio::test]
    async fn test_trigger_phrase_forces_canonical_plan() {
        let reasoner = ScriptedReasoner::new(Some("Plan: [Knowledge]"));
        let decision = planner(reasoner.clone(), 20)
            .plan("complete report", &[])
            .await;

        assert!(decision.plan.is_canonical());
        assert!(decision.plan_text.is_none());
        assert_eq!(reasoner.plan_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_long_query_forces_canonical_plan() {
        let reasoner = ScriptedReasoner::new(Some("Plan: [Knowledge]"));
        let decision = planner(reasoner.clone(), 20)
            .plan("how did lipstick sales trend across regions last year", &[])
            .await;

        assert!(decision.plan.is_canonical());
        assert_eq!(reasoner.plan_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_short_query_uses_drafted_plan() {
        let reasoner = ScriptedReasoner::new(Some("Plan: [SQL] -> [Chart]"));
        let decision = planner(reasoner.clone(), 20).plan("top sku?", &[]).await;

        assert_eq!(
            decision.plan.kinds(),
            vec![ExpertKind::SqlQuery, ExpertKind::Visualization]
        );
        assert_eq!(decision.plan_text.as_deref(), Some("Plan: [SQL] -> [Chart]"));
        assert_eq!(reasoner.plan_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_planning_error_falls_back_without_retry() {
        let reasoner = ScriptedReasoner::new(None);
        let decision = planner(reasoner.clone(), 20).plan("hi", &[]).await;

        assert_eq!(decision.plan.kinds(), vec![ExpertKind::Fallback]);
        assert_eq!(reasoner.plan_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_threshold_is_configurable() {
        let reasoner = ScriptedReasoner::new(Some("Plan: [Knowledge]"));
        let decision = planner(reasoner, 3).plan("skincare", &[]).await;
        assert!(decision.plan.is_canonical());
    }

    #[test]
    fn test_meaningful_length_ignores_punctuation_and_spaces() {
        assert_eq!(PlannerPolicy::meaningful_length("a b, c!"), 3);
        assert_eq!(PlannerPolicy::meaningful_length("销售额？？"), 3);
    }
}

#[cfg(test)]
mod executor_tests {
    use super::*;

    #[tokio::test]
    async fn test_analysis_rewrites_query_for_visualization() {
        let fixture = Fixture::new();
        let executor = fixture.executor(ScriptedReasoner::new(None), TargetLanguage::English);
        let plan = ExecutionPlan::from_kinds(
            &[ExpertKind::DataAnalysis, ExpertKind::Visualization],
            TargetLanguage::English,
        );
        let session = SessionState::new("s1").with_dataset(file_dataset());

        let (_, result) = collect(&executor, &plan, "Q4 trend", &session).await;

        let viz_queries = fixture.visualization.queries();
        assert_eq!(viz_queries.len(), 1);
        assert!(viz_queries[0].starts_with("create a chart illustrating: Q4 sales +30%"));
        assert!(viz_queries[0].contains("User question: Q4 trend"));
        assert_eq!(result.code_output.as_deref(), Some("df.sum()"));
        assert_eq!(result.visualization.as_deref(), Some("{\"mark\":\"bar\"}"));
    }

    #[tokio::test]
    async fn test_sql_rows_supersede_file_dataset() {
        let fixture = Fixture::new();
        let executor = fixture.executor(ScriptedReasoner::new(None), TargetLanguage::English);
        let plan = ExecutionPlan::canonical(TargetLanguage::English);
        let session = SessionState::new("s1")
            .with_dataset(file_dataset())
            .with_database(Arc::new(StubDatabase));

        let _ = collect(&executor, &plan, "sales by month", &session).await;

        assert_eq!(fixture.analysis.dataset_sources(), vec![Some("sql".to_string())]);
        assert_eq!(fixture.visualization.dataset_sources(), vec![Some("sql".to_string())]);
        // 会话中的文件数据集不受影响
        assert_eq!(session.dataset.as_ref().map(|d| d.source.as_str()), Some("sales.csv"));
    }

    #[tokio::test]
    async fn test_sql_reply_without_rows_keeps_file_dataset() {
        let mut fixture = Fixture::new();
        fixture.sql = ScriptedExpert::new(ExpertReply::answer("explanation only, no rows"));
        let executor = fixture.executor(ScriptedReasoner::new(None), TargetLanguage::English);
        let plan = ExecutionPlan::canonical(TargetLanguage::English);
        let session = SessionState::new("s1")
            .with_dataset(file_dataset())
            .with_database(Arc::new(StubDatabase));

        let (_, result) = collect(&executor, &plan, "sales by month", &session).await;

        assert_eq!(fixture.analysis.dataset_sources(), vec![Some("sales.csv".to_string())]);
        assert_eq!(
            fixture.visualization.dataset_sources(),
            vec![Some("sales.csv".to_string())]
        );
        assert!(result.response.contains("explanation only, no rows"));
        assert!(!result.response.contains("Query status:"));
    }

    #[tokio::test]
    async fn test_sql_failure_text_flows_to_next_stage() {
        let mut fixture = Fixture::new();
        fixture.sql = ScriptedExpert::new(ExpertReply::failure("no such column: revenue"));
        let executor = fixture.executor(ScriptedReasoner::new(None), TargetLanguage::English);
        let plan = ExecutionPlan::from_kinds(
            &[ExpertKind::SqlQuery, ExpertKind::DataAnalysis],
            TargetLanguage::English,
        );
        let session = SessionState::new("s1")
            .with_dataset(file_dataset())
            .with_database(Arc::new(StubDatabase));

        let (events, result) = collect(&executor, &plan, "sales by month", &session).await;

        let analysis_queries = fixture.analysis.queries();
        assert!(analysis_queries[0].contains("Previous step result: no such column: revenue"));
        assert_eq!(fixture.analysis.dataset_sources(), vec![Some("sales.csv".to_string())]);
        assert!(matches!(
            &events[3],
            StreamEvent::Intermediate { result, .. } if result == "no such column: revenue"
        ));
        assert!(result.response.contains("this step could not complete: no such column: revenue"));
    }

    #[tokio::test]
    async fn test_visualization_intermediate_is_status_line() {
        let fixture = Fixture::new();
        let executor = fixture.executor(ScriptedReasoner::new(None), TargetLanguage::English);
        let plan = ExecutionPlan::from_kinds(&[ExpertKind::Visualization], TargetLanguage::English);
        let session = SessionState::new("s1").with_dataset(file_dataset());

        let (events, _) = collect(&executor, &plan, "sales by month", &session).await;

        let intermediate = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::Intermediate { result, .. } => Some(result.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(intermediate, TargetLanguage::English.visualization_ready());
    }

    #[tokio::test]
    async fn test_visualization_without_dataset_soft_fails() {
        let fixture = Fixture::new();
        let executor = fixture.executor(ScriptedReasoner::new(None), TargetLanguage::English);
        let plan = ExecutionPlan::from_kinds(
            &[ExpertKind::Knowledge, ExpertKind::Visualization],
            TargetLanguage::English,
        );
        let session = SessionState::new("s1");

        let (events, result) = collect(&executor, &plan, "sales by month", &session).await;

        assert!(fixture.visualization.queries().is_empty());
        assert!(events.last().is_some_and(|e| e.is_final()));
        assert!(result.response.contains("彩妆品类第四季度需求旺盛"));
        assert!(result.response.contains(TargetLanguage::English.no_dataset(ExpertKind::Visualization)));
    }

    #[tokio::test]
    async fn test_analysis_without_dataset_reports_its_own_stage() {
        let fixture = Fixture::new();
        let executor = fixture.executor(ScriptedReasoner::new(None), TargetLanguage::English);
        let plan = ExecutionPlan::from_kinds(
            &[ExpertKind::Knowledge, ExpertKind::DataAnalysis],
            TargetLanguage::English,
        );
        let session = SessionState::new("s1");

        let (events, result) = collect(&executor, &plan, "sales by month", &session).await;

        let expected = TargetLanguage::English.no_dataset(ExpertKind::DataAnalysis);
        assert!(fixture.analysis.queries().is_empty());
        assert!(matches!(
            &events[5],
            StreamEvent::Intermediate { result, step: 2, .. } if result == expected
        ));
        assert!(result.response.contains(expected));
        assert!(!result.response.contains("visualization"));
    }

    #[tokio::test]
    async fn test_fallback_plan_returns_direct_answer() {
        let fixture = Fixture::new();
        let executor = fixture.executor(ScriptedReasoner::new(None), TargetLanguage::English);
        let plan = ExecutionPlan::fallback(TargetLanguage::English);
        let session = SessionState::new("s1");

        let (_, result) = collect(&executor, &plan, "hello", &session).await;

        assert_eq!(result.response, "direct answer to hello");
        assert_eq!(result.source, synthesizer::SOURCE_DIRECT_ANSWER);
    }

    #[tokio::test]
    async fn test_recommendation_failure_keeps_canonical_sections() {
        let fixture = Fixture::new();
        let executor =
            fixture.executor(ScriptedReasoner::without_closing(None), TargetLanguage::English);
        let plan = ExecutionPlan::canonical(TargetLanguage::English);
        let session = SessionState::new("s1").with_dataset(file_dataset());

        let (events, result) = collect(&executor, &plan, "sales by month", &session).await;

        let language = TargetLanguage::English;
        assert_eq!(result.source, synthesizer::SOURCE_REPORT);
        assert!(result.response.contains("彩妆品类第四季度需求旺盛"));
        assert!(result.response.contains("Q4 sales +30%"));
        assert!(
            result
                .response
                .contains(&language.step_incomplete(language.collaborator_failed()))
        );
        assert!(matches!(events.last(), Some(StreamEvent::Final(_))));
    }

    #[tokio::test]
    async fn test_nothing_finished_uses_generic_template() {
        let fixture = Fixture::new();
        let executor = fixture.executor(ScriptedReasoner::new(None), TargetLanguage::English);
        let plan = ExecutionPlan::from_kinds(
            &[ExpertKind::Knowledge, ExpertKind::DataAnalysis],
            TargetLanguage::English,
        );
        let session = SessionState::new("s1");
        let (sink, _receiver) = EventSink::channel(16, WireLimits::default());

        let result = executor
            .execute(&plan, "sales by month", &session, &Deadline::from_secs(0), &sink)
            .await;

        assert_eq!(result.source, synthesizer::SOURCE_GENERIC);
        assert!(result.response.contains("completed across available dimensions"));
    }

    #[tokio::test]
    async fn test_collaborator_error_is_soft_failure() {
        struct BrokenExpert;

        #[async_trait]
        impl ExpertCollaborator for BrokenExpert {
            async fn invoke(&self, _request: ExpertRequest) -> Result<ExpertReply> {
                Err(anyhow!("connection reset"))
            }
        }

        let fixture = Fixture::new();
        let registry = ExpertRegistry::new(
            Arc::new(BrokenExpert),
            fixture.sql.clone(),
            fixture.analysis.clone(),
            fixture.visualization.clone(),
        );
        let executor =
            PipelineExecutor::new(registry, ScriptedReasoner::new(None), TargetLanguage::English, 10);
        let plan = ExecutionPlan::from_kinds(
            &[ExpertKind::Knowledge, ExpertKind::DataAnalysis],
            TargetLanguage::English,
        );
        let session = SessionState::new("s1").with_dataset(file_dataset());

        let (events, result) = collect(&executor, &plan, "sales by month", &session).await;

        assert_eq!(events.len(), 7);
        assert!(result.response.contains("connection reset"));
        assert!(result.response.contains("Q4 sales +30%"));
    }
}

#[cfg(test)]
mod orchestrator_tests {
    use super::*;
    use crate::session::SessionStore;
    use futures::StreamExt;

    fn orchestrator(fixture: &Fixture, reasoner: Arc<ScriptedReasoner>, config: &Config) -> Orchestrator {
        Orchestrator::new(config, fixture.registry(), reasoner)
    }

    #[tokio::test]
    async fn test_handle_appends_turn_to_history() {
        let fixture = Fixture::new();
        let config = Config {
            target_language: TargetLanguage::English,
            ..Default::default()
        };
        let orchestrator = orchestrator(&fixture, ScriptedReasoner::new(Some("nothing")), &config);
        let store = SessionStore::new();
        let (_, session) = store.get_or_create(Some("s1")).await;

        let (sink, _receiver) = EventSink::channel(64, WireLimits::default());
        let result = orchestrator.handle(session.clone(), "hi", &sink).await;

        let state = session.lock().await;
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history[0], ChatMessage::user("hi"));
        assert_eq!(state.history[1], ChatMessage::assistant(result.response.clone()));
    }

    #[tokio::test]
    async fn test_stream_emits_plan_event_for_drafted_plan() {
        let fixture = Fixture::new();
        let config = Config {
            target_language: TargetLanguage::English,
            ..Default::default()
        };
        let orchestrator =
            orchestrator(&fixture, ScriptedReasoner::new(Some("Plan: [Knowledge]")), &config);
        let store = SessionStore::new();
        let (_, session) = store.get_or_create(None).await;

        let kinds: Vec<&'static str> = orchestrator
            .stream(session, "trends?")
            .map(|e| e.kind())
            .collect()
            .await;

        assert_eq!(
            kinds,
            vec![
                "start",
                "thinking",
                "plan",
                "experts",
                "expert_start",
                "intermediate",
                "final"
            ]
        );
    }
}
