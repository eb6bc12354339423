use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use insightflow_rs::config::{Config, PlannerConfig};
use insightflow_rs::data::{DatabaseHandle, Dataset, Row};
use insightflow_rs::experts::{
    ExpertCollaborator, ExpertKind, ExpertRegistry, ExpertReply, ExpertRequest,
    ReasoningCollaborator, ReportClosing,
};
use insightflow_rs::i18n::TargetLanguage;
use insightflow_rs::orchestrator::{
    Deadline, EventSink, ExecutionPlan, FinalResult, IntentPlanner, Orchestrator, PipelineExecutor,
    PlanParser, PlannerPolicy, StreamEvent, WireLimits,
};
use insightflow_rs::session::{ChatMessage, SessionState, SessionStore};

/// 返回固定文本的专家，并记录收到的数据集来源
struct FixedExpert {
    text: String,
    dataset_sources: Mutex<Vec<Option<String>>>,
}

impl FixedExpert {
    fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            dataset_sources: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Option<String>> {
        self.dataset_sources.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExpertCollaborator for FixedExpert {
    async fn invoke(&self, request: ExpertRequest) -> Result<ExpertReply> {
        self.dataset_sources
            .lock()
            .unwrap()
            .push(request.dataset.as_ref().map(|d| d.source.clone()));
        Ok(ExpertReply::answer(self.text.clone()))
    }
}

struct FixedReasoner {
    plan_text: String,
}

#[async_trait]
impl ReasoningCollaborator for FixedReasoner {
    async fn draft_plan(&self, _query: &str, _history: &[ChatMessage]) -> Result<String> {
        Ok(self.plan_text.clone())
    }

    async fn direct_answer(&self, query: &str, _history: &[ChatMessage]) -> Result<String> {
        Ok(format!("Direct answer: {}", query))
    }

    async fn recommend(&self, _query: &str, _digest: &str) -> Result<ReportClosing> {
        Ok(ReportClosing {
            recommendations: vec!["Stock up before Q4".to_string()],
            summary: "Demand is seasonal".to_string(),
        })
    }
}

struct InMemoryDatabase;

#[async_trait]
impl DatabaseHandle for InMemoryDatabase {
    fn name(&self) -> String {
        "memory".to_string()
    }

    async fn schema_text(&self) -> Result<String> {
        Ok("Table: sales (month TEXT, revenue REAL)".to_string())
    }

    async fn query(&self, _sql: &str) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }
}

struct Experts {
    knowledge: Arc<FixedExpert>,
    sql: Arc<FixedExpert>,
    analysis: Arc<FixedExpert>,
    visualization: Arc<FixedExpert>,
}

impl Experts {
    fn new() -> Self {
        Self {
            knowledge: FixedExpert::new("Category X shows seasonal demand"),
            sql: FixedExpert::new("Monthly revenue by category"),
            analysis: FixedExpert::new("Q4 sales +30%"),
            visualization: FixedExpert::new("Bar chart of monthly revenue"),
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
}

fn reasoner(plan_text: &str) -> Arc<FixedReasoner> {
    Arc::new(FixedReasoner {
        plan_text: plan_text.to_string(),
    })
}

/// 在临时目录中写入一个CSV数据集并加载
fn create_sales_dataset(dir: &Path) -> Dataset {
    let path = dir.join("sales.csv");
    fs::write(
        &path,
        "month,category,revenue\n2024-10,lipstick,100\n2024-11,lipstick,130\n2024-12,serum,160\n",
    )
    .unwrap();
    Dataset::from_csv_path(&path).unwrap()
}

fn english_config() -> Config {
    Config {
        target_language: TargetLanguage::English,
        ..Default::default()
    }
}

async fn execute(
    executor: &PipelineExecutor,
    plan: &ExecutionPlan,
    query: &str,
    session: &SessionState,
    deadline: Deadline,
) -> (Vec<StreamEvent>, FinalResult) {
    let (sink, mut receiver) = EventSink::channel(64, WireLimits::default());
    let result = executor
        .execute(plan, query, session, &deadline, &sink)
        .await;
    drop(sink);

    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    (events, result)
}

#[test]
fn test_structured_plan_keeps_order_and_dedups() {
    let parser = PlanParser::new(TargetLanguage::English);
    let plan =
        parser.parse("Plan: [SQL Expert] -> [Data Analysis] -> [SQL Expert] -> [Chart Expert]");

    assert_eq!(
        plan.kinds(),
        vec![
            ExpertKind::SqlQuery,
            ExpertKind::DataAnalysis,
            ExpertKind::Visualization
        ]
    );
}

#[test]
fn test_unrecognized_plan_text_falls_back() {
    let parser = PlanParser::new(TargetLanguage::English);
    for text in ["", "Just say hello back.", "Plan: [Poet] -> [Painter]"] {
        assert_eq!(parser.parse(text).kinds(), vec![ExpertKind::Fallback]);
    }
}

#[test]
fn test_parse_is_idempotent() {
    let parser = PlanParser::new(TargetLanguage::Chinese);
    let text = "计划: [行业知识专家] -> [数据分析专家]\n理由：需要结合行业背景";

    assert_eq!(parser.parse(text), parser.parse(text));
}

#[tokio::test]
async fn test_complete_report_phrase_always_yields_canonical_plan() {
    let config = PlannerConfig {
        length_threshold: 1000,
        ..Default::default()
    };
    let planner = IntentPlanner::new(
        PlannerPolicy::from(&config),
        reasoner("Plan: [Knowledge]"),
        TargetLanguage::English,
    );

    for query in [
        "complete report",
        "Please give me a Complete Report on lipstick sales across every region this year",
    ] {
        let decision = planner.plan(query, &[]).await;
        assert!(decision.plan.is_canonical(), "query: {}", query);
    }
}

#[tokio::test]
async fn test_missing_database_still_runs_analysis_on_file_dataset() {
    let dir = TempDir::new().unwrap();
    let experts = Experts::new();
    let executor = PipelineExecutor::new(
        experts.registry(),
        reasoner(""),
        TargetLanguage::English,
        10,
    );
    let session = SessionState::new("s1").with_dataset(create_sales_dataset(dir.path()));
    let plan = ExecutionPlan::canonical(TargetLanguage::English);

    let (_, result) = execute(
        &executor,
        &plan,
        "How are sales going?",
        &session,
        Deadline::from_secs(60),
    )
    .await;

    assert!(experts.sql.calls().is_empty());
    let analysis_calls = experts.analysis.calls();
    assert_eq!(analysis_calls.len(), 1);
    assert!(analysis_calls[0].as_deref().unwrap().ends_with("sales.csv"));

    assert_eq!(result.source, "multi_expert_report");
    assert!(result.response.contains("Query status:"));
    assert!(result.response.contains("Q4 sales +30%"));
}

#[tokio::test]
async fn test_event_ordering_for_successful_run() {
    let dir = TempDir::new().unwrap();
    let experts = Experts::new();
    let executor = PipelineExecutor::new(
        experts.registry(),
        reasoner(""),
        TargetLanguage::English,
        10,
    );
    let session = SessionState::new("s1")
        .with_dataset(create_sales_dataset(dir.path()))
        .with_database(Arc::new(InMemoryDatabase));
    let plan = ExecutionPlan::canonical(TargetLanguage::English);

    let (events, _) = execute(&executor, &plan, "sales?", &session, Deadline::from_secs(60)).await;

    let n = plan.len();
    assert_eq!(events.len(), 2 * n + 3);
    assert!(matches!(events[0], StreamEvent::Start { .. }));
    assert!(matches!(events[1], StreamEvent::Experts { .. }));
    for step in 1..=n {
        match &events[2 * step] {
            StreamEvent::ExpertStart {
                step: s,
                total_steps,
                ..
            } => {
                assert_eq!(*s, step);
                assert_eq!(*total_steps, n);
            }
            other => panic!("expected expert_start, got {:?}", other),
        }
        match &events[2 * step + 1] {
            StreamEvent::Intermediate { step: s, .. } => assert_eq!(*s, step),
            other => panic!("expected intermediate, got {:?}", other),
        }
    }
    assert!(events.last().unwrap().is_final());
}

#[tokio::test]
async fn test_zero_deadline_emits_warning_then_final() {
    let experts = Experts::new();
    let executor = PipelineExecutor::new(
        experts.registry(),
        reasoner(""),
        TargetLanguage::English,
        10,
    );
    let session = SessionState::new("s1");
    let plan = ExecutionPlan::canonical(TargetLanguage::English);

    let (events, result) =
        execute(&executor, &plan, "sales?", &session, Deadline::from_secs(0)).await;

    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["start", "warning", "final"]);
    assert!(!result.response.trim().is_empty());
    assert!(experts.knowledge.calls().is_empty());
}

#[tokio::test]
async fn test_zero_deadline_through_orchestrator() {
    let mut config = english_config();
    config.pipeline.deadline_seconds = 0;
    let experts = Experts::new();
    let orchestrator = Orchestrator::new(&config, experts.registry(), reasoner("Plan: [Knowledge]"));
    let store = SessionStore::new();
    let session = store.insert(SessionState::new("s1")).await;

    let kinds: Vec<&str> = orchestrator
        .stream(session, "sales?")
        .map(|e| e.kind())
        .collect()
        .await;

    assert_eq!(kinds, vec!["start", "warning", "final"]);
}

#[tokio::test]
async fn test_knowledge_then_analysis_end_to_end() {
    let dir = TempDir::new().unwrap();
    let experts = Experts::new();
    let orchestrator = Orchestrator::new(
        &english_config(),
        experts.registry(),
        reasoner("Plan: [Industry Knowledge] -> [Data Analysis]"),
    );
    let store = SessionStore::new();
    let session = store
        .insert(SessionState::new("s1").with_dataset(create_sales_dataset(dir.path())))
        .await;

    let events: Vec<StreamEvent> = orchestrator.stream(session.clone(), "why?").collect().await;

    let result = match events.last() {
        Some(StreamEvent::Final(result)) => result.clone(),
        other => panic!("expected final event, got {:?}", other),
    };
    let response = &result.response;
    let knowledge_label = response.find("Industry Knowledge Expert").unwrap();
    let knowledge_text = response.find("Category X shows seasonal demand").unwrap();
    let analysis_label = response.find("Data Analysis Expert").unwrap();
    let analysis_text = response.find("Q4 sales +30%").unwrap();

    assert!(knowledge_label < knowledge_text);
    assert!(knowledge_text < analysis_label);
    assert!(analysis_label < analysis_text);

    let state = session.lock().await;
    assert_eq!(state.history.len(), 2);
    assert_eq!(state.history[1].content, *response);
}
