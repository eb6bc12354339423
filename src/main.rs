use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::fs;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use insightflow_rs::cli;
use insightflow_rs::data::{Dataset, SqliteDatabase};
use insightflow_rs::llm::LLMClient;
use insightflow_rs::session::{ChatMessage, SessionStore};
use insightflow_rs::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    // 先安装日志，加载配置时的警告才能输出；标准输出留给事件流，日志写到标准错误
    let (filter, filter_handle) = reload::Layer::new(log_filter(args.verbose));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.load_config()?;
    if config.verbose && !args.verbose {
        filter_handle.reload(log_filter(true))?;
    }

    let client = LLMClient::new(config.llm.clone())?;
    if !args.skip_connection_check {
        client.check_connection().await?;
    }

    let store = SessionStore::new();
    let (session_id, session) = store.get_or_create(args.session_id.as_deref()).await;
    {
        let mut state = session.lock().await;
        if let Some(path) = &args.data {
            let dataset = Dataset::from_csv_path(path)
                .with_context(|| format!("无法加载数据文件 {:?}", path))?;
            info!(source = %dataset.source, rows = dataset.len(), "📊 数据集已加载");
            state.dataset = Some(Arc::new(dataset));
        }
        if let Some(path) = &args.database {
            let database = SqliteDatabase::open(path)?;
            info!(path = ?path, "🗄️ 数据库已连接");
            state.database = Some(Arc::new(database));
        }
        if let Some(path) = &args.history {
            let content = fs::read_to_string(path)
                .with_context(|| format!("无法读取历史对话 {:?}", path))?;
            let history: Vec<ChatMessage> =
                serde_json::from_str(&content).context("历史对话格式错误")?;
            state.history = history;
        }
    }
    info!(session_id = %session_id, "🚀 开始处理查询");

    let orchestrator = Orchestrator::from_llm(&config, client);
    let mut events = orchestrator.stream(session, args.query.clone());
    while let Some(event) = events.next().await {
        match event.to_json_line() {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, kind = event.kind(), "⚠️ 事件序列化失败"),
        }
    }

    Ok(())
}

/// RUST_LOG优先，否则按是否详细输出选择级别
fn log_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}
