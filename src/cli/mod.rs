use crate::config::{Config, LLMProvider};
use crate::i18n::TargetLanguage;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;

/// 默认配置文件名，位于当前工作目录
pub const DEFAULT_CONFIG_FILE: &str = "insightflow.toml";

/// InsightFlow - 由Rust与AI驱动的美妆行业多专家分析引擎
#[derive(Parser, Debug)]
#[command(name = "InsightFlow (insightflow-rs)")]
#[command(
    about = "Natural-language business analysis engine. It plans which expert collaborators a question needs, runs them as an ordered pipeline, streams progress events as JSON lines and synthesizes one composite report."
)]
#[command(version)]
pub struct Args {
    /// 用户问题
    #[arg(short, long)]
    pub query: String,

    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// CSV数据文件
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// SQLite数据库文件
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// 会话ID，未指定时自动生成
    #[arg(short, long)]
    pub session_id: Option<String>,

    /// 历史对话（JSON数组，元素为 {"role": ..., "content": ...}）
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// 单次查询的最长处理时间（秒）
    #[arg(long)]
    pub deadline_seconds: Option<u64>,

    /// 是否启用详细日志
    #[arg(short, long)]
    pub verbose: bool,

    /// 跳过启动时的LLM连通性检查
    #[arg(long)]
    pub skip_connection_check: bool,

    /// 高能效模型，优先用于规划与常规推理任务
    #[arg(long)]
    pub model_efficient: Option<String>,

    /// 高质量模型，用于长上下文任务，以及作为efficient失效情况下的兜底
    #[arg(long)]
    pub model_powerful: Option<String>,

    /// LLM API基地址
    #[arg(long)]
    pub llm_api_base_url: Option<String>,

    /// LLM API KEY
    #[arg(long)]
    pub llm_api_key: Option<String>,

    /// 最大tokens数
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// 温度参数
    #[arg(long)]
    pub temperature: Option<f64>,

    /// LLM Provider (openai, moonshot, deepseek, anthropic, ollama)
    #[arg(long)]
    pub llm_provider: Option<String>,

    /// 目标语言 (zh, en)
    #[arg(long)]
    pub target_language: Option<String>,
}

impl Args {
    /// 加载配置文件并用CLI参数覆盖
    ///
    /// 显式指定的配置文件读取失败时报错；未指定时尝试当前目录下的默认文件，不存在则使用默认值。
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(config_path) => Config::from_file(config_path)
                .with_context(|| format!("无法读取配置文件 {:?}", config_path))?,
            None => {
                let default_config_path = std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(DEFAULT_CONFIG_FILE);
                if default_config_path.exists() {
                    Config::from_file(&default_config_path).with_context(|| {
                        format!("无法读取默认配置文件 {:?}", default_config_path)
                    })?
                } else {
                    Config::default()
                }
            }
        };

        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(provider_str) = &self.llm_provider {
            match provider_str.parse::<LLMProvider>() {
                Ok(provider) => config.llm.provider = provider,
                Err(_) => warn!(provider = %provider_str, "⚠️ 未知的provider，保留配置中的provider"),
            }
        }
        if let Some(llm_api_base_url) = &self.llm_api_base_url {
            config.llm.api_base_url = llm_api_base_url.clone();
        }
        if let Some(llm_api_key) = &self.llm_api_key {
            config.llm.api_key = llm_api_key.clone();
        }
        if let Some(model_efficient) = &self.model_efficient {
            config.llm.model_efficient = model_efficient.clone();
        }
        if let Some(model_powerful) = &self.model_powerful {
            config.llm.model_powerful = model_powerful.clone();
        }
        if let Some(max_tokens) = self.max_tokens {
            config.llm.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            config.llm.temperature = temperature;
        }

        if let Some(target_language_str) = &self.target_language {
            match target_language_str.parse::<TargetLanguage>() {
                Ok(target_language) => config.target_language = target_language,
                Err(_) => warn!(
                    language = %target_language_str,
                    "⚠️ 未知的目标语言，保留配置中的语言"
                ),
            }
        }

        if let Some(deadline_seconds) = self.deadline_seconds {
            config.pipeline.deadline_seconds = deadline_seconds;
        }
        config.verbose = config.verbose || self.verbose;
    }
}
