use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::i18n::TargetLanguage;

/// LLM Provider类型
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum LLMProvider {
    #[serde(rename = "openai")]
    #[default]
    OpenAI,
    #[serde(rename = "moonshot")]
    Moonshot,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::Moonshot => write!(f, "moonshot"),
            LLMProvider::DeepSeek => write!(f, "deepseek"),
            LLMProvider::Anthropic => write!(f, "anthropic"),
            LLMProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "moonshot" => Ok(LLMProvider::Moonshot),
            "deepseek" => Ok(LLMProvider::DeepSeek),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "ollama" => Ok(LLMProvider::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// 应用程序配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 目标语言
    pub target_language: TargetLanguage,

    /// LLM模型配置
    pub llm: LLMConfig,

    /// 意图规划策略
    pub planner: PlannerConfig,

    /// 流水线执行配置
    pub pipeline: PipelineConfig,

    /// 是否启用详细日志
    pub verbose: bool,
}

/// LLM模型配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LLMConfig {
    /// LLM Provider类型
    pub provider: LLMProvider,

    /// LLM API KEY
    pub api_key: String,

    /// LLM API基地址，留空时使用provider的默认地址
    pub api_base_url: String,

    /// 高能效模型，优先用于规划、知识问答等常规推理任务
    pub model_efficient: String,

    /// 高质量模型，用于长上下文的分析任务，以及作为efficient失效情况下的兜底
    pub model_powerful: String,

    /// 最大tokens
    pub max_tokens: u32,

    /// 温度
    pub temperature: f64,

    /// 重试次数
    pub retry_attempts: u32,

    /// 重试间隔（毫秒）
    pub retry_delay_ms: u64,

    /// 超时时间（秒）
    pub timeout_seconds: u64,
}

/// 意图规划策略配置
///
/// 命中"全面分析"类触发词，或有效字符数超过阈值时，直接使用固定的四阶段计划；
/// 否则请求推理协作者给出自由格式的计划文本。
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PlannerConfig {
    /// 触发固定四阶段计划的短语（大小写不敏感）
    pub comprehensive_triggers: Vec<String>,

    /// 有效字符数阈值，超过即视为多维度问题
    pub length_threshold: usize,
}

/// 流水线执行配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// 单次查询的最长处理时间（秒），每个阶段开始前检查
    pub deadline_seconds: u64,

    /// 传递给专家的最近对话条数
    pub history_limit: usize,

    /// 单个事件中文本字段的最大字符数
    pub max_text_chars: usize,

    /// 单个事件中内联图像/图表规格的最大字符数
    pub max_image_chars: usize,

    /// 事件通道容量
    pub event_buffer: usize,
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_language: TargetLanguage::default(),
            llm: LLMConfig::default(),
            planner: PlannerConfig::default(),
            pipeline: PipelineConfig::default(),
            verbose: false,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::default(),
            api_key: std::env::var("INSIGHTFLOW_LLM_API_KEY").unwrap_or_default(),
            api_base_url: String::from("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            model_efficient: String::from("qwen-plus"),
            model_powerful: String::from("qwen-max"),
            max_tokens: 8192,
            temperature: 0.1,
            retry_attempts: 3,
            retry_delay_ms: 2000,
            timeout_seconds: 120,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            comprehensive_triggers: vec![
                "full analysis".to_string(),
                "multi-angle".to_string(),
                "complete report".to_string(),
                "全面分析".to_string(),
                "多角度".to_string(),
                "完整报告".to_string(),
                "综合分析".to_string(),
            ],
            length_threshold: 20,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_seconds: 180,
            history_limit: 10,
            max_text_chars: 50_000,
            max_image_chars: 500_000,
            event_buffer: 32,
        }
    }
}

// Include tests
#[cfg(test)]
mod tests;
