//! LLM Provider支持模块
//!
//! 每个provider都使用配置中的`api_base_url`（留空时使用该provider的默认地址），
//! 对话Agent统一设置`max_tokens`与`temperature`，结构化提取只设置`max_tokens`。

use anyhow::Result;
use rig::{agent::Agent, client::CompletionClient, completion::Prompt, extractor::Extractor};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{LLMConfig, LLMProvider};

type OllamaModel = rig::providers::ollama::CompletionModel<reqwest::Client>;
type AnthropicModel = rig::providers::anthropic::completion::CompletionModel;

/// 对五个provider变体执行同一段代码
macro_rules! for_each_provider {
    ($value:expr, $ty:ident, $inner:ident => $body:expr) => {
        match $value {
            $ty::OpenAI($inner) => $body,
            $ty::Moonshot($inner) => $body,
            $ty::DeepSeek($inner) => $body,
            $ty::Anthropic($inner) => $body,
            $ty::Ollama($inner) => $body,
        }
    };
}

/// 统一的Provider客户端枚举
#[derive(Clone)]
pub enum ProviderClient {
    OpenAI(rig::providers::openai::Client),
    Moonshot(rig::providers::moonshot::Client),
    DeepSeek(rig::providers::deepseek::Client),
    Anthropic(rig::providers::anthropic::Client),
    Ollama(rig::providers::ollama::Client),
}

/// 配置的API地址，空字符串视为未配置
pub(crate) fn configured_base_url(config: &LLMConfig) -> Option<&str> {
    Some(config.api_base_url.trim()).filter(|url| !url.is_empty())
}

impl ProviderClient {
    /// 根据配置创建相应的provider客户端
    pub fn new(config: &LLMConfig) -> Result<Self> {
        let base_url = configured_base_url(config);
        let client = match config.provider {
            // DashScope、vLLM等OpenAI兼容端点同样走这里
            LLMProvider::OpenAI => {
                let builder = rig::providers::openai::Client::builder(&config.api_key);
                ProviderClient::OpenAI(match base_url {
                    Some(url) => builder.base_url(url).build(),
                    None => builder.build(),
                })
            }
            LLMProvider::Moonshot => {
                let builder = rig::providers::moonshot::Client::builder(&config.api_key);
                ProviderClient::Moonshot(match base_url {
                    Some(url) => builder.base_url(url).build(),
                    None => builder.build(),
                })
            }
            LLMProvider::DeepSeek => {
                let builder = rig::providers::deepseek::Client::builder(&config.api_key);
                ProviderClient::DeepSeek(match base_url {
                    Some(url) => builder.base_url(url).build(),
                    None => builder.build(),
                })
            }
            LLMProvider::Anthropic => {
                let builder = rig::providers::anthropic::ClientBuilder::new(&config.api_key);
                ProviderClient::Anthropic(match base_url {
                    Some(url) => builder.base_url(url).build()?,
                    None => builder.build()?,
                })
            }
            // 本地模型不需要API KEY
            LLMProvider::Ollama => {
                let builder = rig::providers::ollama::Client::builder();
                ProviderClient::Ollama(match base_url {
                    Some(url) => builder.base_url(url).build(),
                    None => builder.build(),
                })
            }
        };
        Ok(client)
    }

    /// 创建不带工具的对话Agent
    pub fn create_agent(
        &self,
        model: &str,
        system_prompt: &str,
        config: &LLMConfig,
    ) -> ProviderAgent {
        let max_tokens = u64::from(config.max_tokens);
        match self {
            ProviderClient::OpenAI(client) => ProviderAgent::OpenAI(
                client
                    .completion_model(model)
                    .completions_api()
                    .into_agent_builder()
                    .preamble(system_prompt)
                    .max_tokens(max_tokens)
                    .temperature(config.temperature)
                    .build(),
            ),
            ProviderClient::Moonshot(client) => ProviderAgent::Moonshot(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .max_tokens(max_tokens)
                    .temperature(config.temperature)
                    .build(),
            ),
            ProviderClient::DeepSeek(client) => ProviderAgent::DeepSeek(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .max_tokens(max_tokens)
                    .temperature(config.temperature)
                    .build(),
            ),
            ProviderClient::Anthropic(client) => ProviderAgent::Anthropic(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .max_tokens(max_tokens)
                    .temperature(config.temperature)
                    .build(),
            ),
            ProviderClient::Ollama(client) => ProviderAgent::Ollama(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .max_tokens(max_tokens)
                    .temperature(config.temperature)
                    .build(),
            ),
        }
    }

    /// 创建结构化数据提取器
    pub fn create_extractor<T>(
        &self,
        model: &str,
        system_prompt: &str,
        config: &LLMConfig,
    ) -> ProviderExtractor<T>
    where
        T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Send + Sync + 'static,
    {
        let max_tokens = u64::from(config.max_tokens);
        match self {
            ProviderClient::OpenAI(client) => ProviderExtractor::OpenAI(
                client
                    .extractor_completions_api::<T>(model)
                    .preamble(system_prompt)
                    .max_tokens(max_tokens)
                    .build(),
            ),
            ProviderClient::Moonshot(client) => ProviderExtractor::Moonshot(
                client
                    .extractor::<T>(model)
                    .preamble(system_prompt)
                    .max_tokens(max_tokens)
                    .build(),
            ),
            ProviderClient::DeepSeek(client) => ProviderExtractor::DeepSeek(
                client
                    .extractor::<T>(model)
                    .preamble(system_prompt)
                    .max_tokens(max_tokens)
                    .build(),
            ),
            ProviderClient::Anthropic(client) => ProviderExtractor::Anthropic(
                client
                    .extractor::<T>(model)
                    .preamble(system_prompt)
                    .max_tokens(max_tokens)
                    .build(),
            ),
            ProviderClient::Ollama(client) => ProviderExtractor::Ollama(
                client
                    .extractor::<T>(model)
                    .preamble(system_prompt)
                    .max_tokens(max_tokens)
                    .build(),
            ),
        }
    }
}

/// 统一的Agent枚举
pub enum ProviderAgent {
    OpenAI(Agent<rig::providers::openai::CompletionModel>),
    Moonshot(Agent<rig::providers::moonshot::CompletionModel>),
    DeepSeek(Agent<rig::providers::deepseek::CompletionModel>),
    Anthropic(Agent<AnthropicModel>),
    Ollama(Agent<OllamaModel>),
}

impl ProviderAgent {
    pub async fn prompt(&self, prompt: &str) -> Result<String> {
        for_each_provider!(self, ProviderAgent, agent => Ok(agent.prompt(prompt).await?))
    }
}

/// 统一的Extractor枚举
pub enum ProviderExtractor<T>
where
    T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Send + Sync + 'static,
{
    OpenAI(Extractor<rig::providers::openai::CompletionModel, T>),
    Moonshot(Extractor<rig::providers::moonshot::CompletionModel, T>),
    DeepSeek(Extractor<rig::providers::deepseek::CompletionModel, T>),
    Anthropic(Extractor<AnthropicModel, T>),
    Ollama(Extractor<OllamaModel, T>),
}

impl<T> ProviderExtractor<T>
where
    T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Send + Sync + 'static,
{
    pub async fn extract(&self, prompt: &str) -> Result<T> {
        for_each_provider!(self, ProviderExtractor, extractor => Ok(extractor.extract(prompt).await?))
    }
}
