//! LLM客户端 - 提供统一的LLM服务接口

use anyhow::{Result, anyhow};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::LLMConfig;

mod providers;
pub mod utils;

use providers::ProviderClient;
use utils::evaluate_befitting_model;

/// LLM客户端 - 提供统一的LLM服务接口
#[derive(Clone)]
pub struct LLMClient {
    config: LLMConfig,
    client: ProviderClient,
}

impl LLMClient {
    /// 创建新的LLM客户端
    pub fn new(config: LLMConfig) -> Result<Self> {
        let client = ProviderClient::new(&config)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LLMConfig {
        &self.config
    }

    /// 检查模型连接和功能是否正常
    pub async fn check_connection(&self) -> Result<()> {
        info!(provider = %self.config.provider, "🔄 正在检查模型连接...");
        match self
            .prompt("System: You are a helpful assistant.", "Hello")
            .await
        {
            Ok(_) => {
                info!("✅ 模型连接正常");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "❌ 模型连接失败");
                Err(e)
            }
        }
    }

    /// 通用重试逻辑，用于处理异步操作的重试机制
    async fn retry_with_backoff<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let max_retries = self.config.retry_attempts.max(1);
        let retry_delay_ms = self.config.retry_delay_ms;
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let mut retries = 0;

        loop {
            let outcome = match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!(
                    "模型调用超时（{}秒）",
                    self.config.timeout_seconds
                )),
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(err) => {
                    retries += 1;
                    warn!(
                        attempt = retries,
                        max_retries,
                        error = %err,
                        "❌ 调用模型服务出错，重试中"
                    );
                    if retries >= max_retries {
                        return Err(err);
                    }
                    tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
                }
            }
        }
    }

    /// 结构化数据提取
    pub async fn extract<T>(&self, system_prompt: &str, user_prompt: &str) -> Result<T>
    where
        T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Send + Sync + 'static,
    {
        let (befitting_model, fallover_model) =
            evaluate_befitting_model(&self.config, system_prompt, user_prompt);

        self.extract_inner(system_prompt, user_prompt, befitting_model, fallover_model)
            .await
    }

    async fn extract_inner<T>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        befitting_model: String,
        fallover_model: Option<String>,
    ) -> Result<T>
    where
        T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Send + Sync + 'static,
    {
        let extractor =
            self.client
                .create_extractor::<T>(&befitting_model, system_prompt, &self.config);

        let result = self
            .retry_with_backoff(|| async { extractor.extract(user_prompt).await })
            .await;

        match (result, fallover_model) {
            (Ok(r), _) => Ok(r),
            (Err(e), Some(model)) => {
                warn!(
                    model = %model,
                    error = %e,
                    "❌ 多次尝试均失败，改用备选模型"
                );
                let user_prompt_with_fixer = format!(
                    "{}\n\n**注意事项**此前调用过程中出现错误，错误信息为“{}”，请在本次回答中规避这个错误",
                    user_prompt, e
                );
                Box::pin(self.extract_inner(
                    system_prompt,
                    &user_prompt_with_fixer,
                    model,
                    None,
                ))
                .await
            }
            (Err(e), None) => {
                error!(error = %e, "❌ 调用模型服务出错，已无备选模型");
                Err(e)
            }
        }
    }

    /// 单轮对话，按提示词规模选择模型，失败后尝试备选模型
    pub async fn prompt(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let (befitting_model, fallover_model) =
            evaluate_befitting_model(&self.config, system_prompt, user_prompt);

        match self
            .prompt_with_model(&befitting_model, system_prompt, user_prompt)
            .await
        {
            Ok(text) => Ok(text),
            Err(e) => match fallover_model {
                Some(model) => {
                    warn!(model = %model, error = %e, "❌ 多次尝试均失败，改用备选模型");
                    self.prompt_with_model(&model, system_prompt, user_prompt)
                        .await
                }
                None => Err(e),
            },
        }
    }

    async fn prompt_with_model(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let agent = self
            .client
            .create_agent(model, system_prompt, &self.config);

        self.retry_with_backoff(|| async { agent.prompt(user_prompt).await })
            .await
    }
}
