use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{ExpertCollaborator, ExpertReply, ExpertRequest};
use crate::i18n::TargetLanguage;
use crate::llm::LLMClient;
use crate::session::format_history;

/// 美妆零售行业知识专家
pub struct KnowledgeExpert {
    client: LLMClient,
    language: TargetLanguage,
}

impl KnowledgeExpert {
    pub fn new(client: LLMClient, language: TargetLanguage) -> Self {
        Self { client, language }
    }

    fn system_prompt(&self, request: &ExpertRequest) -> String {
        let mut prompt = String::from(
            "你是一位资深的美妆零售行业专家，熟悉彩妆、护肤、香水、个人护理等品类，\
了解消费者细分、渠道结构、季节性与促销规律。\n\
请围绕用户问题给出专业、具体的行业见解，必要时说明适用前提，不要编造具体数据。",
        );
        if !request.history.is_empty() {
            prompt.push_str(&format!(
                "\n\n以下是之前的对话上下文:\n{}",
                format_history(&request.history)
            ));
        }
        prompt.push_str("\n\n");
        prompt.push_str(self.language.prompt_instruction());
        prompt
    }
}

#[async_trait]
impl ExpertCollaborator for KnowledgeExpert {
    async fn invoke(&self, request: ExpertRequest) -> Result<ExpertReply> {
        debug!(query = %request.query, "knowledge expert invoked");
        let answer = self
            .client
            .prompt(&self.system_prompt(&request), &request.query)
            .await?;
        Ok(ExpertReply::answer(answer.trim()))
    }
}
