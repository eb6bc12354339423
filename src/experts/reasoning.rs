use anyhow::Result;
use async_trait::async_trait;

use super::{ExpertKind, ReasoningCollaborator, ReportClosing};
use crate::i18n::TargetLanguage;
use crate::llm::LLMClient;
use crate::session::{ChatMessage, format_history};

/// 基于LLM的推理协作者
pub struct LlmReasoner {
    client: LLMClient,
    language: TargetLanguage,
}

impl LlmReasoner {
    pub fn new(client: LLMClient, language: TargetLanguage) -> Self {
        Self { client, language }
    }

    fn with_history(prompt: String, history: &[ChatMessage]) -> String {
        if history.is_empty() {
            return prompt;
        }
        format!(
            "{}\n\n以下是之前的对话上下文:\n{}",
            prompt,
            format_history(history)
        )
    }
}

#[async_trait]
impl ReasoningCollaborator for LlmReasoner {
    async fn draft_plan(&self, query: &str, history: &[ChatMessage]) -> Result<String> {
        let experts = ExpertKind::CANONICAL
            .iter()
            .map(|kind| format!("- [{}]", self.language.stage_name(*kind)))
            .collect::<Vec<_>>()
            .join("\n");
        let example = format!(
            "计划: [{}] -> [{}]",
            self.language.stage_name(ExpertKind::Knowledge),
            self.language.stage_name(ExpertKind::DataAnalysis)
        );

        let system_prompt = Self::with_history(
            format!(
                r#"你是美妆销售数据分析团队的协调者，负责决定需要哪些专家参与回答用户问题。
可用的专家有：
{}

请只选择真正需要的专家，并按执行顺序输出一行计划，格式如下：
{}
随后每位专家一行，简要说明其任务。如果问题不需要任何专家（如寒暄），只回答"无需专家"。"#,
                experts, example
            ),
            history,
        );

        self.client.prompt(&system_prompt, query).await
    }

    async fn direct_answer(&self, query: &str, history: &[ChatMessage]) -> Result<String> {
        let system_prompt = Self::with_history(
            format!(
                "你是一个专业的美妆销售数据对话助手，请直接、简洁地回答用户的问题。\n\n{}",
                self.language.prompt_instruction()
            ),
            history,
        );
        let answer = self.client.prompt(&system_prompt, query).await?;
        Ok(answer.trim().to_string())
    }

    async fn recommend(&self, query: &str, digest: &str) -> Result<ReportClosing> {
        let system_prompt = format!(
            r#"你是一位美妆零售行业的战略顾问。
根据各位专家的阶段性结论，给出3到5条可以直接落地的行动建议，以及一段总结。
建议必须基于给出的结论，不要引入新的数据。

{}"#,
            self.language.prompt_instruction()
        );
        let user_prompt = format!("用户问题: {}\n\n专家结论:\n{}", query, digest);
        self.client.extract(&system_prompt, &user_prompt).await
    }
}
