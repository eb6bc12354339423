use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{ExpertCollaborator, ExpertKind, ExpertReply, ExpertRequest};
use crate::i18n::TargetLanguage;
use crate::llm::LLMClient;
use crate::session::format_history;

/// 提示词中预览的数据行数
const PREVIEW_ROWS: usize = 30;

/// 基于当前数据集做统计分析的专家
pub struct AnalysisExpert {
    client: LLMClient,
    language: TargetLanguage,
}

impl AnalysisExpert {
    pub fn new(client: LLMClient, language: TargetLanguage) -> Self {
        Self { client, language }
    }

    fn system_prompt(&self, request: &ExpertRequest) -> String {
        let mut prompt = String::from(
            r#"你是一位美妆行业的数据分析专家，精通数据处理和统计分析。
你会拿到数据集的基本信息、数值列的统计量以及前若干行数据预览。

分析时请遵循以下原则：
1. 结论必须能由给出的数据支撑，引用具体数字
2. 关注美妆行业的特性，如产品类别、季节性趋势、促销效果等
3. 结果应该包含商业洞察，而不仅仅是数据描述
4. 如需说明计算过程，可以附上一个```python代码块，但结论部分必须是完整的自然语言"#,
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
impl ExpertCollaborator for AnalysisExpert {
    async fn invoke(&self, request: ExpertRequest) -> Result<ExpertReply> {
        let Some(dataset) = request.dataset.clone() else {
            return Ok(ExpertReply::failure(
                self.language.no_dataset(ExpertKind::DataAnalysis),
            ));
        };

        let user_prompt = format!(
            "{}\n数值列统计:\n{}\n数据预览:\n{}\n\n用户问题: {}",
            dataset.describe(),
            dataset.numeric_summary(),
            dataset.preview_markdown(PREVIEW_ROWS),
            request.query
        );
        debug!(source = %dataset.source, rows = dataset.len(), "analysis expert invoked");

        let response = self
            .client
            .prompt(&self.system_prompt(&request), &user_prompt)
            .await?;

        let mut reply = ExpertReply::answer(response.trim());
        let code = extract_code_blocks(&response);
        if !code.is_empty() {
            reply = reply.with_code_output(code);
        }
        Ok(reply)
    }
}

/// 收集回复中的所有代码块，作为分析过程记录
pub fn extract_code_blocks(text: &str) -> String {
    text.split("```")
        .skip(1)
        .step_by(2)
        .map(|block| {
            // 去掉首行的语言标识
            match block.split_once('\n') {
                Some((tag, body)) if is_language_tag(tag) => body.trim(),
                _ => block.trim(),
            }
        })
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn is_language_tag(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '_')
}
