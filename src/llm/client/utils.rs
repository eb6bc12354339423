use crate::config::LLMConfig;

/// 小于该字节数的提示词优先使用高能效模型
const EFFICIENT_PROMPT_LIMIT: usize = 32 * 1024;

/// 按提示词规模选择模型，返回(首选模型, 失败时的备选模型)
pub fn evaluate_befitting_model(
    llm_config: &LLMConfig,
    system_prompt: &str,
    user_prompt: &str,
) -> (String, Option<String>) {
    if system_prompt.len() + user_prompt.len() <= EFFICIENT_PROMPT_LIMIT {
        return (
            llm_config.model_efficient.clone(),
            Some(llm_config.model_powerful.clone()),
        );
    }
    (llm_config.model_powerful.clone(), None)
}
