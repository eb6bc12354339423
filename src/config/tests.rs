#[cfg(test)]
mod tests {
    use crate::config::{Config, LLMConfig, LLMProvider, PipelineConfig, PlannerConfig};
    use crate::i18n::TargetLanguage;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.target_language, TargetLanguage::Chinese);
        assert!(!config.verbose);
        assert_eq!(config.planner.length_threshold, 20);
        assert_eq!(config.pipeline.deadline_seconds, 180);
    }

    #[test]
    fn test_llm_provider_default() {
        let provider = LLMProvider::default();
        assert_eq!(provider, LLMProvider::OpenAI);
    }

    #[test]
    fn test_llm_provider_from_str() {
        assert_eq!(
            "openai".parse::<LLMProvider>().unwrap(),
            LLMProvider::OpenAI
        );
        assert_eq!(
            "Moonshot".parse::<LLMProvider>().unwrap(),
            LLMProvider::Moonshot
        );
        assert_eq!(
            "deepseek".parse::<LLMProvider>().unwrap(),
            LLMProvider::DeepSeek
        );
        assert_eq!(
            "anthropic".parse::<LLMProvider>().unwrap(),
            LLMProvider::Anthropic
        );
        assert_eq!(
            "ollama".parse::<LLMProvider>().unwrap(),
            LLMProvider::Ollama
        );

        assert!("invalid".parse::<LLMProvider>().is_err());
    }

    #[test]
    fn test_llm_provider_display() {
        assert_eq!(LLMProvider::OpenAI.to_string(), "openai");
        assert_eq!(LLMProvider::DeepSeek.to_string(), "deepseek");
        assert_eq!(LLMProvider::Ollama.to_string(), "ollama");
    }

    #[test]
    fn test_llm_config_default() {
        let config = LLMConfig::default();

        assert_eq!(config.provider, LLMProvider::OpenAI);
        // api_key may be empty if env var is not set
        assert!(!config.api_base_url.is_empty());
        assert!(!config.model_efficient.is_empty());
        assert!(!config.model_powerful.is_empty());
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay_ms, 2000);
    }

    #[test]
    fn test_planner_config_default_triggers() {
        let config = PlannerConfig::default();

        assert!(config
            .comprehensive_triggers
            .iter()
            .any(|t| t == "complete report"));
        assert!(config.comprehensive_triggers.iter().any(|t| t == "全面分析"));
    }

    #[test]
    fn test_pipeline_config_default_ceilings() {
        let config = PipelineConfig::default();

        assert_eq!(config.max_text_chars, 50_000);
        assert_eq!(config.max_image_chars, 500_000);
        assert_eq!(config.history_limit, 10);
        assert!(config.event_buffer > 0);
    }

    #[test]
    fn test_config_from_file_partial() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("insightflow.toml");
        std::fs::write(
            &config_path,
            r#"
target_language = "en"

[planner]
length_threshold = 42

[pipeline]
deadline_seconds = 0

[llm]
provider = "deepseek"
model_efficient = "deepseek-chat"
"#,
        )
        .unwrap();

        let config = Config::from_file(&config_path).unwrap();

        assert_eq!(config.target_language, TargetLanguage::English);
        assert_eq!(config.planner.length_threshold, 42);
        // 未写出的字段回落到默认值
        assert!(!config.planner.comprehensive_triggers.is_empty());
        assert_eq!(config.pipeline.deadline_seconds, 0);
        assert_eq!(config.pipeline.max_text_chars, 50_000);
        assert_eq!(config.llm.provider, LLMProvider::DeepSeek);
        assert_eq!(config.llm.model_efficient, "deepseek-chat");
        assert_eq!(config.llm.retry_attempts, 3);
    }

    #[test]
    fn test_config_from_missing_file() {
        let result = Config::from_file(&PathBuf::from("/nonexistent/insightflow.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.toml");
        std::fs::write(&config_path, "this is = = not toml").unwrap();

        assert!(Config::from_file(&config_path).is_err());
    }
}
