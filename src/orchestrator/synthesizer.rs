//! 综合报告生成

use anyhow::{Result, anyhow};
use std::sync::Arc;
use tracing::{info, warn};

use super::context::{SQL_DATASET_SOURCE, SharedContext, StageRecord, StageStatus};
use super::events::FinalResult;
use super::text::truncate_chars;
use crate::data::Dataset;
use crate::experts::{ChartImage, ExpertKind, ReasoningCollaborator};
use crate::i18n::TargetLanguage;

pub const SOURCE_REPORT: &str = "multi_expert_report";
pub const SOURCE_MULTI_EXPERT: &str = "multi_expert";
pub const SOURCE_DIRECT_ANSWER: &str = "direct_answer";
pub const SOURCE_GENERIC: &str = "generic_template";

/// 报告中展示的SQL结果行数
const REPORT_PREVIEW_ROWS: usize = 10;

/// 提供给建议生成的每段摘要上限
const DIGEST_SECTION_CHARS: usize = 2000;

/// 综合报告的输入
pub struct SynthesisInput<'a> {
    pub context: &'a SharedContext,
    pub records: &'a [StageRecord],
    /// 数据分析阶段附带的图像
    pub analysis_chart: Option<&'a ChartImage>,
    pub code_output: Option<&'a str>,
    /// 因超时提前结束时不再调用任何协作者
    pub timed_out: bool,
}

/// 综合报告生成器
#[derive(Clone)]
pub struct ResponseSynthesizer {
    reasoner: Arc<dyn ReasoningCollaborator>,
    language: TargetLanguage,
}

impl ResponseSynthesizer {
    pub fn new(reasoner: Arc<dyn ReasoningCollaborator>, language: TargetLanguage) -> Self {
        Self { reasoner, language }
    }

    /// 生成最终结果，任何失败都退回通用模板，保证回复非空
    pub async fn synthesize(&self, input: SynthesisInput<'_>) -> FinalResult {
        let (response, source) = match self.compose(&input).await {
            Ok((response, source)) if !response.trim().is_empty() => (response, source),
            Ok(_) => {
                warn!("⚠️ 综合报告为空，使用通用模板");
                (self.generic_report(&input), SOURCE_GENERIC)
            }
            Err(e) => {
                warn!(error = %e, "⚠️ 综合报告生成失败，使用通用模板");
                (self.generic_report(&input), SOURCE_GENERIC)
            }
        };

        let visualization = input
            .context
            .visualization_result
            .as_ref()
            .and_then(|v| v.image.as_ref())
            .or(input.analysis_chart)
            .map(|image| image.payload().to_string());

        FinalResult {
            response,
            source: source.to_string(),
            visualization,
            code_output: input.code_output.map(|c| c.to_string()),
            visualization_warning: None,
        }
    }

    async fn compose(&self, input: &SynthesisInput<'_>) -> Result<(String, &'static str)> {
        let kinds: Vec<ExpertKind> = input.records.iter().map(|r| r.stage.kind).collect();

        if kinds == ExpertKind::CANONICAL {
            info!(timed_out = input.timed_out, "📝 生成综合分析报告");
            return Ok((self.canonical_report(input).await, SOURCE_REPORT));
        }

        if kinds == [ExpertKind::Fallback] {
            let record = &input.records[0];
            return match (&record.status, &record.result) {
                (StageStatus::Succeeded, Some(result)) => {
                    Ok((result.text_output.clone(), SOURCE_DIRECT_ANSWER))
                }
                _ => Err(anyhow!("direct answer unavailable")),
            };
        }

        let sections: Vec<String> = input
            .records
            .iter()
            .filter(|r| r.is_finished())
            .map(|r| format!("### {}\n\n{}", r.stage.display_name, self.stage_text(r)))
            .collect();
        if sections.is_empty() {
            return Err(anyhow!("no stage finished"));
        }
        Ok((sections.join("\n\n"), SOURCE_MULTI_EXPERT))
    }

    /// 固定章节结构的报告，失败的阶段以说明代替而不是省略，本身不会失败
    async fn canonical_report(&self, input: &SynthesisInput<'_>) -> String {
        let headings = self.language.report_headings();
        let context = input.context;
        let record = |kind: ExpertKind| input.records.iter().find(|r| r.stage.kind == kind);

        let knowledge = match record(ExpertKind::Knowledge) {
            Some(r) if r.status == StageStatus::Succeeded => context.knowledge_insights.clone(),
            other => self.language.step_incomplete(&self.reason(other)),
        };

        let data_findings = match (record(ExpertKind::SqlQuery), &context.sql_results) {
            (Some(r), Some(rows)) if r.status == StageStatus::Succeeded => {
                let preview = Dataset::from_rows(SQL_DATASET_SOURCE, rows.to_vec())
                    .preview_markdown(REPORT_PREVIEW_ROWS);
                format!("{}\n\n{}", self.stage_text(r), preview)
            }
            (Some(r), None) if r.status == StageStatus::Succeeded => self.stage_text(r),
            (other, _) => self
                .language
                .query_status(&self.language.step_incomplete(&self.reason(other))),
        };

        let analysis = match record(ExpertKind::DataAnalysis) {
            Some(r) if r.status == StageStatus::Succeeded => context.analysis_findings.clone(),
            other => self.language.step_incomplete(&self.reason(other)),
        };

        let visualization_note = match (
            record(ExpertKind::Visualization),
            &context.visualization_result,
        ) {
            (Some(r), Some(outcome)) if r.status == StageStatus::Succeeded => {
                outcome.description.clone()
            }
            (other, _) => self.language.step_incomplete(&self.reason(other)),
        };

        let (recommendations, summary) = if input.timed_out {
            let note = self
                .language
                .step_incomplete(self.language.stage_not_run());
            (note.clone(), note)
        } else {
            let digest = [
                (headings.industry_background, knowledge.as_str()),
                (headings.data_findings, data_findings.as_str()),
                (headings.analysis, analysis.as_str()),
                (headings.visualization_note, visualization_note.as_str()),
            ]
            .iter()
            .map(|(title, body)| {
                format!("{}:\n{}", title, truncate_chars(body, DIGEST_SECTION_CHARS))
            })
            .collect::<Vec<_>>()
            .join("\n\n");

            match self
                .reasoner
                .recommend(&context.original_query, &digest)
                .await
            {
                Ok(closing) => {
                    let recommendations = closing
                        .recommendations
                        .iter()
                        .filter(|r| !r.trim().is_empty())
                        .map(|r| format!("- {}", r.trim()))
                        .collect::<Vec<_>>()
                        .join("\n");
                    (recommendations, closing.summary.trim().to_string())
                }
                // 只降级建议与总结两节，已完成的章节照常保留
                Err(e) => {
                    warn!(error = %e, "⚠️ 生成建议失败，建议与总结章节以说明代替");
                    let note = self
                        .language
                        .step_incomplete(self.language.collaborator_failed());
                    (note.clone(), note)
                }
            }
        };

        format!(
            "# {}\n\n## {}\n\n{}\n\n## {}\n\n{}\n\n## {}\n\n{}\n\n## {}\n\n{}\n\n## {}\n\n{}\n\n## {}\n\n{}\n",
            headings.title,
            headings.industry_background,
            knowledge.trim(),
            headings.data_findings,
            data_findings.trim(),
            headings.analysis,
            analysis.trim(),
            headings.visualization_note,
            visualization_note.trim(),
            headings.recommendations,
            recommendations,
            headings.summary,
            summary
        )
    }

    /// 阶段在报告中的正文：成功时取输出，失败时给出说明
    fn stage_text(&self, record: &StageRecord) -> String {
        match (&record.status, &record.result) {
            (StageStatus::Succeeded, Some(result)) => result.text_output.trim().to_string(),
            _ => self.language.step_incomplete(&self.reason(Some(record))),
        }
    }

    /// 阶段未成功的原因
    fn reason(&self, record: Option<&StageRecord>) -> String {
        match record {
            Some(StageRecord {
                status: StageStatus::Failed,
                result: Some(result),
                ..
            }) => result
                .error_message()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(self.language.collaborator_failed())
                .to_string(),
            _ => self.language.stage_not_run().to_string(),
        }
    }

    /// 最后兜底的通用模板，纯字符串拼接，不会失败
    pub fn generic_report(&self, input: &SynthesisInput<'_>) -> String {
        let completed: Vec<&str> = input
            .records
            .iter()
            .filter(|r| r.status == StageStatus::Succeeded)
            .map(|r| r.stage.display_name.as_str())
            .collect();
        self.language
            .generic_report(&input.context.original_query, &completed)
    }
}
