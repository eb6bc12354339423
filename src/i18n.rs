use serde::{Deserialize, Serialize};

use crate::experts::ExpertKind;

/// 目标语言类型
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetLanguage {
    #[serde(rename = "zh")]
    #[default]
    Chinese,
    #[serde(rename = "en")]
    English,
}

impl std::fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetLanguage::Chinese => write!(f, "zh"),
            TargetLanguage::English => write!(f, "en"),
        }
    }
}

impl std::str::FromStr for TargetLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zh" | "chinese" | "中文" => Ok(TargetLanguage::Chinese),
            "en" | "english" | "英文" => Ok(TargetLanguage::English),
            _ => Err(format!("Unknown target language: {}", s)),
        }
    }
}

impl TargetLanguage {
    /// 获取语言的描述性名称
    pub fn display_name(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "中文",
            TargetLanguage::English => "English",
        }
    }

    /// 获取语言的提示词指令
    pub fn prompt_instruction(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "请使用中文回答，确保语言表达准确、专业、易于理解。",
            TargetLanguage::English => {
                "Please answer in English, ensuring accurate, professional, and easy-to-understand language."
            }
        }
    }

    /// 专家阶段的展示名称
    pub fn stage_name(&self, kind: ExpertKind) -> &'static str {
        match (self, kind) {
            (TargetLanguage::Chinese, ExpertKind::Knowledge) => "行业知识专家",
            (TargetLanguage::Chinese, ExpertKind::SqlQuery) => "SQL查询专家",
            (TargetLanguage::Chinese, ExpertKind::DataAnalysis) => "数据分析专家",
            (TargetLanguage::Chinese, ExpertKind::Visualization) => "可视化专家",
            (TargetLanguage::Chinese, ExpertKind::Fallback) => "通用助手",
            (TargetLanguage::English, ExpertKind::Knowledge) => "Industry Knowledge Expert",
            (TargetLanguage::English, ExpertKind::SqlQuery) => "SQL Query Expert",
            (TargetLanguage::English, ExpertKind::DataAnalysis) => "Data Analysis Expert",
            (TargetLanguage::English, ExpertKind::Visualization) => "Visualization Expert",
            (TargetLanguage::English, ExpertKind::Fallback) => "General Assistant",
        }
    }

    /// 综合报告各章节标题
    pub fn report_headings(&self) -> ReportHeadings {
        match self {
            TargetLanguage::Chinese => ReportHeadings {
                title: "综合分析报告",
                industry_background: "行业背景",
                data_findings: "数据发现",
                analysis: "深度分析",
                visualization_note: "可视化说明",
                recommendations: "行动建议",
                summary: "总结",
            },
            TargetLanguage::English => ReportHeadings {
                title: "Comprehensive Analysis Report",
                industry_background: "Industry Background",
                data_findings: "Data Findings",
                analysis: "Analysis",
                visualization_note: "Visualization Note",
                recommendations: "Actionable Recommendations",
                summary: "Summary",
            },
        }
    }

    /// 拼接阶段查询时使用的上下文标签
    pub fn context_labels(&self) -> ContextLabels {
        match self {
            TargetLanguage::Chinese => ContextLabels {
                original_query: "用户问题",
                industry_context: "行业背景信息",
                previous_result: "上一步结果",
                analysis_findings: "数据分析结论",
            },
            TargetLanguage::English => ContextLabels {
                original_query: "User question",
                industry_context: "Industry context",
                previous_result: "Previous step result",
                analysis_findings: "Analysis findings",
            },
        }
    }

    /// 失败或跳过阶段在报告中的替代说明
    pub fn step_incomplete(&self, reason: &str) -> String {
        match self {
            TargetLanguage::Chinese => format!("此步骤未能完成：{}", reason),
            TargetLanguage::English => format!("this step could not complete: {}", reason),
        }
    }

    /// SQL章节失败时的状态前缀
    pub fn query_status(&self, note: &str) -> String {
        match self {
            TargetLanguage::Chinese => format!("查询状态：{}", note),
            TargetLanguage::English => format!("Query status: {}", note),
        }
    }

    pub fn no_database(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "未连接数据库，已跳过该步骤",
            TargetLanguage::English => "no database connected, stage skipped",
        }
    }

    /// 缺少数据集时的说明，按阶段区分
    pub fn no_dataset(&self, kind: ExpertKind) -> &'static str {
        match (self, kind) {
            (TargetLanguage::Chinese, ExpertKind::Visualization) => {
                "当前没有可用的数据集，无法生成图表，已跳过该步骤"
            }
            (TargetLanguage::Chinese, ExpertKind::DataAnalysis) => {
                "当前没有可用的数据集，无法进行数据分析，已跳过该步骤"
            }
            (TargetLanguage::Chinese, _) => "当前没有可用的数据集，已跳过该步骤",
            (TargetLanguage::English, ExpertKind::Visualization) => {
                "no dataset loaded, visualization stage skipped"
            }
            (TargetLanguage::English, ExpertKind::DataAnalysis) => {
                "no dataset loaded, data analysis stage skipped"
            }
            (TargetLanguage::English, _) => "no dataset loaded, stage skipped",
        }
    }

    /// 因超时而未执行的阶段
    pub fn stage_not_run(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "因处理超时，该步骤未执行",
            TargetLanguage::English => "not executed because the time budget ran out",
        }
    }

    /// 数据分析之后、可视化之前改写的工作查询
    pub fn chart_instruction(&self, findings: &str) -> String {
        match self {
            TargetLanguage::Chinese => format!("请生成图表来说明：{}", findings),
            TargetLanguage::English => format!("create a chart illustrating: {}", findings),
        }
    }

    pub fn visualization_ready(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "✅ 图表已生成",
            TargetLanguage::English => "✅ chart generated",
        }
    }

    pub fn visualization_without_image(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "⚠️ 可视化专家未返回图表",
            TargetLanguage::English => "⚠️ visualization expert returned no chart",
        }
    }

    pub fn planning_message(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "正在理解问题并规划专家分工...",
            TargetLanguage::English => "Understanding the question and planning experts...",
        }
    }

    pub fn timeout_warning(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => {
                "处理时间过长，已自动中断。请尝试简化您的问题或分多次询问。"
            }
            TargetLanguage::English => {
                "Processing took too long and was stopped. Try a simpler question or split it into several."
            }
        }
    }

    pub fn rows_returned(&self, rows: usize) -> String {
        match self {
            TargetLanguage::Chinese => format!("共返回 {} 行数据", rows),
            TargetLanguage::English => format!("{} rows returned", rows),
        }
    }

    pub fn collaborator_failed(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "专家未能给出结果",
            TargetLanguage::English => "the expert produced no result",
        }
    }

    /// 最后兜底的通用报告模板，不依赖任何外部调用
    pub fn generic_report(&self, query: &str, completed: &[&str]) -> String {
        match self {
            TargetLanguage::Chinese => {
                let dims = if completed.is_empty() {
                    "暂无".to_string()
                } else {
                    completed.join("、")
                };
                format!(
                    "关于“{}”的分析已在可用维度上完成（{}）。\n\n由于生成综合报告时遇到问题，这里仅提供概要说明。您可以查看上方各专家的阶段性结果，或尝试换一种问法再次提问。",
                    query, dims
                )
            }
            TargetLanguage::English => {
                let dims = if completed.is_empty() {
                    "none".to_string()
                } else {
                    completed.join(", ")
                };
                format!(
                    "The analysis of \"{}\" completed across available dimensions ({}).\n\nThe composite report could not be produced, so only this outline is shown. See the intermediate expert results above, or try rephrasing the question.",
                    query, dims
                )
            }
        }
    }
}

/// 报告章节标题
#[derive(Debug, Clone, Copy)]
pub struct ReportHeadings {
    pub title: &'static str,
    pub industry_background: &'static str,
    pub data_findings: &'static str,
    pub analysis: &'static str,
    pub visualization_note: &'static str,
    pub recommendations: &'static str,
    pub summary: &'static str,
}

/// 阶段查询中的上下文标签
#[derive(Debug, Clone, Copy)]
pub struct ContextLabels {
    pub original_query: &'static str,
    pub industry_context: &'static str,
    pub previous_result: &'static str,
    pub analysis_findings: &'static str,
}
