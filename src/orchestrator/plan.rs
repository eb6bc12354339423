//! 执行计划与计划文本解析

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::experts::{ExpertKind, ExpertStage};
use crate::i18n::TargetLanguage;

/// 形如 "计划: [A] -> [B] -> [C]" 的结构化计划行
static PLAN_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[^\n:：\[]*[:：]\s*(\[[^\]\n]+\](?:\s*(?:->|→|=>)\s*\[[^\]\n]+\])*)")
        .expect("plan line pattern is valid")
});

static PLAN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\n]+)\]").expect("plan tag pattern is valid"));

/// 标签到专家类型的关键字表，按顺序匹配，先命中者生效
///
/// 可视化排在最前，避免"数据可视化"之类的标签被归入数据分析。
const KEYWORD_TABLE: [(ExpertKind, &[&str]); 4] = [
    (
        ExpertKind::Visualization,
        &["visualization", "visualisation", "chart", "可视化", "图表"],
    ),
    (ExpertKind::SqlQuery, &["sql", "database", "数据库"]),
    (
        ExpertKind::Knowledge,
        &["knowledge", "industry", "知识", "行业"],
    ),
    (ExpertKind::DataAnalysis, &["analysis", "analyst", "分析"]),
];

/// 有序的专家阶段列表，至少包含一个阶段且同一类型只出现一次
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    stages: Vec<ExpertStage>,
}

impl ExecutionPlan {
    /// 按给定顺序构建计划；重复类型只保留第一次出现，为空时插入Fallback
    pub fn from_kinds(kinds: &[ExpertKind], language: TargetLanguage) -> Self {
        let mut stages: Vec<ExpertStage> = Vec::new();
        for kind in kinds {
            if !stages.iter().any(|s| s.kind == *kind) {
                stages.push(ExpertStage::new(*kind, language));
            }
        }
        if stages.is_empty() {
            stages.push(ExpertStage::new(ExpertKind::Fallback, language));
        }
        Self { stages }
    }

    /// 固定的四阶段计划：知识 -> SQL -> 分析 -> 可视化
    pub fn canonical(language: TargetLanguage) -> Self {
        Self::from_kinds(&ExpertKind::CANONICAL, language)
    }

    pub fn fallback(language: TargetLanguage) -> Self {
        Self::from_kinds(&[ExpertKind::Fallback], language)
    }

    pub fn stages(&self) -> &[ExpertStage] {
        &self.stages
    }

    pub fn kinds(&self) -> Vec<ExpertKind> {
        self.stages.iter().map(|s| s.kind).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.display_name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// 计划永远不为空，仅为满足惯例提供
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_canonical(&self) -> bool {
        self.kinds() == ExpertKind::CANONICAL
    }
}

/// 计划文本解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanParser {
    language: TargetLanguage,
}

impl PlanParser {
    pub fn new(language: TargetLanguage) -> Self {
        Self { language }
    }

    /// 把自由格式的计划文本解析为执行计划
    ///
    /// 1. 找到结构化计划行时，按标签顺序映射，无法识别的标签直接丢弃；
    /// 2. 没有计划行时在全文中扫描关键字，按规范顺序追加阶段；
    /// 3. 以上均无结果时返回单阶段的Fallback计划。
    pub fn parse(&self, plan_text: &str) -> ExecutionPlan {
        // 有计划行时以计划行为准，标签全部无法识别也不再扫描正文
        if let Some(kinds) = Self::structured_kinds(plan_text) {
            return ExecutionPlan::from_kinds(&kinds, self.language);
        }

        let lowered = plan_text.to_lowercase();
        let kinds: Vec<ExpertKind> = ExpertKind::CANONICAL
            .iter()
            .copied()
            .filter(|kind| Self::keywords(*kind).iter().any(|k| lowered.contains(k)))
            .collect();
        ExecutionPlan::from_kinds(&kinds, self.language)
    }

    /// 结构化计划行中的专家类型；没有计划行时返回None
    fn structured_kinds(plan_text: &str) -> Option<Vec<ExpertKind>> {
        let captures = PLAN_LINE.captures(plan_text)?;
        let chain = captures.get(1)?.as_str();
        Some(
            PLAN_TAG
                .captures_iter(chain)
                .filter_map(|tag| tag.get(1))
                .filter_map(|tag| Self::classify_tag(tag.as_str()))
                .collect(),
        )
    }

    /// 按关键字表把单个标签映射为专家类型
    pub fn classify_tag(tag: &str) -> Option<ExpertKind> {
        let lowered = tag.to_lowercase();
        KEYWORD_TABLE
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
            .map(|(kind, _)| *kind)
    }

    fn keywords(kind: ExpertKind) -> &'static [&'static str] {
        KEYWORD_TABLE
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, keywords)| *keywords)
            .unwrap_or(&[])
    }
}
