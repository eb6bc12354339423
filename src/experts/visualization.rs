use anyhow::{Result, anyhow};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ChartImage, ExpertCollaborator, ExpertKind, ExpertReply, ExpertRequest};
use crate::data::Dataset;
use crate::i18n::TargetLanguage;
use crate::llm::LLMClient;

/// 图表规格中最多嵌入的数据行数
const MAX_CHART_ROWS: usize = 500;

const VEGA_LITE_SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";

/// 图表类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Scatter,
    Area,
}

impl ChartType {
    fn mark(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "arc",
            ChartType::Scatter => "point",
            ChartType::Area => "area",
        }
    }
}

/// 模型给出的图表设计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChartSpec {
    /// 图表类型：bar、line、pie、scatter、area
    pub chart_type: ChartType,
    /// 图表标题
    pub title: String,
    /// 横轴（饼图为分类）使用的列名，必须是数据集中已有的列
    pub x_field: String,
    /// 纵轴（饼图为数值）使用的列名，必须是数值列
    pub y_field: String,
    /// 可选的分组着色列
    pub color_field: Option<String>,
    /// 一两句话说明图表展示了什么
    pub description: String,
}

/// 根据数据集生成声明式图表的专家
pub struct VisualizationExpert {
    client: LLMClient,
    language: TargetLanguage,
}

impl VisualizationExpert {
    pub fn new(client: LLMClient, language: TargetLanguage) -> Self {
        Self { client, language }
    }

    fn system_prompt(&self) -> String {
        format!(
            r#"你是一位专业的数据可视化专家，精通美妆销售数据的可视化表达。
请根据用户需求和数据集结构设计一张最合适的图表。

设计时请遵循以下原则：
1. 根据数据特点和用户需求选择最合适的图表类型
2. 字段名必须与数据集中的列名完全一致，纵轴使用数值列
3. 标题简洁明确，说明突出关键数据点和趋势

{}"#,
            self.language.prompt_instruction()
        )
    }
}

#[async_trait]
impl ExpertCollaborator for VisualizationExpert {
    async fn invoke(&self, request: ExpertRequest) -> Result<ExpertReply> {
        let Some(dataset) = request.dataset.clone() else {
            return Ok(ExpertReply::failure(
                self.language.no_dataset(ExpertKind::Visualization),
            ));
        };

        let user_prompt = format!(
            "{}\n数值列统计:\n{}\n数据预览:\n{}\n\n用户可视化需求: {}",
            dataset.describe(),
            dataset.numeric_summary(),
            dataset.preview_markdown(10),
            request.query
        );
        let spec: ChartSpec = self
            .client
            .extract(&self.system_prompt(), &user_prompt)
            .await?;
        debug!(chart_type = ?spec.chart_type, x = %spec.x_field, y = %spec.y_field, "chart designed");

        match render_vega_lite(&spec, &dataset) {
            Ok(chart) => Ok(ExpertReply::answer(spec.description.trim())
                .with_image(ChartImage::Spec(chart.to_string()))),
            Err(e) => {
                warn!(error = %e, "chart rendering failed");
                Ok(ExpertReply::failure(e.to_string()))
            }
        }
    }
}

/// 把图表设计渲染为嵌入数据的Vega-Lite规格
///
/// 模型给出的字段不存在时，横轴退回第一个非数值列，纵轴退回第一个数值列。
pub fn render_vega_lite(spec: &ChartSpec, dataset: &Dataset) -> Result<Value> {
    let y_field = if dataset.is_numeric_column(&spec.y_field) {
        spec.y_field.clone()
    } else {
        dataset
            .columns
            .iter()
            .find(|c| dataset.is_numeric_column(c) && **c != spec.x_field)
            .cloned()
            .ok_or_else(|| anyhow!("数据集中没有可用于绘图的数值列"))?
    };

    let x_field = if dataset.has_column(&spec.x_field) && spec.x_field != y_field {
        spec.x_field.clone()
    } else {
        dataset
            .columns
            .iter()
            .find(|c| !dataset.is_numeric_column(c))
            .or_else(|| dataset.columns.iter().find(|c| **c != y_field))
            .cloned()
            .ok_or_else(|| anyhow!("数据集中没有可用作横轴的列"))?
    };

    let field_type = |field: &str| {
        if dataset.is_numeric_column(field) {
            "quantitative"
        } else {
            "nominal"
        }
    };

    let mut encoding = match spec.chart_type {
        ChartType::Pie => json!({
            "theta": {"field": y_field, "type": "quantitative"},
            "color": {"field": x_field, "type": "nominal"},
        }),
        _ => json!({
            "x": {"field": x_field, "type": field_type(&x_field)},
            "y": {"field": y_field, "type": "quantitative"},
        }),
    };

    if spec.chart_type != ChartType::Pie
        && let Some(color) = spec.color_field.as_deref().filter(|c| dataset.has_column(c))
        && let Some(map) = encoding.as_object_mut()
    {
        map.insert(
            "color".to_string(),
            json!({"field": color, "type": field_type(color)}),
        );
    }

    Ok(json!({
        "$schema": VEGA_LITE_SCHEMA,
        "title": spec.title,
        "description": spec.description,
        "data": {"values": dataset.head(MAX_CHART_ROWS)},
        "mark": {"type": spec.chart_type.mark(), "tooltip": true},
        "encoding": encoding,
    }))
}
