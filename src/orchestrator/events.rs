//! 流式事件与传输约定
//!
//! 每个事件序列化为一行JSON：`{"type": "<kind>", "content": <payload>}`。

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::text::truncate_chars;
use crate::config::PipelineConfig;

/// 最终结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub response: String,
    /// 结果来源，如 multi_expert_report、direct_answer、generic_template
    pub source: String,
    /// 图表载荷（base64图像、路径或Vega-Lite规格）
    pub visualization: Option<String>,
    pub code_output: Option<String>,
    /// 图表过大被移除时的提示
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization_warning: Option<String>,
}

/// 流式事件，严格按 Start → [Thinking|Plan]* → Experts → (ExpertStart → Intermediate)* → Final 的顺序产生
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum StreamEvent {
    Start {
        session_id: String,
    },
    Thinking {
        message: String,
    },
    Plan {
        plan_text: String,
    },
    Experts {
        names: Vec<String>,
    },
    ExpertStart {
        name: String,
        step: usize,
        total_steps: usize,
    },
    Intermediate {
        name: String,
        result: String,
        step: usize,
        total_steps: usize,
    },
    Warning {
        message: String,
    },
    Final(FinalResult),
}

impl StreamEvent {
    /// 事件类型名，与传输格式中的type一致
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::Plan { .. } => "plan",
            StreamEvent::Experts { .. } => "experts",
            StreamEvent::ExpertStart { .. } => "expert_start",
            StreamEvent::Intermediate { .. } => "intermediate",
            StreamEvent::Warning { .. } => "warning",
            StreamEvent::Final(_) => "final",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StreamEvent::Final(_))
    }

    /// 序列化为一行JSON（不含换行符）
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// 单个事件的体积上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireLimits {
    pub max_text_chars: usize,
    pub max_image_chars: usize,
}

impl Default for WireLimits {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for WireLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_text_chars: config.max_text_chars,
            max_image_chars: config.max_image_chars,
        }
    }
}

impl WireLimits {
    /// 文本超限时截断并追加标记；图表超限时替换为空并附带提示
    pub fn apply(&self, event: StreamEvent) -> StreamEvent {
        let limit = |text: String| {
            if text.chars().count() > self.max_text_chars {
                truncate_chars(&text, self.max_text_chars)
            } else {
                text
            }
        };

        match event {
            StreamEvent::Thinking { message } => StreamEvent::Thinking {
                message: limit(message),
            },
            StreamEvent::Plan { plan_text } => StreamEvent::Plan {
                plan_text: limit(plan_text),
            },
            StreamEvent::Intermediate {
                name,
                result,
                step,
                total_steps,
            } => StreamEvent::Intermediate {
                name,
                result: limit(result),
                step,
                total_steps,
            },
            StreamEvent::Warning { message } => StreamEvent::Warning {
                message: limit(message),
            },
            StreamEvent::Final(mut result) => {
                result.response = limit(result.response);
                result.code_output = result.code_output.map(limit);
                if let Some(image) = &result.visualization
                    && image.chars().count() > self.max_image_chars
                {
                    let size = image.chars().count();
                    result.visualization = None;
                    result.visualization_warning = Some(format!(
                        "visualization omitted: payload of {} characters exceeds the {} character limit",
                        size, self.max_image_chars
                    ));
                }
                StreamEvent::Final(result)
            }
            other => other,
        }
    }
}

/// 事件出口：先施加体积上限，再写入通道
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<StreamEvent>,
    limits: WireLimits,
}

impl EventSink {
    pub fn new(sender: mpsc::Sender<StreamEvent>, limits: WireLimits) -> Self {
        Self { sender, limits }
    }

    /// 创建事件通道
    pub fn channel(buffer: usize, limits: WireLimits) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self::new(sender, limits), receiver)
    }

    /// 发送事件；接收端已关闭时返回false，执行本身不受影响
    pub async fn emit(&self, event: StreamEvent) -> bool {
        let kind = event.kind();
        match self.sender.send(self.limits.apply(event)).await {
            Ok(()) => true,
            Err(_) => {
                debug!(kind, "event receiver dropped");
                false
            }
        }
    }
}
