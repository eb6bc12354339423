//! 会话状态 - 对话历史、活动数据集与数据库句柄
//!
//! 会话由调用方持有，流水线只读取数据集/数据库，并在一次查询结束后追加本轮对话。
//! 同一会话的并发查询通过会话级互斥锁串行化。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::data::{DatabaseHandle, Dataset};

/// 会话中保留的最大历史消息条数
const MAX_STORED_HISTORY: usize = 20;

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// 一条对话消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// 把历史消息格式化为提示词片段
pub fn format_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| {
            let role = match m.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::System => "system",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 单个会话的状态
pub struct SessionState {
    pub session_id: String,
    /// 当前加载的文件数据集
    pub dataset: Option<Arc<Dataset>>,
    /// 当前连接的数据库
    pub database: Option<Arc<dyn DatabaseHandle>>,
    pub history: Vec<ChatMessage>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            dataset: None,
            database: None,
            history: Vec::new(),
        }
    }

    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.dataset = Some(Arc::new(dataset));
        self
    }

    pub fn with_database(mut self, database: Arc<dyn DatabaseHandle>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// 最近`limit`条历史消息
    pub fn recent_history(&self, limit: usize) -> Vec<ChatMessage> {
        let start = self.history.len().saturating_sub(limit);
        self.history[start..].to_vec()
    }

    /// 追加一轮对话，并限制历史长度
    pub fn append_turn(&mut self, query: &str, response: &str) {
        self.history.push(ChatMessage::user(query));
        self.history.push(ChatMessage::assistant(response));
        if self.history.len() > MAX_STORED_HISTORY {
            let excess = self.history.len() - MAX_STORED_HISTORY;
            self.history.drain(..excess);
        }
    }
}

/// 共享的会话句柄，持有锁期间即独占该会话
pub type SharedSession = Arc<Mutex<SessionState>>;

/// 会话仓库
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个已构建好的会话
    pub async fn insert(&self, state: SessionState) -> SharedSession {
        let id = state.session_id.clone();
        let shared = Arc::new(Mutex::new(state));
        self.sessions.write().await.insert(id, Arc::clone(&shared));
        shared
    }

    pub async fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// 获取会话，不存在时创建；未指定ID时生成新的UUID
    pub async fn get_or_create(&self, session_id: Option<&str>) -> (String, SharedSession) {
        let id = session_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut sessions = self.sessions.write().await;
        let shared = sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(id.clone()))))
            .clone();
        (id, shared)
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
