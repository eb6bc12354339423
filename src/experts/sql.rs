use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ExpertCollaborator, ExpertReply, ExpertRequest};
use crate::data::sqlite::is_read_only_statement;
use crate::i18n::TargetLanguage;
use crate::llm::LLMClient;
use crate::session::format_history;

const SQL_KEYWORDS: [&str; 8] = [
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP",
];

/// 自然语言转SQL并执行的专家
pub struct SqlExpert {
    client: LLMClient,
    language: TargetLanguage,
}

impl SqlExpert {
    pub fn new(client: LLMClient, language: TargetLanguage) -> Self {
        Self { client, language }
    }

    fn system_prompt(&self, request: &ExpertRequest) -> String {
        let mut prompt = String::from(
            r#"你是一位专业的SQL专家，精通将自然语言转换为SQL查询。
请根据用户的查询和提供的数据库结构信息，生成一个准确的SQL查询语句。

请遵循以下准则:
1. 仅生成SQLite兼容的SQL语法，并且只能是SELECT查询
2. 生成的SQL应该尽可能高效和简洁
3. 对于模糊的查询，做出合理的假设，并在解释中说明
4. 确保SQL查询正确引用表名和列名
5. 对于美妆销售数据分析，考虑常见的分析模式(如时间趋势、分类对比等)

请返回:
1. 放在```sql代码块中的SQL查询语句
2. 代码块之后，用一两段话解释查询的目的和逻辑

请不要返回多个SQL备选项，只返回最合适的一个SQL查询。"#,
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
impl ExpertCollaborator for SqlExpert {
    async fn invoke(&self, request: ExpertRequest) -> Result<ExpertReply> {
        let Some(database) = request.database.clone() else {
            return Ok(ExpertReply::failure(self.language.no_database()));
        };

        let schema = database.schema_text().await?;
        let user_prompt = format!(
            "数据库结构信息:\n{}\n\n用户查询: {}",
            schema, request.query
        );
        let response = self
            .client
            .prompt(&self.system_prompt(&request), &user_prompt)
            .await?;

        let (sql, explanation) = extract_sql_and_explanation(&response);
        let Some(sql) = sql else {
            warn!(database = %database.name(), "no SQL statement found in reply");
            return Ok(ExpertReply {
                text: explanation,
                ..ExpertReply::failure("无法从回复中提取SQL查询")
            });
        };

        if !is_read_only_statement(&sql) {
            warn!(sql = %sql, "refusing to run a non read-only statement");
            return Ok(ExpertReply {
                text: explanation,
                ..ExpertReply::failure(format!("拒绝执行非只读语句: {}", sql))
            });
        }

        debug!(sql = %sql, "executing generated SQL");
        match database.query(&sql).await {
            Ok(rows) => {
                let text = format!(
                    "{}\n\nSQL: {}\n{}",
                    explanation,
                    sql,
                    self.language.rows_returned(rows.len())
                );
                Ok(ExpertReply::answer(text.trim()).with_rows(rows))
            }
            Err(e) => Ok(ExpertReply {
                text: explanation,
                ..ExpertReply::failure(format!("执行SQL查询失败: {}", e))
            }),
        }
    }
}

/// 从模型回复中提取第一条SQL语句及其解释
///
/// 优先取代码块中的SQL，其次取以SELECT/WITH开头的单行；都没有时整段回复视为解释。
pub fn extract_sql_and_explanation(text: &str) -> (Option<String>, String) {
    if text.contains("```") {
        let parts: Vec<&str> = text.split("```").collect();
        for i in (1..parts.len()).step_by(2) {
            let code = strip_language_tag(parts[i].trim());
            if !looks_like_sql(code) {
                continue;
            }

            // 解释默认在代码块之后，没有时取代码块之前的文字
            let after = parts.get(i + 1).map(|s| s.trim()).unwrap_or("");
            let explanation = if after.is_empty() {
                parts[i - 1].trim()
            } else {
                after
            };
            return (Some(code.to_string()), explanation.to_string());
        }
    }

    let lines: Vec<&str> = text.lines().collect();
    for (index, line) in lines.iter().enumerate() {
        let upper = line.trim().to_uppercase();
        if upper.starts_with("SELECT ") || upper.starts_with("WITH ") {
            let before = lines[..index].join("\n").trim().to_string();
            let after = lines[index + 1..].join("\n").trim().to_string();
            let explanation = match (before.is_empty(), after.is_empty()) {
                (false, false) => format!("{}\n\n{}", before, after),
                (false, true) => before,
                _ => after,
            };
            return (Some(line.trim().to_string()), explanation);
        }
    }

    (None, text.trim().to_string())
}

fn strip_language_tag(code: &str) -> &str {
    match code.get(..3) {
        Some(tag) if tag.eq_ignore_ascii_case("sql") => code[3..].trim(),
        _ => code,
    }
}

fn looks_like_sql(code: &str) -> bool {
    let upper = code.to_uppercase();
    SQL_KEYWORDS.iter().any(|k| upper.contains(k))
}
