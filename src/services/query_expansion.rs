//! 查询扩展 - 业务能力层
//!
//! 把一个研究主题（以及已有的研究发现）拆成若干条互不重叠的子查询

use serde::Deserialize;
use serde_json::json;

use super::prompts::system_prompt;
use super::structured_call::generate_typed;
use crate::clients::{ObjectRequest, TextGenerator};
use crate::error::LlmError;
use crate::models::SerpQuery;
use crate::utils::{truncate_text, LogSink};

#[derive(Debug, Deserialize)]
struct SerpQueryList {
    #[serde(default)]
    queries: Vec<SerpQuery>,
}

#[derive(Debug, Deserialize)]
struct FeedbackQuestions {
    #[serde(default)]
    questions: Vec<String>,
}

/// 生成子查询
///
/// # 参数
/// - `query`: 研究主题
/// - `learnings`: 之前的研究发现（可选），用于生成更具体的查询
/// - `num_queries`: 最多返回的子查询数量
///
/// # 返回
/// 最多 `num_queries` 条子查询；模型多返回的部分会被丢弃
pub async fn generate_serp_queries(
    llm: &dyn TextGenerator,
    log: &LogSink,
    query: &str,
    learnings: Option<&[String]>,
    num_queries: usize,
) -> Result<Vec<SerpQuery>, LlmError> {
    if num_queries == 0 {
        return Ok(Vec::new());
    }

    let request = ObjectRequest {
        schema_name: "serp_queries",
        system: system_prompt(),
        prompt: build_serp_prompt(query, learnings, num_queries),
        schema: json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "description": format!("List of SERP queries, max of {}", num_queries),
                    "items": {
                        "type": "object",
                        "properties": {
                            "query": { "type": "string", "description": "The SERP query" },
                            "researchGoal": {
                                "type": "string",
                                "description": "First talk about the goal of the research that this query is meant to accomplish, then go deeper into how to advance the research once the results are found, mention additional research directions. Be as specific as possible, especially for additional research directions."
                            }
                        },
                        "required": ["query", "researchGoal"]
                    }
                }
            },
            "required": ["queries"]
        }),
        timeout: None,
    };

    let list: SerpQueryList = generate_typed(llm, &request, log).await?;

    let queries: Vec<SerpQuery> = list
        .queries
        .into_iter()
        .filter(|q| !q.query.trim().is_empty())
        .take(num_queries)
        .collect();

    log.info(format!(
        "生成了 {} 条子查询: {:?}",
        queries.len(),
        queries
            .iter()
            .map(|q| truncate_text(&q.query, 80))
            .collect::<Vec<_>>()
    ));

    Ok(queries)
}

fn build_serp_prompt(query: &str, learnings: Option<&[String]>, num_queries: usize) -> String {
    let learnings_section = match learnings {
        Some(items) if !items.is_empty() => format!(
            "Here are some learnings from previous research, use them to generate more specific queries: {}",
            items.join("\n")
        ),
        _ => String::new(),
    };

    format!(
        "Given the following prompt from the user, generate a list of SERP queries to research the topic. \
         Return a maximum of {} queries, but feel free to return less if the original prompt is clear. \
         Make sure each query is unique and not similar to each other: <prompt>{}</prompt>\n\n{}",
        num_queries, query, learnings_section
    )
}

/// 生成澄清问题，帮助明确研究方向
pub async fn generate_feedback(
    llm: &dyn TextGenerator,
    log: &LogSink,
    query: &str,
    num_questions: usize,
) -> Result<Vec<String>, LlmError> {
    if num_questions == 0 {
        return Ok(Vec::new());
    }

    let request = ObjectRequest {
        schema_name: "feedback",
        system: system_prompt(),
        prompt: format!(
            "Given the following query from the user, ask some follow up questions to clarify the research direction. \
             Return a maximum of {} questions, but feel free to return less if the original query is clear: <query>{}</query>",
            num_questions, query
        ),
        schema: json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": format!("Follow up questions to clarify the research direction, max of {}", num_questions)
                }
            },
            "required": ["questions"]
        }),
        timeout: None,
    };

    let feedback: FeedbackQuestions = generate_typed(llm, &request, log).await?;
    let questions: Vec<String> = feedback
        .questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(num_questions)
        .collect();

    log.info(format!("生成了 {} 个澄清问题", questions.len()));
    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    /// 固定返回同一个对象的生成器
    struct FixedGenerator(Value);

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate_object(&self, _request: &ObjectRequest) -> Result<Value, LlmError> {
            Ok(self.0.clone())
        }

        async fn generate_text(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_over_returned_queries_are_truncated() {
        let llm = FixedGenerator(json!({
            "queries": [
                { "query": "q1", "researchGoal": "g1" },
                { "query": "q2", "researchGoal": "g2" },
                { "query": "q3", "researchGoal": "g3" },
                { "query": "q4", "researchGoal": "g4" }
            ]
        }));

        let queries = generate_serp_queries(&llm, &LogSink::detached(), "topic", None, 2)
            .await
            .unwrap();

        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].research_goal, "g2");
    }

    #[tokio::test]
    async fn test_blank_queries_and_missing_goals() {
        let llm = FixedGenerator(json!({
            "queries": [ { "query": "  " }, { "query": "real" } ]
        }));

        let queries = generate_serp_queries(&llm, &LogSink::detached(), "topic", None, 3)
            .await
            .unwrap();

        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].query, "real");
        assert_eq!(queries[0].research_goal, "");
    }

    #[tokio::test]
    async fn test_feedback_questions_capped() {
        let llm = FixedGenerator(json!({ "questions": ["a?", "b?", "c?", "d?"] }));

        let questions = generate_feedback(&llm, &LogSink::detached(), "topic", 3)
            .await
            .unwrap();

        assert_eq!(questions, vec!["a?", "b?", "c?"]);
    }

    #[test]
    fn test_prompt_embeds_learnings() {
        let learnings = vec!["fact one".to_string()];
        let prompt = build_serp_prompt("topic", Some(&learnings), 3);
        assert!(prompt.contains("<prompt>topic</prompt>"));
        assert!(prompt.contains("fact one"));
        assert!(!build_serp_prompt("topic", None, 3).contains("learnings from previous"));
    }
}
