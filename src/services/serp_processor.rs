//! 搜索结果提炼 - 业务能力层
//!
//! 把一次搜索抓到的正文压缩成少量高密度的研究发现和后续研究方向

use std::time::Duration;

use serde_json::json;

use super::prompts::{system_prompt, MAX_PROMPT_CHARS};
use super::structured_call::generate_typed;
use crate::clients::{ObjectRequest, TextGenerator};
use crate::config::ResearchSettings;
use crate::error::LlmError;
use crate::models::{SearchResponse, SerpOutcome};
use crate::utils::{trim_prompt, LogSink};

/// 提炼参数
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub num_learnings: usize,
    pub num_follow_up_questions: usize,
    /// 每条正文保留的最大字符数
    pub content_char_limit: usize,
    pub timeout: Duration,
}

impl ExtractOptions {
    pub fn from_settings(settings: &ResearchSettings, num_follow_up_questions: usize) -> Self {
        Self {
            num_learnings: 3,
            num_follow_up_questions,
            content_char_limit: settings.content_char_limit,
            timeout: settings.extract_timeout,
        }
    }
}

/// 提炼一次搜索的结果
///
/// 没有正文的条目会被丢弃；返回的两个列表都不会超过各自的上限。
pub async fn process_serp_result(
    llm: &dyn TextGenerator,
    log: &LogSink,
    query: &str,
    result: &SearchResponse,
    options: &ExtractOptions,
) -> Result<SerpOutcome, LlmError> {
    let contents: Vec<String> = result
        .data
        .iter()
        .filter_map(|item| item.markdown.as_deref())
        .filter(|text| !text.trim().is_empty())
        .map(|text| trim_prompt(text, options.content_char_limit))
        .collect();

    log.info(format!("执行查询 {}，找到 {} 条内容", query, contents.len()));

    let request = ObjectRequest {
        schema_name: "serp_result",
        system: system_prompt(),
        prompt: trim_prompt(&build_extract_prompt(query, &contents, options), MAX_PROMPT_CHARS),
        schema: json!({
            "type": "object",
            "properties": {
                "learnings": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": format!("List of learnings, max of {}", options.num_learnings)
                },
                "followUpQuestions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": format!(
                        "List of follow-up questions to research the topic further, max of {}",
                        options.num_follow_up_questions
                    )
                }
            },
            "required": ["learnings", "followUpQuestions"]
        }),
        timeout: Some(options.timeout),
    };

    let mut outcome: SerpOutcome = generate_typed(llm, &request, log).await?;
    outcome.learnings.truncate(options.num_learnings);
    outcome
        .follow_up_questions
        .truncate(options.num_follow_up_questions);

    log.info(format!("提炼出 {} 条研究发现", outcome.learnings.len()));
    Ok(outcome)
}

fn build_extract_prompt(query: &str, contents: &[String], options: &ExtractOptions) -> String {
    let contents_block = contents
        .iter()
        .map(|content| format!("<content>\n{}\n</content>", content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Given the following contents from a SERP search for the query <query>{}</query>, generate a list of learnings from the contents. \
         Return a maximum of {} learnings, but feel free to return less if the contents are clear. \
         Make sure each learning is unique and not similar to each other. \
         The learnings should be concise and to the point, as detailed and information dense as possible. \
         Make sure to include any entities like people, places, companies, products, things, etc in the learnings, as well as any exact metrics, numbers, or dates. \
         The learnings will be used to research the topic further.\n\n<contents>{}</contents>",
        query, options.num_learnings, contents_block
    )
}
