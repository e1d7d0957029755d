//! 报告生成 - 业务能力层

use serde::Deserialize;
use serde_json::json;

use super::prompts::{system_prompt, MAX_PROMPT_CHARS};
use super::structured_call::generate_typed;
use crate::clients::{ObjectRequest, TextGenerator};
use crate::error::LlmError;
use crate::utils::{trim_prompt, LogSink};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportSection {
    #[serde(default)]
    report_markdown: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinalAnswer {
    #[serde(default)]
    exact_answer: String,
}

/// 生成完整的 markdown 报告
///
/// learnings 按 `chunk_size` 分段，每段单独生成一节，最后追加来源列表。
pub async fn write_final_report(
    llm: &dyn TextGenerator,
    log: &LogSink,
    prompt: &str,
    learnings: &[String],
    visited_urls: &[String],
    chunk_size: usize,
) -> Result<String, LlmError> {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<&[String]> = if learnings.is_empty() {
        vec![learnings]
    } else {
        learnings.chunks(chunk_size).collect()
    };

    let mut sections = Vec::with_capacity(chunks.len());
    for (idx, chunk) in chunks.iter().enumerate() {
        log.info(format!("正在撰写报告第 {}/{} 节", idx + 1, chunks.len()));

        let request = ObjectRequest {
            schema_name: "final_report",
            system: system_prompt(),
            prompt: trim_prompt(
                &format!(
                    "You are writing a detailed research report in Markdown. Continue from previous sections if provided.\n\n\
                     <prompt>{}</prompt>\n\nHere are some learnings for this section:\n\n<learnings>\n{}\n</learnings>",
                    prompt,
                    learnings_block(chunk)
                ),
                MAX_PROMPT_CHARS,
            ),
            schema: json!({
                "type": "object",
                "properties": {
                    "reportMarkdown": {
                        "type": "string",
                        "description": "Markdown section of the final report"
                    }
                },
                "required": ["reportMarkdown"]
            }),
            timeout: None,
        };

        let section: ReportSection = generate_typed(llm, &request, log).await?;
        sections.push(section.report_markdown);
    }

    let sources = visited_urls
        .iter()
        .map(|url| format!("- {}", url))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(format!("{}\n\n## Sources\n\n{}", sections.join("\n\n"), sources))
}

/// 生成简短的最终答案
pub async fn write_final_answer(
    llm: &dyn TextGenerator,
    log: &LogSink,
    prompt: &str,
    learnings: &[String],
) -> Result<String, LlmError> {
    let request = ObjectRequest {
        schema_name: "final_answer",
        system: system_prompt(),
        prompt: trim_prompt(
            &format!(
                "Given the following prompt from the user, write a final answer on the topic using the learnings from research. \
                 Follow the format specified in the prompt. Do not yap or babble or include any other text than the answer besides the format specified in the prompt. \
                 Keep the answer as concise as possible - usually it should be just a few words or maximum a sentence. \
                 Try to follow the format specified in the prompt (for example, if the prompt is using Latex, the answer should be in Latex. \
                 If the prompt gives multiple answer choices, the answer should be one of the choices).\n\n\
                 <prompt>{}</prompt>\n\nHere are all the learnings from research on the topic that you can use to help answer the prompt:\n\n<learnings>\n{}\n</learnings>",
                prompt,
                learnings_block(learnings)
            ),
            MAX_PROMPT_CHARS,
        ),
        schema: json!({
            "type": "object",
            "properties": {
                "exactAnswer": {
                    "type": "string",
                    "description": "The final answer, make it short and concise, just the answer, no other text"
                }
            },
            "required": ["exactAnswer"]
        }),
        timeout: None,
    };

    let answer: FinalAnswer = generate_typed(llm, &request, log).await?;
    log.info("最终答案已生成");
    Ok(answer.exact_answer)
}

/// 生成报告标题（最多十个词）
pub async fn generate_report_title(
    llm: &dyn TextGenerator,
    prompt: &str,
    learnings: &[String],
) -> Result<String, LlmError> {
    let key_learnings = learnings
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");

    let text = llm
        .generate_text(&format!(
            "Based on the following research query and key learnings, generate a concise, descriptive title for the research report (max 10 words):\n\n\
             Query: {}\n\nKey Learnings:\n{}\n\nGenerate only the title, nothing else.",
            prompt, key_learnings
        ))
        .await?;

    Ok(text.trim().trim_matches('"').to_string())
}

fn learnings_block(learnings: &[String]) -> String {
    learnings
        .iter()
        .map(|l| format!("<learning>\n{}\n</learning>", l))
        .collect::<Vec<_>>()
        .join("\n")
}
