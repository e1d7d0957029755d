use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::info;

use deep_research::models::combine_query;
use deep_research::services::{
    generate_feedback, generate_report_title, write_final_answer, write_final_report,
};
use deep_research::utils::{logging, LogSink};
use deep_research::{
    Config, DeepResearch, FirecrawlClient, LlmClient, OutputFormat,
    PdfRenderer, ResearchRequest,
};

const CLI_DEFAULT_BREADTH: usize = 4;
const CLI_DEFAULT_DEPTH: usize = 6;

/// 命令行交互输入
struct Prompter {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompter {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    async fn ask(&mut self, question: &str) -> Result<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(question.as_bytes()).await?;
        stdout.flush().await?;
        Ok(self
            .lines
            .next_line()
            .await?
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    async fn ask_number(&mut self, question: &str, default: usize) -> Result<usize> {
        let answer = self.ask(question).await?;
        Ok(parse_positive(&answer, default))
    }
}

/// 解析正整数，空输入或非法输入时使用默认值
fn parse_positive(answer: &str, default: usize) -> usize {
    answer.trim().parse().ok().filter(|n| *n > 0).unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    logging::init_with_verbose(config.verbose_logging);
    let llm = Arc::new(LlmClient::new(&config));
    info!("使用模型: {}", llm.model_name());

    let research = DeepResearch::new(
        llm.clone(),
        Arc::new(FirecrawlClient::new(&config)),
        config.research_settings(),
    );
    let log = LogSink::detached();
    let mut prompter = Prompter::new();

    let query = prompter.ask("What would you like to research? ").await?;
    if query.is_empty() {
        anyhow::bail!("研究主题不能为空");
    }
    let breadth = prompter
        .ask_number(
            "Enter research breadth (recommended 2-10, default 4): ",
            CLI_DEFAULT_BREADTH,
        )
        .await?;
    let depth = prompter
        .ask_number(
            "Enter research depth (recommended 1-5, default 6): ",
            CLI_DEFAULT_DEPTH,
        )
        .await?;
    let output_format = OutputFormat::parse(
        &prompter
            .ask("Output format - report (long), answer (concise), or pdf (report as PDF)? (report/answer/pdf, default pdf): ")
            .await?,
    );

    let mut combined = query.clone();
    if output_format.is_report() {
        info!("正在生成研究计划...");
        let questions = generate_feedback(llm.as_ref(), &log, &query, 3).await?;
        println!("\nTo better understand your research needs, please answer these follow-up questions:");

        let mut answers = Vec::with_capacity(questions.len());
        for question in &questions {
            answers.push(prompter.ask(&format!("\n{}\nYour answer: ", question)).await?);
        }
        combined = combine_query(&query, &questions, &answers);
    }

    info!("开始研究...");
    let result = research
        .run(ResearchRequest::new(combined.clone(), breadth, depth), &log, None)
        .await?;

    println!("\n\nLearnings:\n\n{}", result.learnings.join("\n"));
    println!(
        "\n\nVisited URLs ({}):\n\n{}",
        result.visited_urls.len(),
        result.visited_urls.join("\n")
    );

    let output_dir = Path::new(&config.output_dir);
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("无法创建输出目录 {}", output_dir.display()))?;

    if !output_format.is_report() {
        let answer = write_final_answer(llm.as_ref(), &log, &combined, &result.learnings).await?;
        let path = output_dir.join("answer.md");
        tokio::fs::write(&path, &answer).await?;
        println!("\n\nFinal Answer:\n\n{}", answer);
        info!("答案已保存到 {}", path.display());
        return Ok(());
    }

    info!("正在撰写最终报告...");
    let report = write_final_report(
        llm.as_ref(),
        &log,
        &combined,
        &result.learnings,
        &result.visited_urls,
        config.report_chunk_size,
    )
    .await?;
    let report_path = output_dir.join("report.md");
    tokio::fs::write(&report_path, &report).await?;
    println!("\n\nFinal Report:\n\n{}", report);

    if output_format == OutputFormat::Pdf {
        info!("正在生成 PDF...");
        let title = generate_report_title(llm.as_ref(), &combined, &result.learnings).await?;
        let bytes = config.pdf_renderer().render(&report, &title).await?;
        let pdf_path = output_dir.join("report.pdf");
        tokio::fs::write(&pdf_path, bytes).await?;
        info!("报告已保存到 {}", pdf_path.display());
    } else {
        info!("报告已保存到 {}", report_path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_answers_fall_back_to_defaults() {
        assert_eq!(parse_positive("", CLI_DEFAULT_BREADTH), 4);
        assert_eq!(parse_positive("", CLI_DEFAULT_DEPTH), 6);
        assert_eq!(parse_positive("0", CLI_DEFAULT_DEPTH), 6);
        assert_eq!(parse_positive(" 3 ", CLI_DEFAULT_DEPTH), 3);
        assert_eq!(parse_positive("deep", CLI_DEFAULT_BREADTH), 4);
    }
}
