use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use pulldown_cmark::{html, Options, Parser};
use tracing::{debug, error, info};

use super::PdfRenderer;
use crate::error::{AppError, AppResult};

const PRINT_CSS: &str = r#"
body { font-family: "Helvetica Neue", Arial, sans-serif; line-height: 1.6; color: #222; margin: 0 auto; max-width: 800px; }
h1, h2, h3 { color: #111; page-break-after: avoid; }
h1 { border-bottom: 2px solid #ddd; padding-bottom: 0.3em; }
.report-header { text-align: center; margin-bottom: 40px; padding-bottom: 20px; border-bottom: 3px solid #3182ce; }
.report-title { font-size: 24pt; border-bottom: none; margin-bottom: 10px; }
.report-date { color: #718096; font-size: 10pt; }
pre, code { font-family: Menlo, Consolas, monospace; background: #f5f5f5; }
pre { padding: 0.8em; white-space: pre-wrap; }
table { border-collapse: collapse; width: 100%; }
th, td { border: 1px solid #ccc; padding: 4px 8px; }
a { color: #0645ad; word-break: break-all; }
"#;

/// 基于无头 Chromium 的 PDF 渲染器
///
/// 每次渲染启动一个独立的浏览器进程，渲染结束后关闭。
#[derive(Debug, Clone, Default)]
pub struct ChromiumPdfRenderer {
    executable: Option<PathBuf>,
}

impl ChromiumPdfRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定浏览器可执行文件，不指定时自动查找
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    async fn print(&self, html: &str) -> Result<Vec<u8>> {
        info!("🚀 启动无头浏览器...");

        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .no_sandbox()
            .args(vec!["--disable-gpu", "--disable-dev-shm-usage"]);
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(|e| {
            error!("配置无头浏览器失败: {}", e);
            anyhow::anyhow!("配置无头浏览器失败: {}", e)
        })?;

        let (mut browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            error!("启动无头浏览器失败: {}", e);
            anyhow::anyhow!("启动无头浏览器失败: {}", e)
        })?;

        // 在后台处理浏览器事件
        let events = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let printed = async {
            let page = browser.new_page("about:blank").await?;
            page.set_content(html).await?;
            debug!("页面内容已加载，开始打印");
            let params = PrintToPdfParams {
                print_background: Some(true),
                ..Default::default()
            };
            Ok::<_, anyhow::Error>(page.pdf(params).await?)
        }
        .await;

        if let Err(e) = browser.close().await {
            debug!("关闭浏览器失败: {}", e);
        }
        events.abort();

        let bytes = printed?;
        info!("✅ PDF 生成完成: {} 字节", bytes.len());
        Ok(bytes)
    }
}

#[async_trait]
impl PdfRenderer for ChromiumPdfRenderer {
    async fn render(&self, markdown: &str, title: &str) -> AppResult<Vec<u8>> {
        let html = markdown_to_html(markdown, title);
        self.print(&html)
            .await
            .map_err(|e| AppError::Render(format!("{:#}", e)))
    }
}

/// 把 markdown 转成带打印样式的完整 HTML 页面
pub fn markdown_to_html(markdown: &str, title: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut body = String::new();
    html::push_html(&mut body, Parser::new_ext(markdown, options));

    let title = escape_html(title);
    let date = chrono::Local::now().format("%B %-d, %Y");

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>{css}</style>\n</head>\n<body>\n\
         <div class=\"report-header\">\n<h1 class=\"report-title\">{title}</h1>\n<div class=\"report-date\">Generated on {date}</div>\n</div>\n\
         <div class=\"content\">\n{body}</div>\n</body>\n</html>",
        css = PRINT_CSS
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
