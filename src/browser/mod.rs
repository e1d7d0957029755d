//! 浏览器层
//!
//! 用无头 Chromium 把 markdown 报告打印成 PDF

mod headless;

use async_trait::async_trait;

use crate::error::AppResult;

pub use headless::{markdown_to_html, ChromiumPdfRenderer};

/// PDF 渲染能力
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    /// 把 markdown 报告渲染为 PDF 字节
    async fn render(&self, markdown: &str, title: &str) -> AppResult<Vec<u8>>;
}
