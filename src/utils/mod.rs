pub mod logging;
pub mod text;

pub use logging::{JobLogStore, LogSink};
pub use text::{trim_prompt, truncate_text};
