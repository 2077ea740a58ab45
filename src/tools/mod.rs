//! Tool surface: decoding requests, running them behind admission control
//! and rendering the results as Markdown.

pub mod catalog;
pub mod dispatcher;
pub mod format;
pub mod protocol;

pub use catalog::ToolCall;
pub use dispatcher::ToolDispatcher;
pub use protocol::{ToolRequest, ToolResponse};
