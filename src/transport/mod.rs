use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::Result;
use crate::tools::{ToolRequest, ToolResponse};

pub mod stdio;

pub use stdio::{LineTransport, StdioTransport};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Read requests until end of input or shutdown. Returns once every
    /// response handed to the transport has been written.
    async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<()>;

    /// Decoded requests. Handed out once.
    fn take_request_receiver(&self) -> Option<mpsc::UnboundedReceiver<ToolRequest>>;

    /// Where finished responses are sent to be written out.
    fn response_sender(&self) -> Option<mpsc::UnboundedSender<ToolResponse>>;
}
