use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::tools::{ToolRequest, ToolResponse};
use crate::transport::Transport;

pub type StdioTransport = LineTransport<BufReader<Stdin>, Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        LineTransport::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

/// Newline-delimited JSON over any reader/writer pair.
pub struct LineTransport<R, W> {
    reader: Mutex<Option<R>>,
    writer: Mutex<Option<W>>,
    request_tx: Mutex<Option<mpsc::UnboundedSender<ToolRequest>>>,
    request_rx: Mutex<Option<mpsc::UnboundedReceiver<ToolRequest>>>,
    response_tx: Mutex<Option<mpsc::UnboundedSender<ToolResponse>>>,
    response_rx: Mutex<Option<mpsc::UnboundedReceiver<ToolResponse>>>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            request_tx: Mutex::new(Some(request_tx)),
            request_rx: Mutex::new(Some(request_rx)),
            response_tx: Mutex::new(Some(response_tx)),
            response_rx: Mutex::new(Some(response_rx)),
        }
    }

    fn handle_line(
        line: &str,
        requests: &mpsc::UnboundedSender<ToolRequest>,
        responses: &mpsc::UnboundedSender<ToolResponse>,
    ) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match serde_json::from_str::<ToolRequest>(line) {
            Ok(request) => {
                debug!("Received request for '{}'", request.tool);
                if requests.send(request).is_err() {
                    warn!("Request dropped: no worker is receiving");
                }
            }
            Err(e) => {
                warn!("Undecodable request line: {}", e);
                let response = rejected_line(line, &e);
                if responses.send(response).is_err() {
                    warn!("Response dropped: writer has stopped");
                }
            }
        }
    }
}

/// Salvages `id` and `tool` from a line that is JSON but not a valid request.
fn rejected_line(line: &str, e: &serde_json::Error) -> ToolResponse {
    let value = serde_json::from_str::<serde_json::Value>(line).ok();
    let field = |name: &str| {
        value
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    ToolResponse::failure(
        field("id").unwrap_or_else(|| Uuid::new_v4().to_string()),
        field("tool").unwrap_or_default(),
        format!("Invalid request: {}", e),
    )
}

async fn write_responses<W>(
    mut writer: W,
    mut responses: mpsc::UnboundedReceiver<ToolResponse>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = responses.recv().await {
        let mut line = serde_json::to_string(&response)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let reader = self.reader.lock().take();
        let writer = self.writer.lock().take();
        let requests = self.request_tx.lock().take();
        let responses = self.response_tx.lock().take();
        let response_rx = self.response_rx.lock().take();

        let (Some(reader), Some(writer), Some(requests), Some(responses), Some(response_rx)) =
            (reader, writer, requests, responses, response_rx)
        else {
            return Err(AppError::Init("Transport already started".to_string()));
        };

        let writer_task = tokio::spawn(write_responses(writer, response_rx));

        info!("Transport started. Waiting for requests...");
        let mut lines = reader.lines();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Transport shutting down");
                    break;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => Self::handle_line(&line, &requests, &responses),
                        Ok(None) => {
                            info!("Input closed");
                            break;
                        }
                        Err(e) => {
                            error!("Failed to read request: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        // Closing our ends lets the worker drain and the writer finish.
        drop(requests);
        drop(responses);

        match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(AppError::Init(format!("Response writer panicked: {}", e))),
        }
    }

    fn take_request_receiver(&self) -> Option<mpsc::UnboundedReceiver<ToolRequest>> {
        self.request_rx.lock().take()
    }

    fn response_sender(&self) -> Option<mpsc::UnboundedSender<ToolResponse>> {
        self.response_tx.lock().clone()
    }
}
