use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::tools::{ToolDispatcher, ToolRequest, ToolResponse};

pub struct Worker {
    dispatcher: Arc<ToolDispatcher>,
    rx_requests: UnboundedReceiver<ToolRequest>,
    tx_responses: UnboundedSender<ToolResponse>,
    permits: Arc<Semaphore>,
}

impl Worker {
    pub fn new(
        dispatcher: Arc<ToolDispatcher>,
        rx_requests: UnboundedReceiver<ToolRequest>,
        tx_responses: UnboundedSender<ToolResponse>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            dispatcher,
            rx_requests,
            tx_responses,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Runs until the request channel closes, then waits for in-flight calls.
    pub async fn run(mut self) {
        info!("Worker started. Waiting for requests...");
        let mut in_flight = JoinSet::new();

        while let Some(request) = self.rx_requests.recv().await {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Request permits closed: {}", e);
                    break;
                }
            };

            let dispatcher = self.dispatcher.clone();
            let tx_responses = self.tx_responses.clone();

            // Each request runs on its own task; per-endpoint ordering is
            // enforced by the admission controller, not here.
            in_flight.spawn(async move {
                let response = dispatcher.dispatch(request).await;
                drop(permit);
                debug!("Request {} finished (ok: {})", response.id, response.ok);
                if tx_responses.send(response).is_err() {
                    warn!("Response dropped: writer has stopped");
                }
            });

            // Reap finished tasks so the set does not grow unbounded.
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Request task failed: {}", e);
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Request task failed: {}", e);
            }
        }

        info!("Worker stopped.");
    }
}
