use actix_ws::{Message, MessageStream, Session};
use async_trait::async_trait;
use std::future::Future;
use std::pin::pin;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wirecore::{ExecutionRecord, FlowError, NodeError};
use wireruntime::RecordSubscriber;

/// Forwards every execution record to the websocket peer as one text
/// frame. A failed send means the peer is gone; the run gets canceled by
/// the status proxy.
pub struct WsSubscriber {
    session: Mutex<Session>,
}

impl WsSubscriber {
    pub fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

#[async_trait]
impl RecordSubscriber for WsSubscriber {
    async fn deliver(&self, record: ExecutionRecord) -> Result<(), NodeError> {
        let text =
            serde_json::to_string(&record).map_err(|e| NodeError::Internal(e.to_string()))?;
        self.session
            .lock()
            .await
            .text(text)
            .await
            .map_err(|_| NodeError::Canceled)
    }
}

/// Drive a run to completion while watching the socket. A client close
/// cancels the run; the run is still awaited so terminal records land in
/// the journal. The final frame reports the run's outcome.
pub async fn serve_run<F>(
    mut session: Session,
    mut msg_stream: MessageStream,
    cancel: CancellationToken,
    run: F,
) where
    F: Future<Output = Result<(), FlowError>>,
{
    let mut run = pin!(run);
    let mut socket_open = true;
    let result = loop {
        if !socket_open {
            break run.as_mut().await;
        }
        tokio::select! {
            result = run.as_mut() => break result,
            msg = msg_stream.recv() => match msg {
                Some(Ok(Message::Ping(bytes))) => {
                    let _ = session.pong(&bytes).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("client left mid-run, canceling");
                    cancel.cancel();
                    socket_open = false;
                }
                _ => {}
            },
        }
    };

    let outcome = match &result {
        Ok(()) => serde_json::json!({ "done": true }),
        Err(e) => serde_json::json!({ "done": true, "error": e.to_string() }),
    };
    let _ = session.text(outcome.to_string()).await;
    let _ = session.close(None).await;
}
