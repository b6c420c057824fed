/// Streaming response multiplexer.
///
/// Runs one producer per retrieval mode and merges their output into a
/// single ordered feed of [`Event`]s for one consumer (the SSE writer).
///
/// Every feed ends with exactly one [`Event::Done`]. A failing provider is
/// reported as an `Error` tagged with its mode and never affects the other
/// producers. Dropping the feed aborts all producers still running.
use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::engine::{EngineError, Mode, PieceStream, QueryOutput};

/// Default bound on a single idle wait of the merge loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One unit of progress on the merged feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Start {
        mode: Mode,
    },
    Chunk {
        mode: Mode,
        content: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<Mode>,
        message: String,
    },
    Done,
}

impl Event {
    fn chunk(mode: Mode, content: String) -> Self {
        Event::Chunk { mode, content }
    }

    fn failed(mode: Mode, message: impl Into<String>) -> Self {
        Event::Error {
            mode: Some(mode),
            message: message.into(),
        }
    }
}

/// Pending engine call for one mode.
pub type QueryFuture = BoxFuture<'static, Result<QueryOutput, EngineError>>;

/// Merged event feed.
pub type EventStream = BoxStream<'static, Event>;

#[derive(Debug, Clone, Copy)]
pub struct MultiplexOptions {
    /// Longest the merge loop waits without news before re-checking its producers.
    pub poll_interval: Duration,
    /// Deadline for a single provider, measured from the start of the feed.
    pub provider_timeout: Option<Duration>,
}

impl Default for MultiplexOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            provider_timeout: None,
        }
    }
}

/// Build the event feed for a set of sources.
///
/// A single source is streamed inline; two or more are run concurrently and
/// merged.
pub fn multiplex(sources: Vec<(Mode, QueryFuture)>, options: MultiplexOptions) -> EventStream {
    let mut sources = sources;
    if sources.len() == 1 {
        if let Some((mode, fut)) = sources.pop() {
            return single(mode, fut, options);
        }
    }
    merge(sources, options)
}

/// Stream one mode without spawning.
pub fn single(mode: Mode, fut: QueryFuture, options: MultiplexOptions) -> EventStream {
    let deadline = options.provider_timeout.map(|t| (Instant::now() + t, t));

    Box::pin(async_stream::stream! {
        yield Event::Start { mode };

        match resolve(fut, deadline).await {
            Ok(QueryOutput::Value(v)) => yield Event::chunk(mode, v),
            Ok(QueryOutput::Stream(mut pieces)) => loop {
                match next_piece(&mut pieces, deadline).await {
                    Ok(Some(piece)) => yield Event::chunk(mode, piece),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%mode, error = %e, "Provider stream failed");
                        yield Event::failed(mode, e.to_string());
                        break;
                    }
                }
            },
            Err(e) => {
                warn!(%mode, error = %e, "Provider call failed");
                yield Event::failed(mode, e.to_string());
            }
        }

        yield Event::Done;
    })
}

/// Outcome of one turn of the merge loop.
enum Step {
    Emit(Event),
    Joined(Result<Id, JoinError>),
    Idle,
    Drained,
}

/// Run every source as its own task and interleave their events.
pub fn merge(sources: Vec<(Mode, QueryFuture)>, options: MultiplexOptions) -> EventStream {
    let deadline = options.provider_timeout.map(|t| (Instant::now() + t, t));

    Box::pin(async_stream::stream! {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        let mut running: HashMap<Id, Mode> = HashMap::new();

        for (mode, fut) in sources {
            let handle = tasks.spawn(produce(mode, fut, tx.clone(), deadline));
            running.insert(handle.id(), mode);
        }
        // Only producers hold senders now; the channel closes once they all finish.
        drop(tx);

        loop {
            let step = tokio::select! {
                biased;
                Some(event) = rx.recv() => Step::Emit(event),
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    Step::Joined(joined.map(|(id, ())| id))
                }
                _ = tokio::time::sleep(options.poll_interval), if !tasks.is_empty() => Step::Idle,
                else => Step::Drained,
            };

            match step {
                Step::Emit(event) => yield event,
                Step::Joined(Ok(id)) => {
                    if let Some(mode) = running.remove(&id) {
                        debug!(%mode, remaining = running.len(), "Producer finished");
                    }
                }
                Step::Joined(Err(e)) => yield joined_with_error(&mut running, e),
                Step::Idle => {
                    let pending: Vec<&'static str> = running.values().map(|m| m.as_str()).collect();
                    debug!(?pending, "Waiting on producers");
                }
                Step::Drained => break,
            }
        }

        yield Event::Done;
    })
}

/// Turn an abnormal task exit into the event the consumer should see.
fn joined_with_error(running: &mut HashMap<Id, Mode>, err: JoinError) -> Event {
    let mode = running.remove(&err.id());
    match mode {
        Some(mode) if err.is_panic() => {
            error!(%mode, "Producer task panicked");
            Event::failed(mode, "provider task panicked")
        }
        _ => {
            error!(?mode, error = %err, "Producer task ended unexpectedly");
            Event::Error {
                mode: None,
                message: format!("stream orchestration failed: {err}"),
            }
        }
    }
}

/// Body of one producer task.
async fn produce(
    mode: Mode,
    fut: QueryFuture,
    tx: mpsc::UnboundedSender<Event>,
    deadline: Option<(Instant, Duration)>,
) {
    if tx.send(Event::Start { mode }).is_err() {
        return;
    }

    if let Err(e) = forward(mode, fut, &tx, deadline).await {
        warn!(%mode, error = %e, "Provider failed");
        let _ = tx.send(Event::failed(mode, e.to_string()));
    }
}

async fn forward(
    mode: Mode,
    fut: QueryFuture,
    tx: &mpsc::UnboundedSender<Event>,
    deadline: Option<(Instant, Duration)>,
) -> Result<(), EngineError> {
    match resolve(fut, deadline).await? {
        QueryOutput::Value(v) => {
            let _ = tx.send(Event::chunk(mode, v));
        }
        QueryOutput::Stream(mut pieces) => {
            while let Some(piece) = next_piece(&mut pieces, deadline).await? {
                if tx.send(Event::chunk(mode, piece)).is_err() {
                    debug!(%mode, "Consumer gone, dropping provider stream");
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn resolve(
    fut: QueryFuture,
    deadline: Option<(Instant, Duration)>,
) -> Result<QueryOutput, EngineError> {
    match deadline {
        Some((at, limit)) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| EngineError::Timeout(limit))?,
        None => fut.await,
    }
}

async fn next_piece(
    pieces: &mut PieceStream,
    deadline: Option<(Instant, Duration)>,
) -> Result<Option<String>, EngineError> {
    let next = match deadline {
        Some((at, limit)) => tokio::time::timeout_at(at, pieces.next())
            .await
            .map_err(|_| EngineError::Timeout(limit))?,
        None => pieces.next().await,
    };
    next.transpose()
}
