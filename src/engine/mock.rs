/// Scripted query engine for testing purposes.
///
/// Answers each mode from a fixed script, so handlers and the multiplexer can
/// be exercised without a running graph-RAG service.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{DocumentStatus, EngineError, Mode, Query, QueryEngine, QueryOutput};

/// How the engine answers one mode.
#[derive(Debug, Clone)]
pub enum Script {
    /// Resolve to a complete answer.
    Value(String),
    /// Resolve to a stream yielding these pieces in order.
    Pieces(Vec<String>),
    /// Fail before producing anything.
    Fail(String),
    /// Stream the pieces, then fail.
    FailAfter(Vec<String>, String),
}

impl Script {
    pub fn pieces<I, S>(pieces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Script::Pieces(pieces.into_iter().map(Into::into).collect())
    }
}

/// An engine that replays scripts and records what it was asked.
#[derive(Default)]
pub struct MockEngine {
    scripts: HashMap<Mode, Script>,
    piece_delay: Option<Duration>,
    queries: Mutex<Vec<Query>>,
    inserted: Mutex<Vec<(String, String)>>,
    fail_inserts: bool,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_script(mut self, mode: Mode, script: Script) -> Self {
        self.scripts.insert(mode, script);
        self
    }

    /// Sleep this long before every streamed piece.
    #[must_use]
    pub fn with_piece_delay(mut self, delay: Duration) -> Self {
        self.piece_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn failing_inserts(mut self) -> Self {
        self.fail_inserts = true;
        self
    }

    /// Queries received so far, in call order.
    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    /// `(source, text)` pairs inserted so far.
    pub fn inserted(&self) -> Vec<(String, String)> {
        self.inserted.lock().map(|i| i.clone()).unwrap_or_default()
    }

    fn stream_of(&self, pieces: Vec<String>, failure: Option<String>) -> QueryOutput {
        let delay = self.piece_delay;
        let items = pieces
            .into_iter()
            .map(Ok)
            .chain(failure.map(|msg| Err(EngineError::Remote(msg))));
        let stream = futures::stream::iter(items).then(move |item| async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            item
        });
        QueryOutput::Stream(stream.boxed())
    }
}

#[async_trait]
impl QueryEngine for MockEngine {
    async fn query(&self, query: Query) -> Result<QueryOutput, EngineError> {
        let mode = query.mode;
        let stream = query.stream;
        if let Ok(mut q) = self.queries.lock() {
            q.push(query);
        }

        let script = self
            .scripts
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| Script::Value(String::new()));

        match script {
            Script::Value(v) => Ok(QueryOutput::Value(v)),
            Script::Pieces(p) if stream => Ok(self.stream_of(p, None)),
            Script::Pieces(p) => Ok(QueryOutput::Value(p.concat())),
            Script::Fail(msg) => Err(EngineError::Remote(msg)),
            Script::FailAfter(p, msg) => Ok(self.stream_of(p, Some(msg))),
        }
    }

    async fn insert(&self, text: &str, source: &str) -> Result<(), EngineError> {
        if self.fail_inserts {
            return Err(EngineError::Remote("insert rejected".to_string()));
        }
        if let Ok(mut i) = self.inserted.lock() {
            i.push((source.to_string(), text.to_string()));
        }
        Ok(())
    }

    async fn documents(&self) -> Result<Vec<DocumentStatus>, EngineError> {
        let inserted = self.inserted();
        Ok(inserted
            .iter()
            .enumerate()
            .map(|(i, (source, text))| DocumentStatus {
                id: format!("doc-{i}"),
                status: "processed".to_string(),
                file_path: Some(source.clone()),
                content_summary: Some(text.clone()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_streams_pieces() {
        let engine = MockEngine::new().with_script(Mode::Naive, Script::pieces(["a", "b"]));
        let out = engine
            .query(Query::new("q", Mode::Naive).streaming(true))
            .await
            .unwrap();
        assert!(matches!(out, QueryOutput::Stream(_)));
        assert_eq!(out.collect().await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_mock_concatenates_without_stream() {
        let engine = MockEngine::new().with_script(Mode::Naive, Script::pieces(["a", "b"]));
        let out = engine.query(Query::new("q", Mode::Naive)).await.unwrap();
        assert!(matches!(out, QueryOutput::Value(ref v) if v == "ab"));
    }

    #[tokio::test]
    async fn test_mock_fail() {
        let engine = MockEngine::new().with_script(Mode::Hybrid, Script::Fail("down".into()));
        let err = engine.query(Query::new("q", Mode::Hybrid)).await.unwrap_err();
        assert_eq!(err.to_string(), "engine reported: down");
    }

    #[tokio::test]
    async fn test_mock_records_queries() {
        let engine = MockEngine::new();
        engine.query(Query::new("first", Mode::Naive)).await.unwrap();
        engine.query(Query::new("second", Mode::Hybrid)).await.unwrap();
        let q = engine.queries();
        assert_eq!(q.len(), 2);
        assert_eq!(q[1].text, "second");
        assert_eq!(q[1].mode, Mode::Hybrid);
    }

    #[tokio::test]
    async fn test_mock_insert_and_list() {
        let engine = MockEngine::new();
        engine.insert("body", "a.txt").await.unwrap();
        let docs = engine.documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_path.as_deref(), Some("a.txt"));
    }
}
