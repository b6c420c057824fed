/// HTTP client for a LightRAG server.
///
/// Uses the server's query, streaming query and document endpoints. The
/// streaming endpoint answers with newline-delimited JSON objects carrying
/// either a `response` fragment or an `error`.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::bytes::Buf;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::debug;

use super::{
    DocumentStatus, EngineError, HistoryMessage, Mode, PieceStream, Query, QueryEngine,
    QueryOutput,
};
use crate::config::RagConfig;

/// Longest NDJSON line accepted from the streaming endpoint.
const MAX_STREAM_LINE: usize = 1024 * 1024;

#[derive(Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    mode: Mode,
    stream: bool,
    #[serde(skip_serializing_if = "no_history")]
    conversation_history: &'a [HistoryMessage],
}

fn no_history(history: &&[HistoryMessage]) -> bool {
    history.is_empty()
}

#[derive(Deserialize)]
struct QueryReply {
    response: String,
}

#[derive(Serialize)]
struct InsertBody<'a> {
    text: &'a str,
    file_source: &'a str,
}

#[derive(Deserialize)]
struct DocumentsReply {
    #[serde(default)]
    statuses: HashMap<String, Vec<DocumentEntry>>,
}

#[derive(Deserialize)]
struct DocumentEntry {
    id: String,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    content_summary: Option<String>,
}

/// One line of the streaming endpoint.
#[derive(Deserialize, Debug, PartialEq)]
struct StreamLine {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Query engine backed by a remote LightRAG server.
pub struct LightRagClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LightRagClient {
    pub fn new(config: &RagConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("ragbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(format!("{}{path}", self.base_url)))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("X-API-Key", key),
            None => req,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(EngineError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn query_stream(&self, body: &QueryBody<'_>) -> Result<QueryOutput, EngineError> {
        let resp = Self::check(self.post("/query/stream").json(body).send().await?).await?;

        let bytes = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(QueryOutput::Stream(decode_lines(bytes, MAX_STREAM_LINE)))
    }
}

/// Split a byte stream into NDJSON lines and turn them into answer pieces.
///
/// A line longer than `max_line` bytes fails the stream with `Decode`.
fn decode_lines<S, B>(bytes: S, max_line: usize) -> PieceStream
where
    S: Stream<Item = Result<B, std::io::Error>> + Send + 'static,
    B: Buf + Send + 'static,
{
    let lines = FramedRead::new(
        StreamReader::new(bytes),
        LinesCodec::new_with_max_length(max_line),
    );

    lines
        .filter_map(|line| async move {
            let line = match line {
                Ok(l) => l,
                Err(e) => return Some(Err(EngineError::Decode(e.to_string()))),
            };
            parse_stream_line(&line).transpose()
        })
        .boxed()
}

/// Interpret one NDJSON line. Blank lines and lines without a fragment yield `None`.
fn parse_stream_line(line: &str) -> Result<Option<String>, EngineError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: StreamLine = serde_json::from_str(line)
        .map_err(|e| EngineError::Decode(format!("{e}: {line}")))?;
    if let Some(err) = parsed.error {
        return Err(EngineError::Remote(err));
    }
    Ok(parsed.response)
}

#[async_trait]
impl QueryEngine for LightRagClient {
    async fn query(&self, query: Query) -> Result<QueryOutput, EngineError> {
        let body = QueryBody {
            query: &query.text,
            mode: query.mode,
            stream: query.stream,
            conversation_history: &query.history,
        };
        debug!(mode = %query.mode, stream = query.stream, "Querying LightRAG");

        if query.stream {
            return self.query_stream(&body).await;
        }

        let reply: QueryReply = Self::check(self.post("/query").json(&body).send().await?)
            .await?
            .json()
            .await?;
        Ok(QueryOutput::Value(reply.response))
    }

    async fn insert(&self, text: &str, source: &str) -> Result<(), EngineError> {
        let body = InsertBody {
            text,
            file_source: source,
        };
        Self::check(self.post("/documents/text").json(&body).send().await?).await?;
        Ok(())
    }

    async fn documents(&self) -> Result<Vec<DocumentStatus>, EngineError> {
        let req = self.authorize(self.client.get(format!("{}/documents", self.base_url)));
        let reply: DocumentsReply = Self::check(req.send().await?).await?.json().await?;

        let mut docs: Vec<DocumentStatus> = reply
            .statuses
            .into_iter()
            .flat_map(|(status, entries)| {
                entries.into_iter().map(move |e| DocumentStatus {
                    id: e.id,
                    status: status.clone(),
                    file_path: e.file_path,
                    content_summary: e.content_summary,
                })
            })
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }
}
