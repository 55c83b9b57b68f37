use std::future::Future;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use logbridge_query::build_query_request;
use logbridge_types::{Envelope, LogEvent, Position, QueryRequest};

use crate::error::StoreError;

/// Records returned by `tail` when no usable limit is given
pub const DEFAULT_LIMIT: i64 = 1000;

/// Records fetched by an export
pub const EXPORT_LIMIT: i64 = 50_000_000;

/// Client of the downstream log store
pub trait LogStore: Send + Sync {
    /// Execute a compiled query and return the matching events in order
    fn query(
        &self,
        request: &QueryRequest,
    ) -> impl Future<Output = Result<Vec<LogEvent>, StoreError>> + Send;
}

/// Answers log queries against a [`LogStore`]
pub struct LogQueryService<S> {
    store: S,
    source: String,
}

impl<S: LogStore> LogQueryService<S> {
    pub fn new(store: S, source: impl Into<String>) -> Self {
        Self {
            store,
            source: source.into(),
        }
    }

    /// Resolve the requested limit, falling back to the default
    pub fn parse_limit(&self, param: Option<&str>) -> i64 {
        let Some(param) = param.map(str::trim).filter(|p| !p.is_empty()) else {
            return DEFAULT_LIMIT;
        };
        match param.parse::<i64>() {
            Ok(limit) if limit >= 0 => limit,
            _ => {
                warn!(limit = param, default = DEFAULT_LIMIT, "Bad limit, using default");
                DEFAULT_LIMIT
            }
        }
    }

    /// Fetch the latest events matching `query`
    pub async fn tail(
        &self,
        query: &str,
        limit: Option<&str>,
    ) -> Result<Vec<Envelope>, StoreError> {
        let limit = self.parse_limit(limit);
        let request = build_query_request(query.trim(), &self.source, Position::Tail, limit, -limit);
        info!(
            query = %request.query,
            position = request.position.as_str(),
            "Querying log store"
        );

        let events = self.store.query(&request).await?;
        Ok(events
            .into_iter()
            .map(|event| Envelope::data(event.message))
            .collect())
    }

    /// Write every stored event to `writer`, one JSON line per event
    ///
    /// Returns the number of events written.
    pub async fn export<W>(&self, writer: &mut W) -> Result<usize, StoreError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let request = build_query_request("", &self.source, Position::Head, EXPORT_LIMIT, 0);
        info!(
            query = %request.query,
            position = request.position.as_str(),
            "Exporting logs"
        );

        let events = self.store.query(&request).await?;
        for event in &events {
            writer.write_all(event.export_line().as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        Ok(events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeStore {
        events: Vec<LogEvent>,
        fail: bool,
        requests: Mutex<Vec<QueryRequest>>,
    }

    impl LogStore for FakeStore {
        async fn query(&self, request: &QueryRequest) -> Result<Vec<LogEvent>, StoreError> {
            self.requests.lock().push(request.clone());
            if self.fail {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            Ok(self.events.clone())
        }
    }

    fn service(store: FakeStore) -> LogQueryService<FakeStore> {
        LogQueryService::new(store, "p")
    }

    #[test]
    fn test_parse_limit() {
        let svc = service(FakeStore::default());
        assert_eq!(svc.parse_limit(None), 1000);
        assert_eq!(svc.parse_limit(Some("  ")), 1000);
        assert_eq!(svc.parse_limit(Some("25")), 25);
        assert_eq!(svc.parse_limit(Some(" 0 ")), 0);
        assert_eq!(svc.parse_limit(Some("-5")), 1000);
        assert_eq!(svc.parse_limit(Some("many")), 1000);
    }

    #[tokio::test]
    async fn test_tail_builds_request_and_wraps_events() {
        let store = FakeStore {
            events: vec![LogEvent::new(1, "first"), LogEvent::new(2, "second")],
            ..Default::default()
        };
        let svc = service(store);

        let envelopes = svc.tail(" pod:web ", Some("10")).await.unwrap();
        assert_eq!(
            envelopes,
            vec![Envelope::data("first"), Envelope::data("second")]
        );

        let requests = svc.store.requests.lock();
        assert_eq!(
            requests[0],
            QueryRequest {
                query: r#"SELECT FROM p WHERE fields:pod="web" OFFSET -10 LIMIT 10"#.to_string(),
                position: Position::Tail,
                offset: -10,
                limit: 10,
            }
        );
    }

    #[tokio::test]
    async fn test_tail_propagates_store_errors() {
        let svc = service(FakeStore {
            fail: true,
            ..Default::default()
        });
        let result = svc.tail("", None).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_export_writes_json_lines() {
        let store = FakeStore {
            events: vec![LogEvent {
                timestamp: 1_546_304_461_000_000_000,
                message: "hello\n".to_string(),
                tags: String::new(),
                fields: "f1=v1".to_string(),
            }],
            ..Default::default()
        };
        let svc = service(store);

        let mut out = Vec::new();
        let written = svc.export(&mut out).await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"ts\":\"2019-01-01T01:01:01Z\",\"tags\":\"\",\"fields\":\"f1=v1\",\"msg\":\"hello\\n\"}\n"
        );
        assert_eq!(svc.store.requests.lock()[0].position, Position::Head);
    }
}
