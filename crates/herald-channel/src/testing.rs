//! Scripted in-memory transport for driver tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::transport::{Connection, Transport, TransportError};

type Item = Result<String, TransportError>;

#[derive(Default)]
struct PeerShared {
    sent: Mutex<Vec<String>>,
    closes: AtomicUsize,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

/// Server side of one mock connection.
#[derive(Clone)]
pub(crate) struct Peer {
    uri: String,
    tx: mpsc::UnboundedSender<Item>,
    shared: Arc<PeerShared>,
}

impl Peer {
    pub(crate) fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn push(&self, text: impl Into<String>) {
        let _ = self.tx.send(Ok(text.into()));
    }

    pub(crate) fn push_json(&self, value: &Value) {
        self.push(value.to_string());
    }

    /// Make the next receive fail with `err`.
    pub(crate) fn fail(&self, err: TransportError) {
        let _ = self.tx.send(Err(err));
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<Value> {
        self.shared
            .sent
            .lock()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap_or(Value::Null))
            .collect()
    }

    /// Subscribe requests sent on this connection.
    pub(crate) fn subscribes(&self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|v| v["message"] == "subscribe")
            .collect()
    }

    /// Correlation id of the last subscribe request sent.
    pub(crate) fn last_correlation_id(&self) -> Option<String> {
        self.subscribes()
            .last()
            .and_then(|v| v["correlationId"].as_str().map(String::from))
    }

    /// Push a confirmation for the last subscribe request.
    pub(crate) fn confirm(&self) {
        let id = self.last_correlation_id().unwrap_or_default();
        self.push_json(&serde_json::json!({
            "result": "200",
            "status": "subscribed",
            "correlationId": id,
        }));
    }

    pub(crate) fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

struct MockConnection {
    rx: mpsc::UnboundedReceiver<Item>,
    shared: Arc<PeerShared>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) || self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.shared.sent.lock().push(text);
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.rx.recv().await.unwrap_or(Err(TransportError::Closed))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.shared.closes.fetch_add(1, Ordering::SeqCst);
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    refusals: VecDeque<TransportError>,
    preloaded: HashMap<usize, Vec<Item>>,
    failing_sends: HashSet<usize>,
    peers: Vec<Peer>,
    attempts: usize,
}

/// Transport whose connections are driven from the test.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the next `open` with `err`.
    pub(crate) fn refuse_next(&self, err: TransportError) {
        self.inner.lock().refusals.push_back(err);
    }

    /// Queue `value` on the `index`th connection as soon as it opens.
    pub(crate) fn preload(&self, index: usize, value: &Value) {
        self.inner
            .lock()
            .preloaded
            .entry(index)
            .or_default()
            .push(Ok(value.to_string()));
    }

    /// Make every send on the `index`th connection fail from the start.
    pub(crate) fn fail_sends_on(&self, index: usize) {
        let _ = self.inner.lock().failing_sends.insert(index);
    }

    /// Connections opened successfully.
    pub(crate) fn opened(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// Open attempts, including refused ones.
    pub(crate) fn attempts(&self) -> usize {
        self.inner.lock().attempts
    }

    pub(crate) fn peer(&self, index: usize) -> Peer {
        self.inner.lock().peers[index].clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, uri: &str) -> Result<Box<dyn Connection>, TransportError> {
        let mut inner = self.inner.lock();
        inner.attempts += 1;
        if let Some(err) = inner.refusals.pop_front() {
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let index = inner.peers.len();
        for item in inner.preloaded.remove(&index).unwrap_or_default() {
            let _ = tx.send(item);
        }
        let shared = Arc::new(PeerShared::default());
        if inner.failing_sends.contains(&index) {
            shared.fail_sends.store(true, Ordering::SeqCst);
        }
        inner.peers.push(Peer {
            uri: uri.to_owned(),
            tx,
            shared: Arc::clone(&shared),
        });
        Ok(Box::new(MockConnection { rx, shared }))
    }
}
