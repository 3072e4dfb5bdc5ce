//! Named result streams connecting yield sinks to the consumer.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::Stream;
use indexmap::IndexMap;
use log::debug;
use tokio::sync::{mpsc, watch};

use common_error::{RillError, RillResult};
use rill_plan::NodeId;

use super::state::{ExecutionState, wait_cancelled};
use crate::table::Table;

type Item = RillResult<Table>;

/// Tables of one result stream as a [`Stream`]; the terminal error, if any,
/// is the last item.
pub type TableStream = Pin<Box<dyn Stream<Item = RillResult<Table>> + Send>>;

#[derive(Debug)]
struct Slot {
    node: NodeId,
    tx: mpsc::Sender<Item>,
    rx: mpsc::Receiver<Item>,
}

/// Result streams registered while a query is being built.
///
/// Each name is owned by one plan node; every instance of that node shares
/// the stream. The registry keeps one sender per stream until
/// [`ResultRegistry::into_results`] so streams stay open during the build.
#[derive(Debug)]
pub struct ResultRegistry {
    buffer: usize,
    cancel: watch::Receiver<bool>,
    slots: Mutex<IndexMap<String, Slot>>,
}

impl ResultRegistry {
    pub fn new(buffer: usize, cancel: watch::Receiver<bool>) -> Self {
        Self {
            buffer: buffer.max(1),
            cancel,
            slots: Mutex::new(IndexMap::new()),
        }
    }

    /// Obtain a sender for the stream `name` owned by `node`.
    pub fn register(&self, name: &str, node: &NodeId) -> RillResult<ResultSender> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(name) {
            if &slot.node != node {
                return Err(RillError::invalid_plan(format!(
                    "duplicate result name {name:?} on nodes {:?} and {:?}",
                    slot.node.as_str(),
                    node.as_str()
                )));
            }
        }
        let buffer = self.buffer;
        let slot = slots.entry(name.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(buffer);
            debug!("registered result stream {name:?} for node {node}");
            Slot {
                node: node.clone(),
                tx,
                rx,
            }
        });
        Ok(ResultSender {
            name: name.to_string(),
            tx: tokio::sync::Mutex::new(Some(slot.tx.clone())),
            cancel: self.cancel.clone(),
        })
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no stream was registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the registry's own senders and hand out the consumer ends.
    pub fn into_results(self, state: &Arc<ExecutionState>) -> IndexMap<String, QueryResult> {
        self.slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .map(|(name, slot)| {
                let result = QueryResult {
                    name: name.clone(),
                    rx: slot.rx,
                    state: Arc::clone(state),
                    cancel: self.cancel.clone(),
                    done: false,
                };
                (name, result)
            })
            .collect()
    }
}

/// Producer end of one result stream, held by a yield instance.
#[derive(Debug)]
pub struct ResultSender {
    name: String,
    tx: tokio::sync::Mutex<Option<mpsc::Sender<Item>>>,
    cancel: watch::Receiver<bool>,
}

impl ResultSender {
    /// The stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one item, waiting for buffer space.
    ///
    /// Fails with `Cancelled` if the query is cancelled while waiting. Items
    /// sent after the consumer dropped its end are discarded.
    pub async fn send(&self, item: Item) -> RillResult<()> {
        let guard = self.tx.lock().await;
        let Some(tx) = guard.as_ref() else {
            return Err(RillError::internal(format!(
                "result stream {:?} already closed",
                self.name
            )));
        };
        tokio::select! {
            biased;
            () = wait_cancelled(&self.cancel) => {
                Err(RillError::cancelled(format!("result stream {:?} cancelled", self.name)))
            }
            res = tx.send(item) => {
                if res.is_err() {
                    debug!("result stream {:?} has no consumer; discarding", self.name);
                }
                Ok(())
            }
        }
    }

    /// Close this sender. The stream ends once every sender is closed.
    pub async fn close(&self) {
        self.tx.lock().await.take();
    }
}

/// Consumer end of one named result stream.
#[derive(Debug)]
pub struct QueryResult {
    name: String,
    rx: mpsc::Receiver<Item>,
    state: Arc<ExecutionState>,
    cancel: watch::Receiver<bool>,
    done: bool,
}

impl QueryResult {
    /// The stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next table of the stream.
    ///
    /// Tables already buffered are delivered first. Returns `Ok(None)` once
    /// the stream ended successfully; if the query failed or was cancelled,
    /// returns the query's terminal error instead.
    pub async fn next_table(&mut self) -> RillResult<Option<Table>> {
        if self.done {
            return Ok(None);
        }
        let item = tokio::select! {
            biased;
            item = self.rx.recv() => item,
            () = wait_cancelled(&self.cancel) => {
                self.done = true;
                return Err(self.state.terminal_error());
            }
        };
        match item {
            Some(Ok(table)) => Ok(Some(table)),
            Some(Err(err)) => {
                self.done = true;
                Err(err)
            }
            None => {
                self.done = true;
                match self.state.error() {
                    Some(err) => Err(err),
                    None => Ok(None),
                }
            }
        }
    }

    /// Iterate the remaining tables.
    pub fn tables(&mut self) -> Tables<'_> {
        Tables { result: self }
    }

    /// Consume the result as a stream of tables.
    pub fn into_stream(self) -> TableStream {
        Box::pin(futures::stream::unfold(self, |mut result| async move {
            match result.next_table().await {
                Ok(Some(table)) => Some((Ok(table), result)),
                Ok(None) => None,
                Err(err) => Some((Err(err), result)),
            }
        }))
    }
}

/// Remaining tables of a [`QueryResult`].
#[derive(Debug)]
pub struct Tables<'a> {
    result: &'a mut QueryResult,
}

impl Tables<'_> {
    /// Call `f` for every table until the stream ends or `f` fails.
    pub async fn do_each<F>(self, mut f: F) -> RillResult<()>
    where
        F: FnMut(Table) -> RillResult<()>,
    {
        while let Some(table) = self.result.next_table().await? {
            f(table)?;
        }
        Ok(())
    }
}
