//! Deferred calls sent as one JSON-RPC batch.
//!
//! [`Batch::call`] queues a request and hands back a [`Thunk`]. Passing a
//! thunk as an argument to a later call forces it: the queued request is sent
//! on its own right away and its result substituted. A forced request is
//! never sent again, so several calls depending on one thunk cost one round
//! trip for the dependency. [`Batch::commit`] sends everything not yet sent.
//!
//! Dropping a batch without committing sends nothing more. Requests already
//! forced have run and stay run.

use super::proxy::{Arg, Proxy};
use super::resolver::{decode, Reply};
use crate::error::{ClientError, RemoteException, Result};
use crate::protocol::{RequestEnvelope, ResponseEnvelope};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static BATCH_ID: AtomicU64 = AtomicU64::new(1);

type Outcome = std::result::Result<Reply, RemoteException>;

/// Handle to one queued call of a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thunk {
    batch: u64,
    index: usize,
}

impl Thunk {
    /// Position of the call in its batch.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// State of a queued call.
#[derive(Debug)]
pub enum Peek<'a> {
    /// Not sent yet: the request that will be sent.
    Pending(&'a RequestEnvelope),
    /// Sent: its outcome.
    Done(&'a Outcome),
}

#[derive(Debug)]
struct Entry {
    request: RequestEnvelope,
    outcome: Option<Outcome>,
    forced: bool,
}

/// A group of calls against one endpoint.
#[derive(Debug)]
pub struct Batch {
    proxy: Proxy,
    id: u64,
    entries: Vec<Entry>,
    committed: bool,
}

impl Batch {
    pub(crate) fn new(proxy: Proxy) -> Self {
        Self {
            proxy,
            id: BATCH_ID.fetch_add(1, Ordering::Relaxed),
            entries: Vec::new(),
            committed: false,
        }
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Number of queued calls, sent or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Every queued request, in queue order.
    pub fn pending(&self) -> impl Iterator<Item = &RequestEnvelope> {
        self.entries.iter().map(|entry| &entry.request)
    }

    /// Requests sent early because a later call depended on them.
    pub fn issued(&self) -> impl Iterator<Item = &RequestEnvelope> {
        self.entries
            .iter()
            .filter(|entry| entry.forced)
            .map(|entry| &entry.request)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.committed {
            return Err(ClientError::Protocol(format!(
                "batch {} is already committed",
                self.id
            )));
        }
        Ok(())
    }

    fn index_of(&self, thunk: &Thunk) -> Result<usize> {
        if thunk.batch != self.id || thunk.index >= self.entries.len() {
            return Err(ClientError::ForeignThunk);
        }
        Ok(thunk.index)
    }

    fn marshal(&mut self, arg: Arg) -> Result<Value> {
        match arg {
            Arg::Value(value) => Ok(self.proxy.marshal_value(value)),
            Arg::Thunk(thunk) => {
                let reply = self.force(&thunk)?;
                Ok(self.proxy.marshal_value(reply.to_json()))
            }
        }
    }

    fn enqueue(&mut self, method: &str, params: Value) -> Thunk {
        let request = RequestEnvelope::new(method, params);
        debug!("Batch {}: queued {}", self.id, request.method);
        self.entries.push(Entry {
            request,
            outcome: None,
            forced: false,
        });
        Thunk {
            batch: self.id,
            index: self.entries.len() - 1,
        }
    }

    /// Queue a call with positional arguments.
    ///
    /// Thunk arguments are forced now, in argument order.
    pub fn call<I, A>(&mut self, name: &str, args: I) -> Result<Thunk>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.ensure_open()?;
        self.proxy.expect_method(name)?;
        let mut params = Vec::new();
        for arg in args {
            params.push(self.marshal(arg.into())?);
        }
        Ok(self.enqueue(name, Value::Array(params)))
    }

    /// Queue a call with named arguments.
    pub fn call_named<I, K, A>(&mut self, name: &str, args: I) -> Result<Thunk>
    where
        I: IntoIterator<Item = (K, A)>,
        K: Into<String>,
        A: Into<Arg>,
    {
        self.ensure_open()?;
        self.proxy.expect_method(name)?;
        let mut params = Map::new();
        for (key, arg) in args {
            params.insert(key.into(), self.marshal(arg.into())?);
        }
        Ok(self.enqueue(name, Value::Object(params)))
    }

    /// The result of `thunk`, sending its request now if it has not been sent.
    pub fn force(&mut self, thunk: &Thunk) -> Result<Reply> {
        let index = self.index_of(thunk)?;
        if let Some(outcome) = &self.entries[index].outcome {
            return outcome.clone().map_err(ClientError::from);
        }

        let entry = &self.entries[index];
        debug!(
            "Batch {}: sending {} early for a dependent call",
            self.id, entry.request.method
        );
        let outcome = self.proxy.send_one(&entry.request)?;
        let entry = &mut self.entries[index];
        entry.forced = true;
        entry.outcome = Some(outcome.clone());
        outcome.map_err(ClientError::from)
    }

    /// The state of `thunk` without sending anything.
    pub fn peek(&self, thunk: &Thunk) -> Result<Peek<'_>> {
        let entry = &self.entries[self.index_of(thunk)?];
        Ok(match &entry.outcome {
            Some(outcome) => Peek::Done(outcome),
            None => Peek::Pending(&entry.request),
        })
    }

    /// The result of a sent call. Fails for calls still waiting for commit.
    pub fn result(&self, thunk: &Thunk) -> Result<Reply> {
        match self.peek(thunk)? {
            Peek::Done(outcome) => outcome.clone().map_err(ClientError::from),
            Peek::Pending(request) => Err(ClientError::Protocol(format!(
                "{} has not been sent yet",
                request.method
            ))),
        }
    }

    /// Send every call not sent yet as one JSON-RPC batch.
    ///
    /// Responses are matched to requests by id; each call gets its own
    /// outcome. A batch with nothing left to send makes no request. When
    /// the transport fails the batch stays open and can be committed again.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;

        let unsent: Vec<usize> = (0..self.entries.len())
            .filter(|&index| self.entries[index].outcome.is_none())
            .collect();
        if unsent.is_empty() {
            debug!("Batch {}: nothing left to send", self.id);
            self.committed = true;
            return Ok(());
        }

        let requests: Vec<&RequestEnvelope> = unsent
            .iter()
            .map(|&index| &self.entries[index].request)
            .collect();
        debug!(
            "Batch {}: committing {} calls to {}",
            self.id,
            requests.len(),
            self.proxy.endpoint()
        );
        let responses = self.proxy.send_batch(&requests)?;
        self.committed = true;

        let mut by_id: HashMap<String, ResponseEnvelope> = responses
            .into_iter()
            .filter_map(|response| {
                let key = response.id()?.to_string();
                Some((key, response))
            })
            .collect();

        let proxy = &self.proxy;
        for index in unsent {
            let entry = &mut self.entries[index];
            let key = entry
                .request
                .id
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_default();
            let response = by_id.remove(&key).ok_or_else(|| {
                ClientError::Protocol(format!("no response for request {}", key))
            })?;
            entry.outcome = Some(response.into_result().map(|raw| decode(proxy, raw)));
        }
        Ok(())
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if !self.committed {
            let unsent = self
                .entries
                .iter()
                .filter(|entry| entry.outcome.is_none())
                .count();
            if unsent > 0 {
                debug!("Batch {}: discarding {} unsent calls", self.id, unsent);
            }
        }
    }
}
