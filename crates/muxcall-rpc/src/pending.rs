//! In-flight call bookkeeping.
//!
//! Every call issued by a [`Client`](crate::Client) lives in the client's
//! [`PendingTable`] from the moment its request ID is allocated until its
//! response arrives or the connection shuts down. Whichever happens first
//! removes it, so each call is completed exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use muxcall_frame::decode_value;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::{Result, RpcError};

/// What the connection produced for a call.
pub(crate) enum Outcome {
    /// Raw reply body, still to be decoded into the caller's reply type.
    Reply(Bytes),
    Failed(RpcError),
}

/// Decodes the outcome into the caller's reply type and delivers it.
pub(crate) type Completer = Box<dyn FnOnce(Option<u64>, Outcome) + Send>;

pub(crate) struct PendingCall {
    pub(crate) service_method: String,
    complete: Completer,
}

impl PendingCall {
    pub(crate) fn new(service_method: String, complete: Completer) -> Self {
        Self {
            service_method,
            complete,
        }
    }

    pub(crate) fn complete(self, request_id: u64, outcome: Outcome) {
        (self.complete)(Some(request_id), outcome);
    }

    /// Fail a call that was never sent.
    pub(crate) fn abandon(self, err: RpcError) {
        (self.complete)(None, Outcome::Failed(err));
    }
}

/// Request ID allocation and the in-flight call map for one connection.
#[derive(Default)]
pub(crate) struct PendingTable {
    seq: u64,
    calls: HashMap<u64, PendingCall>,
    /// `close` was requested by the user.
    pub(crate) closing: bool,
    /// The response loop has terminated.
    pub(crate) shutdown: bool,
}

impl PendingTable {
    /// Allocate the next request ID and track `call` under it.
    ///
    /// Hands the call back if the connection is closing or already shut down.
    pub(crate) fn insert(&mut self, call: PendingCall) -> std::result::Result<u64, PendingCall> {
        if self.closing || self.shutdown {
            return Err(call);
        }
        let request_id = self.seq;
        self.seq += 1;
        self.calls.insert(request_id, call);
        Ok(request_id)
    }

    pub(crate) fn remove(&mut self, request_id: u64) -> Option<PendingCall> {
        self.calls.remove(&request_id)
    }

    /// Mark the table shut down and take every remaining call.
    pub(crate) fn drain(&mut self) -> Vec<(u64, PendingCall)> {
        self.shutdown = true;
        let mut drained: Vec<_> = self.calls.drain().collect();
        drained.sort_by_key(|(request_id, _)| *request_id);
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

/// A completed call.
#[derive(Debug)]
pub struct Call<R> {
    /// The `Service.Method` name that was called.
    pub service_method: String,
    /// Request ID the call was sent under; `None` if it never reached the wire.
    pub request_id: Option<u64>,
    pub reply: Option<R>,
    pub error: Option<RpcError>,
}

impl<R> Call<R> {
    pub(crate) fn failed(service_method: String, request_id: Option<u64>, error: RpcError) -> Self {
        Self {
            service_method,
            request_id,
            reply: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<R> {
        match (self.error, self.reply) {
            (Some(err), _) => Err(err),
            (None, Some(reply)) => Ok(reply),
            (None, None) => Err(RpcError::Decode("missing reply".to_string())),
        }
    }
}

/// Handle returned by [`Client::go`](crate::Client::go).
///
/// Holds the private completion channel when the caller did not supply one.
#[derive(Debug)]
pub struct Pending<R> {
    service_method: String,
    request_id: Option<u64>,
    done: Option<mpsc::Receiver<Call<R>>>,
}

impl<R> Pending<R> {
    pub(crate) fn new(service_method: String, done: Option<mpsc::Receiver<Call<R>>>) -> Self {
        Self {
            service_method,
            request_id: None,
            done,
        }
    }

    pub(crate) fn set_request_id(&mut self, request_id: u64) {
        self.request_id = Some(request_id);
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    pub fn request_id(&self) -> Option<u64> {
        self.request_id
    }

    /// The private completion channel, if the call was issued without one.
    pub fn done(&mut self) -> Option<&mut mpsc::Receiver<Call<R>>> {
        self.done.as_mut()
    }

    /// Wait for the call to complete.
    ///
    /// Returns `None` when the call was issued with a caller-supplied
    /// channel; the result is delivered there instead.
    pub async fn wait(self) -> Option<Call<R>> {
        let mut done = self.done?;
        Some(match done.recv().await {
            Some(call) => call,
            None => Call::failed(self.service_method, self.request_id, RpcError::Shutdown),
        })
    }
}

/// Build the completer for a call whose reply decodes into `R`.
///
/// Delivery never blocks: a full channel gets one more attempt after
/// `retry_delay`, after which the result is dropped and counted in
/// `discarded`.
pub(crate) fn completer<R>(
    service_method: String,
    done: mpsc::Sender<Call<R>>,
    retry_delay: Duration,
    discarded: Arc<AtomicU64>,
) -> Completer
where
    R: DeserializeOwned + Send + 'static,
{
    Box::new(move |request_id, outcome| {
        let call = match outcome {
            Outcome::Reply(body) => match decode_value::<R>(&body) {
                Ok(reply) => Call {
                    service_method,
                    request_id,
                    reply: Some(reply),
                    error: None,
                },
                Err(err) => Call::failed(service_method, request_id, RpcError::Decode(err.to_string())),
            },
            Outcome::Failed(err) => Call::failed(service_method, request_id, err),
        };
        deliver(done, call, retry_delay, discarded);
    })
}

fn deliver<R: Send + 'static>(
    done: mpsc::Sender<Call<R>>,
    call: Call<R>,
    retry_delay: Duration,
    discarded: Arc<AtomicU64>,
) {
    let call = match done.try_send(call) {
        Ok(()) => return,
        Err(TrySendError::Closed(call)) => {
            debug!(
                service_method = %call.service_method,
                request_id = ?call.request_id,
                "caller stopped waiting, dropping result"
            );
            return;
        }
        Err(TrySendError::Full(call)) => call,
    };

    debug!(
        service_method = %call.service_method,
        request_id = ?call.request_id,
        ?retry_delay,
        "completion channel full, retrying"
    );
    tokio::spawn(async move {
        tokio::time::sleep(retry_delay).await;
        match done.try_send(call) {
            Ok(()) => {}
            Err(TrySendError::Full(call)) => {
                discarded.fetch_add(1, Ordering::Relaxed);
                warn!(
                    service_method = %call.service_method,
                    request_id = ?call.request_id,
                    "discarding result, completion channel still full"
                );
            }
            Err(TrySendError::Closed(call)) => {
                debug!(
                    service_method = %call.service_method,
                    request_id = ?call.request_id,
                    "caller stopped waiting, dropping result"
                );
            }
        }
    });
}
