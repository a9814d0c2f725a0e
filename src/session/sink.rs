//! Sink Binding
//!
//! Attaches streams to the UI's rendering surfaces. A sink that is not
//! mounted yet is retried with bounded backoff; attaching the stream a sink
//! already shows is a no-op.

use super::host::{MediaSink, SinkError, SinkId, SinkSource};
use crate::config::RetryPolicy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct SinkBinder {
    sink: Arc<dyn MediaSink>,
    policy: RetryPolicy,
    attached: Arc<Mutex<HashMap<SinkId, String>>>,
}

impl SinkBinder {
    pub fn new(sink: Arc<dyn MediaSink>, policy: RetryPolicy) -> Self {
        Self {
            sink,
            policy,
            attached: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Stream id currently shown by `sink`
    pub fn attached(&self, sink: SinkId) -> Option<String> {
        self.attached.lock().get(&sink).cloned()
    }

    /// Single attempt. `Ok(false)` when the sink already shows this stream.
    pub fn try_bind(&self, sink: SinkId, source: &SinkSource) -> Result<bool, SinkError> {
        let stream_id = source.stream_id().to_string();
        if self.attached(sink).as_deref() == Some(stream_id.as_str()) {
            return Ok(false);
        }
        self.sink.attach(sink, source.clone())?;
        tracing::debug!("Attached stream {} to {:?}", stream_id, sink);
        self.attached.lock().insert(sink, stream_id);
        Ok(true)
    }

    /// Retries `NotReady` with backoff while `still_wanted()` holds.
    /// Gives up with `NotReady` once the policy is exhausted.
    pub async fn bind_with_retry(
        &self,
        sink: SinkId,
        source: SinkSource,
        still_wanted: impl Fn() -> bool,
    ) -> Result<bool, SinkError> {
        let mut attempt = 1;
        loop {
            match self.try_bind(sink, &source) {
                Err(SinkError::NotReady(_)) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::debug!(
                        "{:?} not ready (attempt {}/{}), retrying in {:?}",
                        sink,
                        attempt,
                        self.policy.max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    if !still_wanted() {
                        return Ok(false);
                    }
                    attempt += 1;
                }
                Err(SinkError::NotReady(_)) => {
                    tracing::warn!("{:?} never became ready after {} attempts", sink, attempt);
                    return Err(SinkError::NotReady(sink));
                }
                other => return other,
            }
        }
    }

    pub fn play(&self, sink: SinkId) -> Result<(), SinkError> {
        self.sink.play(sink)
    }

    pub fn detach(&self, sink: SinkId) {
        if self.attached.lock().remove(&sink).is_some() {
            self.sink.detach(sink);
            tracing::debug!("Detached {:?}", sink);
        }
    }

    pub fn detach_all(&self) {
        let sinks: Vec<SinkId> = self.attached.lock().keys().copied().collect();
        for sink in sinks {
            self.detach(sink);
        }
    }
}

impl std::fmt::Debug for SinkBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkBinder")
            .field("policy", &self.policy)
            .field("attached", &*self.attached.lock())
            .finish()
    }
}
