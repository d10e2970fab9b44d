use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::debug;

use crate::decoder::FrameDecoder;
use crate::error::ChatApiError;
use crate::events::{ProtocolEvent, StreamEnd};

/// Open response body, read chunk by chunk and never buffered whole.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ChatApiError>>;

/// Cancellation flag shared between a request and whoever may abort it.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[must_use]
pub fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

pub(crate) async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, ChatApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}

/// Holds the body for one read loop and drops it on every exit path.
struct ScopedReader {
    body: Option<ByteStream>,
}

impl ScopedReader {
    fn new(body: ByteStream) -> Self {
        Self { body: Some(body) }
    }

    async fn next_chunk(
        &mut self,
        cancel: Option<&CancellationSignal>,
        idle_timeout: Option<Duration>,
    ) -> Result<Option<Vec<u8>>, ChatApiError> {
        let Some(body) = self.body.as_mut() else {
            return Ok(None);
        };

        let next = match idle_timeout {
            Some(limit) => await_or_cancel(tokio::time::timeout(limit, body.next()), cancel)
                .await?
                .map_err(|_| ChatApiError::IdleTimeout(limit))?,
            None => await_or_cancel(body.next(), cancel).await?,
        };

        next.transpose()
    }

    fn release(&mut self) {
        if self.body.take().is_some() {
            debug!("released stream reader");
        }
    }
}

impl Drop for ScopedReader {
    fn drop(&mut self) {
        self.release();
    }
}

/// Drive `decoder` over `body`, delivering events to `on_event` in arrival order.
///
/// Returns at the first terminal event without reading further, or at end of body after
/// flushing the decoder. Cancellation is checked before every delivered event.
pub async fn pump_events<F>(
    body: ByteStream,
    decoder: &mut FrameDecoder,
    cancel: Option<&CancellationSignal>,
    idle_timeout: Option<Duration>,
    mut on_event: F,
) -> Result<StreamEnd, ChatApiError>
where
    F: FnMut(ProtocolEvent),
{
    let mut reader = ScopedReader::new(body);

    while let Some(chunk) = reader.next_chunk(cancel, idle_timeout).await? {
        if let Some(end) = deliver(decoder.feed(&chunk), cancel, &mut on_event)? {
            reader.release();
            return Ok(end);
        }
    }

    reader.release();
    if let Some(end) = deliver(decoder.finish(), cancel, &mut on_event)? {
        return Ok(end);
    }

    Ok(StreamEnd::Eof)
}

fn deliver<F>(
    events: Vec<ProtocolEvent>,
    cancel: Option<&CancellationSignal>,
    on_event: &mut F,
) -> Result<Option<StreamEnd>, ChatApiError>
where
    F: FnMut(ProtocolEvent),
{
    for event in events {
        if is_cancelled(cancel) {
            return Err(ChatApiError::Cancelled);
        }

        if event.is_terminal() {
            on_event(event.clone());
            return Ok(Some(StreamEnd::Terminal(event)));
        }
        on_event(event);
    }

    Ok(None)
}
