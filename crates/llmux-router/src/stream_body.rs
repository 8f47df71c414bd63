use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use llmux_common::ProxyError;
use llmux_provider_core::CancelHandle;

/// Response-body stream that cancels the request context when the client
/// goes away: axum drops the body, the drop fires the cancel handle, and
/// the upstream read unwinds promptly.
pub struct CancellingStream {
    inner: ReceiverStream<Result<Bytes, ProxyError>>,
    cancel: Option<CancelHandle>,
}

impl CancellingStream {
    pub fn new(rx: mpsc::Receiver<Result<Bytes, ProxyError>>, cancel: CancelHandle) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            cancel: Some(cancel),
        }
    }
}

impl Stream for CancellingStream {
    type Item = Result<Bytes, ProxyError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = Pin::new(&mut self.inner).poll_next(cx);
        if matches!(next, Poll::Ready(None)) {
            // Clean end of stream: nothing left to cancel.
            self.cancel = None;
        }
        next
    }
}

impl Drop for CancellingStream {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}
