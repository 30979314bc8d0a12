//! Idle read timeout for WebSocket streams.
//!
//! A silently dropped connection (eg/ a NAT table eviction) produces no error and no
//! close frame. [`TimeoutStream`] turns prolonged silence into a
//! [`DataError::ReadTimeout`] so the connector reconnects.

use crate::error::DataError;
use futures::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;

/// Default read timeout for WebSocket streams (2 minutes).
pub const DEFAULT_WS_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Stream wrapper yielding a [`DataError::ReadTimeout`] if the inner stream produces no
/// item for the configured duration. The deadline is reset by every item.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout_duration: Duration,
    deadline: Pin<Box<tokio::time::Sleep>>,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout_duration: Duration) -> Self {
        Self {
            inner,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
        }
    }

    pub fn with_default_timeout(inner: S) -> Self {
        Self::new(inner, DEFAULT_WS_READ_TIMEOUT)
    }
}

impl<S, T, E> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: Into<DataError>,
{
    type Item = Result<T, DataError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let timeout_duration = self.timeout_duration;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline
                    .as_mut()
                    .reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item.map_err(Into::into)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        timeout_secs = timeout_duration.as_secs(),
                        "WebSocket read timeout - no data received"
                    );

                    // Re-arm so a caller that keeps polling does not spin on the elapsed deadline
                    self.deadline
                        .as_mut()
                        .reset(Instant::now() + timeout_duration);

                    Poll::Ready(Some(Err(DataError::ReadTimeout(timeout_duration.as_secs()))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<S: Unpin> Unpin for TimeoutStream<S> {}
