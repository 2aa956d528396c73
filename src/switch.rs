//! Switch-to-latest for streams of streams.
//!
//! [`SwitchLatest`] follows only the most recent inner stream: when the outer
//! stream yields a new inner stream, the previous one is dropped (which cancels
//! whatever it was subscribed to) and items are taken from the new one.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream, StreamExt};

/// Stream returned by [`SwitchExt::switch_latest`].
#[must_use = "streams do nothing unless polled"]
pub struct SwitchLatest<St>
where
    St: Stream,
{
    outer: Option<St>,
    inner: Option<St::Item>,
}

impl<St> SwitchLatest<St>
where
    St: Stream,
{
    /// Follow the latest inner stream of `outer`.
    pub fn new(outer: St) -> Self {
        Self {
            outer: Some(outer),
            inner: None,
        }
    }
}

impl<St> fmt::Debug for SwitchLatest<St>
where
    St: Stream,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchLatest")
            .field("outer_done", &self.outer.is_none())
            .field("has_inner", &self.inner.is_some())
            .finish()
    }
}

impl<St> Stream for SwitchLatest<St>
where
    St: Stream + Unpin,
    St::Item: Stream + Unpin,
{
    type Item = <St::Item as Stream>::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        // Drain the outer stream first so a stale inner never wins a race.
        while let Some(outer) = this.outer.as_mut() {
            match outer.poll_next_unpin(cx) {
                Poll::Ready(Some(inner)) => this.inner = Some(inner),
                Poll::Ready(None) => this.outer = None,
                Poll::Pending => break,
            }
        }

        if let Some(inner) = this.inner.as_mut() {
            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => this.inner = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.outer.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

impl<St> FusedStream for SwitchLatest<St>
where
    St: Stream + Unpin,
    St::Item: Stream + Unpin,
{
    fn is_terminated(&self) -> bool {
        self.outer.is_none() && self.inner.is_none()
    }
}

/// Adds [`switch_latest`](SwitchExt::switch_latest) to streams of streams.
pub trait SwitchExt: Stream + Sized {
    /// Flatten by following only the most recently yielded inner stream.
    fn switch_latest(self) -> SwitchLatest<Self>
    where
        Self::Item: Stream,
    {
        SwitchLatest::new(self)
    }
}

impl<St: Stream> SwitchExt for St {}
