//! Slow-drip response for routes nobody should be asking for
//!
//! The response claims a large `Content-Length` and then trickles one tiny
//! chunk per interval forever. Hyper flushes every frame, so a scanner sees
//! steady progress and keeps waiting. The body only goes away when the peer
//! disconnects.

use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::info;

/// Declared (never delivered) body size: 640 KiB
pub const TARPIT_CONTENT_LENGTH: u64 = 640 * 1024;

const TARPIT_CHUNK: &[u8] = b"\n";

/// A body that yields [`TARPIT_CHUNK`] every `period` and never ends
pub struct TarpitBody {
    interval: Interval,
    peer: SocketAddr,
    started: Instant,
    sent: u64,
}

impl TarpitBody {
    pub fn new(period: Duration, peer: SocketAddr) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            peer,
            started: Instant::now(),
            sent: 0,
        }
    }
}

impl Body for TarpitBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        ready!(self.interval.poll_tick(cx));
        self.sent += TARPIT_CHUNK.len() as u64;
        Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(TARPIT_CHUNK)))))
    }

    fn is_end_stream(&self) -> bool {
        false
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

impl Drop for TarpitBody {
    fn drop(&mut self) {
        info!(
            remote_addr = %self.peer,
            held = ?self.started.elapsed(),
            bytes = self.sent,
            "Tarpit released"
        );
    }
}

/// Build the 404 tarpit response for `peer`
pub fn tarpit_response(period: Duration, peer: SocketAddr) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .header(CONTENT_LENGTH, TARPIT_CONTENT_LENGTH)
        .body(
            TarpitBody::new(period, peer)
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("valid response with StatusCode enum and static headers")
}
