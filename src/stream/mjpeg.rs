//! MJPEG over HTTP
//!
//! Writes a subscription as a `multipart/x-mixed-replace` body. Each frame is
//! one part and one body chunk. A session ends when the server shuts down, the
//! session deadline passes, the distributor stops or the viewer goes away. No
//! closing boundary is written.

use std::fmt;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::distributor::Subscription;

/// Default lifetime of one viewer session
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Why a viewer session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The distributor stopped and closed the subscription
    SourceClosed,
    /// Writing to the response failed
    ViewerGone,
    /// Server shutdown
    Cancelled,
    TimedOut,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SourceClosed => "stream stopped",
            Self::ViewerGone => "viewer disconnected",
            Self::Cancelled => "server shutting down",
            Self::TimedOut => "session timed out",
        };
        f.write_str(s)
    }
}

/// A fresh multipart boundary
pub fn new_boundary() -> String {
    format!("ptzframe{}", Uuid::new_v4().simple())
}

pub fn content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace; boundary={}", boundary)
}

/// Create one multipart part carrying `jpeg`
pub fn create_mjpeg_part(boundary: &str, jpeg: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(96 + boundary.len() + jpeg.len());

    buf.put_slice(b"--");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Content-Type: image/jpeg\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n", jpeg.len()).as_bytes());
    buf.put_slice(b"\r\n");

    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");

    buf.freeze()
}

/// Copy frames from `subscription` into `sink` as multipart parts
///
/// The subscription is released when this returns.
pub async fn write_mjpeg(
    mut subscription: Subscription,
    sink: mpsc::Sender<Bytes>,
    boundary: String,
    cancel: CancellationToken,
    timeout: Duration,
) -> SessionEnd {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut parts = 0u64;

    let end = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break SessionEnd::Cancelled,
            _ = &mut deadline => break SessionEnd::TimedOut,
            _ = sink.closed() => break SessionEnd::ViewerGone,
            frame = subscription.recv() => match frame {
                Some(frame) => frame,
                None => break SessionEnd::SourceClosed,
            },
        };

        // A viewer that stops reading must not hold the session past cancel or the deadline
        let part = create_mjpeg_part(&boundary, &frame);
        tokio::select! {
            _ = cancel.cancelled() => break SessionEnd::Cancelled,
            _ = &mut deadline => break SessionEnd::TimedOut,
            sent = sink.send(part) => if sent.is_err() {
                break SessionEnd::ViewerGone;
            },
        }
        parts += 1;
    };

    info!(
        camera = %subscription.camera(),
        subscriber = subscription.id(),
        parts,
        reason = %end,
        "Ending stream"
    );
    end
}

/// Streaming response for one viewer
pub fn mjpeg_response(subscription: Subscription, cancel: CancellationToken, timeout: Duration) -> Response {
    let boundary = new_boundary();
    let content_type = content_type(&boundary);

    // One part in flight; a viewer that stops reading stalls only its own session
    let (tx, mut rx) = mpsc::channel::<Bytes>(1);
    tokio::spawn(write_mjpeg(subscription, tx, boundary, cancel, timeout));

    let body_stream = async_stream::stream! {
        while let Some(part) = rx.recv().await {
            yield Ok::<Bytes, std::io::Error>(part);
        }
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate".to_string()),
            (header::PRAGMA, "no-cache".to_string()),
            (header::EXPIRES, "0".to_string()),
            (header::CONNECTION, "keep-alive".to_string()),
        ],
        Body::from_stream(body_stream),
    )
        .into_response()
}

/// Split an MJPEG body into `(content type, payload)` parts
#[cfg(test)]
pub(crate) fn parse_parts(body: &[u8], boundary: &str) -> Vec<(String, Vec<u8>)> {
    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    let marker = format!("--{}\r\n", boundary);
    let mut parts = Vec::new();
    let mut pos = 0;

    while let Some(start) = find(&body[pos..], marker.as_bytes()) {
        let header_start = pos + start + marker.len();
        let Some(header_len) = find(&body[header_start..], b"\r\n\r\n") else {
            break;
        };
        let headers = std::str::from_utf8(&body[header_start..header_start + header_len]).unwrap();

        let mut part_type = String::new();
        let mut length = 0usize;
        for line in headers.split("\r\n") {
            if let Some(value) = line.strip_prefix("Content-Type: ") {
                part_type = value.to_string();
            } else if let Some(value) = line.strip_prefix("Content-Length: ") {
                length = value.parse().unwrap();
            }
        }

        let data_start = header_start + header_len + 4;
        let data_end = data_start + length;
        if data_end + 2 > body.len() {
            break;
        }
        assert_eq!(&body[data_end..data_end + 2], b"\r\n");
        parts.push((part_type, body[data_start..data_end].to_vec()));
        pos = data_end + 2;
    }

    parts
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::camera::testing::FakeCamera;
    use crate::stream::distributor::{Distributor, DistributorConfig};

    async fn subscription(camera: &Arc<FakeCamera>) -> Subscription {
        let distributor = Distributor::start(camera.clone(), DistributorConfig::default(), None)
            .await
            .unwrap();
        distributor.subscribe().unwrap()
    }

    async fn finish(handle: tokio::task::JoinHandle<SessionEnd>) -> SessionEnd {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("session did not end")
            .unwrap()
    }

    #[test]
    fn test_part_layout() {
        let part = create_mjpeg_part("b0", b"\xFF\xD8abc\xFF\xD9");
        assert_eq!(
            &part[..],
            b"--b0\r\nContent-Type: image/jpeg\r\nContent-Length: 7\r\n\r\n\xFF\xD8abc\xFF\xD9\r\n"
        );
    }

    #[test]
    fn test_boundaries_are_unique() {
        let a = new_boundary();
        assert_ne!(a, new_boundary());
        assert_eq!(content_type(&a), format!("multipart/x-mixed-replace; boundary={}", a));
    }

    #[tokio::test]
    async fn test_frames_written_until_source_closes() {
        let camera = Arc::new(FakeCamera::new("cam").jpeg_native());
        let sub = subscription(&camera).await;
        let (tx, mut rx) = mpsc::channel(8);
        let session = tokio::spawn(write_mjpeg(
            sub,
            tx,
            "b".into(),
            CancellationToken::new(),
            DEFAULT_SESSION_TIMEOUT,
        ));

        let mut body = Vec::new();
        for i in 0..3u8 {
            assert!(camera.push_jpeg(Bytes::from(vec![i; 4])).await);
            body.extend_from_slice(&rx.recv().await.unwrap());
        }
        camera.close();

        assert_eq!(finish(session).await, SessionEnd::SourceClosed);
        assert!(rx.recv().await.is_none());

        let parts = parse_parts(&body, "b");
        assert_eq!(parts.len(), 3);
        for (i, (part_type, data)) in parts.iter().enumerate() {
            assert_eq!(part_type, "image/jpeg");
            assert_eq!(data, &vec![i as u8; 4]);
        }
    }

    #[tokio::test]
    async fn test_viewer_gone_releases_subscription() {
        let camera = Arc::new(FakeCamera::new("cam").jpeg_native());
        let sub = subscription(&camera).await;
        let distributor = sub.distributor().clone();
        let (tx, rx) = mpsc::channel(1);
        let session = tokio::spawn(write_mjpeg(
            sub,
            tx,
            "b".into(),
            CancellationToken::new(),
            DEFAULT_SESSION_TIMEOUT,
        ));

        drop(rx);
        assert_eq!(finish(session).await, SessionEnd::ViewerGone);
        assert_eq!(distributor.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_ends_session() {
        let camera = Arc::new(FakeCamera::new("cam").jpeg_native());
        let sub = subscription(&camera).await;
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let session = tokio::spawn(write_mjpeg(sub, tx, "b".into(), cancel.clone(), DEFAULT_SESSION_TIMEOUT));

        cancel.cancel();
        assert_eq!(finish(session).await, SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_deadline_ends_session() {
        let camera = Arc::new(FakeCamera::new("cam").jpeg_native());
        let sub = subscription(&camera).await;
        let (tx, _rx) = mpsc::channel(1);
        let session = tokio::spawn(write_mjpeg(
            sub,
            tx,
            "b".into(),
            CancellationToken::new(),
            Duration::from_millis(30),
        ));

        assert_eq!(finish(session).await, SessionEnd::TimedOut);
    }

    /// Fills the one-part sink so the session is parked inside a send
    async fn stalled_session(
        camera: &Arc<FakeCamera>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> (tokio::task::JoinHandle<SessionEnd>, Arc<Distributor>, mpsc::Receiver<Bytes>) {
        let sub = subscription(camera).await;
        let distributor = sub.distributor().clone();
        let (tx, rx) = mpsc::channel(1);
        let session = tokio::spawn(write_mjpeg(sub, tx, "b".into(), cancel, timeout));

        for i in 0..3u8 {
            assert!(camera.push_jpeg(Bytes::from(vec![i; 4])).await);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        (session, distributor, rx)
    }

    #[tokio::test]
    async fn test_unread_viewer_ends_on_cancel() {
        let camera = Arc::new(FakeCamera::new("cam").jpeg_native());
        let cancel = CancellationToken::new();
        let (session, distributor, _rx) =
            stalled_session(&camera, cancel.clone(), DEFAULT_SESSION_TIMEOUT).await;
        assert!(!session.is_finished());

        cancel.cancel();
        assert_eq!(finish(session).await, SessionEnd::Cancelled);
        assert_eq!(distributor.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unread_viewer_ends_on_deadline() {
        let camera = Arc::new(FakeCamera::new("cam").jpeg_native());
        let (session, distributor, _rx) =
            stalled_session(&camera, CancellationToken::new(), Duration::from_millis(100)).await;

        assert_eq!(finish(session).await, SessionEnd::TimedOut);
        assert_eq!(distributor.subscriber_count(), 0);
    }
}
