//! Browser facing side of the daemon. The browser starts the host and exchanges JSON messages
//! with it over stdin and stdout, each prefixed by its length as a native endian `u32`.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
};
use tokio_util::{
    bytes::Bytes,
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

use codec::{Incoming, NativeMessagingCodec};
use messages::{HostReply, HostRequest};

use super::processing::TrackerHandle;

pub mod codec;
pub mod messages;

/// Largest request the host reads. Browsers allow up to 64 MiB towards a host, but every request
/// of the extension is a small JSON object.
pub const MAX_REQUEST_LENGTH: usize = 4 * 1024 * 1024;

/// Browsers reject a single message above 1 MB coming from the host.
pub const MAX_REPLY_LENGTH: usize = 1024 * 1024;

pub fn native_messaging_codec() -> NativeMessagingCodec {
    NativeMessagingCodec::new(MAX_REQUEST_LENGTH)
}

fn parse_request(frame: &[u8]) -> Result<HostRequest> {
    serde_json::from_slice(frame).context("Malformed message")
}

fn encode_reply(reply: &HostReply) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(reply)?;
    if payload.len() <= MAX_REPLY_LENGTH {
        return Ok(payload);
    }
    warn!("Reply of {} bytes is too large for the browser", payload.len());
    Ok(serde_json::to_vec(&HostReply::failure(format!(
        "Reply of {} bytes exceeds the {MAX_REPLY_LENGTH} byte limit",
        payload.len()
    )))?)
}

/// Answers messages from `reader` on `writer` until the browser disconnects or `shutdown` is
/// triggered. Leaving for any reason cancels `shutdown`, because without the browser there is
/// nothing left to track.
pub async fn serve_host(
    reader: impl AsyncRead + Unpin,
    writer: impl AsyncWrite + Unpin,
    tracker: TrackerHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    let _stop_on_exit = shutdown.clone().drop_guard();
    let mut requests = FramedRead::new(reader, native_messaging_codec());
    let mut replies = FramedWrite::new(writer, native_messaging_codec());

    loop {
        let frame = select! {
            _ = shutdown.cancelled() => break,
            frame = requests.next() => frame,
        };
        let Some(frame) = frame else {
            info!("Browser closed the connection");
            break;
        };
        let frame = frame.context("Failed to read message from the browser")?;

        let reply = match frame {
            Incoming::Message(body) => match parse_request(&body) {
                Ok(request) => {
                    debug!("Received {}", request.kind());
                    HostReply::from(tracker.request(request).await)
                }
                Err(e) => {
                    warn!("Rejected message {e:?}");
                    HostReply::failure(format!("{e:#}"))
                }
            },
            Incoming::Oversized(length) => {
                warn!("Skipping a message of {length} bytes");
                HostReply::failure(format!(
                    "Message of {length} bytes exceeds the {MAX_REQUEST_LENGTH} byte limit"
                ))
            }
        };

        let payload = encode_reply(&reply)?;
        replies
            .send(Bytes::from(payload))
            .await
            .context("Failed to reply to the browser")?;
    }
    Ok(())
}
