//! Envelope framing over WebSocket text frames.

use crate::error::{ProtocolError, WireError};
use crate::message::Envelope;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// One inbound frame, decoded.
#[derive(Debug)]
pub enum Frame {
    Envelope(Envelope),
    /// A text or binary frame that did not parse. Carries the error so the
    /// caller can answer it; the connection stays usable.
    Invalid(ProtocolError),
    /// The peer closed the connection.
    Closed,
}

/// Serialize and send one envelope as a text frame.
pub async fn send_envelope<S>(sink: &mut S, envelope: &Envelope) -> Result<(), WireError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = envelope.to_wire()?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

/// Read the next data frame. Control frames are skipped.
pub async fn next_frame<S>(stream: &mut S) -> Result<Frame, WireError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            None => return Ok(Frame::Closed),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => {
                return Ok(match Envelope::from_wire(&text) {
                    Ok(env) => Frame::Envelope(env),
                    Err(e) => Frame::Invalid(e),
                });
            }
            Some(Ok(Message::Binary(_))) => {
                return Ok(Frame::Invalid(ProtocolError::UnsupportedFrame("binary")));
            }
            Some(Ok(Message::Close(_))) => return Ok(Frame::Closed),
            Some(Ok(other)) => {
                debug!(len = other.len(), "Skipping control frame");
            }
        }
    }
}

/// Read the next valid envelope, skipping malformed frames.
///
/// Used by client sessions waiting for a specific reply: a malformed frame is
/// logged and ignored, a closed connection is an error.
pub async fn recv_envelope<S>(stream: &mut S) -> Result<Envelope, WireError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match next_frame(stream).await? {
            Frame::Envelope(env) => return Ok(env),
            Frame::Invalid(e) => warn!("Ignoring malformed frame: {e}"),
            Frame::Closed => return Err(WireError::ConnectionClosed),
        }
    }
}
