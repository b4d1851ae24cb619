//! TCP protocol between a pose provider and a rep worker.
//!
//! The worker connects, sends `Subscribe`, waits for `Ready`, then receives
//! `Frame`s until `EndOfStream` or the connection closes.

use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::pose::PoseFrame;
use crate::session::ExerciseKind;

// --- Message types ---

/// Worker → provider
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Subscribe { exercise: ExerciseKind },
}

/// Provider → worker
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ProviderMessage {
    Ready,
    Frame(PoseFrame),
    EndOfStream,
}

// --- TCP codec helpers ---

pub type MessageStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Create a framed message stream with length-delimited framing.
pub fn message_stream(stream: TcpStream) -> MessageStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(1024 * 1024) // 1MB, a pose frame is a few hundred bytes
        .new_codec();
    Framed::new(stream, codec)
}

/// Send a serializable message (bincode + length prefix).
pub async fn send_message<T: Serialize>(
    stream: &mut MessageStream,
    msg: &T,
) -> anyhow::Result<()> {
    send_to_sink(stream, msg).await
}

/// Send on any byte sink (e.g. the write half of a split stream).
pub async fn send_to_sink<S, T>(sink: &mut S, msg: &T) -> anyhow::Result<()>
where
    S: Sink<Bytes> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    T: Serialize,
{
    let data = bincode::serialize(msg)?;
    sink.send(Bytes::from(data)).await?;
    Ok(())
}

/// Receive and deserialize a message.
pub async fn recv_message<T: DeserializeOwned>(
    stream: &mut MessageStream,
) -> anyhow::Result<T> {
    match stream.next().await {
        Some(Ok(bytes)) => Ok(bincode::deserialize(&bytes)?),
        Some(Err(e)) => Err(e.into()),
        None => Err(anyhow::anyhow!("connection closed")),
    }
}
