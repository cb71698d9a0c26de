//! Networking primitives.
//!
//! Every message in either direction is one frame: a big-endian `u32` length
//! followed by that many bytes of JSON. A connection is split into a
//! [`FrameReader`] and a [`FrameWriter`] so the inbound and outbound sides can
//! run on separate tasks.
//!
//! Server -> client messages are untagged on the wire: replies carry a
//! `status` field, transform updates do not.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

use crate::{
    command::ValidationError,
    math::{Quat, Vec3},
};

/// Stable identity of a body: its index in the world's creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u64);

impl BodyId {
    pub fn from_index(index: usize) -> Self {
        BodyId(index as u64)
    }

    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One body's pose, sent once per body per broadcast cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformUpdate {
    pub id: BodyId,
    pub position: Vec3,
    #[serde(rename = "quaternion")]
    pub orientation: Quat,
}

/// Direct answer to a client command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    CylinderCreated { id: BodyId },
    Error { error: String, message: String },
}

impl Reply {
    pub fn rejected(err: &ValidationError) -> Self {
        Reply::Error {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Anything the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMsg {
    Reply(Reply),
    Transform(TransformUpdate),
}

/// Failures of the framed transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport io: {0}")]
    Io(#[from] io::Error),
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("connection closed")]
    Closed,
}

/// Reading side of a framed connection.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self { inner, max_len }
    }

    /// Reads the next frame. `Ok(None)` means the peer closed cleanly between
    /// frames.
    pub async fn recv_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            match self.inner.read(&mut len_buf[filled..]).await? {
                0 if filled == 0 => return Ok(None),
                0 => {
                    return Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream ended after {filled} of 4 length bytes"),
                    )))
                }
                n => filled += n,
            }
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_len {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_len,
            });
        }

        let mut payload = BytesMut::zeroed(len);
        self.inner.read_exact(&mut payload).await?;
        Ok(Some(payload.freeze()))
    }

    /// Reads and decodes the next frame.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        match self.recv_frame().await? {
            Some(frame) => serde_json::from_slice(&frame)
                .map(Some)
                .map_err(TransportError::Decode),
            None => Ok(None),
        }
    }
}

/// Writing side of a framed connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        let frame = encode_frame(msg)?;
        self.inner.write_all(&frame).await?;
        Ok(())
    }

    /// Flushes and closes the write direction.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Splits a TCP stream into framed halves.
pub fn split_stream(
    stream: TcpStream,
    max_frame_len: usize,
) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (rd, wr) = stream.into_split();
    (FrameReader::new(rd, max_frame_len), FrameWriter::new(wr))
}

/// Serializes a message into a complete length-prefixed frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Bytes, TransportError> {
    let payload = serde_json::to_vec(msg).map_err(TransportError::Encode)?;
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(len);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CreateCylinder};

    #[test]
    fn created_reply_wire_shape() {
        let reply = ServerMsg::Reply(Reply::CylinderCreated { id: BodyId(0) });
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"status":"cylinder_created","id":0}"#
        );
    }

    #[test]
    fn transform_wire_shape() {
        let update = ServerMsg::Transform(TransformUpdate {
            id: BodyId(3),
            position: Vec3::new(1.0, 2.0, 3.0),
            orientation: Quat::IDENTITY,
        });
        let json: serde_json::Value = serde_json::to_value(&update).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["position"]["z"], 3.0);
        assert_eq!(json["quaternion"]["w"], 1.0);
        assert!(json.get("status").is_none());
    }

    #[test]
    fn server_messages_decode_by_shape() {
        let reply: ServerMsg =
            serde_json::from_str(r#"{"status":"cylinder_created","id":7}"#).unwrap();
        assert_eq!(reply, ServerMsg::Reply(Reply::CylinderCreated { id: BodyId(7) }));

        let update: ServerMsg = serde_json::from_str(
            r#"{"id":1,"position":{"x":0,"y":0,"z":1},"quaternion":{"x":0,"y":0,"z":0,"w":1}}"#,
        )
        .unwrap();
        assert!(matches!(update, ServerMsg::Transform(t) if t.id == BodyId(1)));
    }

    #[test]
    fn rejection_carries_kind() {
        let reply = Reply::rejected(&ValidationError::UnknownCommand("mesh".into()));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "unknown_command");
    }

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b, 1024);

        let cmd = Command::CreateCylinder(CreateCylinder {
            radius_top: 1.0,
            radius_bottom: 1.0,
            height: 2.0,
            position: Vec3::new(0.0, 0.0, 5.0),
            rotation_euler: Vec3::ZERO,
        });
        writer.send(&cmd).await.unwrap();
        writer.send(&Command::Disconnect).await.unwrap();
        drop(writer);

        assert_eq!(reader.recv::<Command>().await.unwrap(), Some(cmd));
        assert_eq!(
            reader.recv::<Command>().await.unwrap(),
            Some(Command::Disconnect)
        );
        assert!(reader.recv_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(b, 16);
        a.write_all(&1000u32.to_be_bytes()).await.unwrap();

        let err = reader.recv_frame().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::FrameTooLarge { len: 1000, max: 16 }
        ));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_io_error() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(b, 64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        assert!(matches!(
            reader.recv_frame().await.unwrap_err(),
            TransportError::Io(_)
        ));
    }

    #[tokio::test]
    async fn truncated_length_header_is_an_io_error() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(b, 64);
        a.write_all(&[0, 0]).await.unwrap();
        drop(a);

        match reader.recv_frame().await {
            Err(TransportError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn header_split_across_writes_still_reads() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(b, 64);
        let frame = encode_frame(&Command::Disconnect).unwrap();

        let task = tokio::spawn(async move {
            a.write_all(&frame[..1]).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            a.write_all(&frame[1..]).await.unwrap();
            a
        });
        assert_eq!(
            reader.recv::<Command>().await.unwrap(),
            Some(Command::Disconnect)
        );
        drop(task.await.unwrap());
        assert!(reader.recv_frame().await.unwrap().is_none());
    }
}
