//! Message framing over a byte stream.
//!
//! A stream is split once: the write half lives in a [`Connection`] shared by
//! everyone who sends, the read half in a [`MessageReader`] owned by the one
//! task that reads.

use std::io;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use nettables_core::{Entry, EntryId, EntryType, TypeManager};
use nettables_store::EntrySink;

use crate::error::{Result, SyncError};
use crate::messages::{decode, Message};
use crate::transport::BoxedStream;

const READ_CHUNK: usize = 4096;

/// Buffered, message-oriented write side of a stream.
pub struct Connection {
    writer: Mutex<BufWriter<WriteHalf<BoxedStream>>>,
}

impl Connection {
    /// Split `stream` into a shared writer and a reader.
    pub fn open(stream: BoxedStream, types: TypeManager) -> (Self, MessageReader) {
        let (read, write) = tokio::io::split(stream);
        (
            Self {
                writer: Mutex::new(BufWriter::new(write)),
            },
            MessageReader {
                reader: read,
                buf: BytesMut::with_capacity(READ_CHUNK),
                types,
            },
        )
    }

    /// Buffer one message. Nothing reaches the peer until [`flush`](Self::flush).
    pub async fn send(&self, message: &Message) -> Result<()> {
        let mut out = BytesMut::new();
        message.encode(&mut out)?;
        self.writer.lock().await.write_all(&out).await?;
        Ok(())
    }

    pub async fn flush(&self) -> io::Result<()> {
        self.writer.lock().await.flush().await
    }

    /// Send one message and flush.
    pub async fn send_now(&self, message: &Message) -> Result<()> {
        self.send(message).await?;
        self.flush().await?;
        Ok(())
    }

    /// Close the write side. Errors are ignored; the peer may already be gone.
    pub async fn shutdown(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

fn to_io(e: SyncError) -> io::Error {
    match e {
        SyncError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

#[async_trait]
impl EntrySink for Connection {
    async fn send_entry_assignment(&self, entry: &Entry) -> io::Result<()> {
        self.send(&Message::assignment(entry)).await.map_err(to_io)
    }

    async fn send_entry_update(&self, entry: &Entry) -> io::Result<()> {
        self.send(&Message::update(entry)).await.map_err(to_io)
    }

    async fn flush(&self) -> io::Result<()> {
        Connection::flush(self).await
    }
}

/// Read side of a stream, yielding whole messages.
pub struct MessageReader {
    reader: ReadHalf<BoxedStream>,
    buf: BytesMut,
    types: TypeManager,
}

impl MessageReader {
    /// Wait for the next message.
    ///
    /// `Ok(None)` means the peer closed the stream between messages; a close
    /// in the middle of a message is an I/O error.
    pub async fn next(
        &mut self,
        entry_type: &(dyn Fn(EntryId) -> Option<EntryType> + Send + Sync),
    ) -> Result<Option<Message>> {
        loop {
            if let Some((message, used)) = decode(&self.buf, &self.types, entry_type)? {
                self.buf.advance(used);
                return Ok(Some(message));
            }
            self.buf.reserve(READ_CHUNK);
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(SyncError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed mid-message",
                )));
            }
        }
    }
}

impl std::fmt::Debug for MessageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReader")
            .field("buffered", &self.buf.len())
            .finish_non_exhaustive()
    }
}
