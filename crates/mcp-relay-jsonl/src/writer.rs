//! Line-oriented JSON writing.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::error::Result;

/// Async writer for newline-delimited JSON.
///
/// Each value is serialized as compact JSON followed by a single `\n`.
/// Compact `serde_json` output escapes control characters inside strings, so
/// a serialized value never contains a raw newline and always occupies
/// exactly one line.
pub struct JsonlWriter<W> {
    /// Buffered writer wrapping the underlying async writer.
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> JsonlWriter<W> {
    /// Creates a new `JsonlWriter` wrapping the given async writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Serializes `value` as one line into the buffer.
    ///
    /// The line is not guaranteed to reach the underlying writer until
    /// [`flush`](Self::flush) is called.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        Ok(())
    }

    /// Writes `value` as one line and flushes immediately.
    ///
    /// Interactive peers (a child process, a parent reading our stdout) see
    /// the line as soon as this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, the write, or the flush fails.
    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.write(value).await?;
        self.flush().await
    }

    /// Flushes buffered lines to the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Consumes the writer, returning the underlying buffered writer.
    ///
    /// This does not flush. Call [`flush`](Self::flush) first.
    #[must_use]
    pub fn into_inner(self) -> BufWriter<W> {
        self.writer
    }
}
