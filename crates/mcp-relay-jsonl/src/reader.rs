//! Line-oriented JSON reading.
//!
//! [`JsonlReader`] accumulates bytes until a `\n`, strips the terminator
//! (and a preceding `\r`), and hands the line to `serde_json`. A final line
//! without a trailing newline is still returned at end of input.

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{trace, warn};

use crate::error::Result;
use crate::warning::{Warning, WarningCollector};

/// Async reader for newline-delimited JSON.
///
/// Tracks a 1-based line counter so parse failures can be reported with the
/// position of the offending line.
///
/// # Examples
///
/// ```
/// use mcp_relay_jsonl::{JsonlReader, WarningCollector};
/// use serde_json::Value;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> mcp_relay_jsonl::Result<()> {
/// let input: &[u8] = b"{\"id\":1}\nnot json\n{\"id\":2}\n";
/// let mut reader = JsonlReader::new(input);
/// let warnings = WarningCollector::new();
///
/// let first: Option<Value> = reader.next_value_resilient(&warnings).await?;
/// let second: Option<Value> = reader.next_value_resilient(&warnings).await?;
/// assert_eq!(first.unwrap()["id"], 1);
/// assert_eq!(second.unwrap()["id"], 2);
/// assert_eq!(warnings.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct JsonlReader<R> {
    /// Buffered reader wrapping the underlying async reader.
    reader: BufReader<R>,
    /// Line number of the last line read (0 before any line).
    line_number: usize,
    /// Scratch buffer reused across lines.
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> JsonlReader<R> {
    /// Creates a new `JsonlReader` wrapping the given async reader.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line_number: 0,
            line: Vec::new(),
        }
    }

    /// Returns the 1-based number of the last line read, or 0 before any.
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Reads the next line into the buffer and returns where its content
    /// ends, excluding the terminator.
    async fn fill_line(&mut self) -> Result<Option<usize>> {
        self.line.clear();
        let read = self.reader.read_until(b'\n', &mut self.line).await?;
        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;

        let mut end = self.line.len();
        if self.line[..end].ends_with(b"\n") {
            end -= 1;
            if self.line[..end].ends_with(b"\r") {
                end -= 1;
            }
        }
        Ok(Some(end))
    }

    /// Reads and parses the next valid line, skipping malformed ones.
    ///
    /// Lines that fail to parse (including invalid UTF-8) are recorded in
    /// `warnings`, logged, and dropped; reading continues with the next line.
    /// Blank lines are skipped silently.
    ///
    /// # Errors
    ///
    /// Only IO errors from the underlying reader are returned.
    pub async fn next_value_resilient<T: DeserializeOwned>(
        &mut self,
        warnings: &WarningCollector,
    ) -> Result<Option<T>> {
        loop {
            let Some(end) = self.fill_line().await? else {
                return Ok(None);
            };
            let line = &self.line[..end];
            if is_blank(line) {
                continue;
            }
            trace!(line_number = self.line_number, len = line.len(), "Parsing line");
            match serde_json::from_slice::<T>(line) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    warn!(
                        line_number = self.line_number,
                        error = %e,
                        "Dropping malformed JSON line"
                    );
                    warnings.add(Warning::MalformedJson {
                        line_number: self.line_number,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}
