//! Model persistence: named per-stage records over an optional stream.
//!
//! A stack persists as sequential records in stack order, outermost stage
//! first. Each record is self-describing (it embeds its stage name) and
//! comes in two encodings selected at stream construction:
//!
//! - binary: `u32` little-endian length prefix + postcard payload
//! - text: one JSON object per line
//!
//! An absent stream is a legal state and every operation on it is a no-op;
//! the chain checks [`ModelIo::is_absent`] before touching any stage.

mod schema;

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use schema::{OffsetTreeRecord, SgdRecord, WeightBlockRecord};

/// Errors from persisting or restoring a stack.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(postcard::Error),

    #[error("decoding error: {0}")]
    Decode(postcard::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record mismatch: expected stage {expected:?}, found {found:?}")]
    StageMismatch { expected: String, found: String },

    #[error("model stream truncated")]
    Truncated,

    #[error("no backing stream to read from")]
    AbsentStream,

    #[error("corrupt model record: {0}")]
    Corrupt(String),
}

/// Framed record: stage name plus its payload.
#[derive(Debug, Serialize, Deserialize)]
struct Record<T> {
    stage: String,
    payload: T,
}

enum Stream<'a> {
    Reader(&'a mut dyn Read),
    Writer(&'a mut dyn Write),
}

/// Optional persistence stream handed down the stage chain.
pub struct ModelIo<'a> {
    stream: Option<Stream<'a>>,
    text: bool,
}

impl<'a> ModelIo<'a> {
    /// No backing stream; every operation is a no-op.
    pub fn absent() -> Self {
        Self {
            stream: None,
            text: false,
        }
    }

    /// Restore from `reader`; `text` selects the JSON-lines encoding.
    pub fn reader(reader: &'a mut dyn Read, text: bool) -> Self {
        Self {
            stream: Some(Stream::Reader(reader)),
            text,
        }
    }

    /// Persist into `writer`; `text` selects the JSON-lines encoding.
    pub fn writer(writer: &'a mut dyn Write, text: bool) -> Self {
        Self {
            stream: Some(Stream::Writer(writer)),
            text,
        }
    }

    /// Whether there is no backing stream.
    #[inline]
    pub fn is_absent(&self) -> bool {
        self.stream.is_none()
    }

    /// Whether this stream restores state (as opposed to persisting it).
    #[inline]
    pub fn is_reading(&self) -> bool {
        matches!(self.stream, Some(Stream::Reader(_)))
    }

    /// Whether the text encoding is in effect.
    #[inline]
    pub fn is_text(&self) -> bool {
        self.text
    }

    /// Write one named record. No-op without a stream.
    pub fn write_record<T: Serialize>(&mut self, stage: &str, payload: &T) -> Result<(), PersistError> {
        let text = self.text;
        let writer = match &mut self.stream {
            Some(Stream::Writer(w)) => w,
            Some(Stream::Reader(_)) => {
                return Err(PersistError::Corrupt(format!(
                    "attempted to write record {stage:?} to a read stream"
                )))
            }
            None => return Ok(()),
        };

        let record = Record {
            stage: stage.to_owned(),
            payload,
        };
        if text {
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');
            writer.write_all(line.as_bytes())?;
        } else {
            let bytes = postcard::to_allocvec(&record).map_err(PersistError::Encode)?;
            let len = u32::try_from(bytes.len())
                .map_err(|_| PersistError::Corrupt(format!("record {stage:?} exceeds 4 GiB")))?;
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Read one named record, verifying the stage name.
    pub fn read_record<T: DeserializeOwned>(&mut self, stage: &str) -> Result<T, PersistError> {
        let text = self.text;
        let reader = match &mut self.stream {
            Some(Stream::Reader(r)) => r,
            Some(Stream::Writer(_)) => {
                return Err(PersistError::Corrupt(format!(
                    "attempted to read record {stage:?} from a write stream"
                )))
            }
            None => return Err(PersistError::AbsentStream),
        };

        let record: Record<T> = if text {
            let line = read_line(&mut **reader)?;
            serde_json::from_slice(&line)?
        } else {
            let mut len_bytes = [0u8; 4];
            reader
                .read_exact(&mut len_bytes)
                .map_err(map_truncated)?;
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut bytes = vec![0u8; len];
            reader.read_exact(&mut bytes).map_err(map_truncated)?;
            postcard::from_bytes(&bytes).map_err(PersistError::Decode)?
        };

        if record.stage != stage {
            return Err(PersistError::StageMismatch {
                expected: stage.to_owned(),
                found: record.stage,
            });
        }
        Ok(record.payload)
    }
}

fn map_truncated(err: std::io::Error) -> PersistError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        PersistError::Truncated
    } else {
        PersistError::Io(err)
    }
}

/// Read bytes up to (and excluding) the next newline.
fn read_line(reader: &mut dyn Read) -> Result<Vec<u8>, PersistError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read_exact(&mut byte) {
            Ok(()) => {
                if byte[0] == b'\n' {
                    return Ok(line);
                }
                line.push(byte[0]);
            }
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                if line.is_empty() {
                    return Err(PersistError::Truncated);
                }
                return Ok(line);
            }
            Err(err) => return Err(err.into()),
        }
    }
}
