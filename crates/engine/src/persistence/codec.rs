use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::entity::EntityId;

const MAX_ENCODED_INT_BYTES: usize = 5;

/// Largest span, either sign, a persisted record may carry. Anything wider
/// cannot be added to a timestamp without leaving chrono's range.
pub const MAX_TIME_SPAN: TimeDelta = TimeDelta::days(365_250);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected end of data at offset {offset}: {needed} more bytes required")]
    Truncated { offset: usize, needed: usize },
    #[error("invalid {what} at offset {offset}")]
    Invalid { offset: usize, what: &'static str },
}

/// Append-only little-endian byte sink for persisted records.
#[derive(Debug, Default)]
pub struct RecordWriter {
    bytes: Vec<u8>,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.bytes.push(u8::from(value));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Seven bits per byte, low group first; the high bit marks continuation.
    pub fn write_encoded_int(&mut self, value: u32) {
        let mut remaining = value;
        while remaining >= 0x80 {
            self.bytes.push((remaining as u8) | 0x80);
            remaining >>= 7;
        }
        self.bytes.push(remaining as u8);
    }

    pub fn write_string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        self.write_encoded_int(bytes.len() as u32);
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_entity(&mut self, id: EntityId) {
        self.bytes.extend_from_slice(&id.0.to_le_bytes());
    }

    pub fn write_datetime(&mut self, value: DateTime<Utc>) {
        self.write_i64(value.timestamp_millis());
    }

    pub fn write_opt_datetime(&mut self, value: Option<DateTime<Utc>>) {
        self.write_bool(value.is_some());
        if let Some(value) = value {
            self.write_datetime(value);
        }
    }

    pub fn write_time_delta(&mut self, value: TimeDelta) {
        self.write_i64(value.num_milliseconds());
    }

    pub fn write_opt_time_delta(&mut self, value: Option<TimeDelta>) {
        self.write_bool(value.is_some());
        if let Some(value) = value {
            self.write_time_delta(value);
        }
    }
}

#[derive(Debug)]
pub struct RecordReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.cursor)
    }

    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.cursor.saturating_add(len);
        if end > self.bytes.len() {
            return Err(CodecError::Truncated {
                offset: self.cursor,
                needed: end - self.bytes.len(),
            });
        }
        let out = &self.bytes[self.cursor..end];
        self.cursor = end;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let offset = self.cursor;
        self.read_exact(1)?
            .first()
            .copied()
            .ok_or(CodecError::Invalid { offset, what: "u8" })
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        let offset = self.cursor;
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CodecError::Invalid {
                offset,
                what: "bool",
            }),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let offset = self.cursor;
        Ok(i32::from_le_bytes(self.read_exact(4)?.try_into().map_err(
            |_| CodecError::Invalid {
                offset,
                what: "i32 encoding",
            },
        )?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        let offset = self.cursor;
        Ok(i64::from_le_bytes(self.read_exact(8)?.try_into().map_err(
            |_| CodecError::Invalid {
                offset,
                what: "i64 encoding",
            },
        )?))
    }

    pub fn read_encoded_int(&mut self) -> Result<u32, CodecError> {
        let offset = self.cursor;
        let mut value = 0u32;
        for index in 0..MAX_ENCODED_INT_BYTES {
            let byte = self.read_u8()?;
            let group = u32::from(byte & 0x7f);
            if index == MAX_ENCODED_INT_BYTES - 1 && group > 0x0f {
                break;
            }
            value |= group << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::Invalid {
            offset,
            what: "encoded int",
        })
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_encoded_int()? as usize;
        let offset = self.cursor;
        let raw = self.read_exact(len)?;
        std::str::from_utf8(raw)
            .map(ToString::to_string)
            .map_err(|_| CodecError::Invalid {
                offset,
                what: "utf-8 string",
            })
    }

    pub fn read_entity(&mut self) -> Result<EntityId, CodecError> {
        let offset = self.cursor;
        Ok(EntityId(u64::from_le_bytes(
            self.read_exact(8)?
                .try_into()
                .map_err(|_| CodecError::Invalid {
                    offset,
                    what: "entity reference",
                })?,
        )))
    }

    pub fn read_datetime(&mut self) -> Result<DateTime<Utc>, CodecError> {
        let offset = self.cursor;
        let millis = self.read_i64()?;
        DateTime::from_timestamp_millis(millis).ok_or(CodecError::Invalid {
            offset,
            what: "timestamp",
        })
    }

    pub fn read_opt_datetime(&mut self) -> Result<Option<DateTime<Utc>>, CodecError> {
        if self.read_bool()? {
            self.read_datetime().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn read_time_delta(&mut self) -> Result<TimeDelta, CodecError> {
        let offset = self.cursor;
        let millis = self.read_i64()?;
        TimeDelta::try_milliseconds(millis)
            .filter(|span| span.abs() <= MAX_TIME_SPAN)
            .ok_or(CodecError::Invalid {
                offset,
                what: "time span",
            })
    }

    pub fn read_opt_time_delta(&mut self) -> Result<Option<TimeDelta>, CodecError> {
        if self.read_bool()? {
            self.read_time_delta().map(Some)
        } else {
            Ok(None)
        }
    }
}
