//! A small tagged framing used to script server responses in tests.
//!
//! Server to client:
//! - `T`: row description. `u16` column count, then per column a `u32` type id, a `u32`
//!   declared size (`0` for variable-size values) and a nul-terminated label.
//! - `D`: data row. One value per column: exactly `declared size` bytes, or an `i32` length
//!   (`-1` for null) followed by the payload.
//! - `E`: error. A nul-terminated message, followed by `Z`.
//! - `Z`: end of the statement.
//!
//! Client to server: `Q` (simple), `P` (parameterized) and `B` (batched) carry the statement
//! text; `X` terminates the session.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{Continuation, Execution, WireCodec};
use crate::connection::vendor::SqlVendor;
use crate::error::{ErrorKind, WireResult};
use crate::stream::reservation::StreamReservation;
use crate::test_utils::stream::RecordingStream;
use crate::types::{
    ColumnMetadata, ColumnSet, ResultHeader, Statement, StatementKind, ValueLength,
};
use crate::{bail, wire_error};

pub const TYPE_INT64: u32 = 20;
pub const TYPE_INT32: u32 = 23;
pub const TYPE_TEXT: u32 = 25;
pub const TYPE_BYTES: u32 = 17;

pub fn int64_column(label: &str) -> ColumnMetadata {
    ColumnMetadata::new(label, TYPE_INT64, Some(8))
}

pub fn int32_column(label: &str) -> ColumnMetadata {
    ColumnMetadata::new(label, TYPE_INT32, Some(4))
}

pub fn text_column(label: &str) -> ColumnMetadata {
    ColumnMetadata::new(label, TYPE_TEXT, None)
}

pub fn bytes_column(label: &str) -> ColumnMetadata {
    ColumnMetadata::new(label, TYPE_BYTES, None)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedValue {
    Null,
    Int64(i64),
    Int32(i32),
    Text(String),
    Bytes(Bytes),
}

/// Everything the codec was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecEvent {
    Startup,
    Executed(StatementKind),
    ValueLength { label: String },
    Decoded { label: String },
    RawRead { bytes: usize },
    Skipped { bytes: u64 },
    Terminated,
}

#[derive(Debug, Clone, Default)]
pub struct CodecEvents(Arc<Mutex<Vec<CodecEvent>>>);

impl CodecEvents {
    fn push(&self, event: CodecEvent) {
        self.0.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<CodecEvent> {
        self.0.lock().unwrap().clone()
    }

    /// Execution strategies used so far.
    pub fn strategies(&self) -> Vec<StatementKind> {
        self.snapshot()
            .into_iter()
            .filter_map(|event| match event {
                CodecEvent::Executed(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    /// Labels of the columns decoded as whole values.
    pub fn decoded(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|event| match event {
                CodecEvent::Decoded { label } => Some(label),
                _ => None,
            })
            .collect()
    }
}

/// [`WireCodec`] speaking the scripted framing over any byte stream.
pub struct ScriptedCodec<S = RecordingStream> {
    vendor: SqlVendor,
    events: CodecEvents,
    _stream: PhantomData<fn() -> S>,
}

impl<S> ScriptedCodec<S> {
    pub fn new() -> Self {
        Self {
            vendor: SqlVendor,
            events: CodecEvents::default(),
            _stream: PhantomData,
        }
    }

    pub fn events(&self) -> CodecEvents {
        self.events.clone()
    }
}

impl<S> Default for ScriptedCodec<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for ScriptedCodec<S> {
    fn clone(&self) -> Self {
        Self {
            vendor: self.vendor,
            events: self.events.clone(),
            _stream: PhantomData,
        }
    }
}

impl<S> ScriptedCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(
        &self,
        rsv: &mut StreamReservation<S>,
        kind: StatementKind,
        statement: &Statement,
    ) -> WireResult<Execution<ScriptedContinuation>> {
        let (tag, count) = match kind {
            StatementKind::Simple => (b'Q', 0),
            StatementKind::Parameterized => (b'P', statement.parameters().len()),
            StatementKind::Batched => (b'B', statement.batches().len()),
        };

        let mut frame = BytesMut::new();
        frame.put_u8(tag);
        frame.put_slice(statement.text().as_bytes());
        frame.put_u8(0);
        frame.put_u16(count as u16);
        rsv.stream().write_all(&frame).await?;
        rsv.stream().flush().await?;
        self.events.push(CodecEvent::Executed(kind));

        let mut continuation = ScriptedContinuation::default();
        match continuation.advance(rsv).await? {
            Some(header) => Ok(Execution {
                first: Some(header),
                continuation: Some(continuation),
            }),
            None => Ok(Execution::empty()),
        }
    }
}

impl<S> WireCodec for ScriptedCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Stream = S;
    type Value = ScriptedValue;
    type Continuation = ScriptedContinuation;
    type Vendor = SqlVendor;

    fn vendor(&self) -> &SqlVendor {
        &self.vendor
    }

    async fn execute_simple(
        &self,
        rsv: &mut StreamReservation<S>,
        statement: &Statement,
    ) -> WireResult<Execution<ScriptedContinuation>> {
        self.send(rsv, StatementKind::Simple, statement).await
    }

    async fn execute_parameterized(
        &self,
        rsv: &mut StreamReservation<S>,
        statement: &Statement,
    ) -> WireResult<Execution<ScriptedContinuation>> {
        self.send(rsv, StatementKind::Parameterized, statement).await
    }

    async fn execute_batched(
        &self,
        rsv: &mut StreamReservation<S>,
        statement: &Statement,
    ) -> WireResult<Execution<ScriptedContinuation>> {
        self.send(rsv, StatementKind::Batched, statement).await
    }

    async fn read_value_length(
        &self,
        rsv: &mut StreamReservation<S>,
        column: &ColumnMetadata,
    ) -> WireResult<ValueLength> {
        self.events.push(CodecEvent::ValueLength {
            label: column.label.clone(),
        });

        if let Some(size) = column.declared_size {
            return Ok(ValueLength::Bytes(size.into()));
        }

        match rsv.stream().read_i32().await? {
            -1 => Ok(ValueLength::Null),
            len if len >= 0 => Ok(ValueLength::Bytes(len as u64)),
            len => bail!(
                ErrorKind::ProtocolViolation,
                "Negative value length",
                len
            ),
        }
    }

    async fn decode_value(
        &self,
        rsv: &mut StreamReservation<S>,
        column: &ColumnMetadata,
        length: ValueLength,
    ) -> WireResult<ScriptedValue> {
        let mut payload = vec![0u8; length.byte_len() as usize];
        rsv.stream().read_exact(&mut payload).await?;
        self.events.push(CodecEvent::Decoded {
            label: column.label.clone(),
        });

        if length == ValueLength::Null {
            return Ok(ScriptedValue::Null);
        }

        let value = match column.type_id {
            TYPE_INT64 => {
                let bytes: [u8; 8] = payload.as_slice().try_into().map_err(|_| {
                    wire_error!(ErrorKind::InvalidData, "int64 values take 8 bytes")
                })?;
                ScriptedValue::Int64(i64::from_be_bytes(bytes))
            }
            TYPE_INT32 => {
                let bytes: [u8; 4] = payload.as_slice().try_into().map_err(|_| {
                    wire_error!(ErrorKind::InvalidData, "int32 values take 4 bytes")
                })?;
                ScriptedValue::Int32(i32::from_be_bytes(bytes))
            }
            TYPE_TEXT => ScriptedValue::Text(String::from_utf8(payload)?),
            _ => ScriptedValue::Bytes(payload.into()),
        };

        Ok(value)
    }

    async fn read_raw(&self, rsv: &mut StreamReservation<S>, buf: &mut [u8]) -> WireResult<usize> {
        let read = rsv.stream().read(buf).await?;
        if read == 0 && !buf.is_empty() {
            bail!(ErrorKind::ProtocolViolation, "Stream ended inside a value");
        }
        self.events.push(CodecEvent::RawRead { bytes: read });

        Ok(read)
    }

    async fn skip_raw(&self, rsv: &mut StreamReservation<S>, count: u64) -> WireResult<()> {
        let mut limited = rsv.stream().take(count);
        let skipped = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        if skipped < count {
            bail!(
                ErrorKind::ProtocolViolation,
                "Stream ended inside a skipped value"
            );
        }
        self.events.push(CodecEvent::Skipped { bytes: count });

        Ok(())
    }

    async fn startup(&self, _rsv: &mut StreamReservation<S>) -> WireResult<()> {
        self.events.push(CodecEvent::Startup);
        Ok(())
    }

    async fn terminate(&self, rsv: &mut StreamReservation<S>) -> WireResult<()> {
        rsv.stream().write_all(b"X").await?;
        rsv.stream().flush().await?;
        self.events.push(CodecEvent::Terminated);

        Ok(())
    }
}

/// Reads the results following the first one.
#[derive(Debug, Default)]
pub struct ScriptedContinuation {
    columns: Option<Arc<ColumnSet>>,
    done: bool,
}

impl ScriptedContinuation {
    async fn advance<S>(&mut self, rsv: &mut StreamReservation<S>) -> WireResult<Option<ResultHeader>>
    where
        S: AsyncRead + Unpin,
    {
        if self.done {
            return Ok(None);
        }

        loop {
            let tag = rsv.stream().read_u8().await?;
            match tag {
                b'T' => {
                    self.columns = Some(Arc::new(read_row_description(rsv).await?));
                }
                b'D' => {
                    let Some(columns) = &self.columns else {
                        self.done = true;
                        bail!(
                            ErrorKind::ProtocolViolation,
                            "Data row without row description"
                        );
                    };
                    return Ok(Some(ResultHeader::new(columns.clone())));
                }
                b'Z' => {
                    self.done = true;
                    return Ok(None);
                }
                b'E' => {
                    self.done = true;
                    let message = read_cstring(rsv).await?;
                    let ready = rsv.stream().read_u8().await?;
                    if ready != b'Z' {
                        bail!(
                            ErrorKind::ProtocolViolation,
                            "Error not followed by end of statement"
                        );
                    }
                    bail!(
                        ErrorKind::ServerError,
                        "Server rejected the statement",
                        message
                    );
                }
                other => {
                    self.done = true;
                    bail!(
                        ErrorKind::ProtocolViolation,
                        "Unexpected message tag",
                        format!("{:?}", other as char)
                    );
                }
            }
        }
    }
}

impl<S> Continuation<ScriptedCodec<S>> for ScriptedContinuation
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_result(
        &mut self,
        _codec: &ScriptedCodec<S>,
        rsv: &mut StreamReservation<S>,
    ) -> WireResult<Option<ResultHeader>> {
        self.advance(rsv).await
    }
}

async fn read_row_description<S>(rsv: &mut StreamReservation<S>) -> WireResult<ColumnSet>
where
    S: AsyncRead + Unpin,
{
    let count = rsv.stream().read_u16().await?;
    let mut columns = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let type_id = rsv.stream().read_u32().await?;
        let declared_size = match rsv.stream().read_u32().await? {
            0 => None,
            size => Some(size),
        };
        let label = read_cstring(rsv).await?;
        columns.push(ColumnMetadata::new(label, type_id, declared_size));
    }

    Ok(ColumnSet::new(columns))
}

async fn read_cstring<S>(rsv: &mut StreamReservation<S>) -> WireResult<String>
where
    S: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    loop {
        match rsv.stream().read_u8().await? {
            0 => break,
            byte => bytes.push(byte),
        }
    }

    Ok(String::from_utf8(bytes)?)
}

/// Authors the bytes a scripted server sends.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    buf: BytesMut,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_description(mut self, columns: &[ColumnMetadata]) -> Self {
        self.buf.put_u8(b'T');
        self.buf.put_u16(columns.len() as u16);
        for column in columns {
            self.buf.put_u32(column.type_id);
            self.buf.put_u32(column.declared_size.unwrap_or(0));
            self.buf.put_slice(column.label.as_bytes());
            self.buf.put_u8(0);
        }
        self
    }

    /// Starts a data row; append one value per column afterwards.
    pub fn data_row(mut self) -> Self {
        self.buf.put_u8(b'D');
        self
    }

    /// Appends raw bytes of a fixed-size value.
    pub fn fixed(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn int64(self, value: i64) -> Self {
        self.fixed(&value.to_be_bytes())
    }

    pub fn int32(self, value: i32) -> Self {
        self.fixed(&value.to_be_bytes())
    }

    /// Appends a length-prefixed value.
    pub fn var(mut self, bytes: &[u8]) -> Self {
        self.buf.put_i32(bytes.len() as i32);
        self.buf.put_slice(bytes);
        self
    }

    pub fn text(self, value: &str) -> Self {
        self.var(value.as_bytes())
    }

    pub fn null(mut self) -> Self {
        self.buf.put_i32(-1);
        self
    }

    pub fn error(mut self, message: &str) -> Self {
        self.buf.put_u8(b'E');
        self.buf.put_slice(message.as_bytes());
        self.buf.put_u8(0);
        self.buf.put_u8(b'Z');
        self
    }

    pub fn end(mut self) -> Self {
        self.buf.put_u8(b'Z');
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}
