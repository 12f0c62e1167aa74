//! Per-protocol wire encoding.
//!
//! A [`WireCodec`] knows how to send a statement and how to read values off the stream. It never
//! acquires the stream itself: every call receives the [`StreamReservation`] of the operation
//! that drives it.

use std::fmt;
use std::future::Future;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::bail;
use crate::connection::vendor::VendorFunctionality;
use crate::error::{ErrorKind, WireResult};
use crate::stream::reservation::StreamReservation;
use crate::types::{ColumnMetadata, ResultHeader, Statement, ValueLength};

/// Scratch size used when discarding bytes.
const SKIP_CHUNK_SIZE: usize = 8 * 1024;

/// Outcome of sending a statement: the first result, if any, and a handle to pull the rest.
#[derive(Debug)]
pub struct Execution<K> {
    pub first: Option<ResultHeader>,
    pub continuation: Option<K>,
}

impl<K> Execution<K> {
    /// An execution that produced no results.
    pub fn empty() -> Self {
        Self {
            first: None,
            continuation: None,
        }
    }
}

/// Produces the results that follow the first one.
///
/// `next_result` is only called once every value of the previous result has been consumed from
/// the stream. After it returns an error, a further call must return `Ok(None)` when the stream
/// is positioned past the end of the statement.
pub trait Continuation<C: WireCodec + ?Sized>: Send {
    fn next_result(
        &mut self,
        codec: &C,
        rsv: &mut StreamReservation<C::Stream>,
    ) -> impl Future<Output = WireResult<Option<ResultHeader>>> + Send;
}

/// Wire encoding of one protocol.
pub trait WireCodec: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    type Value: Clone + Send + Sync + fmt::Debug + 'static;
    type Continuation: Continuation<Self>;
    type Vendor: VendorFunctionality;

    fn vendor(&self) -> &Self::Vendor;

    /// Sends a statement without bind values.
    fn execute_simple(
        &self,
        rsv: &mut StreamReservation<Self::Stream>,
        statement: &Statement,
    ) -> impl Future<Output = WireResult<Execution<Self::Continuation>>> + Send;

    /// Sends a statement with one set of bind values.
    fn execute_parameterized(
        &self,
        rsv: &mut StreamReservation<Self::Stream>,
        statement: &Statement,
    ) -> impl Future<Output = WireResult<Execution<Self::Continuation>>> + Send;

    /// Sends a statement with a batch of bind value sets.
    fn execute_batched(
        &self,
        rsv: &mut StreamReservation<Self::Stream>,
        statement: &Statement,
    ) -> impl Future<Output = WireResult<Execution<Self::Continuation>>> + Send;

    /// Reads the length of the next value of `column`.
    fn read_value_length(
        &self,
        rsv: &mut StreamReservation<Self::Stream>,
        column: &ColumnMetadata,
    ) -> impl Future<Output = WireResult<ValueLength>> + Send;

    /// Reads and decodes the payload of a value whose length was already read.
    fn decode_value(
        &self,
        rsv: &mut StreamReservation<Self::Stream>,
        column: &ColumnMetadata,
        length: ValueLength,
    ) -> impl Future<Output = WireResult<Self::Value>> + Send;

    /// Reads at most `buf.len()` raw payload bytes.
    fn read_raw(
        &self,
        rsv: &mut StreamReservation<Self::Stream>,
        buf: &mut [u8],
    ) -> impl Future<Output = WireResult<usize>> + Send {
        async move {
            let read = rsv.stream().read(buf).await?;
            if read == 0 && !buf.is_empty() {
                bail!(
                    ErrorKind::ProtocolViolation,
                    "Stream ended inside a value"
                );
            }

            Ok(read)
        }
    }

    /// Discards exactly `count` raw payload bytes.
    fn skip_raw(
        &self,
        rsv: &mut StreamReservation<Self::Stream>,
        count: u64,
    ) -> impl Future<Output = WireResult<()>> + Send {
        async move {
            let mut scratch = [0u8; SKIP_CHUNK_SIZE];
            let mut remaining = count;
            while remaining > 0 {
                let chunk = remaining.min(SKIP_CHUNK_SIZE as u64) as usize;
                let read = self.read_raw(rsv, &mut scratch[..chunk]).await?;
                remaining -= read as u64;
            }

            Ok(())
        }
    }

    /// Runs once after the stream is opened, e.g. for a handshake.
    fn startup(
        &self,
        _rsv: &mut StreamReservation<Self::Stream>,
    ) -> impl Future<Output = WireResult<()>> + Send {
        async { Ok(()) }
    }

    /// Runs once before the stream is shut down.
    fn terminate(
        &self,
        _rsv: &mut StreamReservation<Self::Stream>,
    ) -> impl Future<Output = WireResult<()>> + Send {
        async { Ok(()) }
    }
}
