//! In-memory stream and scripted codec for exercising connections without a server.

use std::sync::Arc;

use bytes::Bytes;

use crate::connection::base::Connection;
use crate::test_utils::codec::{CodecEvents, ScriptedCodec};
use crate::test_utils::stream::{RecordingStream, StreamRecorder};

pub mod codec;
pub mod stream;

/// A connection over a [`RecordingStream`] together with handles to inspect it.
pub struct ScriptedConnection {
    pub connection: Connection<ScriptedCodec>,
    pub recorder: StreamRecorder,
    pub events: CodecEvents,
}

/// Wraps `stream` in a connection driven by a fresh [`ScriptedCodec`].
pub fn connection_over(stream: RecordingStream) -> ScriptedConnection {
    let codec = ScriptedCodec::<RecordingStream>::new();
    let events = codec.events();
    let recorder = stream.recorder();

    ScriptedConnection {
        connection: Connection::new(1, Arc::new(codec), stream),
        recorder,
        events,
    }
}

/// Wraps a connection around a server script.
pub fn scripted_connection(script: Bytes) -> ScriptedConnection {
    connection_over(RecordingStream::new(script))
}
