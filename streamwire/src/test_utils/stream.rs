use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// One successful read from a [`RecordingStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRecord {
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Default)]
struct Recording {
    position: usize,
    script_len: usize,
    reads: Vec<ReadRecord>,
    written: Vec<u8>,
    shutdown: bool,
}

/// Handle to what happened on a [`RecordingStream`], usable after the stream was moved into a
/// connection.
#[derive(Debug, Clone, Default)]
pub struct StreamRecorder(Arc<Mutex<Recording>>);

impl StreamRecorder {
    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.0.lock().unwrap()
    }

    pub fn reads(&self) -> Vec<ReadRecord> {
        self.lock().reads.clone()
    }

    /// Total number of bytes handed to the reader so far.
    pub fn bytes_read(&self) -> usize {
        self.lock().position
    }

    /// Number of scripted bytes nobody has read yet.
    pub fn remaining(&self) -> usize {
        let recording = self.lock();
        recording.script_len - recording.position
    }

    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }
}

/// In-memory duplex stream that replays a server script and records every read and write.
#[derive(Debug)]
pub struct RecordingStream {
    script: Bytes,
    recorder: StreamRecorder,
    max_chunk: Option<usize>,
    yield_before_read: bool,
    yielded: bool,
}

impl RecordingStream {
    pub fn new(script: impl Into<Bytes>) -> Self {
        let script = script.into();
        let recorder = StreamRecorder::default();
        recorder.lock().script_len = script.len();

        Self {
            script,
            recorder,
            max_chunk: None,
            yield_before_read: false,
            yielded: false,
        }
    }

    /// Caps the number of bytes returned by a single read.
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk);
        self
    }

    /// Makes every read return `Pending` once before producing data, so that concurrent
    /// futures get a chance to run while a read is in flight.
    pub fn yielding(mut self) -> Self {
        self.yield_before_read = true;
        self
    }

    pub fn recorder(&self) -> StreamRecorder {
        self.recorder.clone()
    }
}

impl AsyncRead for RecordingStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.yield_before_read && !this.yielded {
            this.yielded = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        this.yielded = false;

        let mut recording = this.recorder.lock();
        let offset = recording.position;
        let mut len = (this.script.len() - offset).min(buf.remaining());
        if let Some(max_chunk) = this.max_chunk {
            len = len.min(max_chunk);
        }

        if len > 0 {
            buf.put_slice(&this.script[offset..offset + len]);
            recording.position += len;
            recording.reads.push(ReadRecord { offset, len });
        }

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for RecordingStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.recorder.lock().written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.recorder.lock().shutdown = true;
        Poll::Ready(Ok(()))
    }
}
