//! Streaming program data. The caller supplies an async reader and a
//! declared total length; a
//! background fetcher reads packets of at most 1 KiB and appends them
//! to an in-memory buffer, while instructions request byte ranges
//! through [`ProgramDataStream::bytes`], which blocks on arrival.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex, Notify};

use crate::error::{HostError, ProgramError};

pub const MAX_PACKET_SIZE: usize = 1024;

struct State {
    buffer: Vec<u8>,
    declared_len: u64,
    error: Option<String>,
    done: bool,
}

pub struct ProgramDataStream {
    state: Mutex<State>,
    arrived: Notify,
}

impl ProgramDataStream {
    pub fn new(declared_len: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                buffer: Vec::new(),
                declared_len,
                error: None,
                done: declared_len == 0,
            }),
            arrived: Notify::new(),
        })
    }

    /// Spawn the background fetcher, reading up to `MAX_PACKET_SIZE`
    /// bytes at a time until `declared_len` bytes have arrived, the
    /// reader errors, or `stop` fires.
    pub fn spawn_fetcher<R>(self: &Arc<Self>, mut reader: R, stop: Arc<Notify>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            let declared_len = {
                let state = this.state.lock().await;
                state.declared_len
            };
            let mut remaining = declared_len;
            let mut packet = vec![0u8; MAX_PACKET_SIZE];
            while remaining > 0 {
                let want = remaining.min(MAX_PACKET_SIZE as u64) as usize;
                let read = tokio::select! {
                    r = reader.read(&mut packet[..want]) => r,
                    _ = stop.notified() => break,
                };
                match read {
                    Ok(0) => {
                        let mut state = this.state.lock().await;
                        state.error = Some("program data reader closed before declared length was reached".to_string());
                        break;
                    }
                    Ok(n) => {
                        let mut state = this.state.lock().await;
                        state.buffer.extend_from_slice(&packet[..n]);
                        remaining -= n as u64;
                        drop(state);
                        this.arrived.notify_waiters();
                    }
                    Err(e) => {
                        let mut state = this.state.lock().await;
                        state.error = Some(e.to_string());
                        drop(state);
                        this.arrived.notify_waiters();
                        break;
                    }
                }
            }
            let mut state = this.state.lock().await;
            state.done = true;
            drop(state);
            this.arrived.notify_waiters();
        });
    }

    /// Block until `[offset, offset+length)` has fully arrived, then
    /// return a copy of that range. Out-of-bounds requests fail
    /// immediately without waiting.
    pub async fn bytes(&self, offset: u64, length: u64) -> Result<Vec<u8>, HostError> {
        let declared_len = self.state.lock().await.declared_len;
        let in_bounds = offset.checked_add(length).map(|end| end <= declared_len).unwrap_or(false);
        if !in_bounds {
            return Err(HostError::Program(ProgramError::OutOfBounds {
                offset,
                length,
                declared: declared_len,
            }));
        }
        loop {
            {
                let state = self.state.lock().await;
                if let Some(e) = &state.error {
                    return Err(HostError::Program(ProgramError::DataStreamFailed(e.clone())));
                }
                let end = (offset + length) as usize;
                if state.buffer.len() >= end {
                    return Ok(state.buffer[offset as usize..end].to_vec());
                }
                if state.done {
                    return Err(HostError::Program(ProgramError::DataStreamFailed(
                        "program data stream ended before requested range arrived".to_string(),
                    )));
                }
            }
            self.arrived.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn bytes_returns_once_arrived() {
        let data = b"hello world".to_vec();
        let stream = ProgramDataStream::new(data.len() as u64);
        stream.spawn_fetcher(Cursor::new(data.clone()), Arc::new(Notify::new()));
        let got = stream.bytes(6, 5).await.unwrap();
        assert_eq!(got, b"world");
    }

    #[tokio::test]
    async fn out_of_bounds_fails_immediately() {
        let stream = ProgramDataStream::new(4);
        stream.spawn_fetcher(Cursor::new(vec![0u8; 4]), Arc::new(Notify::new()));
        let err = stream.bytes(2, 10).await;
        assert!(matches!(err, Err(HostError::Program(ProgramError::OutOfBounds { .. }))));
    }

    #[tokio::test]
    async fn reader_error_is_reported_to_waiters() {
        struct FailingReader;
        impl AsyncRead for FailingReader {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::other("disk gone")))
            }
        }
        let stream = ProgramDataStream::new(10);
        stream.spawn_fetcher(FailingReader, Arc::new(Notify::new()));
        let err = stream.bytes(0, 5).await;
        assert!(matches!(err, Err(HostError::Program(ProgramError::DataStreamFailed(_)))));
    }
}
