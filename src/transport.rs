//! The byte-stream boundary of a connection.
//!
//! The engine never performs I/O itself. A [`Transport`] is told when to
//! shut its halves down; a driver moves bytes between the stream and
//! [`Connection::add`]/[`Connection::get`]. [`StreamTransport`] is that
//! driver for any tokio `AsyncRead + AsyncWrite` stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::error::Result;

const READ_BUFFER_SIZE: usize = 8192;

/// Lifecycle hooks the engine invokes on the underlying transport.
///
/// Implementations must not call back into the connection from these
/// methods; they run while connection locks are held.
pub trait Transport: Send + Sync + 'static {
    /// Whether the transport can still move bytes.
    fn is_connected(&self) -> bool;

    /// Stop delivering inbound bytes.
    fn close_input(&self);

    /// Flush pending outbound bytes, then stop writing.
    fn close_output(&self);

    /// Tear the whole transport down.
    fn close_connection(&self);
}

/// Drives a connection over a tokio stream.
///
/// ```rust,ignore
/// let transport = StreamTransport::new();
/// let conn = Connection::server(config, registry, transport.clone());
/// let task = transport.spawn(tcp_stream, conn.clone());
/// ```
#[derive(Debug, Default)]
pub struct StreamTransport {
    input: CancellationToken,
    output: CancellationToken,
    running: AtomicBool,
}

impl StreamTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start the read and write loops on the current runtime.
    ///
    /// The task finishes once both halves are closed, either by the engine
    /// or because the stream failed.
    pub fn spawn<S>(self: &Arc<Self>, stream: S, connection: Connection) -> JoinHandle<Result<()>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let this = Arc::clone(self);
        this.running.store(true, Ordering::Release);
        tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(stream);
            let (read, write) = tokio::join!(
                this.read_loop(reader, &connection),
                this.write_loop(writer, &connection)
            );
            this.running.store(false, Ordering::Release);
            read.and(write)
        })
    }

    async fn read_loop<R>(&self, mut reader: R, connection: &Connection) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let result = loop {
            let n = tokio::select! {
                _ = self.input.cancelled() => break Ok(()),
                read = reader.read(&mut buf) => match read {
                    Ok(n) => n,
                    Err(e) => break Err(e.into()),
                },
            };
            if n == 0 {
                tracing::debug!(role = %connection.role(), "peer closed the stream");
                break Ok(());
            }
            if let Err(e) = connection.add(&buf[..n]) {
                tracing::debug!(role = %connection.role(), error = %e, "inbound data rejected");
                break Ok(());
            }
        };
        self.input.cancel();
        connection.input_ended();
        result
    }

    async fn write_loop<W>(&self, mut writer: W, connection: &Connection) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            for chunk in connection.get() {
                if let Err(e) = writer.write_all(&chunk).await {
                    self.output.cancel();
                    return Err(e.into());
                }
            }
            writer.flush().await?;

            tokio::select! {
                _ = self.output.cancelled() => break,
                _ = connection.outbound_ready().notified() => {}
            }
        }

        // Bytes queued together with the shutdown request still go out.
        for chunk in connection.get() {
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        writer.shutdown().await?;
        Ok(())
    }
}

impl Transport for StreamTransport {
    fn is_connected(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && !(self.input.is_cancelled() && self.output.is_cancelled())
    }

    fn close_input(&self) {
        self.input.cancel();
    }

    fn close_output(&self) {
        self.output.cancel();
    }

    fn close_connection(&self) {
        self.input.cancel();
        self.output.cancel();
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::Transport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts the lifecycle calls it receives.
    #[derive(Debug, Default)]
    pub struct MockTransport {
        pub input_closed: AtomicUsize,
        pub output_closed: AtomicUsize,
        pub connection_closed: AtomicUsize,
    }

    impl MockTransport {
        pub fn closes(&self) -> usize {
            self.connection_closed.load(Ordering::SeqCst)
        }
    }

    impl Transport for MockTransport {
        fn is_connected(&self) -> bool {
            self.connection_closed.load(Ordering::SeqCst) == 0
        }

        fn close_input(&self) {
            self.input_closed.fetch_add(1, Ordering::SeqCst);
        }

        fn close_output(&self) {
            self.output_closed.fetch_add(1, Ordering::SeqCst);
        }

        fn close_connection(&self) {
            self.connection_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
