//! TCP control channel to the station.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use scicall_protocol::{encode_command, Command, CommandDecoder, ConnectError, Port, ProtocolError};

use crate::error::SessionError;

/// Bound on a single outbound write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Initial capacity of the read buffer.
const READ_BUFFER_SIZE: usize = 4096;

/// Something that happened on the control channel.
#[derive(Debug)]
pub enum ChannelEvent {
    /// One decoded line, or the reason it could not be decoded.
    Inbound(Result<Command, ProtocolError>),
    /// The connection is gone. Sent at most once per task.
    Closed(String),
}

type EventSink = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Open control connection with its reader and writer tasks.
pub struct ControlChannel {
    peer: Option<SocketAddr>,
    outbound: Option<mpsc::UnboundedSender<Command>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ControlChannel {
    /// Open a TCP connection, giving up after `timeout`.
    ///
    /// Name resolution counts against the timeout.
    pub async fn connect(host: &str, port: Port, timeout: Duration) -> Result<TcpStream, ConnectError> {
        let port = u16::try_from(port)
            .map_err(|_| ConnectError::Unreachable(format!("port {} out of range", port)))?;

        debug!("[Control] Connecting to {}:{} (timeout {:?})", host, port, timeout);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                warn!("[Control] Connect to {}:{} failed: {}", host, port, e);
                return Err(ConnectError::Unreachable(format!("{}:{}: {}", host, port, e)));
            }
            Err(_) => {
                warn!("[Control] Connect to {}:{} timed out", host, port);
                return Err(ConnectError::Timeout(timeout));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("[Control] set_nodelay failed: {}", e);
        }
        Ok(stream)
    }

    /// Take over a connected stream. Every inbound line and the final close
    /// are reported through `on_event`, from the channel's own tasks.
    pub fn attach<F>(stream: TcpStream, on_event: F) -> Self
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        let peer = stream.peer_addr().ok();
        let sink: EventSink = Arc::new(on_event);
        let (tx, rx) = mpsc::unbounded_channel();
        let (read_half, write_half) = stream.into_split();

        let reader = tokio::spawn(reader_task(read_half, Arc::clone(&sink)));
        let writer = tokio::spawn(writer_task(write_half, rx, sink));

        info!("[Control] Attached to {:?}", peer);
        Self {
            peer,
            outbound: Some(tx),
            reader,
            writer,
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_some() && !self.writer.is_finished()
    }

    /// Queue a command for the writer task.
    pub fn send(&self, cmd: Command) -> Result<(), SessionError> {
        let tx = self.outbound.as_ref().ok_or(SessionError::ChannelClosed)?;
        tx.send(cmd).map_err(|_| SessionError::ChannelClosed)
    }

    /// Close the channel. Queued commands are still flushed by the writer,
    /// which then shuts the socket down. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if self.outbound.take().is_some() {
            debug!("[Control] Disconnecting from {:?}", self.peer);
        }
        self.reader.abort();
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn reader_task<R>(mut reader: R, sink: EventSink)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = CommandDecoder::new();
    decoder.buffer_mut().reserve(READ_BUFFER_SIZE);

    loop {
        match reader.read_buf(decoder.buffer_mut()).await {
            Ok(0) => {
                info!("[Control] Connection closed by station");
                sink(ChannelEvent::Closed("connection closed by station".to_string()));
                return;
            }
            Ok(n) => {
                trace!("[Control] Read {} bytes", n);
                for message in decoder.drain() {
                    sink(ChannelEvent::Inbound(message));
                }
            }
            Err(e) => {
                error!("[Control] Read error: {}", e);
                sink(ChannelEvent::Closed(format!("read failed: {}", e)));
                return;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Command>, sink: EventSink)
where
    W: AsyncWrite + Unpin,
{
    while let Some(cmd) = rx.recv().await {
        trace!("[Control] Sending {:?}", cmd);
        let encoded = match encode_command(&cmd) {
            Ok(b) => b,
            Err(e) => {
                error!("[Control] Dropping {}: {}", cmd.tag(), e);
                continue;
            }
        };

        match tokio::time::timeout(WRITE_TIMEOUT, writer.write_all(&encoded)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("[Control] Write error: {}", e);
                sink(ChannelEvent::Closed(format!("write failed: {}", e)));
                return;
            }
            Err(_) => {
                error!("[Control] Write timed out after {:?}", WRITE_TIMEOUT);
                sink(ChannelEvent::Closed("write timed out".to_string()));
                return;
            }
        }
    }

    let _ = writer.shutdown().await;
    debug!("[Control] Writer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, Port) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port() as Port;
        (listener, port)
    }

    fn collect() -> (
        impl Fn(ChannelEvent) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (move |event: ChannelEvent| {
            let _ = tx.send(event);
        }, rx)
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, port) = listener().await;
        drop(listener);

        let err = ControlChannel::connect("127.0.0.1", port, Duration::from_millis(400))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_port() {
        let err = ControlChannel::connect("127.0.0.1", 70000, Duration::from_millis(400))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_inbound_lines_and_close() {
        let (listener, port) = listener().await;
        let stream = ControlChannel::connect("127.0.0.1", port, Duration::from_millis(400))
            .await
            .unwrap();
        let (mut station, _) = listener.accept().await.unwrap();

        let (sink, mut events) = collect();
        let _channel = ControlChannel::attach(stream, sink);

        station
            .write_all(b"{\"cmd\":\"hello_from_server\"}\n{\"cmd\":\"set_srt\n{\"cmd\":\"set_srtlatency\",\"data\":120}\n")
            .await
            .unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, ChannelEvent::Inbound(Ok(Command::HelloFromServer))));
        let second = events.recv().await.unwrap();
        assert!(matches!(second, ChannelEvent::Inbound(Err(_))));
        let third = events.recv().await.unwrap();
        assert!(matches!(
            third,
            ChannelEvent::Inbound(Ok(Command::SetSrtLatency { data: 120 }))
        ));

        drop(station);
        let closed = events.recv().await.unwrap();
        assert!(matches!(closed, ChannelEvent::Closed(_)));
    }

    #[tokio::test]
    async fn test_send_and_disconnect() {
        let (listener, port) = listener().await;
        let stream = ControlChannel::connect("127.0.0.1", port, Duration::from_millis(400))
            .await
            .unwrap();
        let (station, _) = listener.accept().await.unwrap();

        let (sink, _events) = collect();
        let mut channel = ControlChannel::attach(stream, sink);
        assert!(channel.is_open());

        channel.send(Command::HelloFromGuest).unwrap();
        channel.send(Command::keepalive_for(2)).unwrap();
        channel.disconnect();
        channel.disconnect();
        assert!(!channel.is_open());
        assert_eq!(channel.send(Command::HelloFromGuest), Err(SessionError::ChannelClosed));

        // Queued lines are flushed before the socket is shut down.
        let mut lines = BufReader::new(station).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"cmd":"hello_from_guest"}"#
        );
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"cmd":"keepalive","ch":3}"#
        );
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
