//! Fake station for session tests.

#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use scicall_guest::{DryRunPipeline, Notice, SessionConfig, SessionHandle, SessionSnapshot};
use scicall_protocol::{Port, PortAllocator};

pub const WAIT: Duration = Duration::from_secs(5);

/// A station control listener on an ephemeral port.
pub struct Station {
    pub listener: TcpListener,
    pub port: Port,
}

impl Station {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port() as Port;
        Self { listener, port }
    }

    /// Session settings whose channel 1 control port is this listener.
    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            station: "127.0.0.1".to_string(),
            channel: 0,
            ports: PortAllocator::with_base(self.port),
            settle_delay: Duration::from_millis(10),
            reconnect_delay: Duration::from_millis(50),
            keepalive_interval: Duration::from_millis(100),
            ..SessionConfig::default()
        }
    }

    pub async fn accept(&self) -> Peer {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("guest never connected")
            .unwrap();
        let (read, write) = stream.into_split();
        Peer {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    /// True if nobody connects within `wait`.
    pub async fn stays_quiet(&self, wait: Duration) -> bool {
        timeout(wait, self.listener.accept()).await.is_err()
    }
}

/// The station side of one accepted control connection.
pub struct Peer {
    pub lines: Lines<BufReader<OwnedReadHalf>>,
    pub write: OwnedWriteHalf,
}

impl Peer {
    pub async fn send(&mut self, line: &str) {
        self.write.write_all(line.as_bytes()).await.unwrap();
        self.write.write_all(b"\n").await.unwrap();
    }

    /// Next line from the guest that is not a keepalive.
    pub async fn next_non_keepalive(&mut self) -> Option<String> {
        loop {
            let line = timeout(WAIT, self.lines.next_line())
                .await
                .expect("no line from guest")
                .unwrap()?;
            if !line.contains("\"keepalive\"") {
                return Some(line);
            }
        }
    }

    /// Next raw line, `None` once the guest closed the connection.
    pub async fn next_line(&mut self) -> Option<String> {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("no line from guest")
            .unwrap()
    }

    /// Read until the guest closes the connection.
    pub async fn expect_closed(&mut self) {
        while self.next_line().await.is_some() {}
    }
}

pub fn spawn_session(config: SessionConfig) -> (SessionHandle, mpsc::UnboundedReceiver<Notice>, DryRunPipeline) {
    let pipeline = DryRunPipeline::recording();
    let (handle, notices) = SessionHandle::spawn(config, pipeline.clone());
    (handle, notices, pipeline)
}

/// Poll snapshots until `pred` holds.
pub async fn wait_for<F>(handle: &SessionHandle, pred: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    timeout(WAIT, async {
        loop {
            let snapshot = handle.snapshot().await.unwrap();
            if pred(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session never reached the expected state")
}

/// Wait for a notice matching `pred`, skipping others.
pub async fn wait_notice<F>(notices: &mut mpsc::UnboundedReceiver<Notice>, pred: F) -> Notice
where
    F: Fn(&Notice) -> bool,
{
    timeout(WAIT, async {
        loop {
            let notice = notices.recv().await.expect("notice channel closed");
            if pred(&notice) {
                return notice;
            }
        }
    })
    .await
    .expect("expected notice never arrived")
}
