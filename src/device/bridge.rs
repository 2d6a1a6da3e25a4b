//! Push session over a TCP bridge.
//!
//! Battery / solar charge controllers are usually reached through a small
//! bridge (BLE-to-TCP, RS485-to-TCP). The bridge protocol is line based:
//! the client writes `poll\n`, the bridge answers with one JSON object per
//! line whose numeric members are the device's current values.
//!
//! ```text
//! > poll
//! < {"battery_percentage": 87, "battery_voltage": 13.2, "model": "RNG-CTRL"}
//! ```
//!
//! Non-numeric members are ignored.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::device::{DeviceError, PushSession, SessionEvent};

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_COMMAND: &[u8] = b"poll\n";

/// TCP client for a line-oriented JSON bridge.
pub struct TcpBridgeSession {
    address: String,
    connect_timeout: Duration,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
}

impl TcpBridgeSession {
    /// Create a session for `address` (`host:port`). Nothing connects until
    /// [`PushSession::connect`] is called.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            writer: None,
            reader: None,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for TcpBridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpBridgeSession")
            .field("address", &self.address)
            .field("connected", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for TcpBridgeSession {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Extract the numeric members of one JSON line.
fn parse_payload(line: &str) -> Result<BTreeMap<String, f64>, DeviceError> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| DeviceError::InvalidReading(format!("bad bridge payload: {e}")))?;
    let serde_json::Value::Object(members) = value else {
        return Err(DeviceError::InvalidReading(
            "bridge payload is not a JSON object".to_string(),
        ));
    };

    Ok(members
        .into_iter()
        .filter_map(|(key, value)| value.as_f64().map(|v| (key, v)))
        .collect())
}

async fn read_lines(
    reader: tokio::net::tcp::OwnedReadHalf,
    events: mpsc::Sender<SessionEvent>,
    address: String,
) {
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_payload(line) {
                    Ok(values) => {
                        if events.send(SessionEvent::Data(values)).await.is_err() {
                            // Worker went away.
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(bridge = %address, error = %e, "Ignoring bridge line");
                    }
                }
            }
            Ok(None) => break None,
            Err(e) => break Some(e.to_string()),
        }
    };
    let _ = events.send(SessionEvent::Disconnected(reason)).await;
}

#[async_trait::async_trait]
impl PushSession for TcpBridgeSession {
    async fn connect(&mut self, events: mpsc::Sender<SessionEvent>) -> Result<(), DeviceError> {
        self.stop_reader();
        self.writer = None;

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(DeviceError::Io(e)),
            Err(_) => return Err(DeviceError::Timeout),
        };
        tracing::debug!(bridge = %self.address, "Bridge connected");

        let (read_half, write_half) = stream.into_split();
        events
            .send(SessionEvent::Connected)
            .await
            .map_err(|_| DeviceError::Disconnected)?;

        self.writer = Some(write_half);
        self.reader = Some(tokio::spawn(read_lines(
            read_half,
            events,
            self.address.clone(),
        )));
        Ok(())
    }

    async fn request_data(&mut self) -> Result<(), DeviceError> {
        let writer = self.writer.as_mut().ok_or(DeviceError::Disconnected)?;
        if let Err(e) = writer.write_all(POLL_COMMAND).await {
            self.writer = None;
            return Err(DeviceError::Io(e));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.stop_reader();
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
            tracing::debug!(bridge = %self.address, "Bridge disconnected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn bind() -> Option<TcpListener> {
        match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => Some(listener),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                eprintln!("Skipping test: TCP bind not permitted");
                None
            }
            Err(e) => panic!("bind failed: {e}"),
        }
    }

    #[test]
    fn test_parse_payload_keeps_numbers() {
        let values =
            parse_payload(r#"{"battery_voltage": 13.2, "battery_percentage": 87, "model": "x"}"#)
                .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["battery_voltage"], 13.2);
        assert_eq!(values["battery_percentage"], 87.0);
    }

    #[test]
    fn test_parse_payload_rejects_non_object() {
        assert!(parse_payload("[1, 2]").is_err());
        assert!(parse_payload("not json").is_err());
    }

    #[tokio::test]
    async fn test_request_before_connect() {
        let mut session = TcpBridgeSession::new("127.0.0.1:1");
        assert!(matches!(
            session.request_data().await,
            Err(DeviceError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_poll_roundtrip() {
        let Some(listener) = bind().await else {
            return;
        };
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let request = lines.next_line().await.unwrap().unwrap();
            assert_eq!(request, "poll");
            write_half
                .write_all(b"{\"pv_voltage\": 18.5, \"pv_power\": 42}\n")
                .await
                .unwrap();
            // Closing the connection ends the session.
        });

        let (tx, mut rx) = mpsc::channel(8);
        let mut session = TcpBridgeSession::new(addr.to_string());
        session.connect(tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(SessionEvent::Connected));

        session.request_data().await.unwrap();
        match rx.recv().await {
            Some(SessionEvent::Data(values)) => {
                assert_eq!(values["pv_voltage"], 18.5);
                assert_eq!(values["pv_power"], 42.0);
            }
            other => panic!("expected data, got {other:?}"),
        }

        server.await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Disconnected(_))
        ));
        session.disconnect().await.ok();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let Some(listener) = bind().await else {
            return;
        };
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, _rx) = mpsc::channel(8);
        let mut session = TcpBridgeSession::new(addr.to_string());
        assert!(session.connect(tx).await.is_err());
    }
}
