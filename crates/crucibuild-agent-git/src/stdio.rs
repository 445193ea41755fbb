//! Line-delimited JSON transport over stdin/stdout.
//!
//! The broker writes [`BrokerMessage`]s to the agent's stdin, one JSON
//! object per line; the agent answers with [`AgentMessage`]s on stdout.
//! Logs go to stderr so they never mix with the protocol.

use crucibuild_core::{
    AgentCore, ConnectionEvent, ConnectionState, Manifest, Transport, TransportError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Lines read from the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerMessage {
    /// Handshake accepted.
    Connected,
    HandshakeFailed { reason: String },
    /// The broker is going away.
    Shutdown,
    /// Teardown finished on the broker side.
    Closed,
    Error { reason: String },
    Frame { topic: String, payload: String },
}

/// Lines written to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Hello { agent: String, version: String },
    Bye,
    Frame { topic: String, payload: String },
}

impl BrokerMessage {
    fn connection_event(self) -> Option<ConnectionEvent> {
        match self {
            BrokerMessage::Connected => Some(ConnectionEvent::HandshakeSucceeded),
            BrokerMessage::HandshakeFailed { reason } => {
                Some(ConnectionEvent::HandshakeFailed(reason))
            }
            BrokerMessage::Shutdown => Some(ConnectionEvent::RemoteShutdown),
            BrokerMessage::Closed => Some(ConnectionEvent::TeardownComplete),
            BrokerMessage::Error { reason } => Some(ConnectionEvent::TransportError(reason)),
            BrokerMessage::Frame { .. } => None,
        }
    }
}

/// [`Transport`] that queues outbound lines for [`write_loop`].
pub struct StdioTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<AgentMessage>>>,
}

impl StdioTransport {
    /// The transport and the receiving end to hand to [`write_loop`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            outbound: Mutex::new(Some(tx)),
        };
        (transport, rx)
    }

    /// Stop accepting messages. The writer drains what is queued and exits.
    pub fn detach(&self) {
        self.outbound.lock().take();
    }

    fn push(&self, message: AgentMessage) -> Result<(), TransportError> {
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(TransportError::Closed)?;
        tx.send(message).map_err(|_| TransportError::Closed)
    }
}

impl Transport for StdioTransport {
    fn open(&self, manifest: &Manifest) -> Result<(), TransportError> {
        self.push(AgentMessage::Hello {
            agent: manifest.name.clone(),
            version: manifest.version.clone(),
        })
    }

    fn close(&self) -> Result<(), TransportError> {
        self.push(AgentMessage::Bye)
    }

    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let payload = String::from_utf8(payload)
            .map_err(|e| TransportError::Io(format!("payload is not UTF-8: {e}")))?;
        self.push(AgentMessage::Frame {
            topic: topic.to_string(),
            payload,
        })
    }
}

/// Write queued messages as JSON lines until the transport is detached.
pub async fn write_loop<W>(
    mut outbound: mpsc::UnboundedReceiver<AgentMessage>,
    mut writer: W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Feed broker lines to `core` until the input ends.
///
/// Frames run on the blocking pool so a slow handler does not hold up the
/// reader. Lifecycle signals wait for the frames read before them, then
/// apply in order. End of input counts as a remote shutdown followed by
/// teardown.
pub async fn read_loop<R>(core: Arc<AgentCore>, reader: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut inflight = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        while inflight.try_join_next().is_some() {}

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: BrokerMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("ignoring malformed broker line: {e}");
                continue;
            }
        };

        match message {
            BrokerMessage::Frame { topic, payload } => {
                let core = core.clone();
                inflight.spawn_blocking(move || {
                    if let Err(e) = core.on_inbound_frame(&topic, payload.into_bytes()) {
                        tracing::warn!(%topic, "frame not handled: {e}");
                    }
                });
            }
            other => {
                if let Some(event) = other.connection_event() {
                    while inflight.join_next().await.is_some() {}
                    apply(&core, event).await?;
                }
            }
        }
    }

    tracing::info!("broker input closed");
    while inflight.join_next().await.is_some() {}

    if core.state() == ConnectionState::Connected {
        apply(&core, ConnectionEvent::RemoteShutdown).await?;
    }
    if core.state() == ConnectionState::Disconnecting {
        apply(&core, ConnectionEvent::TeardownComplete).await?;
    }
    Ok(())
}

/// Disconnect from our side: say goodbye and finish the teardown locally,
/// since the broker is no longer being read.
pub async fn disconnect(core: &Arc<AgentCore>) -> anyhow::Result<()> {
    if core.state() == ConnectionState::Connected {
        let closing = core.clone();
        tokio::task::spawn_blocking(move || closing.close()).await??;
    }
    if core.state() == ConnectionState::Disconnecting {
        apply(core, ConnectionEvent::TeardownComplete).await?;
    }
    Ok(())
}

/// Apply `event` off the async runtime; observers and released frames may block.
async fn apply(core: &Arc<AgentCore>, event: ConnectionEvent) -> anyhow::Result<()> {
    let core = core.clone();
    let result = tokio::task::spawn_blocking(move || core.on_connection_event(event)).await?;
    if let Err(e) = result {
        tracing::warn!("ignoring connection signal: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentGit, CLONE_COMMAND_TOPIC};
    use crucibuild_core::RuntimeConfig;
    use tokio::io::{AsyncReadExt, BufReader};

    fn agent() -> (AgentGit, Arc<StdioTransport>, mpsc::UnboundedReceiver<AgentMessage>) {
        let (transport, outbound) = StdioTransport::channel();
        let transport = Arc::new(transport);
        let agent = AgentGit::new(RuntimeConfig::default(), transport.clone()).unwrap();
        (agent, transport, outbound)
    }

    #[test]
    fn wire_format() {
        let line = r#"{"type":"handshake_failed","reason":"bad token"}"#;
        assert_eq!(
            serde_json::from_str::<BrokerMessage>(line).unwrap(),
            BrokerMessage::HandshakeFailed {
                reason: "bad token".into()
            }
        );
        assert_eq!(
            serde_json::to_string(&AgentMessage::Hello {
                agent: "agent-git".into(),
                version: "0.1.0".into()
            })
            .unwrap(),
            r#"{"type":"hello","agent":"agent-git","version":"0.1.0"}"#
        );
        assert_eq!(
            serde_json::to_string(&AgentMessage::Bye).unwrap(),
            r#"{"type":"bye"}"#
        );
    }

    #[test]
    fn detached_transport_is_closed() {
        let (transport, _rx) = StdioTransport::channel();
        transport.detach();
        assert_eq!(transport.send("t", b"{}".to_vec()), Err(TransportError::Closed));
        assert!(matches!(
            transport.send("t", vec![0xff, 0xfe]),
            Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn session_answers_clone_command() {
        let (agent, transport, mut outbound) = agent();
        let core = agent.core().clone();
        tokio::task::spawn_blocking({
            let core = core.clone();
            move || core.open()
        })
        .await
        .unwrap()
        .unwrap();

        let input = format!(
            "{}\n\nnot json\n{}\n",
            r#"{"type":"connected"}"#,
            serde_json::json!({
                "type": "frame",
                "topic": CLONE_COMMAND_TOPIC,
                "payload": r#"{"src":"git://a","dst":"/b"}"#,
            })
        );
        read_loop(core.clone(), BufReader::new(input.as_bytes()))
            .await
            .unwrap();
        transport.detach();

        let mut sent = Vec::new();
        while let Some(message) = outbound.recv().await {
            sent.push(message);
        }
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0],
            AgentMessage::Hello {
                agent: "agent-git".into(),
                version: "0.1.0".into()
            }
        );
        let AgentMessage::Frame { topic, payload } = &sent[1] else {
            panic!("expected a frame, got {:?}", sent[1]);
        };
        assert_eq!(topic, "crucibuild/agent-git#git-cloned-event");
        assert_eq!(
            serde_json::from_str::<crate::GitClonedEvent>(payload).unwrap(),
            crate::GitClonedEvent {
                rcode: 0,
                message: "Repository 'git://a' cloned into '/b'".into(),
            }
        );
        // end of input tears the connection down
        assert_eq!(core.state(), ConnectionState::Disconnected);
        assert!(core.bound_topics().is_empty());
    }

    #[tokio::test]
    async fn writer_emits_one_line_per_message() {
        let (transport, outbound) = StdioTransport::channel();
        let (client, mut server) = tokio::io::duplex(1024);
        let writer = tokio::spawn(write_loop(outbound, client));

        transport.open(&Manifest::new("agent-git", "0.1.0")).unwrap();
        transport.close().unwrap();
        transport.detach();
        writer.await.unwrap().unwrap();

        let mut written = String::new();
        server.read_to_string(&mut written).await.unwrap();
        assert_eq!(
            written,
            "{\"type\":\"hello\",\"agent\":\"agent-git\",\"version\":\"0.1.0\"}\n{\"type\":\"bye\"}\n"
        );
    }

    #[tokio::test]
    async fn frames_before_shutdown_are_handled_first() {
        let (agent, transport, mut outbound) = agent();
        let core = agent.core().clone();
        let frames = 50;
        let opening = core.clone();
        tokio::task::spawn_blocking(move || opening.open())
            .await
            .unwrap()
            .unwrap();

        let mut input = String::from("{\"type\":\"connected\"}\n");
        for i in 0..frames {
            let line = serde_json::json!({
                "type": "frame",
                "topic": CLONE_COMMAND_TOPIC,
                "payload": format!(r#"{{"src":"git://r{i}","dst":"/d{i}"}}"#),
            });
            input.push_str(&format!("{line}\n"));
        }
        input.push_str("{\"type\":\"shutdown\"}\n{\"type\":\"closed\"}\n");

        read_loop(core.clone(), BufReader::new(input.as_bytes()))
            .await
            .unwrap();
        transport.detach();

        let mut replies = 0;
        while let Some(message) = outbound.recv().await {
            if matches!(message, AgentMessage::Frame { .. }) {
                replies += 1;
            }
        }
        assert_eq!(replies, frames);
        assert_eq!(core.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn local_disconnect_completes_teardown() {
        let (agent, transport, mut outbound) = agent();
        let core = agent.core().clone();
        let opening = core.clone();
        tokio::task::spawn_blocking(move || {
            opening.open()?;
            opening.on_connection_event(ConnectionEvent::HandshakeSucceeded)
        })
        .await
        .unwrap()
        .unwrap();

        disconnect(&core).await.unwrap();
        assert_eq!(core.state(), ConnectionState::Disconnected);
        assert!(core.bound_topics().is_empty());

        transport.detach();
        let mut sent = Vec::new();
        while let Some(message) = outbound.recv().await {
            sent.push(message);
        }
        assert_eq!(sent.last(), Some(&AgentMessage::Bye));

        // nothing left to do once disconnected
        disconnect(&core).await.unwrap();
    }

    #[tokio::test]
    async fn broker_failure_is_applied() {
        let (agent, _transport, _outbound) = agent();
        let core = agent.core().clone();
        let input = "{\"type\":\"connected\"}\n{\"type\":\"error\",\"reason\":\"reset\"}\n";

        // connected while disconnected is ignored, the error still fails the link
        read_loop(core.clone(), BufReader::new(input.as_bytes()))
            .await
            .unwrap();
        assert_eq!(core.state(), ConnectionState::Failed);
    }
}
