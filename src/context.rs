//! Session ownership, connection status and node roster

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{Result, TransportError, TransportResult};
use crate::transport::{SessionId, SharedTransport, Transport};

/// A transport session shared by all components of one client
///
/// Destroyed exactly once. Afterwards every component holding it sees
/// [`TransportError::InvalidSession`] and falls back to neutral values.
pub struct Session {
    id: SessionId,
    transport: SharedTransport,
    alive: AtomicBool,
}

impl Session {
    fn new(id: SessionId, transport: SharedTransport) -> Self {
        Self {
            id,
            transport,
            alive: AtomicBool::new(true),
        }
    }

    /// Transport and session id, if the session is still alive
    pub fn live(&self) -> TransportResult<(&dyn Transport, SessionId)> {
        if self.alive.load(Ordering::Acquire) {
            Ok((self.transport.as_ref(), self.id))
        } else {
            Err(TransportError::InvalidSession)
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Release the transport session. Returns false if already released.
    fn release(&self) -> bool {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return false;
        }

        if let Err(e) = self.transport.destroy_session(self.id) {
            tracing::warn!("Transport failed to destroy session {:?}: {}", self.id, e);
        }
        true
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Connection state as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    /// Invalid session or a failed status read
    Error,
    /// The transport reported a status code this client does not know
    Unknown,
}

impl ConnectionStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Disconnected,
            1 => Self::Connected,
            c if c < 0 => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Kind of assignment node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    DomainServer,
    EntityServer,
    Agent,
    AudioMixer,
    AvatarMixer,
    AssetServer,
    MessagesMixer,
    EntityScriptServer,
    UpstreamAudioMixer,
    UpstreamAvatarMixer,
    DownstreamAudioMixer,
    DownstreamAvatarMixer,
    Unassigned,
    /// Code not known to this client
    Other(u8),
}

impl NodeType {
    pub fn from_code(code: u8) -> Self {
        match code {
            b'D' => Self::DomainServer,
            b'o' => Self::EntityServer,
            b'I' => Self::Agent,
            b'M' => Self::AudioMixer,
            b'W' => Self::AvatarMixer,
            b'A' => Self::AssetServer,
            b'm' => Self::MessagesMixer,
            b'S' => Self::EntityScriptServer,
            b'B' => Self::UpstreamAudioMixer,
            b'C' => Self::UpstreamAvatarMixer,
            b'a' => Self::DownstreamAudioMixer,
            b'w' => Self::DownstreamAvatarMixer,
            1 => Self::Unassigned,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::DomainServer => b'D',
            Self::EntityServer => b'o',
            Self::Agent => b'I',
            Self::AudioMixer => b'M',
            Self::AvatarMixer => b'W',
            Self::AssetServer => b'A',
            Self::MessagesMixer => b'm',
            Self::EntityScriptServer => b'S',
            Self::UpstreamAudioMixer => b'B',
            Self::UpstreamAvatarMixer => b'C',
            Self::DownstreamAudioMixer => b'a',
            Self::DownstreamAvatarMixer => b'w',
            Self::Unassigned => 1,
            Self::Other(code) => code,
        }
    }
}

/// One entry of the node roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub node_type: NodeType,
    pub active: bool,
    pub uuid: Uuid,
    /// Human readable address, when the transport provides one
    pub address: Option<String>,
}

/// Transport version information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub year: u32,
    pub major: u32,
    pub minor: u32,
    /// Short VCS identifier
    pub commit: String,
    /// "major.minor"
    pub number: String,
    /// Full version string
    pub full: String,
}

/// Owns one transport session: connect, status and node roster
pub struct ConnectionContext {
    session: Arc<Session>,
}

impl ConnectionContext {
    /// Create a session on `transport` using the configured parameters
    pub fn new(transport: SharedTransport, config: &ClientConfig) -> Result<Self> {
        let id = transport.create_session(&config.session_params())?;
        tracing::info!("Created session {:?}", id);
        Ok(Self {
            session: Arc::new(Session::new(id, transport)),
        })
    }

    /// Shared session handle for the other components
    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    /// Request a move to `location`. The outcome is observed via [`status`](Self::status).
    pub fn connect(&self, location: &str) {
        let result = self
            .session
            .live()
            .and_then(|(transport, id)| transport.connect(id, location));

        match result {
            Ok(()) => tracing::info!("Connecting to {}", location),
            Err(e) => tracing::warn!("Connect to {} failed: {}", location, e),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session
            .live()
            .and_then(|(transport, id)| transport.connection_status(id))
            .map(ConnectionStatus::from_code)
            .unwrap_or(ConnectionStatus::Error)
    }

    /// Refresh and read the node roster
    ///
    /// Any failed read discards the whole roster for this call.
    pub fn nodes(&self) -> Option<Vec<RemoteNode>> {
        match self.read_nodes() {
            Ok(nodes) => Some(nodes),
            Err(e) => {
                tracing::debug!("Node roster unavailable: {}", e);
                None
            }
        }
    }

    fn read_nodes(&self) -> TransportResult<Vec<RemoteNode>> {
        let (transport, id) = self.session.live()?;
        transport.refresh_nodes(id)?;

        let count = transport.node_count(id)?;
        let mut nodes = Vec::with_capacity(count);
        for index in 0..count {
            nodes.push(RemoteNode {
                uuid: transport.node_uuid(id, index)?,
                active: transport.node_active(id, index)?,
                node_type: NodeType::from_code(transport.node_type(id, index)?),
                address: transport.node_address(id, index).ok(),
            });
        }

        Ok(nodes)
    }

    /// This client's session uuid, once connected
    pub fn session_uuid(&self) -> Option<Uuid> {
        self.session
            .live()
            .and_then(|(transport, id)| transport.session_uuid(id))
            .ok()
            .filter(|uuid| !uuid.is_nil())
    }

    /// Version of the transport implementation
    pub fn version(&self) -> Option<VersionInfo> {
        self.session
            .live()
            .and_then(|(transport, _)| transport.version())
            .ok()
    }

    /// Release the session. Idempotent.
    pub fn destroy(&self) {
        if self.session.release() {
            tracing::info!("Destroyed session {:?}", self.session.id());
        }
    }

    pub fn is_destroyed(&self) -> bool {
        !self.session.is_alive()
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ConnectionStatus::from_code(0), ConnectionStatus::Disconnected);
        assert_eq!(ConnectionStatus::from_code(1), ConnectionStatus::Connected);
        assert_eq!(ConnectionStatus::from_code(-3), ConnectionStatus::Error);
        assert_eq!(ConnectionStatus::from_code(7), ConnectionStatus::Unknown);
    }

    #[test]
    fn test_node_type_codes() {
        for node_type in [
            NodeType::DomainServer,
            NodeType::AudioMixer,
            NodeType::MessagesMixer,
            NodeType::DownstreamAvatarMixer,
            NodeType::Unassigned,
        ] {
            assert_eq!(NodeType::from_code(node_type.code()), node_type);
        }
        assert_eq!(NodeType::from_code(b'?'), NodeType::Other(b'?'));
    }
}
