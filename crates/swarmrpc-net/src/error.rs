use crate::peer::PeerId;

/// Errors that can occur at the connection-provider boundary.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// No live connection to the target peer.
    #[error("not connected to peer {0}")]
    NotConnected(PeerId),

    /// The remote peer does not accept streams for this protocol.
    #[error("peer {peer} refused protocol {protocol}")]
    ProtocolRefused { peer: PeerId, protocol: String },

    /// An I/O error occurred on a provider stream.
    #[error("net I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;
