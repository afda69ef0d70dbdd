/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Connection-provider error (no connection, refused protocol, I/O).
    #[error("net error: {0}")]
    Net(#[from] swarmrpc_net::NetError),

    /// Frame-level error.
    #[error("wire error: {0}")]
    Wire(#[from] swarmrpc_wire::WireError),

    /// The peer's outbound queue closed while the frame was being handed
    /// over.
    #[error("outbound queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, MuxError>;
