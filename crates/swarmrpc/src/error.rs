use swarmrpc_wire::RpcError;

/// Failure raised by a registered method handler.
///
/// The variant decides how the failure crosses the wire: a structured
/// [`RpcError`] is forwarded to the caller untouched; anything else is
/// wrapped with code 0 and its message. A handler that panics is reported
/// to the caller with the reserved unknown-error code instead.
#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl MethodError {
    /// Wrap a generic error.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(err))
    }
}
