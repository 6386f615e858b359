/// Failure taxonomy of the backend contract. Every variant carries the
/// collaborator's reason verbatim so the UI can surface it as-is.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
}
