/// Why a turn could not be started.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AgentError {
    /// Another turn holds the agent's turn lock.
    #[error("a turn is already running for this group")]
    Busy,

    /// Credit went negative; the agent stays silent.
    #[error("credit exhausted")]
    OutOfCredit,
}
