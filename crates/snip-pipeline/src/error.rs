use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("empty request")]
    EmptyRequest,
    #[error("deletion queue is full")]
    QueueFull,
    #[error("deletion pipeline is shut down")]
    Closed,
}
