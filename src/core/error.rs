use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("invalid input: {}", .0.join("; "))]
    InvalidInput(Vec<String>),
}

impl ProjectionError {
    pub fn messages(&self) -> &[String] {
        match self {
            ProjectionError::InvalidInput(messages) => messages,
        }
    }
}
