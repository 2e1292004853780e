use crate::scenario::Scenario;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Scenario {0} does not permit executing migrations")]
    NotExecutable(Scenario),

    #[error("Validation failed: {0}")]
    Validation(String),
}
