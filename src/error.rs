use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::models::GradedEntity;

/// Failures raised while computing or persisting grades.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("seminar {0} not found")]
    SeminarNotFound(Uuid),

    #[error("class {0} not found")]
    ClassNotFound(Uuid),

    /// The row backing an assignment vanished between collection and persistence.
    #[error("{entity} not found")]
    EntityNotFound { entity: GradedEntity },

    #[error("invalid tier cutoffs: {0}")]
    InvalidCutoffs(String),

    /// Writes committed before the deadline are kept.
    #[error("grade run timed out after {0:?}")]
    TimedOut(Duration),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl GradeError {
    pub fn is_entity_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound { .. })
    }
}
