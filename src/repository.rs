use async_trait::async_trait;
use uuid::Uuid;

use crate::error::GradeError;
use crate::models::{ClassScoringRules, ScoreRecord, SeminarRoster, Tier};

/// Storage the grade computation reads scores from and writes tiers back to.
///
/// The `persist_*` operations fail with [`GradeError::EntityNotFound`] when
/// the target row no longer exists.
#[async_trait]
pub trait GradeRepository: Send + Sync {
    /// Fails with [`GradeError::SeminarNotFound`].
    async fn fetch_topics_for_seminar(&self, seminar_id: Uuid) -> Result<Vec<Uuid>, GradeError>;

    /// Fails with [`GradeError::SeminarNotFound`].
    async fn fetch_groups_for_seminar(&self, seminar_id: Uuid)
        -> Result<SeminarRoster, GradeError>;

    /// Groups that selected the topic.
    async fn fetch_groups_for_topic(&self, topic_id: Uuid) -> Result<Vec<Uuid>, GradeError>;

    async fn fetch_scores_for_group_topic(
        &self,
        group_id: Uuid,
        topic_id: Uuid,
    ) -> Result<Vec<ScoreRecord>, GradeError>;

    /// Presentation tier points of every topic the group has been graded on.
    async fn fetch_presentation_tiers(&self, group_id: Uuid) -> Result<Vec<i32>, GradeError>;

    /// Fails with [`GradeError::ClassNotFound`].
    async fn fetch_class_cutoffs(&self, class_id: Uuid) -> Result<ClassScoringRules, GradeError>;

    async fn persist_group_topic_tier(
        &self,
        group_id: Uuid,
        topic_id: Uuid,
        tier: Tier,
    ) -> Result<(), GradeError>;

    async fn persist_group_presentation_grade(
        &self,
        group_id: Uuid,
        grade: f64,
    ) -> Result<(), GradeError>;

    async fn persist_group_tier(&self, group_id: Uuid, tier: Tier) -> Result<(), GradeError>;

    /// Removes the presentation tier of a group-topic left out of a ranking.
    async fn clear_group_topic_tier(&self, group_id: Uuid, topic_id: Uuid)
        -> Result<(), GradeError>;

    /// Removes the final tier of a group left out of a ranking.
    async fn clear_group_tier(&self, group_id: Uuid) -> Result<(), GradeError>;
}
