use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aggregate::{average_per_entity, weighted_composite};
use crate::error::GradeError;
use crate::models::{
    GradeTierAssignment, GradedEntity, GroupScore, PersistFailure, RankingBuckets, RunKind,
    RunSummary, Tier,
};
use crate::rank::assign_tiers;
use crate::repository::GradeRepository;

/// Runs the presentation and overall grade computations for seminars.
///
/// Runs for the same seminar must not overlap; the caller serializes them and
/// runs the presentation computation before the group computation.
pub struct GradeService<R> {
    repo: R,
}

impl<R: GradeRepository> GradeService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Ranks every group on every topic of the seminar by its mean peer score
    /// and writes the resulting presentation tier onto the group's topic
    /// selection.
    #[instrument(skip(self))]
    pub async fn compute_presentation_grades(
        &self,
        seminar_id: Uuid,
    ) -> Result<RunSummary, GradeError> {
        let topics = self.repo.fetch_topics_for_seminar(seminar_id).await?;
        let roster = self.repo.fetch_groups_for_seminar(seminar_id).await?;
        let rules = self.repo.fetch_class_cutoffs(roster.class_id).await?;
        debug!(class_id = %rules.class_id, topics = topics.len(), "resolved scoring rules");

        let mut summary = RunSummary::new(seminar_id, RunKind::Presentation);

        for topic_id in topics {
            let groups = self.repo.fetch_groups_for_topic(topic_id).await?;
            let mut peer_scores = Vec::new();

            for &group_id in &groups {
                let records = self
                    .repo
                    .fetch_scores_for_group_topic(group_id, topic_id)
                    .await?;
                peer_scores.extend(records.into_iter().map(|record| (group_id, record.grade)));
            }

            let averages = average_per_entity(peer_scores);

            for &group_id in &groups {
                if !averages.contains_key(&group_id) {
                    debug!(%group_id, %topic_id, "no peer scores, skipping group");
                    let entity = GradedEntity::GroupTopic { group_id, topic_id };
                    self.exclude(&mut summary, entity).await?;
                }
            }

            let scores = averages
                .into_iter()
                .map(|(entity_id, score)| GroupScore { entity_id, score })
                .collect();

            let (counts, ranked) = assign_tiers(scores, &rules.cutoffs);
            summary.buckets.push(RankingBuckets {
                topic_id: Some(topic_id),
                counts,
            });

            for (score, tier) in ranked {
                let group_id = score.entity_id;
                let entity = GradedEntity::GroupTopic { group_id, topic_id };
                let res = self
                    .repo
                    .persist_group_topic_tier(group_id, topic_id, tier)
                    .await;

                if recover(&mut summary, entity, res)? {
                    summary.assignments.push(GradeTierAssignment {
                        entity,
                        score: score.score,
                        tier,
                    });
                }
            }
        }

        log_summary(&summary);

        Ok(summary)
    }

    /// Blends each group's presentation grade with its report grade using
    /// the class's percentage split, ranks the composites and writes the
    /// final tier onto the group.
    ///
    /// Reads the presentation tiers left by the latest
    /// [`compute_presentation_grades`](Self::compute_presentation_grades) run.
    #[instrument(skip(self))]
    pub async fn compute_group_grades(&self, seminar_id: Uuid) -> Result<RunSummary, GradeError> {
        let roster = self.repo.fetch_groups_for_seminar(seminar_id).await?;
        let rules = self.repo.fetch_class_cutoffs(roster.class_id).await?;

        let mut summary = RunSummary::new(seminar_id, RunKind::Group);
        let mut composites = Vec::with_capacity(roster.groups.len());

        for group in roster.groups {
            let group_id = group.group_id;
            let entity = GradedEntity::Group { group_id };

            let tiers = self.repo.fetch_presentation_tiers(group_id).await?;
            let averages = average_per_entity(tiers.into_iter().map(|points| (group_id, points)));

            let Some(&presentation) = averages.get(&group_id) else {
                debug!(%group_id, "no presentation grade, skipping group");
                self.exclude(&mut summary, entity).await?;
                continue;
            };

            let res = self
                .repo
                .persist_group_presentation_grade(group_id, presentation)
                .await;

            if !recover(&mut summary, entity, res)? {
                continue;
            }

            let Some(report) = group.report_grade else {
                debug!(%group_id, "no report grade, skipping group");
                self.exclude(&mut summary, entity).await?;
                continue;
            };

            let score = weighted_composite(&[
                (presentation, f64::from(rules.presentation_percentage)),
                (f64::from(report), f64::from(rules.report_percentage)),
            ]);

            composites.push(GroupScore {
                entity_id: group_id,
                score,
            });
        }

        let (counts, ranked) = assign_tiers(composites, &rules.cutoffs);
        summary.buckets.push(RankingBuckets {
            topic_id: None,
            counts,
        });

        for (score, tier) in ranked {
            let group_id = score.entity_id;
            let entity = GradedEntity::Group { group_id };
            let res = self.repo.persist_group_tier(group_id, tier).await;

            if recover(&mut summary, entity, res)? {
                summary.assignments.push(GradeTierAssignment {
                    entity,
                    score: score.score,
                    tier,
                });
            }
        }

        log_summary(&summary);

        Ok(summary)
    }

    /// Records an entity left out of the ranking and drops any tier an
    /// earlier run gave it, so later runs never read it.
    async fn exclude(
        &self,
        summary: &mut RunSummary,
        entity: GradedEntity,
    ) -> Result<(), GradeError> {
        summary.excluded.push(entity);

        let res = match entity {
            GradedEntity::GroupTopic { group_id, topic_id } => {
                self.repo.clear_group_topic_tier(group_id, topic_id).await
            }
            GradedEntity::Group { group_id } => self.repo.clear_group_tier(group_id).await,
        };

        recover(summary, entity, res).map(|_| ())
    }
}

/// Awaits a grade run, giving up once `timeout` elapses.
///
/// A run cut off this way fails with [`GradeError::TimedOut`]; entities it
/// already persisted keep their new tiers.
pub async fn run_with_deadline<F>(
    timeout: Option<Duration>,
    run: F,
) -> Result<RunSummary, GradeError>
where
    F: Future<Output = Result<RunSummary, GradeError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, run)
            .await
            .map_err(|_| GradeError::TimedOut(limit))?,
        None => run.await,
    }
}

/// Returns whether the write went through. A vanished entity is recorded as
/// a failure of that entity alone; any other error aborts the run.
fn recover(
    summary: &mut RunSummary,
    entity: GradedEntity,
    res: Result<(), GradeError>,
) -> Result<bool, GradeError> {
    match res {
        Ok(()) => Ok(true),
        Err(err) if err.is_entity_not_found() => {
            warn!(%entity, "failed to persist grade: {err}");

            summary.failures.push(PersistFailure {
                entity,
                reason: err.to_string(),
            });

            Ok(false)
        }
        Err(err) => Err(err),
    }
}

fn log_summary(summary: &RunSummary) {
    let count = |tier: Tier| {
        summary
            .assignments
            .iter()
            .filter(|assignment| assignment.tier == tier)
            .count()
    };

    info!(
        seminar_id = %summary.seminar_id,
        kind = %summary.kind,
        top = count(Tier::Top),
        mid = count(Tier::Mid),
        baseline = count(Tier::Baseline),
        failed = summary.failures.len(),
        excluded = summary.excluded.len(),
        "grade run finished"
    );
}
