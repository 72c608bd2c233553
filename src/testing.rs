use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::GradeError;
use crate::models::{
    ClassScoringRules, GradedEntity, RosterGroup, ScoreRecord, SeminarRoster, Tier, TierCutoffs,
};
use crate::repository::GradeRepository;

#[derive(Default)]
struct SeminarRow {
    class_id: Uuid,
    topics: Vec<Uuid>,
    groups: Vec<Uuid>,
}

#[derive(Default)]
struct GroupRow {
    report_grade: Option<i32>,
    presentation_grade: Option<f64>,
    final_tier: Option<Tier>,
}

#[derive(Default)]
struct State {
    classes: HashMap<Uuid, ClassScoringRules>,
    seminars: HashMap<Uuid, SeminarRow>,
    groups: HashMap<Uuid, GroupRow>,
    // (group, topic) -> presentation tier points
    selections: BTreeMap<(Uuid, Uuid), Option<i32>>,
    scores: Vec<ScoreRecord>,
    vanished: HashSet<Uuid>,
    persist_delay: Option<Duration>,
    writes: usize,
}

/// In-memory [`GradeRepository`] used by the orchestration tests.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn add_class(&self, high: i32, mid: i32, low: i32, presentation: i32, report: i32) -> Uuid {
        let class_id = Uuid::new_v4();
        let rules = ClassScoringRules {
            class_id,
            presentation_percentage: presentation,
            report_percentage: report,
            cutoffs: TierCutoffs::new(high, mid, low).unwrap(),
        };
        self.state.lock().unwrap().classes.insert(class_id, rules);

        class_id
    }

    pub fn add_seminar(&self, class_id: Uuid) -> Uuid {
        let seminar_id = Uuid::new_v4();
        let row = SeminarRow {
            class_id,
            ..Default::default()
        };
        self.state.lock().unwrap().seminars.insert(seminar_id, row);

        seminar_id
    }

    pub fn add_topic(&self, seminar_id: Uuid) -> Uuid {
        let topic_id = Uuid::new_v4();
        let mut state = self.state.lock().unwrap();
        state.seminars.get_mut(&seminar_id).unwrap().topics.push(topic_id);

        topic_id
    }

    pub fn add_group(&self, seminar_id: Uuid, report_grade: Option<i32>) -> Uuid {
        let group_id = Uuid::new_v4();
        let mut state = self.state.lock().unwrap();
        state.seminars.get_mut(&seminar_id).unwrap().groups.push(group_id);
        state.groups.insert(
            group_id,
            GroupRow {
                report_grade,
                ..Default::default()
            },
        );

        group_id
    }

    pub fn select_topic(&self, group_id: Uuid, topic_id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .selections
            .insert((group_id, topic_id), None);
    }

    pub fn set_topic_tier(&self, group_id: Uuid, topic_id: Uuid, points: i32) {
        self.state
            .lock()
            .unwrap()
            .selections
            .insert((group_id, topic_id), Some(points));
    }

    pub fn score(&self, group_id: Uuid, topic_id: Uuid, grade: i32) {
        self.state.lock().unwrap().scores.push(ScoreRecord {
            student_id: Uuid::new_v4(),
            group_id,
            topic_id,
            grade,
        });
    }

    /// Every later write touching the group fails as if its row was deleted.
    pub fn vanish(&self, group_id: Uuid) {
        self.state.lock().unwrap().vanished.insert(group_id);
    }

    pub fn set_final_tier(&self, group_id: Uuid, tier: Tier) {
        let mut state = self.state.lock().unwrap();
        state.groups.get_mut(&group_id).unwrap().final_tier = Some(tier);
    }

    /// Every tier write sleeps this long before it is applied.
    pub fn delay_persists(&self, delay: Duration) {
        self.state.lock().unwrap().persist_delay = Some(delay);
    }

    async fn wait_before_persist(&self) {
        let delay = self.state.lock().unwrap().persist_delay;

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn topic_tier(&self, group_id: Uuid, topic_id: Uuid) -> Option<i32> {
        let state = self.state.lock().unwrap();
        state.selections.get(&(group_id, topic_id)).copied().flatten()
    }

    pub fn presentation_grade(&self, group_id: Uuid) -> Option<f64> {
        let state = self.state.lock().unwrap();
        state.groups.get(&group_id).and_then(|group| group.presentation_grade)
    }

    pub fn final_tier(&self, group_id: Uuid) -> Option<Tier> {
        let state = self.state.lock().unwrap();
        state.groups.get(&group_id).and_then(|group| group.final_tier)
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }
}

fn check_present(state: &State, group_id: Uuid, entity: GradedEntity) -> Result<(), GradeError> {
    if state.vanished.contains(&group_id) || !state.groups.contains_key(&group_id) {
        Err(GradeError::EntityNotFound { entity })
    } else {
        Ok(())
    }
}

#[async_trait]
impl GradeRepository for MemoryRepository {
    async fn fetch_topics_for_seminar(&self, seminar_id: Uuid) -> Result<Vec<Uuid>, GradeError> {
        let state = self.state.lock().unwrap();

        state
            .seminars
            .get(&seminar_id)
            .map(|seminar| seminar.topics.clone())
            .ok_or(GradeError::SeminarNotFound(seminar_id))
    }

    async fn fetch_groups_for_seminar(
        &self,
        seminar_id: Uuid,
    ) -> Result<SeminarRoster, GradeError> {
        let state = self.state.lock().unwrap();
        let seminar = state
            .seminars
            .get(&seminar_id)
            .ok_or(GradeError::SeminarNotFound(seminar_id))?;

        let groups = seminar
            .groups
            .iter()
            .map(|&group_id| RosterGroup {
                group_id,
                report_grade: state.groups[&group_id].report_grade,
            })
            .collect();

        Ok(SeminarRoster {
            seminar_id,
            class_id: seminar.class_id,
            groups,
        })
    }

    async fn fetch_groups_for_topic(&self, topic_id: Uuid) -> Result<Vec<Uuid>, GradeError> {
        let state = self.state.lock().unwrap();

        Ok(state
            .selections
            .keys()
            .filter(|(_, topic)| *topic == topic_id)
            .map(|(group, _)| *group)
            .collect())
    }

    async fn fetch_scores_for_group_topic(
        &self,
        group_id: Uuid,
        topic_id: Uuid,
    ) -> Result<Vec<ScoreRecord>, GradeError> {
        let state = self.state.lock().unwrap();

        Ok(state
            .scores
            .iter()
            .filter(|record| record.group_id == group_id && record.topic_id == topic_id)
            .cloned()
            .collect())
    }

    async fn fetch_presentation_tiers(&self, group_id: Uuid) -> Result<Vec<i32>, GradeError> {
        let state = self.state.lock().unwrap();

        Ok(state
            .selections
            .iter()
            .filter(|((group, _), _)| *group == group_id)
            .filter_map(|(_, points)| *points)
            .collect())
    }

    async fn fetch_class_cutoffs(&self, class_id: Uuid) -> Result<ClassScoringRules, GradeError> {
        let state = self.state.lock().unwrap();

        state
            .classes
            .get(&class_id)
            .copied()
            .ok_or(GradeError::ClassNotFound(class_id))
    }

    async fn persist_group_topic_tier(
        &self,
        group_id: Uuid,
        topic_id: Uuid,
        tier: Tier,
    ) -> Result<(), GradeError> {
        self.wait_before_persist().await;
        let mut state = self.state.lock().unwrap();
        check_present(&state, group_id, GradedEntity::GroupTopic { group_id, topic_id })?;
        state
            .selections
            .insert((group_id, topic_id), Some(tier.points()));
        state.writes += 1;

        Ok(())
    }

    async fn persist_group_presentation_grade(
        &self,
        group_id: Uuid,
        grade: f64,
    ) -> Result<(), GradeError> {
        let mut state = self.state.lock().unwrap();
        check_present(&state, group_id, GradedEntity::Group { group_id })?;
        state.groups.get_mut(&group_id).unwrap().presentation_grade = Some(grade);
        state.writes += 1;

        Ok(())
    }

    async fn persist_group_tier(&self, group_id: Uuid, tier: Tier) -> Result<(), GradeError> {
        self.wait_before_persist().await;
        let mut state = self.state.lock().unwrap();
        check_present(&state, group_id, GradedEntity::Group { group_id })?;
        state.groups.get_mut(&group_id).unwrap().final_tier = Some(tier);
        state.writes += 1;

        Ok(())
    }

    async fn clear_group_topic_tier(
        &self,
        group_id: Uuid,
        topic_id: Uuid,
    ) -> Result<(), GradeError> {
        let mut state = self.state.lock().unwrap();
        check_present(&state, group_id, GradedEntity::GroupTopic { group_id, topic_id })?;
        state.selections.insert((group_id, topic_id), None);
        state.writes += 1;

        Ok(())
    }

    async fn clear_group_tier(&self, group_id: Uuid) -> Result<(), GradeError> {
        let mut state = self.state.lock().unwrap();
        check_present(&state, group_id, GradedEntity::Group { group_id })?;
        state.groups.get_mut(&group_id).unwrap().final_tier = None;
        state.writes += 1;

        Ok(())
    }
}
