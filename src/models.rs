use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::error::GradeError;

/// Accepted range for peer and report grades.
pub const MIN_GRADE: i32 = 0;
pub const MAX_GRADE: i32 = 100;

/// One student's peer score for a group's presentation of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRecord {
    pub student_id: Uuid,
    pub group_id: Uuid,
    pub topic_id: Uuid,
    pub grade: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroupScore {
    pub entity_id: Uuid,
    pub score: f64,
}

/// Bucket sizes as percentages of the ranked population.
///
/// The three values need not sum to 100; whatever is left over lands in the
/// baseline tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierCutoffs {
    pub high: u32,
    pub mid: u32,
    pub low: u32,
}

impl TierCutoffs {
    pub fn new(high: i32, mid: i32, low: i32) -> Result<Self, GradeError> {
        Ok(Self {
            high: percentage("high", high)?,
            mid: percentage("mid", mid)?,
            low: percentage("low", low)?,
        })
    }
}

fn percentage(label: &str, value: i32) -> Result<u32, GradeError> {
    match u32::try_from(value) {
        Ok(pct) if pct <= 100 => Ok(pct),
        _ => Err(GradeError::InvalidCutoffs(format!(
            "{label} percentage {value} is outside 0..=100"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassScoringRules {
    pub class_id: Uuid,
    pub presentation_percentage: i32,
    pub report_percentage: i32,
    pub cutoffs: TierCutoffs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Baseline,
    Mid,
    Top,
}

impl Tier {
    pub fn points(self) -> i32 {
        match self {
            Tier::Top => 5,
            Tier::Mid => 4,
            Tier::Baseline => 3,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tier::Top => "top",
            Tier::Mid => "mid",
            Tier::Baseline => "baseline",
        };

        write!(f, "{label} ({} points)", self.points())
    }
}

/// The record a tier gets written back onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GradedEntity {
    GroupTopic { group_id: Uuid, topic_id: Uuid },
    Group { group_id: Uuid },
}

impl fmt::Display for GradedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradedEntity::GroupTopic { group_id, topic_id } => {
                write!(f, "group {group_id} on topic {topic_id}")
            }
            GradedEntity::Group { group_id } => write!(f, "group {group_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradeTierAssignment {
    pub entity: GradedEntity,
    pub score: f64,
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterGroup {
    pub group_id: Uuid,
    pub report_grade: Option<i32>,
}

/// Groups of a seminar together with the class that owns its scoring rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeminarRoster {
    pub seminar_id: Uuid,
    pub class_id: Uuid,
    pub groups: Vec<RosterGroup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Presentation,
    Group,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Presentation => f.write_str("presentation"),
            RunKind::Group => f.write_str("group"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    pub high: usize,
    pub mid: usize,
    pub low: usize,
}

/// Bucket sizes of one ranking; `topic_id` is set for per-topic rankings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankingBuckets {
    pub topic_id: Option<Uuid>,
    pub counts: BucketCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistFailure {
    pub entity: GradedEntity,
    pub reason: String,
}

/// Outcome of one computation run over a seminar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub seminar_id: Uuid,
    pub kind: RunKind,
    pub buckets: Vec<RankingBuckets>,
    pub assignments: Vec<GradeTierAssignment>,
    pub failures: Vec<PersistFailure>,
    pub excluded: Vec<GradedEntity>,
}

impl RunSummary {
    pub fn new(seminar_id: Uuid, kind: RunKind) -> Self {
        Self {
            seminar_id,
            kind,
            buckets: Vec::new(),
            assignments: Vec::new(),
            failures: Vec::new(),
            excluded: Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Grade columns of one seminar group, as listed in reports.
#[derive(Debug, Clone)]
pub struct GroupGradeRow {
    pub group_id: Uuid,
    pub group_name: String,
    pub presentation_grade: Option<f64>,
    pub report_grade: Option<i32>,
    pub final_grade: Option<i32>,
}
