use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{Encode, PgPool, Postgres, Row, Type};
use tracing::debug;
use uuid::Uuid;

use crate::error::GradeError;
use crate::models::{
    ClassScoringRules, GradedEntity, GroupGradeRow, RosterGroup, ScoreRecord, SeminarRoster, Tier,
    TierCutoffs, MAX_GRADE, MIN_GRADE,
};
use crate::repository::GradeRepository;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<Uuid> {
    let class_id = Uuid::parse_str("f5f60a2d-11fe-4031-9a83-5081502ec3b6")?;
    let seminar_id = Uuid::parse_str("9b2e0134-8f56-4fc0-bce8-f6b2e0f08d06")?;

    sqlx::query(
        r#"
        INSERT INTO seminar_grading.classes
        (id, name, presentation_percentage, report_percentage,
         five_point_percentage, four_point_percentage, three_point_percentage)
        VALUES ($1, $2, 60, 40, 25, 50, 25)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(class_id)
    .bind("Object Oriented Design, Class 1")
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO seminar_grading.seminars (id, class_id, title, ends_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(seminar_id)
    .bind(class_id)
    .bind("Seminar 3: Domain Modelling")
    .bind(Utc::now() - Duration::days(1))
    .execute(pool)
    .await?;

    let topics = vec![
        (
            Uuid::parse_str("2de212e8-50af-4256-904d-e7d18629e2c7")?,
            "Modelling the course catalogue",
        ),
        (
            Uuid::parse_str("6250bd27-188b-4362-bdf4-be78c3843dd5")?,
            "Attendance as an aggregate",
        ),
    ];

    for (id, title) in &topics {
        sqlx::query(
            r#"
            INSERT INTO seminar_grading.topics (id, seminar_id, title)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(seminar_id)
        .bind(title)
        .execute(pool)
        .await?;
    }

    let groups = vec![
        (
            Uuid::parse_str("c7399084-5729-4810-a36c-1e5ed5eb490c")?,
            "1A",
            88,
            topics[0].0,
        ),
        (
            Uuid::parse_str("fce951de-a24a-40d8-a3b2-7cdb1c1f8167")?,
            "1B",
            74,
            topics[0].0,
        ),
        (
            Uuid::parse_str("99264610-5c5d-4d23-a34b-c0f2ad938c0f")?,
            "1C",
            91,
            topics[1].0,
        ),
        (
            Uuid::parse_str("e0184deb-0b35-4c05-908b-ca973eaefcb2")?,
            "1D",
            65,
            topics[1].0,
        ),
    ];

    let students = vec![
        (
            Uuid::parse_str("164f6f59-af53-48f7-865f-4f87b76f190d")?,
            "Lin Qiao",
            "lin.qiao@example.edu",
        ),
        (
            Uuid::parse_str("b4cf4763-2426-4d17-89ae-c1a17acedd7d")?,
            "Mateo Ruiz",
            "mateo.ruiz@example.edu",
        ),
        (
            Uuid::parse_str("2341f243-9ea5-4905-8da1-9d857b533516")?,
            "Noor Haddad",
            "noor.haddad@example.edu",
        ),
    ];

    for (id, name, email) in &students {
        sqlx::query(
            r#"
            INSERT INTO seminar_grading.students (id, full_name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let peer_grades = [[92, 78, 85, 60], [88, 81, 90, 58], [95, 70, 87, 66]];

    for (group_idx, (group_id, name, report_grade, topic_id)) in groups.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO seminar_grading.seminar_groups (id, seminar_id, name, report_grade)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET report_grade = EXCLUDED.report_grade
            "#,
        )
        .bind(group_id)
        .bind(seminar_id)
        .bind(name)
        .bind(report_grade)
        .execute(pool)
        .await?;

        let selection_id = select_topic(pool, *group_id, *topic_id).await?;

        for ((student_id, _, _), grades) in students.iter().zip(peer_grades.iter()) {
            upsert_peer_score(pool, selection_id, *student_id, grades[group_idx]).await?;
        }
    }

    Ok(seminar_id)
}

async fn select_topic(pool: &PgPool, group_id: Uuid, topic_id: Uuid) -> anyhow::Result<Uuid> {
    let selection_id: Uuid = sqlx::query(
        r#"
        INSERT INTO seminar_grading.seminar_group_topics (id, seminar_group_id, topic_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (seminar_group_id, topic_id) DO UPDATE SET topic_id = EXCLUDED.topic_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(group_id)
    .bind(topic_id)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(selection_id)
}

/// Returns whether a row was inserted or changed.
async fn upsert_peer_score(
    pool: &PgPool,
    selection_id: Uuid,
    student_id: Uuid,
    grade: i32,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO seminar_grading.student_score_groups
        (id, student_id, seminar_group_topic_id, grade, scored_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (student_id, seminar_group_topic_id) DO UPDATE
        SET grade = EXCLUDED.grade, scored_at = EXCLUDED.scored_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(selection_id)
    .bind(grade)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn find_selection(pool: &PgPool, group_id: Uuid, topic_id: Uuid) -> anyhow::Result<Uuid> {
    let selection_id: Uuid = sqlx::query(
        r#"
        SELECT id FROM seminar_grading.seminar_group_topics
        WHERE seminar_group_id = $1 AND topic_id = $2
        "#,
    )
    .bind(group_id)
    .bind(topic_id)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("group {group_id} has not selected topic {topic_id}"))?
    .get("id");

    Ok(selection_id)
}

/// Records a student's score for a group's presentation; a second submission
/// by the same student replaces the first.
pub async fn submit_peer_score(
    pool: &PgPool,
    topic_id: Uuid,
    group_id: Uuid,
    student_id: Uuid,
    grade: i32,
) -> anyhow::Result<()> {
    let selection_id = find_selection(pool, group_id, topic_id).await?;
    upsert_peer_score(pool, selection_id, student_id, grade).await?;
    Ok(())
}

pub async fn set_report_grade(pool: &PgPool, group_id: Uuid, grade: i32) -> anyhow::Result<()> {
    let result = sqlx::query(
        "UPDATE seminar_grading.seminar_groups SET report_grade = $2 WHERE id = $1",
    )
    .bind(group_id)
    .bind(grade)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("seminar group {group_id} not found");
    }

    Ok(())
}

/// Deletes every peer score given on the topic and returns how many were removed.
pub async fn clear_topic_scores(pool: &PgPool, topic_id: Uuid) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        DELETE FROM seminar_grading.student_score_groups ssg
        USING seminar_grading.seminar_group_topics sgt
        WHERE ssg.seminar_group_topic_id = sgt.id AND sgt.topic_id = $1
        "#,
    )
    .bind(topic_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(result.rows_affected())
}

/// Rejects a grade outside `MIN_GRADE..=MAX_GRADE`, naming the CSV line.
fn check_grade(line: usize, grade: i32) -> anyhow::Result<i32> {
    if !(MIN_GRADE..=MAX_GRADE).contains(&grade) {
        anyhow::bail!("line {line}: grade {grade} is outside {MIN_GRADE}..={MAX_GRADE}");
    }

    Ok(grade)
}

pub async fn import_scores(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_email: String,
        group_id: Uuid,
        topic_id: Uuid,
        grade: i32,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut written = 0usize;

    for (idx, result) in reader.deserialize::<CsvRow>().enumerate() {
        // line 1 is the header
        let line = idx + 2;
        let row = result.with_context(|| format!("line {line}: invalid score row"))?;
        let grade = check_grade(line, row.grade)?;

        let student_id: Uuid =
            sqlx::query("SELECT id FROM seminar_grading.students WHERE email = $1")
                .bind(&row.student_email)
                .fetch_optional(pool)
                .await?
                .with_context(|| format!("unknown student {}", row.student_email))?
                .get("id");

        let selection_id = find_selection(pool, row.group_id, row.topic_id).await?;

        if upsert_peer_score(pool, selection_id, student_id, grade).await? {
            written += 1;
        }
    }

    Ok(written)
}

pub async fn fetch_seminar_title(pool: &PgPool, seminar_id: Uuid) -> anyhow::Result<String> {
    let title: String = sqlx::query("SELECT title FROM seminar_grading.seminars WHERE id = $1")
        .bind(seminar_id)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("seminar {seminar_id} not found"))?
        .get("title");

    Ok(title)
}

pub async fn fetch_seminar_grades(
    pool: &PgPool,
    seminar_id: Uuid,
) -> anyhow::Result<Vec<GroupGradeRow>> {
    let records = sqlx::query(
        r#"
        SELECT id, name, presentation_grade, report_grade, final_grade
        FROM seminar_grading.seminar_groups
        WHERE seminar_id = $1
        ORDER BY name
        "#,
    )
    .bind(seminar_id)
    .fetch_all(pool)
    .await?;

    let mut rows = Vec::with_capacity(records.len());

    for row in records {
        rows.push(GroupGradeRow {
            group_id: row.get("id"),
            group_name: row.get("name"),
            presentation_grade: row.get("presentation_grade"),
            report_grade: row.get("report_grade"),
            final_grade: row.get("final_grade"),
        });
    }

    Ok(rows)
}

/// [`GradeRepository`] backed by the Postgres schema in `migrations/`.
pub struct PgGradeRepository {
    pool: PgPool,
}

impl PgGradeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn seminar_class(&self, seminar_id: Uuid) -> Result<Uuid, GradeError> {
        let row = sqlx::query("SELECT class_id FROM seminar_grading.seminars WHERE id = $1")
            .bind(seminar_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GradeError::SeminarNotFound(seminar_id))?;

        Ok(row.get("class_id"))
    }

    /// Locks the topic selection and sets its presentation tier, `None`
    /// clearing it.
    async fn update_group_topic(
        &self,
        group_id: Uuid,
        topic_id: Uuid,
        points: Option<i32>,
    ) -> Result<(), GradeError> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query(
            r#"
            SELECT id FROM seminar_grading.seminar_group_topics
            WHERE seminar_group_id = $1 AND topic_id = $2
            FOR UPDATE
            "#,
        )
        .bind(group_id)
        .bind(topic_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = locked else {
            return Err(GradeError::EntityNotFound {
                entity: GradedEntity::GroupTopic { group_id, topic_id },
            });
        };

        let selection_id: Uuid = row.get("id");

        sqlx::query(
            "UPDATE seminar_grading.seminar_group_topics SET presentation_grade = $2 WHERE id = $1",
        )
        .bind(selection_id)
        .bind(points)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Locks the group row and runs `update` (`$1` = group id, `$2` = value)
    /// in one transaction.
    async fn update_group<T>(
        &self,
        group_id: Uuid,
        update: &'static str,
        value: T,
    ) -> Result<(), GradeError>
    where
        T: for<'q> Encode<'q, Postgres> + Type<Postgres> + Send + 'static,
    {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query(
            "SELECT id FROM seminar_grading.seminar_groups WHERE id = $1 FOR UPDATE",
        )
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            return Err(GradeError::EntityNotFound {
                entity: GradedEntity::Group { group_id },
            });
        }

        sqlx::query(update)
            .bind(group_id)
            .bind(value)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[async_trait]
impl GradeRepository for PgGradeRepository {
    async fn fetch_topics_for_seminar(&self, seminar_id: Uuid) -> Result<Vec<Uuid>, GradeError> {
        self.seminar_class(seminar_id).await?;

        let rows = sqlx::query(
            "SELECT id FROM seminar_grading.topics WHERE seminar_id = $1 ORDER BY title",
        )
        .bind(seminar_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn fetch_groups_for_seminar(
        &self,
        seminar_id: Uuid,
    ) -> Result<SeminarRoster, GradeError> {
        let class_id = self.seminar_class(seminar_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, report_grade FROM seminar_grading.seminar_groups
            WHERE seminar_id = $1
            ORDER BY id
            "#,
        )
        .bind(seminar_id)
        .fetch_all(&self.pool)
        .await?;

        let groups = rows
            .iter()
            .map(|row| RosterGroup {
                group_id: row.get("id"),
                report_grade: row.get("report_grade"),
            })
            .collect();

        Ok(SeminarRoster {
            seminar_id,
            class_id,
            groups,
        })
    }

    async fn fetch_groups_for_topic(&self, topic_id: Uuid) -> Result<Vec<Uuid>, GradeError> {
        let rows = sqlx::query(
            r#"
            SELECT seminar_group_id FROM seminar_grading.seminar_group_topics
            WHERE topic_id = $1
            ORDER BY seminar_group_id
            "#,
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("seminar_group_id")).collect())
    }

    async fn fetch_scores_for_group_topic(
        &self,
        group_id: Uuid,
        topic_id: Uuid,
    ) -> Result<Vec<ScoreRecord>, GradeError> {
        let rows = sqlx::query(
            r#"
            SELECT ssg.student_id, ssg.grade
            FROM seminar_grading.student_score_groups ssg
            JOIN seminar_grading.seminar_group_topics sgt ON sgt.id = ssg.seminar_group_topic_id
            WHERE sgt.seminar_group_id = $1 AND sgt.topic_id = $2
            "#,
        )
        .bind(group_id)
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(%group_id, %topic_id, count = rows.len(), "fetched peer scores");

        Ok(rows
            .iter()
            .map(|row| ScoreRecord {
                student_id: row.get("student_id"),
                group_id,
                topic_id,
                grade: row.get("grade"),
            })
            .collect())
    }

    async fn fetch_presentation_tiers(&self, group_id: Uuid) -> Result<Vec<i32>, GradeError> {
        let rows = sqlx::query(
            r#"
            SELECT presentation_grade FROM seminar_grading.seminar_group_topics
            WHERE seminar_group_id = $1 AND presentation_grade IS NOT NULL
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("presentation_grade")).collect())
    }

    async fn fetch_class_cutoffs(&self, class_id: Uuid) -> Result<ClassScoringRules, GradeError> {
        let row = sqlx::query(
            r#"
            SELECT presentation_percentage, report_percentage,
                   five_point_percentage, four_point_percentage, three_point_percentage
            FROM seminar_grading.classes
            WHERE id = $1
            "#,
        )
        .bind(class_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(GradeError::ClassNotFound(class_id))?;

        let cutoffs = TierCutoffs::new(
            row.get("five_point_percentage"),
            row.get("four_point_percentage"),
            row.get("three_point_percentage"),
        )?;

        Ok(ClassScoringRules {
            class_id,
            presentation_percentage: row.get("presentation_percentage"),
            report_percentage: row.get("report_percentage"),
            cutoffs,
        })
    }

    async fn persist_group_topic_tier(
        &self,
        group_id: Uuid,
        topic_id: Uuid,
        tier: Tier,
    ) -> Result<(), GradeError> {
        self.update_group_topic(group_id, topic_id, Some(tier.points())).await
    }

    async fn persist_group_presentation_grade(
        &self,
        group_id: Uuid,
        grade: f64,
    ) -> Result<(), GradeError> {
        self.update_group(
            group_id,
            "UPDATE seminar_grading.seminar_groups SET presentation_grade = $2 WHERE id = $1",
            grade,
        )
        .await
    }

    async fn persist_group_tier(&self, group_id: Uuid, tier: Tier) -> Result<(), GradeError> {
        self.update_group(
            group_id,
            "UPDATE seminar_grading.seminar_groups SET final_grade = $2 WHERE id = $1",
            tier.points(),
        )
        .await
    }

    async fn clear_group_topic_tier(
        &self,
        group_id: Uuid,
        topic_id: Uuid,
    ) -> Result<(), GradeError> {
        self.update_group_topic(group_id, topic_id, None).await
    }

    async fn clear_group_tier(&self, group_id: Uuid) -> Result<(), GradeError> {
        self.update_group(
            group_id,
            "UPDATE seminar_grading.seminar_groups SET final_grade = $2 WHERE id = $1",
            None::<i32>,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_inside_range_pass() {
        assert_eq!(check_grade(2, 0).unwrap(), 0);
        assert_eq!(check_grade(3, 100).unwrap(), 100);
    }

    #[test]
    fn out_of_range_grade_names_its_line() {
        let err = check_grade(7, 140).unwrap_err().to_string();
        assert!(err.contains("line 7"));
        assert!(err.contains("140"));

        assert!(check_grade(4, -1).is_err());
    }
}
