//! Progress ledger: the enrollment entity, lesson completion, and the
//! derived progress percentage.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;

use crate::access;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::identity::{Caller, Role};
use crate::utils::now_local;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Paused,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Paused => "paused",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            "paused" => Ok(EnrollmentStatus::Paused),
            "cancelled" => Ok(EnrollmentStatus::Cancelled),
            other => Err(Error::Integrity(format!(
                "unknown enrollment status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Completed | EnrollmentStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedLesson {
    pub lesson_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub status: EnrollmentStatus,
    pub progress: i64,
    pub completed_lessons: Vec<CompletedLesson>,
    pub enrolled_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl Enrollment {
    pub fn completed_ids(&self) -> HashSet<i64> {
        self.completed_lessons.iter().map(|c| c.lesson_id).collect()
    }

    /// Idempotent append. Returns whether the lesson was newly recorded.
    pub fn complete_lesson(&mut self, lesson_id: i64) -> bool {
        if self.completed_lessons.iter().any(|c| c.lesson_id == lesson_id) {
            return false;
        }
        self.completed_lessons.push(CompletedLesson {
            lesson_id,
            completed_at: now_local(),
        });
        true
    }

    /// Re-derive the percentage from the completed set. On first reaching
    /// 100 while active, the enrollment flips to completed and stamps
    /// `completed_at`; that transition never runs in reverse.
    pub fn recompute_progress(&mut self, total_lessons: usize) {
        self.progress = if total_lessons == 0 {
            0
        } else {
            let pct = self.completed_lessons.len() as f64 / total_lessons as f64 * 100.0;
            (pct.round() as i64).clamp(0, 100)
        };
        if self.progress == 100 && self.status == EnrollmentStatus::Active {
            self.status = EnrollmentStatus::Completed;
            if self.completed_at.is_none() {
                self.completed_at = Some(now_local());
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    id: i64,
    student_id: i64,
    course_id: i64,
    status: String,
    progress: i64,
    completed_lessons: String,
    enrolled_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl TryFrom<EnrollmentRow> for Enrollment {
    type Error = Error;

    fn try_from(row: EnrollmentRow) -> Result<Enrollment> {
        let status = EnrollmentStatus::parse(&row.status)?;
        let completed_lessons = serde_json::from_str(&row.completed_lessons).map_err(|e| {
            Error::Integrity(format!(
                "enrollment {} has a malformed completion ledger: {e}",
                row.id
            ))
        })?;
        Ok(Enrollment {
            id: row.id,
            student_id: row.student_id,
            course_id: row.course_id,
            status,
            progress: row.progress,
            completed_lessons,
            enrolled_at: row.enrolled_at,
            completed_at: row.completed_at,
        })
    }
}

const SELECT_ENROLLMENT: &str = "select id, student_id, course_id, status, progress, \
     completed_lessons, enrolled_at, completed_at from enrollment \
     where student_id = ? and course_id = ?";

/// Atomic insert-if-absent; the unique (student, course) index makes the
/// loser of a concurrent double-enroll fail loudly.
pub async fn enroll(pool: &SqlitePool, caller: Caller, course_id: i64) -> Result<Enrollment> {
    if caller.role != Role::Student {
        return Err(Error::AccessDenied("only students may enroll".into()));
    }
    let course: Option<i64> = sqlx::query_scalar("select id from course where id = ?")
        .bind(course_id)
        .fetch_optional(pool)
        .await?;
    if course.is_none() {
        return Err(Error::not_found("course", course_id));
    }
    let now = now_local();
    let result = sqlx::query(
        "insert into enrollment (student_id, course_id, status, progress, completed_lessons, enrolled_at) \
         values (?, ?, 'active', 0, '[]', ?)",
    )
    .bind(caller.id)
    .bind(course_id)
    .bind(now)
    .execute(pool)
    .await;
    let result = match result {
        Ok(result) => result,
        Err(e) if Error::is_unique_violation(&e) => {
            return Err(Error::PolicyViolation(format!(
                "student {} is already enrolled in course {course_id}",
                caller.id
            )));
        }
        Err(e) => return Err(e.into()),
    };
    info!("student {} enrolled in course {course_id}", caller.id);
    Ok(Enrollment {
        id: result.last_insert_rowid(),
        student_id: caller.id,
        course_id,
        status: EnrollmentStatus::Active,
        progress: 0,
        completed_lessons: vec![],
        enrolled_at: now,
        completed_at: None,
    })
}

pub async fn get(
    pool: &SqlitePool,
    student_id: i64,
    course_id: i64,
) -> Result<Option<Enrollment>> {
    let row = sqlx::query_as::<_, EnrollmentRow>(SELECT_ENROLLMENT)
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(pool)
        .await?;
    row.map(Enrollment::try_from).transpose()
}

/// Record a lesson completion for the calling student. The accessibility
/// check runs against the pre-completion state; append, recompute and
/// persist happen in one transaction.
pub async fn complete_lesson(
    catalog: &Catalog,
    caller: Caller,
    course_id: i64,
    lesson_id: i64,
) -> Result<Enrollment> {
    if caller.role != Role::Student {
        return Err(Error::AccessDenied(
            "only the enrolled student may complete lessons".into(),
        ));
    }
    let tree = catalog.course_tree(course_id).await?;
    if tree.lesson(lesson_id).is_none() {
        return Err(Error::not_found("lesson", lesson_id));
    }

    let pool = &catalog.database;
    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, EnrollmentRow>(SELECT_ENROLLMENT)
        .bind(caller.id)
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::NotFound(format!(
            "enrollment of student {} in course {course_id}",
            caller.id
        )))?;
    let mut enrollment = Enrollment::try_from(row)?;
    if matches!(
        enrollment.status,
        EnrollmentStatus::Paused | EnrollmentStatus::Cancelled
    ) {
        return Err(Error::PolicyViolation(format!(
            "enrollment is {}",
            enrollment.status.as_str()
        )));
    }

    let map = access::evaluate(&tree, &enrollment.completed_ids());
    if !map.lesson(lesson_id) {
        return Err(Error::AccessDenied(format!(
            "lesson {lesson_id} is not yet unlocked"
        )));
    }

    let was_completed = enrollment.status == EnrollmentStatus::Completed;
    enrollment.complete_lesson(lesson_id);
    enrollment.recompute_progress(tree.total_lessons());
    let ledger = serde_json::to_string(&enrollment.completed_lessons)
        .map_err(|e| Error::Integrity(format!("unserializable completion ledger: {e}")))?;
    sqlx::query(
        "update enrollment set status = ?, progress = ?, completed_lessons = ?, completed_at = ? \
         where id = ?",
    )
    .bind(enrollment.status.as_str())
    .bind(enrollment.progress)
    .bind(&ledger)
    .bind(enrollment.completed_at)
    .bind(enrollment.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    if !was_completed && enrollment.status == EnrollmentStatus::Completed {
        info!(
            "student {} completed course {course_id}",
            enrollment.student_id
        );
    }
    Ok(enrollment)
}

pub async fn pause(pool: &SqlitePool, caller: Caller, course_id: i64) -> Result<Enrollment> {
    set_status(pool, caller, course_id, EnrollmentStatus::Paused).await
}

pub async fn resume(pool: &SqlitePool, caller: Caller, course_id: i64) -> Result<Enrollment> {
    set_status(pool, caller, course_id, EnrollmentStatus::Active).await
}

pub async fn cancel(pool: &SqlitePool, caller: Caller, course_id: i64) -> Result<Enrollment> {
    set_status(pool, caller, course_id, EnrollmentStatus::Cancelled).await
}

async fn set_status(
    pool: &SqlitePool,
    caller: Caller,
    course_id: i64,
    target: EnrollmentStatus,
) -> Result<Enrollment> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, EnrollmentRow>(SELECT_ENROLLMENT)
        .bind(caller.id)
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::NotFound(format!(
            "enrollment of student {} in course {course_id}",
            caller.id
        )))?;
    let mut enrollment = Enrollment::try_from(row)?;
    let allowed = matches!(
        (enrollment.status, target),
        (EnrollmentStatus::Active, EnrollmentStatus::Paused)
            | (EnrollmentStatus::Paused, EnrollmentStatus::Active)
            | (EnrollmentStatus::Active, EnrollmentStatus::Cancelled)
            | (EnrollmentStatus::Paused, EnrollmentStatus::Cancelled)
    );
    if !allowed {
        return Err(Error::PolicyViolation(format!(
            "cannot move a {} enrollment to {}",
            enrollment.status.as_str(),
            target.as_str()
        )));
    }
    enrollment.status = target;
    sqlx::query("update enrollment set status = ? where id = ?")
        .bind(target.as_str())
        .bind(enrollment.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(enrollment)
}
