//! Course aggregate recomputation. Triggered after content mutations,
//! runs detached, and its failure never surfaces as the triggering
//! write's error.

use sqlx::SqlitePool;
use tracing::{error, info};

use crate::catalog::course::Duration;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseTotals {
    pub total_lessons: i64,
    pub total_quizzes: i64,
    pub total_duration: Duration,
}

pub async fn recalculate(pool: &SqlitePool, course_id: i64) -> Result<CourseTotals> {
    let course: Option<i64> = sqlx::query_scalar("select id from course where id = ?")
        .bind(course_id)
        .fetch_optional(pool)
        .await?;
    if course.is_none() {
        return Err(Error::not_found("course", course_id));
    }
    let (total_lessons, duration_seconds): (i64, i64) = sqlx::query_as(
        "select count(*), coalesce(sum(duration_seconds), 0) from lesson where course_id = ?",
    )
    .bind(course_id)
    .fetch_one(pool)
    .await?;
    let total_quizzes: i64 = sqlx::query_scalar("select count(*) from quiz where course_id = ?")
        .bind(course_id)
        .fetch_one(pool)
        .await?;
    sqlx::query(
        "update course set total_lessons = ?, total_quizzes = ?, total_duration_seconds = ? \
         where id = ?",
    )
    .bind(total_lessons)
    .bind(total_quizzes)
    .bind(duration_seconds)
    .bind(course_id)
    .execute(pool)
    .await?;
    let totals = CourseTotals {
        total_lessons,
        total_quizzes,
        total_duration: Duration::from_seconds(duration_seconds),
    };
    info!(
        "course {course_id} aggregates: {total_lessons} lessons, {total_quizzes} quizzes, {}",
        totals.total_duration
    );
    Ok(totals)
}

/// Post-commit hook: recompute on a detached task. Last write wins across
/// concurrent recomputations; a failure is logged and swallowed.
pub fn spawn_recalculate(pool: SqlitePool, course_id: i64) {
    tokio::spawn(async move {
        if let Err(e) = recalculate(&pool, course_id).await {
            error!("aggregate recompute for course {course_id} failed: {e}");
        }
    });
}
