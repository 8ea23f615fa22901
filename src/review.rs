//! Review eligibility: a read-only composition over the progress ledger
//! and the assessment ledger, plus the guarded review write.

use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;

use crate::assessment;
use crate::catalog::Catalog;
use crate::enrollment::{self, EnrollmentStatus};
use crate::error::{Error, Result};
use crate::identity::{Caller, Role};
use crate::utils::now_local;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Review {
    pub id: i64,
    pub course_id: i64,
    pub student_id: i64,
    pub rating: i64,
    pub comment: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewEligibility {
    pub can_review: bool,
    pub reason: String,
    pub progress: i64,
    pub total_quizzes: i64,
    pub passed_quizzes: i64,
}

impl ReviewEligibility {
    fn denied(reason: String, progress: i64, total_quizzes: i64, passed_quizzes: i64) -> Self {
        ReviewEligibility {
            can_review: false,
            reason,
            progress,
            total_quizzes,
            passed_quizzes,
        }
    }
}

/// May this student review this course? Checks, in order: enrollment,
/// no prior review, 100% progress, latest result passed for every
/// published quiz. Never writes anything; safe to call repeatedly.
pub async fn can_review(
    catalog: &Catalog,
    student_id: i64,
    course_id: i64,
) -> Result<ReviewEligibility> {
    let tree = catalog.course_tree(course_id).await?;
    let pool = &catalog.database;
    let published = tree.published_quiz_ids();
    let total_quizzes = published.len() as i64;

    let enrollment = enrollment::get(pool, student_id, course_id).await?;
    let mut enrollment = match enrollment {
        Some(e) if matches!(
            e.status,
            EnrollmentStatus::Active | EnrollmentStatus::Completed
        ) =>
        {
            e
        }
        _ => {
            return Ok(ReviewEligibility::denied(
                "not enrolled".into(),
                0,
                total_quizzes,
                0,
            ));
        }
    };
    // fresh derivation, in memory only; the gate itself persists nothing
    enrollment.recompute_progress(tree.total_lessons());
    let progress = enrollment.progress;

    let existing: Option<i64> =
        sqlx::query_scalar("select id from review where course_id = ? and student_id = ?")
            .bind(course_id)
            .bind(student_id)
            .fetch_optional(pool)
            .await?;
    if existing.is_some() {
        return Ok(ReviewEligibility::denied(
            "already reviewed".into(),
            progress,
            total_quizzes,
            0,
        ));
    }

    if progress < 100 {
        return Ok(ReviewEligibility::denied(
            format!("course is only {progress}% complete"),
            progress,
            total_quizzes,
            0,
        ));
    }

    let mut passed_quizzes = 0;
    for quiz_id in &published {
        // zero attempts counts as not passed
        if let Some(result) = assessment::latest_result(pool, *quiz_id, student_id).await? {
            if result.is_passed {
                passed_quizzes += 1;
            }
        }
    }
    if passed_quizzes < total_quizzes {
        return Ok(ReviewEligibility::denied(
            format!(
                "{} published quiz(zes) not yet passed",
                total_quizzes - passed_quizzes
            ),
            progress,
            total_quizzes,
            passed_quizzes,
        ));
    }

    Ok(ReviewEligibility {
        can_review: true,
        reason: "eligible".into(),
        progress,
        total_quizzes,
        passed_quizzes,
    })
}

/// Post a review after passing the eligibility gate. The unique
/// (course, student) index backs up the gate's already-reviewed check.
pub async fn post_review(
    catalog: &Catalog,
    caller: Caller,
    course_id: i64,
    rating: i64,
    comment: &str,
) -> Result<Review> {
    if caller.role != Role::Student {
        return Err(Error::AccessDenied("only students may post reviews".into()));
    }
    if !(1..=5).contains(&rating) {
        return Err(Error::Validation(format!(
            "rating {rating} must be between 1 and 5"
        )));
    }
    let eligibility = can_review(catalog, caller.id, course_id).await?;
    if !eligibility.can_review {
        return Err(Error::PolicyViolation(eligibility.reason));
    }
    let pool = &catalog.database;
    let created_at = now_local();
    let result = sqlx::query(
        "insert into review (course_id, student_id, rating, comment, created_at) \
         values (?, ?, ?, ?, ?)",
    )
    .bind(course_id)
    .bind(caller.id)
    .bind(rating)
    .bind(comment)
    .bind(created_at)
    .execute(pool)
    .await;
    let result = match result {
        Ok(result) => result,
        Err(e) if Error::is_unique_violation(&e) => {
            return Err(Error::PolicyViolation("already reviewed".into()));
        }
        Err(e) => return Err(e.into()),
    };
    info!("student {} reviewed course {course_id}", caller.id);
    Ok(Review {
        id: result.last_insert_rowid(),
        course_id,
        student_id: caller.id,
        rating,
        comment: comment.to_string(),
        created_at,
    })
}
