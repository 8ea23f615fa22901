//! Assessment engine: submission validation, scoring, attempt policy and
//! the append-only result ledger.

pub mod shuffle;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::catalog::quiz::Quiz;
use crate::error::{Error, Result};
use crate::identity::{Caller, Role};
use crate::utils::now_local;

/// How a submission points at an option. Historical rows use the
/// positional form; new clients should prefer the stable option id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AnswerRef {
    ByIndex(usize),
    ById(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: i64,
    pub selected: AnswerRef,
}

/// Per-question snapshot frozen into the result row. The quiz's answer key
/// may change later; recorded attempts must not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: i64,
    pub selected: AnswerRef,
    pub is_correct: bool,
    pub points: i64,
}

#[derive(Debug, Clone)]
pub struct QuizResult {
    pub id: i64,
    pub quiz_id: i64,
    pub student_id: i64,
    pub attempt_number: i64,
    pub score: i64,
    pub total_marks: i64,
    pub percentage: i64,
    pub is_passed: bool,
    pub answers: Vec<AnswerRecord>,
    pub submitted_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct QuizResultRow {
    id: i64,
    quiz_id: i64,
    student_id: i64,
    attempt_number: i64,
    score: i64,
    total_marks: i64,
    percentage: i64,
    is_passed: bool,
    answers: String,
    submitted_at: OffsetDateTime,
}

impl TryFrom<QuizResultRow> for QuizResult {
    type Error = Error;

    fn try_from(row: QuizResultRow) -> Result<QuizResult> {
        let answers = serde_json::from_str(&row.answers).map_err(|e| {
            Error::Integrity(format!(
                "quiz result {} has a malformed answer snapshot: {e}",
                row.id
            ))
        })?;
        Ok(QuizResult {
            id: row.id,
            quiz_id: row.quiz_id,
            student_id: row.student_id,
            attempt_number: row.attempt_number,
            score: row.score,
            total_marks: row.total_marks,
            percentage: row.percentage,
            is_passed: row.is_passed,
            answers,
            submitted_at: row.submitted_at,
        })
    }
}

pub fn percentage(score: i64, total_marks: i64) -> i64 {
    if total_marks == 0 {
        0
    } else {
        (score as f64 / total_marks as f64 * 100.0).round() as i64
    }
}

/// Validate and score a submission against the quiz's stored (canonical)
/// question and option order. Pure and deterministic; display shuffling
/// plays no part here.
pub fn score_submission(quiz: &Quiz, answers: &[Answer]) -> Result<(i64, Vec<AnswerRecord>)> {
    if answers.len() != quiz.questions.len() {
        return Err(Error::Validation(format!(
            "expected {} answers, got {}",
            quiz.questions.len(),
            answers.len()
        )));
    }
    let mut records = Vec::with_capacity(answers.len());
    let mut score = 0;
    for (question, answer) in quiz.questions.iter().zip(answers) {
        if answer.question_id != question.id {
            return Err(Error::Validation(format!(
                "answer out of order: expected question {}, got {}",
                question.id, answer.question_id
            )));
        }
        let index = match &answer.selected {
            AnswerRef::ByIndex(i) => {
                if *i >= question.options.len() {
                    return Err(Error::Validation(format!(
                        "option index {i} out of range for question {}",
                        question.id
                    )));
                }
                *i
            }
            AnswerRef::ById(id) => question
                .options
                .iter()
                .position(|o| o.id == *id)
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "option {id} does not belong to question {}",
                        question.id
                    ))
                })?,
        };
        let is_correct = question.options[index].correct;
        let points = if is_correct { question.points } else { 0 };
        score += points;
        records.push(AnswerRecord {
            question_id: question.id,
            selected: answer.selected.clone(),
            is_correct,
            points,
        });
    }
    Ok((score, records))
}

/// How often an insert losing the attempt-number race is retried before
/// giving up.
const ATTEMPT_INSERT_RETRIES: u32 = 3;

/// Submit a quiz attempt. Preconditions run in order: published, attempt
/// policy, structural validation. The attempt number is max + 1; the
/// unique (quiz, student, attempt) index catches concurrent duplicates and
/// the insert is retried with a fresh number.
pub async fn submit_quiz(
    pool: &SqlitePool,
    caller: Caller,
    quiz_id: i64,
    answers: &[Answer],
) -> Result<QuizResult> {
    if caller.role != Role::Student {
        return Err(Error::AccessDenied("only students may submit quizzes".into()));
    }
    let quiz = Quiz::load(pool, quiz_id).await?;
    if !quiz.published {
        return Err(Error::AccessDenied(format!(
            "quiz {quiz_id} is not published"
        )));
    }

    let mut scored: Option<(i64, Vec<AnswerRecord>)> = None;
    let mut tries = 0;
    loop {
        let mut tx = pool.begin().await?;
        let prior: i64 = sqlx::query_scalar(
            "select count(*) from quiz_result where quiz_id = ? and student_id = ?",
        )
        .bind(quiz_id)
        .bind(caller.id)
        .fetch_one(&mut *tx)
        .await?;
        if !quiz.allow_retake && prior > 0 {
            return Err(Error::PolicyViolation(format!(
                "retakes are not allowed for quiz {quiz_id}"
            )));
        }
        if prior + 1 > quiz.max_attempts {
            return Err(Error::PolicyViolation(format!(
                "max attempts ({}) exceeded for quiz {quiz_id}",
                quiz.max_attempts
            )));
        }
        // validated and scored once, after the policy checks
        let (score, records) = match scored.take() {
            Some(s) => s,
            None => score_submission(&quiz, answers)?,
        };
        let total_marks = quiz.total_marks();
        let pct = percentage(score, total_marks);
        let is_passed = score >= quiz.passing_marks;

        let max_attempt: i64 = sqlx::query_scalar(
            "select coalesce(max(attempt_number), 0) from quiz_result \
             where quiz_id = ? and student_id = ?",
        )
        .bind(quiz_id)
        .bind(caller.id)
        .fetch_one(&mut *tx)
        .await?;
        let attempt_number = max_attempt + 1;
        let snapshot = serde_json::to_string(&records)
            .map_err(|e| Error::Integrity(format!("unserializable answer snapshot: {e}")))?;
        let submitted_at = now_local();
        let inserted = sqlx::query(
            "insert into quiz_result (quiz_id, student_id, attempt_number, score, total_marks, \
             percentage, is_passed, answers, submitted_at) values (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(quiz_id)
        .bind(caller.id)
        .bind(attempt_number)
        .bind(score)
        .bind(total_marks)
        .bind(pct)
        .bind(is_passed)
        .bind(&snapshot)
        .bind(submitted_at)
        .execute(&mut *tx)
        .await;
        let result = match inserted {
            Ok(result) => result,
            Err(e) if Error::is_unique_violation(&e) => {
                tries += 1;
                if tries >= ATTEMPT_INSERT_RETRIES {
                    return Err(e.into());
                }
                warn!(
                    "attempt number {attempt_number} for quiz {quiz_id}, student {} \
                     already taken, retrying",
                    caller.id
                );
                scored = Some((score, records));
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;
        if is_passed {
            info!(
                "student {} passed quiz {quiz_id} with {score}/{total_marks} on attempt {attempt_number}",
                caller.id
            );
        }
        return Ok(QuizResult {
            id: result.last_insert_rowid(),
            quiz_id,
            student_id: caller.id,
            attempt_number,
            score,
            total_marks,
            percentage: pct,
            is_passed,
            answers: records,
            submitted_at,
        });
    }
}

const SELECT_RESULTS: &str = "select id, quiz_id, student_id, attempt_number, score, total_marks, \
     percentage, is_passed, answers, submitted_at from quiz_result \
     where quiz_id = ? and student_id = ?";

pub async fn results_for(
    pool: &SqlitePool,
    quiz_id: i64,
    student_id: i64,
) -> Result<Vec<QuizResult>> {
    let rows = sqlx::query_as::<_, QuizResultRow>(
        &format!("{SELECT_RESULTS} order by attempt_number"),
    )
    .bind(quiz_id)
    .bind(student_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(QuizResult::try_from).collect()
}

pub async fn latest_result(
    pool: &SqlitePool,
    quiz_id: i64,
    student_id: i64,
) -> Result<Option<QuizResult>> {
    let row = sqlx::query_as::<_, QuizResultRow>(
        &format!("{SELECT_RESULTS} order by attempt_number desc limit 1"),
    )
    .bind(quiz_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await?;
    row.map(QuizResult::try_from).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::quiz::{Question, QuestionOption};
    use crate::testing;

    fn sample_quiz() -> Quiz {
        Quiz {
            id: 1,
            chapter_id: 1,
            course_id: 1,
            title: "checkpoint".into(),
            ord: 1,
            published: true,
            passing_marks: 5,
            max_attempts: 3,
            allow_retake: true,
            shuffle_questions: false,
            shuffle_options: false,
            questions: vec![
                Question {
                    id: 1,
                    text: "q1".into(),
                    points: 6,
                    options: vec![
                        QuestionOption {
                            id: 10,
                            text: "a".into(),
                            correct: true,
                        },
                        QuestionOption {
                            id: 11,
                            text: "b".into(),
                            correct: false,
                        },
                    ],
                },
                Question {
                    id: 2,
                    text: "q2".into(),
                    points: 4,
                    options: vec![
                        QuestionOption {
                            id: 20,
                            text: "a".into(),
                            correct: false,
                        },
                        QuestionOption {
                            id: 21,
                            text: "b".into(),
                            correct: true,
                        },
                    ],
                },
            ],
        }
    }

    fn by_index(question_id: i64, index: usize) -> Answer {
        Answer {
            question_id,
            selected: AnswerRef::ByIndex(index),
        }
    }

    #[test]
    fn scoring_awards_full_points_or_none() {
        let quiz = sample_quiz();
        let (score, records) =
            score_submission(&quiz, &[by_index(1, 0), by_index(2, 0)]).unwrap();
        assert_eq!(score, 6);
        assert!(records[0].is_correct);
        assert_eq!(records[0].points, 6);
        assert!(!records[1].is_correct);
        assert_eq!(records[1].points, 0);
    }

    #[test]
    fn answers_by_id_resolve_to_the_same_options() {
        let quiz = sample_quiz();
        let by_id = [
            Answer {
                question_id: 1,
                selected: AnswerRef::ById(10),
            },
            Answer {
                question_id: 2,
                selected: AnswerRef::ById(21),
            },
        ];
        let (score, _) = score_submission(&quiz, &by_id).unwrap();
        let (score_idx, _) =
            score_submission(&quiz, &[by_index(1, 0), by_index(2, 1)]).unwrap();
        assert_eq!(score, score_idx);
        assert_eq!(score, 10);
    }

    #[test]
    fn malformed_submissions_are_hard_rejections() {
        let quiz = sample_quiz();
        // wrong answer count
        let err = score_submission(&quiz, &[by_index(1, 0)]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // positional question-id mismatch
        let err = score_submission(&quiz, &[by_index(2, 0), by_index(1, 0)]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // out-of-range option index
        let err = score_submission(&quiz, &[by_index(1, 2), by_index(2, 0)]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // foreign option id
        let err = score_submission(
            &quiz,
            &[
                Answer {
                    question_id: 1,
                    selected: AnswerRef::ById(99),
                },
                by_index(2, 0),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn scoring_ignores_shuffle_flags() {
        let mut quiz = sample_quiz();
        let answers = [by_index(1, 0), by_index(2, 1)];
        let (baseline, _) = score_submission(&quiz, &answers).unwrap();
        quiz.shuffle_questions = true;
        quiz.shuffle_options = true;
        let (shuffled, _) = score_submission(&quiz, &answers).unwrap();
        assert_eq!(baseline, shuffled);
    }

    #[test]
    fn percentage_handles_empty_quizzes() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(6, 10), 60);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
    }

    #[tokio::test]
    async fn attempts_number_sequentially_then_cap() {
        let fixture = testing::seed_course().await;
        let pool = &fixture.catalog.database;
        let student = Caller::student(7);
        // quiz fixture: 1 question worth 10, passing 5, max_attempts 3
        let wrong = [by_index(1, 1)];
        for expected in 1..=3 {
            let result = submit_quiz(pool, student, fixture.quiz_id, &wrong)
                .await
                .unwrap();
            assert_eq!(result.attempt_number, expected);
            assert!(!result.is_passed);
        }
        let err = submit_quiz(pool, student, fixture.quiz_id, &wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
        let results = results_for(pool, fixture.quiz_id, student.id).await.unwrap();
        assert_eq!(results.len(), 3);
        // another student is unaffected by this student's attempts
        let other = Caller::student(8);
        let result = submit_quiz(pool, other, fixture.quiz_id, &wrong)
            .await
            .unwrap();
        assert_eq!(result.attempt_number, 1);
    }

    #[tokio::test]
    async fn retake_policy_checked_before_validation() {
        let fixture = testing::seed_course_with(|draft| {
            draft.allow_retake = false;
            draft.max_attempts = 3;
        })
        .await;
        let pool = &fixture.catalog.database;
        let student = Caller::student(7);
        submit_quiz(pool, student, fixture.quiz_id, &[by_index(1, 0)])
            .await
            .unwrap();
        // even a malformed second submission reports the policy violation
        let err = submit_quiz(pool, student, fixture.quiz_id, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[tokio::test]
    async fn unpublished_quizzes_reject_everything() {
        let fixture = testing::seed_course_with(|draft| {
            draft.publish = false;
        })
        .await;
        let err = submit_quiz(
            &fixture.catalog.database,
            Caller::student(7),
            fixture.quiz_id,
            &[by_index(1, 0)],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AccessDenied(_)));
    }

    #[tokio::test]
    async fn results_are_immutable_snapshots() {
        let fixture = testing::seed_course().await;
        let pool = &fixture.catalog.database;
        let student = Caller::student(7);
        let result = submit_quiz(pool, student, fixture.quiz_id, &[by_index(1, 0)])
            .await
            .unwrap();
        assert!(result.is_passed);

        // flip the answer key after the attempt
        let mut questions = Quiz::load(pool, fixture.quiz_id).await.unwrap().questions;
        for option in &mut questions[0].options {
            option.correct = !option.correct;
        }
        fixture
            .catalog
            .update_quiz_questions(Caller::instructor(1), fixture.quiz_id, questions)
            .await
            .unwrap();

        let stored = latest_result(pool, fixture.quiz_id, student.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_passed);
        assert!(stored.answers[0].is_correct);
        assert_eq!(stored.score, 10);
    }
}
