use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub text: String,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub text: String,
    pub points: i64,
    pub options: Vec<QuestionOption>,
}

/// Full quiz definition including questions. The question list is the
/// authoritative order; display shuffling never touches it.
#[derive(Debug, Clone)]
pub struct Quiz {
    pub id: i64,
    pub chapter_id: i64,
    pub course_id: i64,
    pub title: String,
    pub ord: i64,
    pub published: bool,
    pub passing_marks: i64,
    pub max_attempts: i64,
    pub allow_retake: bool,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub questions: Vec<Question>,
}

impl Quiz {
    /// Always derived from the current question list, never stored
    /// independently.
    pub fn total_marks(&self) -> i64 {
        self.questions.iter().map(|q| q.points).sum()
    }

    pub async fn load(pool: &SqlitePool, quiz_id: i64) -> Result<Quiz> {
        let row = sqlx::query_as::<_, QuizRow>(
            "select id, chapter_id, course_id, title, ord, published, passing_marks, \
             max_attempts, allow_retake, shuffle_questions, shuffle_options, questions \
             from quiz where id = ?",
        )
        .bind(quiz_id)
        .fetch_optional(pool)
        .await?
        .ok_or(Error::not_found("quiz", quiz_id))?;
        row.try_into()
    }
}

#[derive(sqlx::FromRow)]
struct QuizRow {
    id: i64,
    chapter_id: i64,
    course_id: i64,
    title: String,
    ord: i64,
    published: bool,
    passing_marks: i64,
    max_attempts: i64,
    allow_retake: bool,
    shuffle_questions: bool,
    shuffle_options: bool,
    questions: String,
}

impl TryFrom<QuizRow> for Quiz {
    type Error = Error;

    fn try_from(row: QuizRow) -> Result<Quiz> {
        let questions = serde_json::from_str(&row.questions).map_err(|e| {
            Error::Integrity(format!("quiz {} has a malformed question payload: {e}", row.id))
        })?;
        Ok(Quiz {
            id: row.id,
            chapter_id: row.chapter_id,
            course_id: row.course_id,
            title: row.title,
            ord: row.ord,
            published: row.published,
            passing_marks: row.passing_marks,
            max_attempts: row.max_attempts,
            allow_retake: row.allow_retake,
            shuffle_questions: row.shuffle_questions,
            shuffle_options: row.shuffle_options,
            questions,
        })
    }
}

/// Authoring-time validation. A question that would be unscorable is
/// rejected here, never accepted and patched up at submission time.
pub fn validate_questions(questions: &[Question]) -> Result<()> {
    let mut seen_ids = std::collections::HashSet::new();
    for question in questions {
        if !seen_ids.insert(question.id) {
            return Err(Error::Validation(format!(
                "duplicate question id {}",
                question.id
            )));
        }
        if question.points <= 0 {
            return Err(Error::Validation(format!(
                "question {} must be worth at least 1 point",
                question.id
            )));
        }
        if question.options.len() < 2 {
            return Err(Error::Validation(format!(
                "question {} must have at least 2 options",
                question.id
            )));
        }
        let mut option_ids = std::collections::HashSet::new();
        for option in &question.options {
            if !option_ids.insert(option.id) {
                return Err(Error::Validation(format!(
                    "duplicate option id {} in question {}",
                    option.id, question.id
                )));
            }
        }
        let correct = question.options.iter().filter(|o| o.correct).count();
        if correct != 1 {
            return Err(Error::Validation(format!(
                "question {} must have exactly one correct option, found {correct}",
                question.id
            )));
        }
    }
    Ok(())
}

/// `passing_marks` is in raw points, the same unit as a submission's
/// `score`, so it must fit inside the derived total.
pub fn validate_policy(passing_marks: i64, max_attempts: i64, total_marks: i64) -> Result<()> {
    if max_attempts < 1 {
        return Err(Error::Validation(
            "max_attempts must be at least 1".into(),
        ));
    }
    if passing_marks < 0 || passing_marks > total_marks {
        return Err(Error::Validation(format!(
            "passing_marks {passing_marks} must be between 0 and the total of {total_marks} points"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(id: i64, correct: bool) -> QuestionOption {
        QuestionOption {
            id,
            text: format!("option {id}"),
            correct,
        }
    }

    fn question(id: i64, points: i64, corrects: &[bool]) -> Question {
        Question {
            id,
            text: format!("question {id}"),
            points,
            options: corrects
                .iter()
                .enumerate()
                .map(|(i, &c)| option(i as i64, c))
                .collect(),
        }
    }

    #[test]
    fn exactly_one_correct_enforced() {
        // no correct option
        let err = validate_questions(&[question(1, 5, &[false, false])]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // two correct options
        let err = validate_questions(&[question(1, 5, &[true, true, false])]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        validate_questions(&[question(1, 5, &[true, false])]).unwrap();
    }

    #[test]
    fn option_and_point_bounds() {
        let err = validate_questions(&[question(1, 5, &[true])]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = validate_questions(&[question(1, 0, &[true, false])]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err =
            validate_questions(&[question(1, 5, &[true, false]), question(1, 5, &[true, false])])
                .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn passing_marks_in_raw_points() {
        validate_policy(5, 3, 10).unwrap();
        validate_policy(0, 1, 0).unwrap();
        assert!(validate_policy(11, 3, 10).is_err());
        assert!(validate_policy(-1, 3, 10).is_err());
        assert!(validate_policy(5, 0, 10).is_err());
    }
}
