pub mod course;
pub mod quiz;

use std::sync::Arc;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{Error, Result};
use crate::identity::{Caller, Role};
use crate::stats;

use course::{CourseTree, Duration};
use quiz::Question;

/// Everything needed to author a quiz besides its placement.
#[derive(Debug, Clone)]
pub struct QuizDraft {
    pub title: String,
    pub ord: i64,
    pub passing_marks: i64,
    pub max_attempts: i64,
    pub allow_retake: bool,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub questions: Vec<Question>,
}

/// Course catalog: structural reads plus authoring writes. Trees are
/// cached per course and dropped on any mutation; aggregate recomputation
/// runs detached after each write.
#[derive(Debug, Clone)]
pub struct Catalog {
    courses: DashMap<i64, Arc<CourseTree>>,
    pub database: SqlitePool,
}

impl Catalog {
    pub fn new(database: SqlitePool) -> Self {
        Self {
            courses: DashMap::new(),
            database,
        }
    }

    pub async fn course_tree(&self, course_id: i64) -> Result<Arc<CourseTree>> {
        if let Some(tree) = self.courses.get(&course_id) {
            return Ok(tree.clone());
        }
        let tree = Arc::new(CourseTree::load(&self.database, course_id).await?);
        self.courses.insert(course_id, tree.clone());
        Ok(tree)
    }

    pub fn invalidate(&self, course_id: i64) {
        self.courses.remove(&course_id);
    }

    fn mutated(&self, course_id: i64) {
        self.invalidate(course_id);
        stats::spawn_recalculate(self.database.clone(), course_id);
    }

    async fn require_owner(&self, caller: Caller, course_id: i64) -> Result<()> {
        if caller.role != Role::Instructor {
            return Err(Error::AccessDenied(
                "only instructors may author course content".into(),
            ));
        }
        let instructor_id: Option<i64> =
            sqlx::query_scalar("select instructor_id from course where id = ?")
                .bind(course_id)
                .fetch_optional(&self.database)
                .await?;
        match instructor_id {
            None => Err(Error::not_found("course", course_id)),
            Some(id) if id != caller.id => Err(Error::AccessDenied(format!(
                "course {course_id} belongs to another instructor"
            ))),
            Some(_) => Ok(()),
        }
    }

    pub async fn create_course(&self, caller: Caller, title: &str) -> Result<i64> {
        if caller.role != Role::Instructor {
            return Err(Error::AccessDenied(
                "only instructors may create courses".into(),
            ));
        }
        let result = sqlx::query("insert into course (title, instructor_id) values (?, ?)")
            .bind(title)
            .bind(caller.id)
            .execute(&self.database)
            .await?;
        let id = result.last_insert_rowid();
        info!("instructor {} created course {id} ({title})", caller.id);
        Ok(id)
    }

    pub async fn add_chapter(
        &self,
        caller: Caller,
        course_id: i64,
        title: &str,
        ord: i64,
    ) -> Result<i64> {
        self.require_owner(caller, course_id).await?;
        if ord < 1 {
            return Err(Error::Validation("chapter order must be positive".into()));
        }
        let result = sqlx::query("insert into chapter (course_id, title, ord) values (?, ?, ?)")
            .bind(course_id)
            .bind(title)
            .bind(ord)
            .execute(&self.database)
            .await
            .map_err(|e| ord_conflict(e, "chapter", ord))?;
        self.mutated(course_id);
        Ok(result.last_insert_rowid())
    }

    pub async fn add_lesson(
        &self,
        caller: Caller,
        chapter_id: i64,
        title: &str,
        ord: i64,
        duration: Duration,
    ) -> Result<i64> {
        let course_id = self.chapter_course(chapter_id).await?;
        self.require_owner(caller, course_id).await?;
        if ord < 1 {
            return Err(Error::Validation("lesson order must be positive".into()));
        }
        duration.validate()?;
        let result = sqlx::query(
            "insert into lesson (chapter_id, course_id, title, ord, duration_seconds) \
             values (?, ?, ?, ?, ?)",
        )
        .bind(chapter_id)
        .bind(course_id)
        .bind(title)
        .bind(ord)
        .bind(duration.as_seconds())
        .execute(&self.database)
        .await
        .map_err(|e| ord_conflict(e, "lesson", ord))?;
        self.mutated(course_id);
        Ok(result.last_insert_rowid())
    }

    pub async fn add_quiz(&self, caller: Caller, chapter_id: i64, draft: QuizDraft) -> Result<i64> {
        let course_id = self.chapter_course(chapter_id).await?;
        self.require_owner(caller, course_id).await?;
        if draft.ord < 1 {
            return Err(Error::Validation("quiz order must be positive".into()));
        }
        quiz::validate_questions(&draft.questions)?;
        let total_marks: i64 = draft.questions.iter().map(|q| q.points).sum();
        quiz::validate_policy(draft.passing_marks, draft.max_attempts, total_marks)?;
        let questions = serde_json::to_string(&draft.questions)
            .map_err(|e| Error::Validation(format!("unserializable questions: {e}")))?;
        let result = sqlx::query(
            "insert into quiz (chapter_id, course_id, title, ord, published, passing_marks, \
             max_attempts, allow_retake, shuffle_questions, shuffle_options, questions) \
             values (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?)",
        )
        .bind(chapter_id)
        .bind(course_id)
        .bind(&draft.title)
        .bind(draft.ord)
        .bind(draft.passing_marks)
        .bind(draft.max_attempts)
        .bind(draft.allow_retake)
        .bind(draft.shuffle_questions)
        .bind(draft.shuffle_options)
        .bind(&questions)
        .execute(&self.database)
        .await
        .map_err(|e| ord_conflict(e, "quiz", draft.ord))?;
        self.mutated(course_id);
        Ok(result.last_insert_rowid())
    }

    /// Replace a quiz's question list. Historical results are unaffected:
    /// they carry their own per-question snapshot.
    pub async fn update_quiz_questions(
        &self,
        caller: Caller,
        quiz_id: i64,
        questions: Vec<Question>,
    ) -> Result<()> {
        let (course_id, passing_marks) = self.quiz_course_and_passing(quiz_id).await?;
        self.require_owner(caller, course_id).await?;
        quiz::validate_questions(&questions)?;
        let total_marks: i64 = questions.iter().map(|q| q.points).sum();
        if passing_marks > total_marks {
            return Err(Error::Validation(format!(
                "new question set totals {total_marks} points, below the passing threshold of {passing_marks}"
            )));
        }
        let payload = serde_json::to_string(&questions)
            .map_err(|e| Error::Validation(format!("unserializable questions: {e}")))?;
        sqlx::query("update quiz set questions = ? where id = ?")
            .bind(&payload)
            .bind(quiz_id)
            .execute(&self.database)
            .await?;
        self.mutated(course_id);
        Ok(())
    }

    pub async fn publish_quiz(&self, caller: Caller, quiz_id: i64) -> Result<()> {
        let (course_id, _) = self.quiz_course_and_passing(quiz_id).await?;
        self.require_owner(caller, course_id).await?;
        sqlx::query("update quiz set published = 1 where id = ?")
            .bind(quiz_id)
            .execute(&self.database)
            .await?;
        self.mutated(course_id);
        info!("quiz {quiz_id} published");
        Ok(())
    }

    pub async fn delete_lesson(&self, caller: Caller, lesson_id: i64) -> Result<()> {
        let course_id: Option<i64> = sqlx::query_scalar("select course_id from lesson where id = ?")
            .bind(lesson_id)
            .fetch_optional(&self.database)
            .await?;
        let course_id = course_id.ok_or(Error::not_found("lesson", lesson_id))?;
        self.require_owner(caller, course_id).await?;
        sqlx::query("delete from lesson where id = ?")
            .bind(lesson_id)
            .execute(&self.database)
            .await?;
        self.mutated(course_id);
        Ok(())
    }

    pub async fn delete_quiz(&self, caller: Caller, quiz_id: i64) -> Result<()> {
        let (course_id, _) = self.quiz_course_and_passing(quiz_id).await?;
        self.require_owner(caller, course_id).await?;
        sqlx::query("delete from quiz where id = ?")
            .bind(quiz_id)
            .execute(&self.database)
            .await?;
        self.mutated(course_id);
        Ok(())
    }

    async fn chapter_course(&self, chapter_id: i64) -> Result<i64> {
        let course_id: Option<i64> =
            sqlx::query_scalar("select course_id from chapter where id = ?")
                .bind(chapter_id)
                .fetch_optional(&self.database)
                .await?;
        course_id.ok_or(Error::not_found("chapter", chapter_id))
    }

    async fn quiz_course_and_passing(&self, quiz_id: i64) -> Result<(i64, i64)> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("select course_id, passing_marks from quiz where id = ?")
                .bind(quiz_id)
                .fetch_optional(&self.database)
                .await?;
        row.ok_or(Error::not_found("quiz", quiz_id))
    }
}

fn ord_conflict(err: sqlx::Error, entity: &str, ord: i64) -> Error {
    if Error::is_unique_violation(&err) {
        Error::Integrity(format!("duplicate {entity} order {ord}"))
    } else {
        err.into()
    }
}
