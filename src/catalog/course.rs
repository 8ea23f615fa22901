use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{Error, Result};

/// Lesson/course running time, kept in normalized h/m/s form. Aggregation
/// happens over total seconds and is re-expanded afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Duration {
    pub fn new(hours: i64, minutes: i64, seconds: i64) -> Self {
        Duration {
            hours,
            minutes,
            seconds,
        }
    }

    pub fn from_seconds(total: i64) -> Self {
        let total = total.max(0);
        Duration {
            hours: total / 3600,
            minutes: total % 3600 / 60,
            seconds: total % 60,
        }
    }

    pub fn as_seconds(&self) -> i64 {
        self.hours * 3600 + self.minutes * 60 + self.seconds
    }

    /// Minutes and seconds must stay within modular range.
    pub fn validate(&self) -> Result<()> {
        if self.hours < 0
            || !(0..60).contains(&self.minutes)
            || !(0..60).contains(&self.seconds)
        {
            return Err(Error::Validation(format!(
                "duration {self} is out of range"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub instructor_id: i64,
    pub total_lessons: i64,
    pub total_quizzes: i64,
    pub total_duration_seconds: i64,
}

impl Course {
    pub fn total_duration(&self) -> Duration {
        Duration::from_seconds(self.total_duration_seconds)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Chapter {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub ord: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Lesson {
    pub id: i64,
    pub chapter_id: i64,
    pub course_id: i64,
    pub title: String,
    pub ord: i64,
    pub duration_seconds: i64,
}

impl Lesson {
    pub fn duration(&self) -> Duration {
        Duration::from_seconds(self.duration_seconds)
    }
}

/// Structural view of a quiz, enough for gating and the review gate.
/// Question payloads are loaded separately by the assessment engine.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QuizMeta {
    pub id: i64,
    pub chapter_id: i64,
    pub course_id: i64,
    pub title: String,
    pub ord: i64,
    pub published: bool,
}

#[derive(Debug, Clone)]
pub struct ChapterNode {
    pub chapter: Chapter,
    pub lessons: Vec<Lesson>,
    pub quizzes: Vec<QuizMeta>,
}

/// A course with its full chapter/lesson/quiz structure, chapters and
/// children sorted by `ord`.
#[derive(Debug, Clone)]
pub struct CourseTree {
    pub course: Course,
    pub chapters: Vec<ChapterNode>,
}

impl CourseTree {
    pub async fn load(pool: &SqlitePool, course_id: i64) -> Result<Self> {
        let course = sqlx::query_as::<_, Course>(
            "select id, title, instructor_id, total_lessons, total_quizzes, \
             total_duration_seconds from course where id = ?",
        )
        .bind(course_id)
        .fetch_optional(pool)
        .await?
        .ok_or(Error::not_found("course", course_id))?;

        let chapters = sqlx::query_as::<_, Chapter>(
            "select id, course_id, title, ord from chapter where course_id = ? order by ord",
        )
        .bind(course_id)
        .fetch_all(pool)
        .await?;
        let lessons = sqlx::query_as::<_, Lesson>(
            "select id, chapter_id, course_id, title, ord, duration_seconds \
             from lesson where course_id = ? order by ord",
        )
        .bind(course_id)
        .fetch_all(pool)
        .await?;
        let quizzes = sqlx::query_as::<_, QuizMeta>(
            "select id, chapter_id, course_id, title, ord, published \
             from quiz where course_id = ? order by ord",
        )
        .bind(course_id)
        .fetch_all(pool)
        .await?;

        check_unique_ord(
            "chapter",
            chapters.iter().map(|c| (c.course_id, c.ord)),
        )?;
        check_unique_ord("lesson", lessons.iter().map(|l| (l.chapter_id, l.ord)))?;
        check_unique_ord("quiz", quizzes.iter().map(|q| (q.chapter_id, q.ord)))?;

        let chapters = chapters
            .into_iter()
            .map(|chapter| {
                let lessons = lessons
                    .iter()
                    .filter(|l| l.chapter_id == chapter.id)
                    .cloned()
                    .collect();
                let quizzes = quizzes
                    .iter()
                    .filter(|q| q.chapter_id == chapter.id)
                    .cloned()
                    .collect();
                ChapterNode {
                    chapter,
                    lessons,
                    quizzes,
                }
            })
            .collect();
        Ok(CourseTree { course, chapters })
    }

    pub fn total_lessons(&self) -> usize {
        self.chapters.iter().map(|c| c.lessons.len()).sum()
    }

    pub fn lesson(&self, lesson_id: i64) -> Option<&Lesson> {
        self.chapters
            .iter()
            .flat_map(|c| &c.lessons)
            .find(|l| l.id == lesson_id)
    }

    pub fn quiz(&self, quiz_id: i64) -> Option<&QuizMeta> {
        self.chapters
            .iter()
            .flat_map(|c| &c.quizzes)
            .find(|q| q.id == quiz_id)
    }

    pub fn published_quiz_ids(&self) -> Vec<i64> {
        self.chapters
            .iter()
            .flat_map(|c| &c.quizzes)
            .filter(|q| q.published)
            .map(|q| q.id)
            .collect()
    }
}

/// Duplicate `ord` inside one sibling group means the authoring flow has a
/// bug; refuse to serve the tree.
fn check_unique_ord(
    entity: &str,
    items: impl Iterator<Item = (i64, i64)>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for (parent, ord) in items {
        if !seen.insert((parent, ord)) {
            return Err(Error::Integrity(format!(
                "duplicate {entity} order {ord} under parent {parent}"
            )));
        }
    }
    Ok(())
}
