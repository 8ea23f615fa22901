//! Shared fixtures for the in-module tests: an in-memory database and a
//! small seeded course.

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::catalog::course::Duration;
use crate::catalog::quiz::{Question, QuestionOption};
use crate::catalog::{Catalog, QuizDraft};
use crate::db;
use crate::identity::Caller;

/// Single-connection in-memory pool; more connections would each get
/// their own empty database.
pub(crate) async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    db::init_schema(&pool).await.expect("schema");
    pool
}

pub(crate) struct Fixture {
    pub catalog: Catalog,
    pub course_id: i64,
    pub l0: i64,
    pub l1: i64,
    pub l2: i64,
    pub quiz_id: i64,
}

pub(crate) struct SeedOptions {
    pub passing_marks: i64,
    pub max_attempts: i64,
    pub allow_retake: bool,
    pub publish: bool,
}

impl Default for SeedOptions {
    fn default() -> Self {
        SeedOptions {
            passing_marks: 5,
            max_attempts: 3,
            allow_retake: true,
            publish: true,
        }
    }
}

/// Two chapters: lessons l0, l1 in the first, l2 plus a one-question
/// capstone quiz (10 points, option index 0 correct) in the second.
pub(crate) async fn seed_course() -> Fixture {
    seed_course_with(|_| {}).await
}

pub(crate) async fn seed_course_with(configure: impl FnOnce(&mut SeedOptions)) -> Fixture {
    let mut options = SeedOptions::default();
    configure(&mut options);

    let catalog = Catalog::new(pool().await);
    let owner = Caller::instructor(1);
    let course_id = catalog.create_course(owner, "Rust 101").await.unwrap();
    let c0 = catalog
        .add_chapter(owner, course_id, "Basics", 1)
        .await
        .unwrap();
    let c1 = catalog
        .add_chapter(owner, course_id, "Ownership", 2)
        .await
        .unwrap();
    let l0 = catalog
        .add_lesson(owner, c0, "Hello", 1, Duration::new(0, 30, 0))
        .await
        .unwrap();
    let l1 = catalog
        .add_lesson(owner, c0, "Types", 2, Duration::new(0, 45, 0))
        .await
        .unwrap();
    let l2 = catalog
        .add_lesson(owner, c1, "Borrowing", 1, Duration::new(0, 50, 0))
        .await
        .unwrap();
    let quiz_id = catalog
        .add_quiz(
            owner,
            c1,
            QuizDraft {
                title: "Capstone".into(),
                ord: 1,
                passing_marks: options.passing_marks,
                max_attempts: options.max_attempts,
                allow_retake: options.allow_retake,
                shuffle_questions: false,
                shuffle_options: false,
                questions: vec![Question {
                    id: 1,
                    text: "Which option is right?".into(),
                    points: 10,
                    options: vec![
                        QuestionOption {
                            id: 10,
                            text: "this one".into(),
                            correct: true,
                        },
                        QuestionOption {
                            id: 11,
                            text: "not this one".into(),
                            correct: false,
                        },
                    ],
                }],
            },
        )
        .await
        .unwrap();
    if options.publish {
        catalog.publish_quiz(owner, quiz_id).await.unwrap();
    }

    Fixture {
        catalog,
        course_id,
        l0,
        l1,
        l2,
        quiz_id,
    }
}
