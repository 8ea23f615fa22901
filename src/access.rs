//! Sequential access gating. Derived on demand from the course structure
//! and a learner's completed-lesson set; nothing here is persisted.

use std::collections::{HashMap, HashSet};

use crate::catalog::course::CourseTree;

#[derive(Debug, Clone, Default)]
pub struct AccessMap {
    chapters: HashMap<i64, bool>,
    lessons: HashMap<i64, bool>,
    quizzes: HashMap<i64, bool>,
}

impl AccessMap {
    pub fn chapter(&self, chapter_id: i64) -> bool {
        self.chapters.get(&chapter_id).copied().unwrap_or(false)
    }

    pub fn lesson(&self, lesson_id: i64) -> bool {
        self.lessons.get(&lesson_id).copied().unwrap_or(false)
    }

    pub fn quiz(&self, quiz_id: i64) -> bool {
        self.quizzes.get(&quiz_id).copied().unwrap_or(false)
    }
}

/// Single pass over chapters in ascending order, lessons in ascending
/// order within each chapter:
/// - the first chapter is always accessible, a later chapter only once
///   every lesson of the chapter before it is completed — quizzes never
///   gate the next chapter, only lessons do;
/// - within an accessible chapter the first lesson is open and each later
///   lesson requires the one before it;
/// - a chapter's quizzes open once the chapter is accessible and all of
///   its lessons are completed.
pub fn evaluate(tree: &CourseTree, completed: &HashSet<i64>) -> AccessMap {
    let mut map = AccessMap::default();
    let mut prev_lessons_done = true;
    for (idx, node) in tree.chapters.iter().enumerate() {
        let chapter_open = idx == 0 || prev_lessons_done;
        map.chapters.insert(node.chapter.id, chapter_open);

        let mut prev_lesson_done = true;
        let mut all_done = true;
        for lesson in &node.lessons {
            map.lessons
                .insert(lesson.id, chapter_open && prev_lesson_done);
            let done = completed.contains(&lesson.id);
            prev_lesson_done = done;
            all_done &= done;
        }
        for quiz in &node.quizzes {
            map.quizzes.insert(quiz.id, chapter_open && all_done);
        }
        prev_lessons_done = all_done;
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::course::{Chapter, ChapterNode, Course, Lesson, QuizMeta};

    fn lesson(id: i64, chapter_id: i64, ord: i64) -> Lesson {
        Lesson {
            id,
            chapter_id,
            course_id: 1,
            title: format!("lesson {id}"),
            ord,
            duration_seconds: 0,
        }
    }

    fn quiz(id: i64, chapter_id: i64) -> QuizMeta {
        QuizMeta {
            id,
            chapter_id,
            course_id: 1,
            title: format!("quiz {id}"),
            ord: 1,
            published: true,
        }
    }

    /// Two chapters with two lessons each (ids 10, 11 / 20, 21) and a quiz
    /// per chapter (ids 100 / 200).
    fn sample_tree() -> CourseTree {
        CourseTree {
            course: Course {
                id: 1,
                title: "course".into(),
                instructor_id: 1,
                total_lessons: 4,
                total_quizzes: 2,
                total_duration_seconds: 0,
            },
            chapters: vec![
                ChapterNode {
                    chapter: Chapter {
                        id: 1,
                        course_id: 1,
                        title: "c0".into(),
                        ord: 1,
                    },
                    lessons: vec![lesson(10, 1, 1), lesson(11, 1, 2)],
                    quizzes: vec![quiz(100, 1)],
                },
                ChapterNode {
                    chapter: Chapter {
                        id: 2,
                        course_id: 1,
                        title: "c1".into(),
                        ord: 2,
                    },
                    lessons: vec![lesson(20, 2, 1), lesson(21, 2, 2)],
                    quizzes: vec![quiz(200, 2)],
                },
            ],
        }
    }

    #[test]
    fn fresh_learner_sees_only_the_first_lesson() {
        let map = evaluate(&sample_tree(), &HashSet::new());
        assert!(map.chapter(1));
        assert!(map.lesson(10));
        assert!(!map.lesson(11));
        assert!(!map.chapter(2));
        assert!(!map.lesson(20));
        assert!(!map.quiz(100));
        assert!(!map.quiz(200));
    }

    #[test]
    fn next_chapter_needs_every_previous_lesson() {
        let tree = sample_tree();
        let map = evaluate(&tree, &HashSet::from([10]));
        assert!(map.lesson(11));
        assert!(!map.chapter(2));
        assert!(!map.lesson(20));

        let map = evaluate(&tree, &HashSet::from([10, 11]));
        assert!(map.chapter(2));
        assert!(map.lesson(20));
        // second lesson of chapter 2 still gated on its predecessor
        assert!(!map.lesson(21));
        let map = evaluate(&tree, &HashSet::from([10, 11, 20]));
        assert!(map.lesson(21));
    }

    #[test]
    fn quizzes_are_chapter_capstones() {
        let tree = sample_tree();
        let map = evaluate(&tree, &HashSet::from([10]));
        assert!(!map.quiz(100));
        let map = evaluate(&tree, &HashSet::from([10, 11]));
        assert!(map.quiz(100));
        assert!(!map.quiz(200));
    }

    #[test]
    fn quizzes_do_not_gate_the_next_chapter() {
        // chapter 2 opens on lesson completion alone; quiz 100 was never
        // attempted
        let map = evaluate(&sample_tree(), &HashSet::from([10, 11]));
        assert!(map.chapter(2));
        assert!(map.quiz(100));
    }

    #[test]
    fn locked_chapter_hides_lessons_regardless_of_history() {
        // completion ids for chapter 2 present, but chapter 1 unfinished
        let map = evaluate(&sample_tree(), &HashSet::from([20, 21]));
        assert!(!map.chapter(2));
        assert!(!map.lesson(20));
        assert!(!map.lesson(21));
        assert!(!map.quiz(200));
    }

    #[test]
    fn chapter_without_lessons_opens_its_quiz_and_successor() {
        let mut tree = sample_tree();
        tree.chapters[0].lessons.clear();
        let map = evaluate(&tree, &HashSet::new());
        assert!(map.quiz(100));
        assert!(map.chapter(2));
        assert!(map.lesson(20));
    }
}
