//! Display-order shuffling. Produces a per-request view over a quiz; the
//! stored question and option arrays are never reordered, and every view
//! entry carries the canonical index submissions are scored against.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::catalog::quiz::Quiz;

/// An option as served to the learner. The `correct` flag never leaves
/// the engine.
#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub option_id: i64,
    pub text: String,
    /// Position in the quiz's stored option array.
    pub canonical_index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub question_id: i64,
    pub text: String,
    pub points: i64,
    /// Position in the quiz's stored question array.
    pub canonical_index: usize,
    pub options: Vec<OptionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizView {
    pub quiz_id: i64,
    pub title: String,
    pub questions: Vec<QuestionView>,
}

/// Build the served view, permuting display order per the quiz's shuffle
/// flags. The random source is explicit so callers control seeding and no
/// state leaks across requests.
pub fn shuffled_view<R: Rng + ?Sized>(quiz: &Quiz, rng: &mut R) -> QuizView {
    let mut question_order: Vec<usize> = (0..quiz.questions.len()).collect();
    if quiz.shuffle_questions {
        question_order.shuffle(rng);
    }
    let questions = question_order
        .into_iter()
        .map(|qi| {
            let question = &quiz.questions[qi];
            let mut option_order: Vec<usize> = (0..question.options.len()).collect();
            if quiz.shuffle_options {
                option_order.shuffle(rng);
            }
            QuestionView {
                question_id: question.id,
                text: question.text.clone(),
                points: question.points,
                canonical_index: qi,
                options: option_order
                    .into_iter()
                    .map(|oi| OptionView {
                        option_id: question.options[oi].id,
                        text: question.options[oi].text.clone(),
                        canonical_index: oi,
                    })
                    .collect(),
            }
        })
        .collect();
    QuizView {
        quiz_id: quiz.id,
        title: quiz.title.clone(),
        questions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::quiz::{Question, QuestionOption};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn quiz(shuffle_questions: bool, shuffle_options: bool) -> Quiz {
        Quiz {
            id: 1,
            chapter_id: 1,
            course_id: 1,
            title: "t".into(),
            ord: 1,
            published: true,
            passing_marks: 0,
            max_attempts: 1,
            allow_retake: false,
            shuffle_questions,
            shuffle_options,
            questions: (0..6)
                .map(|q| Question {
                    id: q,
                    text: format!("q{q}"),
                    points: 1,
                    options: (0..4)
                        .map(|o| QuestionOption {
                            id: q * 10 + o,
                            text: format!("o{o}"),
                            correct: o == 0,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn view_preserves_canonical_mapping() {
        let quiz = quiz(true, true);
        let mut rng = StdRng::seed_from_u64(42);
        let view = shuffled_view(&quiz, &mut rng);
        assert_eq!(view.questions.len(), quiz.questions.len());
        for qv in &view.questions {
            let question = &quiz.questions[qv.canonical_index];
            assert_eq!(qv.question_id, question.id);
            for ov in &qv.options {
                assert_eq!(ov.option_id, question.options[ov.canonical_index].id);
            }
        }
    }

    #[test]
    fn flags_off_means_stored_order() {
        let quiz = quiz(false, false);
        let mut rng = StdRng::seed_from_u64(42);
        let view = shuffled_view(&quiz, &mut rng);
        let ids: Vec<i64> = view.questions.iter().map(|q| q.question_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        let option_ids: Vec<i64> = view.questions[0].options.iter().map(|o| o.option_id).collect();
        assert_eq!(option_ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn same_seed_same_view() {
        let quiz = quiz(true, true);
        let a = shuffled_view(&quiz, &mut StdRng::seed_from_u64(7));
        let b = shuffled_view(&quiz, &mut StdRng::seed_from_u64(7));
        let order =
            |v: &QuizView| v.questions.iter().map(|q| q.question_id).collect::<Vec<_>>();
        assert_eq!(order(&a), order(&b));
    }
}
