//! Prompt assembly. Pure string building, no I/O.

use std::fmt::Write;

use crate::domain::{Chapter, QuestionMix};

/// Prompt asking for study notes covering one chapter
pub fn chapter_notes_prompt(chapter: &Chapter) -> String {
    let mut prompt = String::from(
        "Generate exam material with detailed content for each topic of the chapter below. \
         Cover every topic listed, keep the chapter's order, and format the result as HTML \
         (no <html>, <head>, <body> or <title> tags).\n\n",
    );

    let _ = writeln!(prompt, "Chapter: {}", chapter.title);
    if !chapter.summary.is_empty() {
        let _ = writeln!(prompt, "Summary: {}", chapter.summary);
    }
    if !chapter.topics.is_empty() {
        prompt.push_str("Topics:\n");
        for topic in &chapter.topics {
            if topic.description.is_empty() {
                let _ = writeln!(prompt, "- {}", topic.name);
            } else {
                let _ = writeln!(prompt, "- {}: {}", topic.name, topic.description);
            }
        }
    }

    prompt
}

/// Prompt asking for a mixed question set based on chapter notes
pub fn chapter_test_prompt(chapter: &Chapter, notes: &str, mix: QuestionMix) -> String {
    let mut prompt = format!(
        "Create a practice test for the chapter \"{}\" using only the study notes below.\n",
        chapter.title
    );
    prompt.push_str(&question_mix_instructions(mix));
    prompt.push_str("\nStudy notes:\n");
    prompt.push_str(notes);
    prompt
}

/// Prompt asking for a course-level question set
pub fn course_test_prompt(base: &str, mix: QuestionMix) -> String {
    let mut prompt = base.trim_end().to_string();
    prompt.push_str("\n\n");
    prompt.push_str(&question_mix_instructions(mix));
    prompt
}

/// Shared wording for the question-type breakdown and response shape
fn question_mix_instructions(mix: QuestionMix) -> String {
    format!(
        "Write exactly {total} questions: {mcq} multiple choice, {tf} true/false and \
         {desc} descriptive. Respond with a JSON object {{\"questions\": [...]}} where each \
         question has a \"type\" of \"multiple_choice\" (with \"question\", \"options\", \
         \"answer\"), \"true_false\" (with \"question\", boolean \"answer\") or \"descriptive\" \
         (with \"question\", \"answer\").\n",
        total = mix.total(),
        mcq = mix.mcq,
        tf = mix.true_false,
        desc = mix.descriptive,
    )
}

/// Append the response shape to a caller-supplied flashcard prompt
pub fn flashcard_prompt(base: &str) -> String {
    format!(
        "{}\n\nRespond with a JSON object {{\"flashcards\": [{{\"front\": ..., \"back\": ...}}]}}.",
        base.trim_end()
    )
}

/// Append the response shape to a caller-supplied quiz prompt
pub fn quiz_prompt(base: &str) -> String {
    format!(
        "{}\n\nRespond with a JSON object {{\"questions\": [{{\"question\": ..., \"options\": [...], \"answer\": ...}}]}}.",
        base.trim_end()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notes_prompt_embeds_chapter() {
        let chapter = Chapter::new("Ownership", "Who frees memory")
            .with_topic("Moves", "Transfer of ownership")
            .with_topic("Borrowing", "");

        let prompt = chapter_notes_prompt(&chapter);
        assert!(prompt.contains("Chapter: Ownership"));
        assert!(prompt.contains("Summary: Who frees memory"));
        assert!(prompt.contains("- Moves: Transfer of ownership"));
        assert!(prompt.contains("- Borrowing\n"));
    }

    #[test]
    fn test_test_prompt_states_mix() {
        let chapter = Chapter::new("Ownership", "");
        let prompt = chapter_test_prompt(&chapter, "<p>notes</p>", QuestionMix::default());

        assert!(prompt.contains("exactly 10 questions: 4 multiple choice, 3 true/false and 3 descriptive"));
        assert!(prompt.ends_with("<p>notes</p>"));
    }
}
