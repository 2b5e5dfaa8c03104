use indexmap::IndexMap;
use indoc::formatdoc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

use crate::prompt::TextGenerator;

pub const FALLBACK_CATEGORY: &str = "Others";
const CATEGORY_LIMIT_NOTE: &str = "(NO MORE THAN 7 UNIQUE CATEGORIES)";
const SEPARATOR: &str = " --- ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorizeMethod {
    Ai,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizeOutcome {
    pub categories: Vec<String>,
    pub method: CategorizeMethod,
}

pub fn category_prompt(subjects: &[String], instruction: &str) -> String {
    let headings = subjects
        .iter()
        .enumerate()
        .map(|(i, subject)| format!("{}. {}", i + 1, subject))
        .collect::<Vec<_>>()
        .join("\n");

    let custom = if instruction.trim().is_empty() {
        String::new()
    } else {
        formatdoc! {"
            THESE ARE THE USERS CUSTOM INSTRUCTIONS. PLEASE BE SURE TO TAKE THEM INTO ACCOUNT(if not you fail.):
            {instruction}

        "}
    };

    formatdoc! {r#"
        You are an email classifier. Your task is simple:

        1. Read the email headings below
        2. You MUST classify all headings using NO MORE THAN 7 UNIQUE CATEGORIES. If you use more than 7 unique categories, you will instantly fail.
        3. Assign each email to exactly one category.
        4. If you are unsure, use "Others" as the category.

        Email headings:
        {headings}

        {custom}Instructions:
        - You are absolutely forbidden from using more than 7 unique category names in your entire output.
        - Assign one category per email, in the same order as the email list.
        - Use "Others" for any heading that does not clearly fit into one of your chosen categories.
        - Output ONLY in this format (do not number, do not add extra text):

        Heading --- Category {CATEGORY_LIMIT_NOTE}
        Heading --- Category
        Heading --- Category
    "#}
}

/// One line of the model's free-form reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyLine {
    Blank,
    /// `Heading --- Category`
    Separated(String),
    /// Anything else; the category is the last word.
    LastToken(String),
}

impl ReplyLine {
    pub fn parse(line: &str) -> Self {
        static RE_NOTE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(&format!("(?i){}", regex::escape(CATEGORY_LIMIT_NOTE))).unwrap()
        });

        let line = line.trim();
        if line.is_empty() {
            return ReplyLine::Blank;
        }

        if let Some((_, rest)) = line.split_once(SEPARATOR) {
            let segment = rest.split(SEPARATOR).next().unwrap_or_default();
            let category = RE_NOTE.replace_all(segment, "").trim().to_string();
            if category.is_empty() {
                return ReplyLine::Separated(FALLBACK_CATEGORY.to_string());
            }
            return ReplyLine::Separated(category);
        }

        match line.split_whitespace().last() {
            Some(token) => ReplyLine::LastToken(token.to_string()),
            None => ReplyLine::Blank,
        }
    }

    pub fn category(self) -> Option<String> {
        match self {
            ReplyLine::Blank => None,
            ReplyLine::Separated(category) | ReplyLine::LastToken(category) => Some(category),
        }
    }
}

/// Blank lines are skipped, so a reply with a missing line shifts every later label up by one.
pub fn parse_category_reply(reply: &str) -> Vec<String> {
    reply
        .trim()
        .lines()
        .filter_map(|line| ReplyLine::parse(line).category())
        .collect()
}

pub fn repair_count(mut categories: Vec<String>, expected: usize) -> Vec<String> {
    if categories.len() != expected {
        tracing::warn!(
            "Category count ({}) doesn't match email count ({})",
            categories.len(),
            expected
        );
        categories.resize(expected, FALLBACK_CATEGORY.to_string());
    }
    categories
}

/// Labels each subject, falling back to keyword rules when the model is unavailable.
pub async fn categorize(
    generator: &dyn TextGenerator,
    subjects: &[String],
    instruction: &str,
) -> CategorizeOutcome {
    if subjects.is_empty() {
        return CategorizeOutcome {
            categories: vec![],
            method: CategorizeMethod::Ai,
        };
    }

    let prompt = category_prompt(subjects, instruction);
    let reply = match generator.generate(&prompt).await {
        Ok(reply) if !reply.trim().is_empty() => reply,
        Ok(_) => {
            tracing::warn!("Empty categorization reply, using keyword categorization");
            return fallback(subjects);
        }
        Err(e) => {
            tracing::warn!("AI categorization failed, using keyword categorization: {}", e);
            return fallback(subjects);
        }
    };

    let categories = repair_count(parse_category_reply(&reply), subjects.len());
    tracing::debug!("AI categorization returned {} labels", categories.len());

    CategorizeOutcome {
        categories,
        method: CategorizeMethod::Ai,
    }
}

fn fallback(subjects: &[String]) -> CategorizeOutcome {
    CategorizeOutcome {
        categories: simple_categorize(subjects),
        method: CategorizeMethod::Fallback,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, strum::Display)]
pub enum KeywordCategory {
    Meetings,
    Work,
    Newsletters,
    Finance,
    Security,
    Social,
}

impl KeywordCategory {
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            KeywordCategory::Meetings => &["meeting", "calendar", "appointment", "schedule"],
            KeywordCategory::Work => &["project", "task", "deadline", "work", "team"],
            KeywordCategory::Newsletters => &["newsletter", "news", "update", "weekly", "daily"],
            KeywordCategory::Finance => &["bill", "payment", "invoice", "bank", "statement"],
            KeywordCategory::Security => &["security", "alert", "login", "password", "verification"],
            KeywordCategory::Social => &["social", "facebook", "twitter", "linkedin", "instagram"],
        }
    }

    pub fn matching(subject: &str) -> Option<Self> {
        let subject = subject.to_lowercase();
        KeywordCategory::iter().find(|c| c.keywords().iter().any(|k| subject.contains(k)))
    }
}

pub fn simple_categorize(subjects: &[String]) -> Vec<String> {
    subjects
        .iter()
        .map(|subject| match KeywordCategory::matching(subject) {
            Some(category) => category.to_string(),
            None => FALLBACK_CATEGORY.to_string(),
        })
        .collect()
}

/// Groups items under their label, keeping first-appearance order of labels.
pub fn group_by_category<T: Clone>(items: &[T], categories: &[String]) -> IndexMap<String, Vec<T>> {
    let mut grouped: IndexMap<String, Vec<T>> = IndexMap::new();
    for (i, item) in items.iter().enumerate() {
        let category = categories
            .get(i)
            .cloned()
            .unwrap_or_else(|| FALLBACK_CATEGORY.to_string());
        grouped.entry(category).or_default().push(item.clone());
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::common::StubGenerator;

    fn subjects(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prompt_lists_numbered_subjects() {
        let prompt = category_prompt(&subjects(&["Lunch?", "Invoice #42"]), "");
        assert!(prompt.contains("1. Lunch?\n2. Invoice #42"));
        assert!(prompt.contains("NO MORE THAN 7 UNIQUE CATEGORIES"));
        assert!(!prompt.contains("CUSTOM INSTRUCTIONS"));

        let prompt = category_prompt(&subjects(&["Lunch?"]), "Group by sender");
        assert!(prompt.contains("CUSTOM INSTRUCTIONS"));
        assert!(prompt.contains("Group by sender\n\nInstructions:"));
    }

    #[test]
    fn test_reply_line_variants() {
        assert_eq!(ReplyLine::parse("   "), ReplyLine::Blank);
        assert_eq!(
            ReplyLine::parse("Lunch? --- Personal"),
            ReplyLine::Separated("Personal".to_string())
        );
        assert_eq!(
            ReplyLine::parse("Team sync --- Work (NO MORE THAN 7 UNIQUE CATEGORIES)"),
            ReplyLine::Separated("Work".to_string())
        );
        assert_eq!(
            ReplyLine::parse("Team sync --- (no more than 7 unique categories)"),
            ReplyLine::Separated("Others".to_string())
        );
        assert_eq!(
            ReplyLine::parse("1. Invoice #42: Finance"),
            ReplyLine::LastToken("Finance".to_string())
        );
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let reply = "A --- Work\n\nB --- Finance\n  \nC Social\n";
        assert_eq!(parse_category_reply(reply), subjects(&["Work", "Finance", "Social"]));
    }

    #[test]
    fn test_repair_count() {
        assert_eq!(
            repair_count(subjects(&["Work"]), 3),
            subjects(&["Work", "Others", "Others"])
        );
        assert_eq!(repair_count(subjects(&["Work", "Finance", "Social"]), 2), subjects(&["Work", "Finance"]));
    }

    #[test]
    fn test_simple_categorize_rule_order() {
        let result = simple_categorize(&subjects(&[
            "Weekly team meeting",
            "Project deadline moved",
            "Your DAILY digest",
            "Bank statement available",
            "New login alert",
            "Someone mentioned you on LinkedIn",
            "Hello there",
        ]));
        assert_eq!(
            result,
            subjects(&["Meetings", "Work", "Newsletters", "Finance", "Security", "Social", "Others"])
        );
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // "meeting" is checked before "invoice"
        let result = simple_categorize(&subjects(&["Invoice for the meeting room", "Invoice #42"]));
        assert_eq!(result, subjects(&["Meetings", "Finance"]));
    }

    #[tokio::test]
    async fn test_categorize_uses_ai_reply() {
        let generator = StubGenerator::replying("Lunch? --- Personal\nInvoice #42 --- Finance");
        let outcome = categorize(&generator, &subjects(&["Lunch?", "Invoice #42", "Extra"]), "").await;
        assert_eq!(outcome.method, CategorizeMethod::Ai);
        assert_eq!(outcome.categories, subjects(&["Personal", "Finance", "Others"]));
    }

    #[tokio::test]
    async fn test_categorize_falls_back_on_error() {
        let generator = StubGenerator::failing();
        let outcome = categorize(&generator, &subjects(&["Payment received", "Hi"]), "").await;
        assert_eq!(outcome.method, CategorizeMethod::Fallback);
        assert_eq!(outcome.categories, subjects(&["Finance", "Others"]));
    }

    #[tokio::test]
    async fn test_categorize_falls_back_on_empty_reply() {
        let generator = StubGenerator::replying("  \n ");
        let outcome = categorize(&generator, &subjects(&["Security alert"]), "").await;
        assert_eq!(outcome.method, CategorizeMethod::Fallback);
        assert_eq!(outcome.categories, subjects(&["Security"]));
    }

    #[tokio::test]
    async fn test_categorize_empty_input_skips_model() {
        let generator = StubGenerator::failing();
        let outcome = categorize(&generator, &[], "").await;
        assert!(outcome.categories.is_empty());
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn test_group_by_category_keeps_first_appearance() {
        let items = vec!["a", "b", "c", "d"];
        let grouped = group_by_category(&items, &subjects(&["Work", "Finance", "Work"]));
        let keys: Vec<_> = grouped.keys().cloned().collect();
        assert_eq!(keys, subjects(&["Work", "Finance", "Others"]));
        assert_eq!(grouped["Work"], vec!["a", "c"]);
        assert_eq!(grouped["Others"], vec!["d"]);
    }
}
