use std::fmt::Write;

use anyhow::anyhow;
use indoc::formatdoc;
use serde::Serialize;

use crate::{
    email::normalized_message::NormalizedMessage,
    error::{AppError, AppResult},
    prompt::TextGenerator,
};

const CHAT_CONTEXT_SIZE: usize = 20;
const PREVIEW_CHARS: usize = 150;
const SCORING_WINDOW: usize = 30;
const MAX_RELEVANT: usize = 5;
const RECENT_FALLBACK: usize = 3;

pub fn reply_prompt(tone: &str, sender: &str, subject: &str, body: &str, signer: Option<&str>) -> String {
    let sign_off = match signer {
        Some(name) => format!("Sign off appropriately as {name} (you can use \"Best regards\" or similar)"),
        None => "Sign off appropriately (you can use \"Best regards\" or similar)".to_string(),
    };

    formatdoc! {r#"
        You are an AI assistant helping to write email replies. Generate a {tone} reply to the following email:

        From: {sender}
        Subject: {subject}

        Email content:
        {body}

        Instructions:
        1. Write a {tone} reply that appropriately addresses all points in the email
        2. Keep the tone {tone} throughout
        3. Be concise but thorough
        4. Include a proper greeting using the sender's name if available
        5. {sign_off}
        6. Make the reply feel natural and human-written
        7. If the email asks questions, make sure to answer them
        8. If the email requires action, acknowledge what you'll do
        9. Do not include a signature line with contact details

        Generate only the reply text, without any additional commentary or explanations. Start directly with the greeting.
    "#}
}

pub async fn generate_reply(
    generator: &dyn TextGenerator,
    tone: &str,
    sender: &str,
    subject: &str,
    body: &str,
    signer: Option<&str>,
) -> AppResult<String> {
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("Email body is empty".to_string()));
    }

    let reply = generator
        .generate(&reply_prompt(tone, sender, subject, body, signer))
        .await?;
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(anyhow!("No response from AI").into());
    }

    Ok(reply.to_string())
}

fn preview(snippet: &str) -> String {
    snippet.chars().take(PREVIEW_CHARS).collect()
}

pub fn chat_prompt(user_email: &str, emails: &[NormalizedMessage], query: &str) -> String {
    let mut context = format!("Here are the user's most recent emails (from {user_email}):\n\n");
    for (i, email) in emails.iter().take(CHAT_CONTEXT_SIZE).enumerate() {
        let _ = write!(
            context,
            "Email {}:\nSubject: {}\nFrom: {}\nDate: {}\nPreview: {}...\nRead Status: {}\n{}\n\n",
            i + 1,
            email.subject,
            email.sender,
            email.date,
            preview(&email.snippet),
            if email.is_unread { "Unread" } else { "Read" },
            "-".repeat(40),
        );
    }

    formatdoc! {r#"
        You are an AI assistant helping users understand and find information in their emails.

        {context}

        User Query: "{query}"

        Please analyze the emails and provide a helpful response. You should:

        1. **Find the most relevant emails** to the user's query
        2. **Answer their question** or fulfill their request based on the email content
        3. **Reference specific emails** when relevant (by subject or sender)
        4. **Be conversational and helpful** - explain what you found
        5. **Summarize key information** if they're asking for updates or overviews
        6. **Suggest actions** if appropriate (like "You should reply to..." or "This seems urgent...")

        Guidelines:
        - If asking about urgent emails, look for keywords like "urgent", "ASAP", "deadline", etc.
        - If asking about specific people, match sender names
        - If asking about topics, match subjects and content
        - If asking for summaries, provide a concise overview
        - Be specific about which emails you're referencing

        Format your response in a natural, conversational way. Use **bold** for emphasis and bullet points where helpful.
    "#}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelevantEmail {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub snippet: String,
    pub is_unread: bool,
}

impl From<&NormalizedMessage> for RelevantEmail {
    fn from(email: &NormalizedMessage) -> Self {
        Self {
            id: email.id.clone(),
            subject: email.subject.clone(),
            sender: email.sender.clone(),
            date: email.date.clone(),
            snippet: email.snippet.clone(),
            is_unread: email.is_unread,
        }
    }
}

fn score_email(query: &str, reply: &str, email: &NormalizedMessage) -> u32 {
    let subject = email.subject.to_lowercase();
    let sender = email.sender.to_lowercase();
    let snippet = email.snippet.to_lowercase();
    let mut score = 0;

    for word in query.split_whitespace().filter(|w| w.chars().count() > 3) {
        if subject.contains(word) {
            score += 3;
        }
        if sender.contains(word) {
            score += 2;
        }
        if snippet.contains(word) {
            score += 1;
        }
    }

    if query.contains("urgent")
        && (subject.contains("urgent") || subject.contains("asap") || subject.contains('!'))
    {
        score += 5;
    }
    if query.contains("unread") && email.is_unread {
        score += 4;
    }
    if query.contains("recent") || query.contains("latest") {
        score += 1;
    }
    if query.contains("meeting") && subject.contains("meeting") {
        score += 4;
    }

    // Subjects the model's answer mentions.
    if subject.chars().count() > 10 {
        for word in subject.split_whitespace().take(4) {
            if word.chars().count() > 4 && reply.contains(word) {
                score += 2;
            }
        }
    }

    score
}

/// Picks the messages most related to a chat query and the model's answer.
pub fn score_relevance(query: &str, reply: &str, emails: &[NormalizedMessage]) -> Vec<RelevantEmail> {
    let query = query.to_lowercase();
    let reply = reply.to_lowercase();

    let mut scored: Vec<(u32, &NormalizedMessage)> = emails
        .iter()
        .take(SCORING_WINDOW)
        .map(|email| (score_email(&query, &reply, email), email))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let relevant: Vec<RelevantEmail> = scored
        .into_iter()
        .take(MAX_RELEVANT)
        .map(|(_, email)| email.into())
        .collect();

    let wants_recent = ["latest", "recent", "new", "today", "inbox"]
        .iter()
        .any(|w| query.contains(w));
    if relevant.is_empty() && wants_recent {
        return emails.iter().take(RECENT_FALLBACK).map(Into::into).collect();
    }

    relevant
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub response: String,
    pub relevant_emails: Vec<RelevantEmail>,
    pub total_emails_analyzed: usize,
}

pub async fn chat_with_mail(
    generator: &dyn TextGenerator,
    user_email: &str,
    emails: &[NormalizedMessage],
    query: &str,
) -> AppResult<ChatAnswer> {
    if query.trim().is_empty() {
        return Err(AppError::BadRequest("No query provided".to_string()));
    }
    if emails.is_empty() {
        return Err(AppError::NotFound("No emails found to analyze".to_string()));
    }

    tracing::info!("Chat with mail: analyzing {} emails", emails.len());
    let response = generator.generate(&chat_prompt(user_email, emails, query)).await?;
    if response.trim().is_empty() {
        return Err(anyhow!("No response from AI").into());
    }

    let relevant_emails = score_relevance(query, &response, emails);
    tracing::debug!("Chat with mail: {} relevant emails", relevant_emails.len());

    Ok(ChatAnswer {
        response,
        relevant_emails,
        total_emails_analyzed: emails.len(),
    })
}

/// Title-cased local part of an address, e.g. `jane.doe@x.com` -> `Jane.Doe`.
pub fn display_name_from_email(email: &str) -> Option<String> {
    let (local, _) = email.split_once('@')?;
    if local.is_empty() {
        return None;
    }

    let mut name = String::with_capacity(local.len());
    let mut prev_alpha = false;
    for c in local.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                name.extend(c.to_lowercase());
            } else {
                name.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            name.push(c);
            prev_alpha = false;
        }
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::common::StubGenerator;

    fn email(id: &str, subject: &str, sender: &str, snippet: &str, is_unread: bool) -> NormalizedMessage {
        NormalizedMessage {
            id: id.to_string(),
            subject: subject.to_string(),
            sender: sender.to_string(),
            date: "01/02/2024 03:04 PM".to_string(),
            snippet: snippet.to_string(),
            is_unread,
            ..Default::default()
        }
    }

    fn inbox() -> Vec<NormalizedMessage> {
        vec![
            email("1", "Lunch on Friday", "Sam", "Are you free?", false),
            email("2", "URGENT: server down!", "Ops Bot", "The API is returning 500s", true),
            email("3", "Quarterly budget meeting", "Finance Team", "Agenda attached", true),
            email("4", "Your receipt", "Shop", "Thanks for your order", false),
        ]
    }

    #[test]
    fn test_reply_prompt_contents() {
        let prompt = reply_prompt("friendly", "Sam", "Lunch", "Are you free Friday?", Some("Jane.Doe"));
        assert!(prompt.starts_with("You are an AI assistant helping to write email replies. Generate a friendly reply"));
        assert!(prompt.contains("From: Sam\nSubject: Lunch\n\nEmail content:\nAre you free Friday?"));
        assert!(prompt.contains("2. Keep the tone friendly throughout"));
        assert!(prompt.contains("Sign off appropriately as Jane.Doe"));
        assert!(prompt.trim_end().ends_with("Start directly with the greeting."));
    }

    #[test]
    fn test_chat_prompt_limits_context() {
        let mut emails = inbox();
        emails[0].snippet = "x".repeat(400);
        let many: Vec<_> = emails.iter().cycle().take(25).cloned().collect();
        let prompt = chat_prompt("me@example.com", &many, "anything urgent?");

        assert!(prompt.contains("Here are the user's most recent emails (from me@example.com):"));
        assert!(prompt.contains("Email 20:"));
        assert!(!prompt.contains("Email 21:"));
        assert!(prompt.contains(&format!("Preview: {}...\n", "x".repeat(150))));
        assert!(prompt.contains("Read Status: Unread"));
        assert!(prompt.contains("User Query: \"anything urgent?\""));
    }

    #[test]
    fn test_score_relevance_orders_by_score() {
        let relevant = score_relevance("Anything urgent?", "", &inbox());
        assert_eq!(relevant.first().map(|e| e.id.as_str()), Some("2"));

        let relevant = score_relevance("show unread meeting notes", "", &inbox());
        let ids: Vec<_> = relevant.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2"]);
    }

    #[test]
    fn test_score_relevance_uses_model_reply() {
        let relevant = score_relevance("what about food", "Sam asked about lunch on friday.", &inbox());
        let ids: Vec<_> = relevant.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[test]
    fn test_score_relevance_recent_fallback() {
        let emails = inbox();
        let relevant = score_relevance("new", "nothing here", &emails);
        assert_eq!(relevant.len(), 3);
        assert_eq!(relevant[0], RelevantEmail::from(&emails[0]));

        assert!(score_relevance("zz", "", &emails).is_empty());
    }

    #[test]
    fn test_display_name_from_email() {
        assert_eq!(display_name_from_email("jane.doe@example.com").as_deref(), Some("Jane.Doe"));
        assert_eq!(display_name_from_email("JOHN_smith2k@example.com").as_deref(), Some("John_Smith2K"));
        assert_eq!(display_name_from_email("no-at-sign"), None);
    }

    #[tokio::test]
    async fn test_generate_reply_trims_output() {
        let generator = StubGenerator::replying("\n  Hi Sam,\n\nSure!\n\nBest regards  \n");
        let reply = generate_reply(&generator, "friendly", "Sam", "Lunch", "Free Friday?", None)
            .await
            .unwrap();
        assert_eq!(reply, "Hi Sam,\n\nSure!\n\nBest regards");
    }

    #[tokio::test]
    async fn test_generate_reply_rejects_empty_body() {
        let generator = StubGenerator::replying("unused");
        let err = generate_reply(&generator, "professional", "Sam", "Lunch", "  ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg == "Email body is empty"));
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_chat_with_mail() {
        let generator = StubGenerator::replying("The **URGENT: server down!** email needs attention.");
        let answer = chat_with_mail(&generator, "me@example.com", &inbox(), "anything urgent")
            .await
            .unwrap();
        assert_eq!(answer.total_emails_analyzed, 4);
        assert_eq!(answer.relevant_emails[0].id, "2");

        let err = chat_with_mail(&generator, "me@example.com", &[], "anything").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
