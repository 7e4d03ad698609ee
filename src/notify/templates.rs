//! Notification text.

use crate::messenger::escape_html;
use crate::source::{Journal, Submission};

/// Entity that produced a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger<'a> {
    Search(&'a str),
    AccountSubmissions(&'a str),
}

/// Render a submission found by a search or posted by a monitored account.
pub fn render_submission(trigger: Trigger<'_>, submission: &Submission, url: &str) -> String {
    let title = escape_html(&submission.title);
    let author = escape_html(&submission.author);
    match trigger {
        Trigger::Search(query) => format!(
            "<b>Search:</b> <code>{}</code>: {}\n\nby {} ({})\n{}",
            escape_html(query),
            title,
            author,
            submission.rating,
            url
        ),
        Trigger::AccountSubmissions(_) => format!(
            "<b>Submission:</b> {}\n\nby {} ({})\n{}",
            title, author, submission.rating, url
        ),
    }
}

pub fn render_journal(journal: &Journal, url: &str) -> String {
    format!(
        "<b>Journal:</b> {}\n\nby {}\n{}",
        escape_html(&journal.title),
        escape_html(&journal.author),
        url
    )
}
