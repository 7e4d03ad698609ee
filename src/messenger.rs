//! Messaging front-end contract and HTML markup helpers.

use crate::error::DeliveryError;
use crate::types::SubscriberId;
use async_trait::async_trait;

/// How the front end should interpret message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseMode {
    Plain,
    Html,
}

/// Messaging front end.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(
        &self,
        recipient: SubscriberId,
        text: &str,
        mode: ParseMode,
    ) -> Result<(), DeliveryError>;

    /// Send an image with a caption.
    async fn send_media(
        &self,
        recipient: SubscriberId,
        media: &[u8],
        caption: &str,
        mode: ParseMode,
    ) -> Result<(), DeliveryError>;
}

/// Escape text for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Truncate HTML to at most `limit` visible characters.
///
/// Tags do not count; an entity counts as one character and is never split.
/// Tags still open at the cut are closed in reverse order.
pub fn truncate_html(text: &str, limit: usize) -> String {
    let mut out = String::with_capacity(text.len().min(limit * 2));
    let mut open: Vec<String> = Vec::new();
    let mut visible = 0;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if c == '<' {
            let Some(end) = rest.find('>') else {
                break;
            };
            let tag = &rest[..=end];
            let inner = &tag[1..tag.len() - 1];
            if let Some(name) = inner.strip_prefix('/') {
                let name = name.trim();
                if let Some(pos) = open.iter().rposition(|t| t == name) {
                    open.truncate(pos);
                }
            } else if !inner.ends_with('/') {
                let name = inner.split_whitespace().next().unwrap_or_default();
                open.push(name.to_string());
            }
            out.push_str(tag);
            rest = &rest[end + 1..];
            continue;
        }

        if visible == limit {
            break;
        }

        let len = if c == '&' {
            match rest.find(';') {
                Some(end) if end <= 10 => end + 1,
                _ => c.len_utf8(),
            }
        } else {
            c.len_utf8()
        };
        out.push_str(&rest[..len]);
        rest = &rest[len..];
        visible += 1;
    }

    for name in open.iter().rev() {
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }
    out
}
