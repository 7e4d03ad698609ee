//! Notification fan-out.
//!
//! Each new item is rendered once and offered to every subscriber of the
//! entity that produced it. The [`AlertedSet`] makes sure a subscriber hears
//! about an item only once per process, even when a search hit and an
//! account monitor report the same submission.

mod alerted;
mod fanout;
mod templates;

pub use alerted::AlertedSet;
pub use fanout::{prefetch_previews, FanOutReport, Notification, Notifier, DEFAULT_CAPTION_LIMIT};
pub use templates::{render_journal, render_submission, Trigger};
