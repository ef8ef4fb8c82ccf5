//! Calendar-date grouping for the thread view.

use chrono::{Datelike, NaiveDate, TimeZone};

use crate::chat::reducer::sort_messages;
use crate::model::Message;

/// Messages sharing one calendar date in the viewer's timezone.
#[derive(Clone, Debug, PartialEq)]
pub struct DateGroup {
    /// Local calendar date.
    pub date: NaiveDate,
    /// Messages of that date, oldest first.
    pub messages: Vec<Message>,
}

/// Group `messages` by local date; groups and their contents ascend in time.
#[must_use]
pub fn group_by_date<Tz: TimeZone>(messages: &[Message], tz: &Tz) -> Vec<DateGroup> {
    let mut sorted = messages.to_vec();
    sort_messages(&mut sorted);

    let mut groups: Vec<DateGroup> = Vec::new();
    for message in sorted {
        let date = message.created_at.with_timezone(tz).date_naive();
        match groups.last_mut() {
            Some(group) if group.date == date => group.messages.push(message),
            _ => groups.push(DateGroup {
                date,
                messages: vec![message],
            }),
        }
    }
    groups
}

/// Header label for a date group relative to `today`.
#[must_use]
pub fn date_label(date: NaiveDate, today: NaiveDate) -> String {
    match (today - date).num_days() {
        0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        _ if date.year() == today.year() => date.format("%B %-d").to_string(),
        _ => date.format("%B %-d, %Y").to_string(),
    }
}
