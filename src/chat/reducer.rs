//! Deterministic message reducer.
//!
//! Every message source (history fetch, background poll, push event, send
//! confirmation, optimistic placeholder) goes through the same two functions,
//! keyed by id and independent of where the message came from:
//!
//! - [`apply_message`] folds one incoming message into a thread.
//! - [`reconcile`] merges a fetched batch into a thread.
//!
//! Rules: an entry with the same id is replaced (last write wins); a
//! placeholder is dropped once a confirmed message from the same sender with
//! identical content and a creation time within the echo window appears
//! (oldest placeholder first); the result is sorted ascending by creation time.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::core::ids::MessageId;
use crate::model::Message;

/// What [`apply_message`] did with the incoming message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// New entry.
    Inserted,
    /// Replaced the entry with the same id.
    Replaced,
    /// Replaced the optimistic placeholder with this id.
    ConfirmedPlaceholder(MessageId),
}

/// Whether `confirmed` is the server echo of `placeholder`.
#[must_use]
pub fn is_echo(placeholder: &Message, confirmed: &Message, window: Duration) -> bool {
    if !placeholder.is_placeholder() || confirmed.is_placeholder() {
        return false;
    }
    if placeholder.sender_type != confirmed.sender_type
        || placeholder.content.trim() != confirmed.content.trim()
    {
        return false;
    }
    let distance = (confirmed.created_at - placeholder.created_at).abs();
    distance.to_std().is_ok_and(|d| d <= window)
}

/// Fold one message into `messages`.
pub fn apply_message(messages: &mut Vec<Message>, incoming: Message, window: Duration) -> Applied {
    if let Some(existing) = messages.iter_mut().find(|m| m.id == incoming.id) {
        *existing = incoming;
        sort_messages(messages);
        return Applied::Replaced;
    }

    let echo_of = if incoming.is_placeholder() {
        None
    } else {
        oldest_placeholder(messages, &incoming, window)
    };

    let applied = match echo_of {
        Some(index) => Applied::ConfirmedPlaceholder(messages.remove(index).id),
        None => Applied::Inserted,
    };
    messages.push(incoming);
    sort_messages(messages);
    applied
}

/// Merge a fetched batch into the current thread.
///
/// Existing entries are kept (a push may have landed after the fetch was
/// issued), fetched entries overwrite by id, placeholders whose echo is
/// newly in the merged set are dropped. A confirmed id already present in
/// `existing` has either paired with its placeholder or never had one, so it
/// never claims another.
#[must_use]
pub fn reconcile(existing: &[Message], fetched: Vec<Message>, window: Duration) -> Vec<Message> {
    let settled: HashSet<MessageId> = existing
        .iter()
        .filter(|m| !m.is_placeholder())
        .map(|m| m.id.clone())
        .collect();

    let mut by_id: HashMap<MessageId, Message> =
        HashMap::with_capacity(existing.len() + fetched.len());
    for message in existing.iter().cloned().chain(fetched) {
        by_id.insert(message.id.clone(), message);
    }

    let (mut placeholders, mut merged): (Vec<Message>, Vec<Message>) =
        by_id.into_values().partition(Message::is_placeholder);
    sort_messages(&mut placeholders);
    sort_messages(&mut merged);

    let mut claimed: Vec<bool> = merged.iter().map(|m| settled.contains(&m.id)).collect();
    let mut unmatched = Vec::new();
    for placeholder in placeholders {
        let echo = merged
            .iter()
            .enumerate()
            .filter(|(i, confirmed)| !claimed[*i] && is_echo(&placeholder, confirmed, window))
            .map(|(i, _)| i)
            .next();
        match echo {
            Some(i) => claimed[i] = true,
            None => unmatched.push(placeholder),
        }
    }
    merged.extend(unmatched);

    sort_messages(&mut merged);
    merged
}

/// Remove the entry with `id`, returning it.
pub fn remove_message(messages: &mut Vec<Message>, id: &MessageId) -> Option<Message> {
    let index = messages.iter().position(|m| &m.id == id)?;
    Some(messages.remove(index))
}

/// Flag a placeholder as failed. Returns `false` if it is gone.
pub fn mark_failed(messages: &mut [Message], id: &MessageId) -> bool {
    messages
        .iter_mut()
        .find(|m| &m.id == id && m.is_placeholder())
        .map(|m| m.failed = true)
        .is_some()
}

/// Sort ascending by creation time; confirmed before placeholders on ties, then by id.
pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.is_placeholder().cmp(&b.is_placeholder()))
            .then_with(|| compare_ids(&a.id, &b.id))
    });
}

/// Numeric ids compare numerically, everything else lexically.
fn compare_ids(a: &MessageId, b: &MessageId) -> Ordering {
    match (a.as_str().parse::<u64>(), b.as_str().parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.as_str().cmp(b.as_str()),
    }
}

/// Echoes confirm placeholders in send order.
fn oldest_placeholder(messages: &[Message], confirmed: &Message, window: Duration) -> Option<usize> {
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| is_echo(m, confirmed, window))
        .min_by_key(|(_, m)| m.created_at)
        .map(|(i, _)| i)
}
