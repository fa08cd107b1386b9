use std::collections::HashSet;

use chrono::{DateTime, Utc};
use twin_api::ClientMessageId;

use crate::chat::message::Turn;

/// Ordered turn sequence, oldest first.
///
/// All mutation goes through `append`, `update_by_correlation_id` and
/// `prepend_page`; at most one turn holds a given correlation id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStore {
    turns: Vec<Turn>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.turns.first().map(|turn| turn.timestamp)
    }

    /// Appends a turn at the tail. Returns `false` and leaves the store
    /// untouched when the correlation id is already present.
    pub fn append(&mut self, turn: Turn) -> bool {
        if let Some(id) = turn.client_message_id
            && self.position(id).is_some()
        {
            tracing::debug!(client_message_id = %id, "rejecting duplicate correlation id");
            return false;
        }

        self.turns.push(turn);
        true
    }

    pub fn find_by_correlation_id(&self, id: ClientMessageId) -> Option<&Turn> {
        self.position(id).map(|index| &self.turns[index])
    }

    /// Applies `mutate` to the turn holding `id`. Returns `false` when no
    /// turn matches.
    pub fn update_by_correlation_id(
        &mut self,
        id: ClientMessageId,
        mutate: impl FnOnce(&mut Turn),
    ) -> bool {
        match self.position(id) {
            Some(index) => {
                mutate(&mut self.turns[index]);
                true
            }
            None => false,
        }
    }

    /// Splices an older page above the held turns.
    ///
    /// The page is sorted by timestamp; rows not strictly older than the
    /// oldest held turn, and rows repeating a `(correlation id, timestamp)`
    /// key, are dropped. Returns how many turns were inserted.
    ///
    /// History rows carry no correlation id, so their key is the timestamp
    /// alone: two distinct rows stamped within the same second collapse into
    /// the first one. Server timestamps are second-resolution, which makes
    /// this loss possible but rare.
    pub fn prepend_page(&mut self, older: Vec<Turn>) -> usize {
        let mut page = older;
        page.sort_by_key(|turn| turn.timestamp);

        let oldest_held = self.oldest_timestamp();
        let mut seen: HashSet<(Option<ClientMessageId>, DateTime<Utc>)> = self
            .turns
            .iter()
            .map(|turn| (turn.client_message_id, turn.timestamp))
            .collect();

        page.retain(|turn| {
            let older_than_held = oldest_held.is_none_or(|oldest| turn.timestamp < oldest);
            older_than_held && seen.insert((turn.client_message_id, turn.timestamp))
        });

        let inserted = page.len();
        if inserted > 0 {
            page.append(&mut self.turns);
            self.turns = page;
        }
        inserted
    }

    pub fn replace_all(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    // The active turn is almost always the last one.
    fn position(&self, id: ClientMessageId) -> Option<usize> {
        let last = self.turns.len().checked_sub(1)?;
        if self.turns[last].client_message_id == Some(id) {
            return Some(last);
        }

        self.turns[..last]
            .iter()
            .position(|turn| turn.client_message_id == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::chat::message::TurnStatus;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(seconds)
    }

    fn history(question: &str, seconds: i64) -> Turn {
        Turn {
            session_id: None,
            client_message_id: None,
            question: question.to_string(),
            answer: format!("answer to {question}"),
            timestamp: at(seconds),
            status: TurnStatus::Done,
        }
    }

    #[test]
    fn append_rejects_duplicate_correlation_ids() {
        let id = ClientMessageId::generate();
        let mut store = MessageStore::new();

        assert!(store.append(Turn::optimistic(None, id, "one", at(0))));
        assert!(!store.append(Turn::optimistic(None, id, "two", at(1))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.turns()[0].question, "one");
    }

    #[test]
    fn update_finds_last_and_earlier_turns_alike() {
        let first = ClientMessageId::generate();
        let last = ClientMessageId::generate();
        let mut store = MessageStore::new();
        store.append(Turn::optimistic(None, first, "first", at(0)));
        store.append(history("between", 1));
        store.append(Turn::optimistic(None, last, "last", at(2)));

        assert!(store.update_by_correlation_id(last, |turn| turn.answer.push_str("tail")));
        assert!(store.update_by_correlation_id(first, |turn| turn.answer.push_str("head")));
        assert!(!store.update_by_correlation_id(ClientMessageId::generate(), |turn| {
            turn.answer.push_str("never")
        }));

        assert_eq!(store.turns()[0].answer, "head");
        assert_eq!(store.turns()[2].answer, "tail");
    }

    #[test]
    fn prepend_orders_page_above_held_turns() {
        let mut store = MessageStore::new();
        store.append(history("c", 30));
        store.append(history("d", 40));

        let inserted = store.prepend_page(vec![history("b", 20), history("a", 10)]);

        assert_eq!(inserted, 2);
        let questions: Vec<_> = store.turns().iter().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, ["a", "b", "c", "d"]);
    }

    #[test]
    fn prepend_drops_overlap_and_duplicates() {
        let mut store = MessageStore::new();
        store.append(history("c", 30));

        let inserted = store.prepend_page(vec![
            history("a", 10),
            history("a-again", 10),
            history("overlap", 30),
            history("newer", 35),
        ]);

        assert_eq!(inserted, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.turns()[0].question, "a");
        assert!(
            store
                .turns()
                .windows(2)
                .all(|pair| pair[0].timestamp < pair[1].timestamp)
        );
    }

    #[test]
    fn prepend_into_empty_store_keeps_whole_page() {
        let mut store = MessageStore::new();
        assert_eq!(store.prepend_page(vec![history("b", 2), history("a", 1)]), 2);
        assert_eq!(store.turns()[0].question, "a");
    }
}
