//! Client-side message view for the currently open conversation.
//!
//! Three input streams feed the view: the bulk fetch issued when a
//! conversation opens, optimistic local inserts on send, and messages
//! pushed over the gateway. [`ConversationView`] is the single writer that
//! merges them into one ascending (created_at, id) ordered list.
//!
//! Results of async work re-enter the view through tickets. Every ticket
//! carries the epoch that was current when the work started; the epoch
//! bumps on every open, so results that arrive after the user switched
//! conversations are recognized as stale and dropped instead of leaking
//! into the wrong view.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use parley_types::models::{Message, MessageStatus};

/// Guards a bulk fetch against conversation switches: the result is only
/// applied while the epoch it was issued under is still current.
#[derive(Debug, Clone, Copy)]
pub struct FetchTicket {
    epoch: u64,
}

/// Tracks one in-flight send. The optimistic entry it inserted is matched
/// by this correlation id, never by content, so several sends can be in
/// flight at once.
#[derive(Debug, Clone, Copy)]
pub struct SendTicket {
    correlation: Uuid,
    epoch: u64,
}

/// One optimistic entry per in-flight send: inserted as `pending`, resolved
/// to confirmed (replaced by the server message) or failed (removed).
#[derive(Debug)]
struct PendingSend {
    correlation: Uuid,
    temp_id: Uuid,
}

pub struct ConversationView {
    me: Uuid,
    peer: Option<Uuid>,
    epoch: u64,
    messages: Vec<Message>,
    pending: Vec<PendingSend>,
}

impl ConversationView {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            peer: None,
            epoch: 0,
            messages: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn peer(&self) -> Option<Uuid> {
        self.peer
    }

    /// Messages in display order: ascending (created_at, id).
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Open a conversation with `peer`. The previous view is discarded
    /// wholesale and all outstanding tickets become stale, so nothing from
    /// the old conversation can leak into the new one.
    pub fn open(&mut self, peer: Uuid) -> FetchTicket {
        self.peer = Some(peer);
        self.epoch += 1;
        self.messages.clear();
        self.pending.clear();
        FetchTicket { epoch: self.epoch }
    }

    /// Close the view entirely (logout, conversation list).
    pub fn close(&mut self) {
        self.peer = None;
        self.epoch += 1;
        self.messages.clear();
        self.pending.clear();
    }

    /// Install the bulk fetch result. Returns false (and drops the result)
    /// if the view moved on while the fetch was in flight.
    pub fn apply_fetch(&mut self, ticket: FetchTicket, mut messages: Vec<Message>) -> bool {
        if ticket.epoch != self.epoch {
            debug!("dropping stale fetch result (epoch {})", ticket.epoch);
            return false;
        }

        sort_for_display(&mut messages);
        self.messages = messages;
        true
    }

    /// Append one optimistic entry for a send and return the ticket that
    /// will resolve it. The entry is shown immediately; the UI never waits
    /// on the network. Returns None when no conversation is open.
    pub fn begin_send(&mut self, text: Option<String>, image: Option<String>) -> Option<SendTicket> {
        let peer = self.peer?;

        let temp_id = Uuid::new_v4();
        let correlation = Uuid::new_v4();

        self.messages.push(Message {
            id: temp_id,
            sender_id: self.me,
            receiver_id: peer,
            text,
            image,
            read: false,
            delivered: false,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        });
        sort_for_display(&mut self.messages);

        self.pending.push(PendingSend {
            correlation,
            temp_id,
        });

        Some(SendTicket {
            correlation,
            epoch: self.epoch,
        })
    }

    /// The server confirmed the send: swap the optimistic entry for the
    /// persisted message. A ticket from a closed conversation is ignored.
    pub fn confirm_send(&mut self, ticket: SendTicket, message: Message) {
        if ticket.epoch != self.epoch {
            debug!("dropping stale send confirmation");
            return;
        }

        self.resolve(ticket.correlation);
        self.insert(message);
    }

    /// The send failed: remove the optimistic entry. The caller surfaces
    /// the failure; nothing is retried automatically.
    pub fn fail_send(&mut self, ticket: SendTicket) {
        if ticket.epoch != self.epoch {
            return;
        }

        self.resolve(ticket.correlation);
    }

    /// Merge a message pushed over the gateway. Accepted only when it
    /// belongs to the open conversation (either direction); anything else
    /// is some other conversation's traffic and must not touch this view.
    /// Returns whether the message was accepted.
    pub fn apply_push(&mut self, message: Message) -> bool {
        let Some(peer) = self.peer else {
            return false;
        };
        if !message.is_between(self.me, peer) {
            return false;
        }

        // A push for this conversation supersedes anything still pending.
        let pending: Vec<PendingSend> = std::mem::take(&mut self.pending);
        for entry in pending {
            self.messages.retain(|m| m.id != entry.temp_id);
        }

        self.insert(message);
        true
    }

    /// Remove the pending entry for `correlation` (and its optimistic
    /// message, if still present).
    fn resolve(&mut self, correlation: Uuid) {
        if let Some(pos) = self.pending.iter().position(|p| p.correlation == correlation) {
            let entry = self.pending.remove(pos);
            self.messages.retain(|m| m.id != entry.temp_id);
        }
    }

    fn insert(&mut self, message: Message) {
        if self.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        self.messages.push(message);
        sort_for_display(&mut self.messages);
    }
}

/// Stable sort on (created_at, id). Timestamps have second granularity, so
/// collisions are routine; the id tie-break keeps the order deterministic.
fn sort_for_display(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs as i64)
    }

    fn msg(sender: Uuid, receiver: Uuid, text: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            text: Some(text.into()),
            image: None,
            read: false,
            delivered: false,
            status: MessageStatus::Sent,
            created_at: at,
        }
    }

    fn texts(view: &ConversationView) -> Vec<&str> {
        view.messages()
            .iter()
            .filter_map(|m| m.text.as_deref())
            .collect()
    }

    #[test]
    fn fetch_replaces_view_in_display_order() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut view = ConversationView::new(me);

        let ticket = view.open(peer);
        let fetched = vec![
            msg(peer, me, "second", ts(1)),
            msg(me, peer, "first", ts(0)),
        ];
        assert!(view.apply_fetch(ticket, fetched));
        assert_eq!(texts(&view), vec!["first", "second"]);
    }

    #[test]
    fn stale_fetch_is_dropped_after_switch() {
        let me = Uuid::new_v4();
        let peer_b = Uuid::new_v4();
        let peer_c = Uuid::new_v4();
        let mut view = ConversationView::new(me);

        let ticket_b = view.open(peer_b);
        let ticket_c = view.open(peer_c);

        // B's fetch resolves after the user already switched to C
        assert!(!view.apply_fetch(ticket_b, vec![msg(peer_b, me, "old", ts(0))]));
        assert!(view.messages().is_empty());

        assert!(view.apply_fetch(ticket_c, vec![msg(peer_c, me, "new", ts(1))]));
        assert_eq!(texts(&view), vec!["new"]);
    }

    #[test]
    fn send_confirmation_replaces_optimistic_entry() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut view = ConversationView::new(me);
        let ticket = view.open(peer);
        view.apply_fetch(ticket, vec![]);

        let send = view.begin_send(Some("hi".into()), None).unwrap();
        assert_eq!(view.messages().len(), 1);
        assert!(view.has_pending());

        let confirmed = msg(me, peer, "hi", ts(5));
        let confirmed_id = confirmed.id;
        view.confirm_send(send, confirmed);

        // exactly one message, and it is the server's copy
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.messages()[0].id, confirmed_id);
        assert!(!view.has_pending());
    }

    #[test]
    fn failed_send_removes_optimistic_entry() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut view = ConversationView::new(me);
        let ticket = view.open(peer);
        view.apply_fetch(ticket, vec![msg(peer, me, "earlier", ts(0))]);

        let send = view.begin_send(Some("oops".into()), None).unwrap();
        assert_eq!(view.messages().len(), 2);

        view.fail_send(send);
        assert_eq!(texts(&view), vec!["earlier"]);
        assert!(!view.has_pending());
    }

    #[test]
    fn concurrent_sends_resolve_by_correlation_not_content() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut view = ConversationView::new(me);
        let ticket = view.open(peer);
        view.apply_fetch(ticket, vec![]);

        // two in-flight sends with identical text
        let first = view.begin_send(Some("hello".into()), None).unwrap();
        let second = view.begin_send(Some("hello".into()), None).unwrap();
        assert_eq!(view.messages().len(), 2);

        view.fail_send(second);
        assert_eq!(view.messages().len(), 1);
        assert!(view.has_pending());

        view.confirm_send(first, msg(me, peer, "hello", ts(3)));
        assert_eq!(view.messages().len(), 1);
        assert!(!view.has_pending());
    }

    #[test]
    fn push_for_other_conversation_is_ignored() {
        let me = Uuid::new_v4();
        let peer_b = Uuid::new_v4();
        let peer_c = Uuid::new_v4();
        let mut view = ConversationView::new(me);
        let ticket = view.open(peer_b);
        view.apply_fetch(ticket, vec![]);

        // C's message must never land in the (me, B) view
        assert!(!view.apply_push(msg(peer_c, me, "wrong room", ts(0))));
        // nor a message between two other users entirely
        assert!(!view.apply_push(msg(peer_c, peer_b, "not mine", ts(0))));
        assert!(view.messages().is_empty());

        assert!(view.apply_push(msg(peer_b, me, "right room", ts(1))));
        assert_eq!(texts(&view), vec!["right room"]);
    }

    #[test]
    fn push_supersedes_pending_entries() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut view = ConversationView::new(me);
        let ticket = view.open(peer);
        view.apply_fetch(ticket, vec![]);

        let send = view.begin_send(Some("mine".into()), None).unwrap();
        assert!(view.has_pending());

        assert!(view.apply_push(msg(peer, me, "theirs", ts(2))));
        assert_eq!(texts(&view), vec!["theirs"]);
        assert!(!view.has_pending());

        // the late confirmation still resolves cleanly: the pending entry
        // is gone, so only the server message is inserted
        let confirmed = msg(me, peer, "mine", ts(1));
        view.confirm_send(send, confirmed);
        assert_eq!(texts(&view), vec!["mine", "theirs"]);
    }

    #[test]
    fn switching_conversations_discards_everything() {
        let me = Uuid::new_v4();
        let peer_b = Uuid::new_v4();
        let peer_c = Uuid::new_v4();
        let mut view = ConversationView::new(me);

        let ticket = view.open(peer_b);
        view.apply_fetch(ticket, vec![msg(peer_b, me, "b stuff", ts(0))]);
        let send = view.begin_send(Some("in flight".into()), None).unwrap();

        view.open(peer_c);
        assert!(view.messages().is_empty());
        assert!(!view.has_pending());

        // the old send resolving must not touch C's view
        view.confirm_send(send, msg(me, peer_b, "in flight", ts(1)));
        assert!(view.messages().is_empty());
    }

    #[test]
    fn ordering_is_deterministic_under_timestamp_ties() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut view = ConversationView::new(me);
        let ticket = view.open(peer);

        let a = msg(peer, me, "a", ts(0));
        let b = msg(me, peer, "b", ts(0));
        let c = msg(peer, me, "c", ts(0));
        let mut expected: Vec<(Uuid, &str)> = [&a, &b, &c]
            .iter()
            .map(|m| (m.id, m.text.as_deref().unwrap()))
            .collect();
        expected.sort();

        view.apply_fetch(ticket, vec![a.clone(), b.clone(), c.clone()]);
        let got: Vec<Uuid> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(got, expected.iter().map(|(id, _)| *id).collect::<Vec<_>>());

        // pushing a duplicate id changes nothing
        assert!(view.apply_push(a));
        assert_eq!(view.messages().len(), 3);
    }

    #[test]
    fn begin_send_requires_open_conversation() {
        let me = Uuid::new_v4();
        let mut view = ConversationView::new(me);
        assert!(view.begin_send(Some("hi".into()), None).is_none());

        view.open(Uuid::new_v4());
        view.close();
        assert!(view.begin_send(Some("hi".into()), None).is_none());
        assert!(!view.apply_push(msg(me, Uuid::new_v4(), "x", ts(0))));
    }
}
