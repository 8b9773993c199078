//! Contact list aggregation.
//!
//! Joins the eligible contacts of the current [`RosterContext`] with the
//! user's conversation metadata and keeps the result sorted:
//!
//! 1. contacts with unread messages first
//! 2. most recent last message first
//! 3. contacts with any last message before those without
//! 4. display name, case-insensitively
//!
//! Unread counts from the backend are authoritative on every refresh; the
//! local adjustments in between ([`RosterAggregator::mark_opened`],
//! [`RosterAggregator::note_message`]) only keep the list plausible until
//! then. Presence is advisory and survives refreshes.

use std::cmp::Ordering;
use std::collections::HashMap;

use skillchat_proto::message::{Message, UserId};
use skillchat_proto::roster::{
    Contact, ContactProfile, ConversationSummary, LastMessage, RosterContext,
};

/// Total order used for the contact list.
#[must_use]
pub fn roster_order(a: &Contact, b: &Contact) -> Ordering {
    (b.unread_count > 0)
        .cmp(&(a.unread_count > 0))
        .then_with(|| match (&a.last_message, &b.last_message) {
            (Some(x), Some(y)) => y.at.cmp(&x.at),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| {
            a.profile
                .display_name
                .to_lowercase()
                .cmp(&b.profile.display_name.to_lowercase())
        })
        .then_with(|| a.id().cmp(b.id()))
}

/// Join `profiles` with `conversations`. Conversations with users outside
/// the eligible set are ignored.
#[must_use]
pub fn aggregate(profiles: Vec<ContactProfile>, conversations: &[ConversationSummary]) -> Vec<Contact> {
    let by_partner: HashMap<&UserId, &ConversationSummary> =
        conversations.iter().map(|c| (&c.partner_id, c)).collect();

    let mut contacts: Vec<Contact> = profiles
        .into_iter()
        .map(|profile| {
            let mut contact = Contact::new(profile);
            if let Some(summary) = by_partner.get(contact.id()) {
                contact.last_message.clone_from(&summary.last_message);
                contact.unread_count = summary.unread_count;
            }
            contact
        })
        .collect();
    contacts.sort_by(roster_order);
    contacts
}

/// Sum of unread counts, for the host's badge.
#[must_use]
pub fn total_unread(contacts: &[Contact]) -> u32 {
    contacts
        .iter()
        .fold(0_u32, |sum, c| sum.saturating_add(c.unread_count))
}

/// The sorted contact list for one context.
#[derive(Debug, Clone)]
pub struct RosterAggregator {
    context: RosterContext,
    contacts: Vec<Contact>,
    presence: HashMap<UserId, bool>,
}

impl RosterAggregator {
    /// An empty roster for `context`.
    #[must_use]
    pub fn new(context: RosterContext) -> Self {
        Self {
            context,
            contacts: Vec::new(),
            presence: HashMap::new(),
        }
    }

    /// The current context.
    #[must_use]
    pub const fn context(&self) -> &RosterContext {
        &self.context
    }

    /// Sorted contacts.
    #[must_use]
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Sum of unread counts.
    #[must_use]
    pub fn total_unread(&self) -> u32 {
        total_unread(&self.contacts)
    }

    /// Switch to `context`, dropping the old list. Returns the previous
    /// context.
    pub fn set_context(&mut self, context: RosterContext) -> RosterContext {
        self.contacts.clear();
        std::mem::replace(&mut self.context, context)
    }

    /// Show a cached snapshot until the first refresh lands.
    pub fn restore(&mut self, contacts: Vec<Contact>) {
        self.contacts = contacts;
        self.overlay_presence();
        self.contacts.sort_by(roster_order);
    }

    /// Install a fresh aggregate. Returns `true` if the list changed.
    pub fn replace(
        &mut self,
        profiles: Vec<ContactProfile>,
        conversations: &[ConversationSummary],
    ) -> bool {
        let previous = std::mem::replace(&mut self.contacts, aggregate(profiles, conversations));
        self.overlay_presence();
        self.contacts.sort_by(roster_order);
        previous != self.contacts
    }

    /// Zero the unread count of a contact the user just opened.
    pub fn mark_opened(&mut self, id: &UserId) -> bool {
        let Some(contact) = self.contacts.iter_mut().find(|c| c.id() == id) else {
            return false;
        };
        if contact.unread_count == 0 {
            return false;
        }
        contact.unread_count = 0;
        if let Some(last) = contact.last_message.as_mut()
            && !last.from_me
        {
            last.read = true;
        }
        self.contacts.sort_by(roster_order);
        true
    }

    /// Record a presence push.
    pub fn apply_presence(&mut self, id: &UserId, online: bool) -> bool {
        self.presence.insert(id.clone(), online);
        match self.contacts.iter_mut().find(|c| c.id() == id) {
            Some(contact) if contact.online != online => {
                contact.online = online;
                true
            }
            _ => false,
        }
    }

    /// Reflect a message seen on the live channel or returned by a send.
    ///
    /// `unread` bumps the partner's unread count (the conversation is not
    /// on screen).
    pub fn note_message(&mut self, partner: &UserId, message: &Message, me: &UserId, unread: bool) -> bool {
        let Some(contact) = self.contacts.iter_mut().find(|c| c.id() == partner) else {
            return false;
        };
        if contact
            .last_message
            .as_ref()
            .is_some_and(|last| last.at > message.created_at)
        {
            return false;
        }
        contact.last_message = Some(LastMessage {
            text: message.body.clone(),
            at: message.created_at,
            from_me: &message.sender_id == me,
            read: message.read_at.is_some(),
        });
        if unread {
            contact.unread_count = contact.unread_count.saturating_add(1);
        }
        self.contacts.sort_by(roster_order);
        true
    }

    fn overlay_presence(&mut self) {
        for contact in &mut self.contacts {
            if let Some(&online) = self.presence.get(contact.id()) {
                contact.online = online;
            }
        }
    }
}
