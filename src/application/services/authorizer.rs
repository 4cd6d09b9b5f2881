//! Sender and room-membership authorization against a fixed allow-list

use std::collections::HashSet;

use crate::domain::entities::Identity;

/// Identities allowed to trigger replies. Always contains the bot itself.
#[derive(Debug, Clone)]
pub struct AllowList {
    ids: HashSet<Identity>,
}

impl AllowList {
    pub fn new(ids: impl IntoIterator<Item = Identity>, bot: &Identity) -> Self {
        let mut ids: HashSet<Identity> = ids.into_iter().collect();
        ids.insert(bot.clone());
        Self { ids }
    }

    /// Build from a comma-separated list such as `@a:example.com,@b:example.com`.
    ///
    /// Whitespace around entries and empty entries are dropped; the handles
    /// themselves are kept verbatim.
    pub fn parse(raw: &str, bot: &Identity) -> Self {
        Self::new(split_user_list(raw).into_iter().map(Identity::new), bot)
    }

    pub fn contains(&self, id: &Identity) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Split a comma-separated user list, dropping blanks
pub fn split_user_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read-only authorization decisions. Safe to share across tasks.
#[derive(Debug, Clone)]
pub struct Authorizer {
    allow_list: AllowList,
}

impl Authorizer {
    pub fn new(allow_list: AllowList) -> Self {
        Self { allow_list }
    }

    pub fn is_allowed(&self, id: &Identity) -> bool {
        self.allow_list.contains(id)
    }

    /// True iff every member is allowed. An empty membership is vacuously allowed.
    pub fn all_room_members_allowed(&self, members: &[Identity]) -> bool {
        members.iter().all(|m| self.allow_list.contains(m))
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }
}
