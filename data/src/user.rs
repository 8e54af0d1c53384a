use std::collections::HashMap;

use irc::proto;

use crate::isupport::Casemapping;

/// Index into the per-connection user arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub nickname: String,
    pub username: Option<String>,
    pub hostname: Option<String>,
    pub realname: Option<String>,
    pub away: Option<Away>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Away {
    pub reason: Option<String>,
}

impl User {
    fn new(source: &proto::User) -> Self {
        Self {
            nickname: source.nickname.clone(),
            username: source.username.clone(),
            hostname: source.hostname.clone(),
            realname: None,
            away: None,
        }
    }

    /// Fills in identity details learned from a later prefix.
    fn update(&mut self, source: &proto::User) {
        if source.username.is_some() {
            self.username.clone_from(&source.username);
        }
        if source.hostname.is_some() {
            self.hostname.clone_from(&source.hostname);
        }
    }

    pub fn is_away(&self) -> bool {
        self.away.is_some()
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nick = &self.nickname;

        match (&self.username, &self.hostname) {
            (None, None) => write!(f, "{nick}"),
            (None, Some(host)) => write!(f, "{nick}@{host}"),
            (Some(user), None) => write!(f, "{nick}!{user}"),
            (Some(user), Some(host)) => write!(f, "{nick}!{user}@{host}"),
        }
    }
}

/// Every user this connection currently knows about, keyed by id with a
/// case-folded nickname index.
#[derive(Debug, Default)]
pub struct Users {
    next: u64,
    casemapping: Casemapping,
    entries: HashMap<Id, User>,
    index: HashMap<String, Id>,
}

impl Users {
    pub fn get(&self, id: Id) -> Option<&User> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: Id) -> Option<&mut User> {
        self.entries.get_mut(&id)
    }

    pub fn find(&self, nickname: &str) -> Option<Id> {
        self.index.get(&self.casemapping.fold(nickname)).copied()
    }

    /// Returns the id for `source`, creating the user on first sight.
    pub fn resolve(&mut self, source: &proto::User) -> Id {
        if let Some(id) = self.find(&source.nickname) {
            if let Some(user) = self.entries.get_mut(&id) {
                user.update(source);
            }
            return id;
        }

        let id = Id(self.next);
        self.next += 1;

        self.index
            .insert(self.casemapping.fold(&source.nickname), id);
        self.entries.insert(id, User::new(source));

        id
    }

    pub fn resolve_nickname(&mut self, nickname: &str) -> Id {
        self.resolve(&proto::User::parse(nickname))
    }

    /// Renames a user, returning the old nickname.
    pub fn rename(&mut self, id: Id, nickname: &str) -> Option<String> {
        let user = self.entries.get_mut(&id)?;
        let old = std::mem::replace(&mut user.nickname, nickname.to_string());

        self.index.remove(&self.casemapping.fold(&old));
        self.index.insert(self.casemapping.fold(nickname), id);

        Some(old)
    }

    pub fn remove(&mut self, id: Id) -> Option<User> {
        let user = self.entries.remove(&id)?;
        self.index.remove(&self.casemapping.fold(&user.nickname));
        Some(user)
    }

    /// Rebuilds the nickname index after the server announced its casemapping.
    pub fn set_casemapping(&mut self, casemapping: Casemapping) {
        if self.casemapping == casemapping {
            return;
        }

        self.casemapping = casemapping;
        self.index = self
            .entries
            .iter()
            .map(|(id, user)| (casemapping.fold(&user.nickname), *id))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id, &User)> {
        self.entries.iter().map(|(id, user)| (*id, user))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod test {
    use irc::proto;

    use super::Users;
    use crate::isupport::Casemapping;

    #[test]
    fn resolve_and_rename() {
        let mut users = Users::default();

        let dan = users.resolve(&proto::User::parse("Dan!d@localhost"));
        assert_eq!(users.resolve_nickname("dan"), dan);
        assert_eq!(users.find("DAN"), Some(dan));
        assert_eq!(users.len(), 1);
        assert_eq!(users.get(dan).unwrap().to_string(), "Dan!d@localhost");

        assert_eq!(users.rename(dan, "daniel").as_deref(), Some("Dan"));
        assert_eq!(users.find("dan"), None);
        assert_eq!(users.find("Daniel"), Some(dan));

        assert!(users.remove(dan).is_some());
        assert!(users.is_empty());
        assert_eq!(users.find("daniel"), None);
    }

    #[test]
    fn casemapping_change_rebuilds_index() {
        let mut users = Users::default();

        let id = users.resolve_nickname("nick[away]");
        assert_eq!(users.find("nick{away}"), Some(id));

        users.set_casemapping(Casemapping::Ascii);
        assert_eq!(users.find("nick{away}"), None);
        assert_eq!(users.find("NICK[away]"), Some(id));
    }
}
