use std::fmt;

pub use self::command::Numeric;

pub mod command;
pub mod format;
pub mod parse;

/// A single protocol line split into its parts.
///
/// The command token is kept exactly as it appeared on the wire, so a
/// lowercase verb from a non-conformant server stays lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub tags: Vec<Tag>,
    pub source: Option<Source>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// The numeric code when the command is a three digit reply.
    pub fn numeric(&self) -> Option<u16> {
        command::numeric(&self.command)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// The final parameter, which carries free text for most commands.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// The raw prefix, without the leading colon.
    pub fn prefix(&self) -> Option<String> {
        self.source.as_ref().map(ToString::to_string)
    }

    /// Nickname of the sender when the prefix names a user.
    pub fn nickname(&self) -> Option<&str> {
        match &self.source {
            Some(Source::User(user)) => Some(&user.nickname),
            _ => None,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.key == key)
            .and_then(|tag| tag.value.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Server(String),
    User(User),
}

impl Source {
    pub fn user(&self) -> Option<&User> {
        match self {
            Source::User(user) => Some(user),
            Source::Server(_) => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Server(server) => server.fmt(f),
            Source::User(user) => user.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub nickname: String,
    pub username: Option<String>,
    pub hostname: Option<String>,
}

impl User {
    /// Splits a `nick!user@host` string. Missing parts are left empty.
    pub fn parse(host: &str) -> Self {
        let host = host.strip_prefix(':').unwrap_or(host);

        let (rest, hostname) = match host.split_once('@') {
            Some((rest, hostname)) => (rest, Some(hostname.to_string())),
            None => (host, None),
        };
        let (nickname, username) = match rest.split_once('!') {
            Some((nickname, username)) => (nickname, Some(username.to_string())),
            None => (rest, None),
        };

        Self {
            nickname: nickname.to_string(),
            username,
            hostname,
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nickname)?;
        if let Some(username) = &self.username {
            write!(f, "!{username}")?;
        }
        if let Some(hostname) = &self.hostname {
            write!(f, "@{hostname}")?;
        }
        Ok(())
    }
}

/// Builds an outbound message. Verbs are sent in uppercase.
pub fn command(command: &str, parameters: Vec<String>) -> Message {
    Message {
        tags: vec![],
        source: None,
        command: command.to_uppercase(),
        params: parameters,
    }
}

pub const CHANNEL_PREFIXES: [char; 4] = ['#', '&', '+', '!'];

pub fn is_channel(target: &str) -> bool {
    target.starts_with(CHANNEL_PREFIXES)
}

pub const CHANNEL_MEMBERSHIP_PREFIXES: [char; 5] = ['~', '&', '@', '%', '+'];

#[macro_export]
macro_rules! command {
    ($c:expr) => (
        $crate::command($c, vec![])
    );
    ($c:expr, $($p:expr),+ $(,)?) => (
        $crate::command($c, vec![$($p.into(),)*])
    );
}

#[cfg(test)]
mod test {
    use super::User;

    #[test]
    fn user_parse() {
        let user = User::parse("dan!d@localhost");
        assert_eq!(user.nickname, "dan");
        assert_eq!(user.username.as_deref(), Some("d"));
        assert_eq!(user.hostname.as_deref(), Some("localhost"));
        assert_eq!(user.to_string(), "dan!d@localhost");

        let user = User::parse(":nick");
        assert_eq!(user.nickname, "nick");
        assert_eq!(user.username, None);
        assert_eq!(user.hostname, None);

        let user = User::parse("nick@host");
        assert_eq!(user.username, None);
        assert_eq!(user.hostname.as_deref(), Some("host"));
    }
}
