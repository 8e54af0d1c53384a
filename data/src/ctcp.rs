use std::fmt;

use chrono::Utc;
use irc::proto;

// Reference: https://rawgit.com/DanielOaks/irc-rfcs/master/dist/draft-oakley-irc-ctcp-latest.html

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Action,
    ClientInfo,
    Ping,
    Version,
    Time,
    Unknown(String),
}

impl From<&str> for Command {
    fn from(command: &str) -> Self {
        match command.to_uppercase().as_ref() {
            "ACTION" => Command::Action,
            "CLIENTINFO" => Command::ClientInfo,
            "PING" => Command::Ping,
            "VERSION" => Command::Version,
            "TIME" => Command::Time,
            _ => Command::Unknown(command.to_uppercase()),
        }
    }
}

impl AsRef<str> for Command {
    fn as_ref(&self) -> &str {
        match self {
            Command::Action => "ACTION",
            Command::ClientInfo => "CLIENTINFO",
            Command::Ping => "PING",
            Command::Version => "VERSION",
            Command::Time => "TIME",
            Command::Unknown(command) => command.as_ref(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Query<'a> {
    pub command: Command,
    pub params: Option<&'a str>,
}

pub fn is_query(text: &str) -> bool {
    text.starts_with('\u{1}')
}

pub fn parse_query(text: &str) -> Option<Query<'_>> {
    let query = text
        .strip_suffix('\u{1}')
        .unwrap_or(text)
        .strip_prefix('\u{1}')?;

    let (command, params) = match query.split_once(char::is_whitespace) {
        Some((command, params)) => (command, Some(params)),
        None => (query, None),
    };

    if command.is_empty() {
        return None;
    }

    Some(Query {
        command: Command::from(command),
        params,
    })
}

pub fn format(command: &Command, params: Option<impl fmt::Display>) -> String {
    let command = command.as_ref();

    if let Some(params) = params {
        format!("\u{1}{command} {params}\u{1}")
    } else {
        format!("\u{1}{command}\u{1}")
    }
}

pub fn query_message(
    command: &Command,
    target: String,
    params: Option<impl fmt::Display>,
) -> proto::Message {
    proto::command!("PRIVMSG", target, format(command, params))
}

pub fn response_message(
    command: &Command,
    target: String,
    params: Option<impl fmt::Display>,
) -> proto::Message {
    proto::command!("NOTICE", target, format(command, params))
}

/// Which automatic replies are enabled, and the version string to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replies {
    pub version: Option<String>,
    pub ping: bool,
    pub time: bool,
    pub clientinfo: bool,
}

impl Replies {
    /// The reply parameters for `query`, if it should be answered.
    pub fn reply(&self, query: &Query<'_>) -> Option<Option<String>> {
        match query.command {
            Command::Version => self.version.clone().map(Some),
            Command::Ping if self.ping => Some(query.params.map(ToString::to_string)),
            Command::Time if self.time => Some(Some(Utc::now().to_rfc2822())),
            Command::ClientInfo if self.clientinfo => Some(Some(self.supported())),
            _ => None,
        }
    }

    fn supported(&self) -> String {
        let mut commands = vec![Command::Action, Command::ClientInfo];

        if self.ping {
            commands.push(Command::Ping);
        }
        if self.time {
            commands.push(Command::Time);
        }
        if self.version.is_some() {
            commands.push(Command::Version);
        }

        commands
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod test {
    use super::{Command, Query, Replies, parse_query};

    #[test]
    fn queries() {
        let tests = [
            (
                "\u{1}ACTION waves\u{1}",
                Some(Query {
                    command: Command::Action,
                    params: Some("waves"),
                }),
            ),
            (
                "\u{1}version\u{1}",
                Some(Query {
                    command: Command::Version,
                    params: None,
                }),
            ),
            (
                "\u{1}PING 12345",
                Some(Query {
                    command: Command::Ping,
                    params: Some("12345"),
                }),
            ),
            (
                "\u{1}FINGER\u{1}",
                Some(Query {
                    command: Command::Unknown("FINGER".to_string()),
                    params: None,
                }),
            ),
            ("\u{1}\u{1}", None),
            ("hello", None),
        ];

        for (text, expected) in tests {
            assert_eq!(parse_query(text), expected, "{text:?}");
        }
    }

    #[test]
    fn replies() {
        let replies = Replies {
            version: Some("tern 1.0".to_string()),
            ping: true,
            time: false,
            clientinfo: true,
        };

        let version = parse_query("\u{1}VERSION\u{1}").unwrap();
        assert_eq!(replies.reply(&version), Some(Some("tern 1.0".to_string())));

        let ping = parse_query("\u{1}PING 42\u{1}").unwrap();
        assert_eq!(replies.reply(&ping), Some(Some("42".to_string())));

        let time = parse_query("\u{1}TIME\u{1}").unwrap();
        assert_eq!(replies.reply(&time), None);

        let clientinfo = parse_query("\u{1}CLIENTINFO\u{1}").unwrap();
        assert_eq!(
            replies.reply(&clientinfo),
            Some(Some("ACTION CLIENTINFO PING VERSION".to_string()))
        );
    }
}
