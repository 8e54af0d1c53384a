use std::str::FromStr;

use irc::proto;
use itertools::Itertools;

/// Where input was typed. Commands without an explicit target, and plain
/// text, go to the channel or query in context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Context {
    Server,
    Channel(String),
    Query(String),
}

impl Context {
    pub fn target(&self) -> Option<&str> {
        match self {
            Context::Server => None,
            Context::Channel(target) | Context::Query(target) => Some(target),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Kind {
    Join,
    Part,
    Nick,
    Quit,
    Msg,
    Notice,
    Me,
    Ctcp,
    Mode,
    Topic,
    Away,
    Raw,
}

impl FromStr for Kind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "join" | "j" => Ok(Kind::Join),
            "part" | "leave" => Ok(Kind::Part),
            "nick" => Ok(Kind::Nick),
            "quit" => Ok(Kind::Quit),
            "msg" | "privmsg" => Ok(Kind::Msg),
            "notice" => Ok(Kind::Notice),
            "me" | "describe" => Ok(Kind::Me),
            "ctcp" => Ok(Kind::Ctcp),
            "mode" => Ok(Kind::Mode),
            "topic" | "t" => Ok(Kind::Topic),
            "away" => Ok(Kind::Away),
            "raw" | "quote" => Ok(Kind::Raw),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(String, Option<String>),
    Part(String, Option<String>),
    Nick(String),
    Quit(Option<String>),
    Msg(String, String),
    Notice(String, String),
    Me(String, String),
    Ctcp(String, String, Option<String>),
    Mode(String, String, Vec<String>),
    Topic(String, Option<String>),
    Away(Option<String>),
    Raw(String),
    Unknown(String, Vec<String>),
}

/// Parses a line of user input.
///
/// Text without a leading slash is a message to the context's target, and
/// `//` sends a message that starts with a slash.
pub fn parse(s: &str, context: &Context) -> Result<Command, Error> {
    let Some(rest) = s.strip_prefix('/') else {
        return message(s, context);
    };
    if rest.starts_with('/') {
        return message(rest, context);
    }

    let mut split = rest.split_ascii_whitespace();

    let cmd = split.next().ok_or(Error::MissingCommand)?;
    let args = split.collect::<Vec<_>>();

    let Ok(kind) = cmd.parse::<Kind>() else {
        return Ok(Command::Unknown(
            cmd.to_string(),
            args.iter().map(ToString::to_string).collect(),
        ));
    };

    let target = context.target().map(ToString::to_string);
    let explicit_channel = args.first().is_some_and(|first| proto::is_channel(first));

    match kind {
        Kind::Join => validated::<1, 1, false>(args, |[channels], [keys]| {
            Command::Join(channels, keys)
        }),
        Kind::Part => match (explicit_channel, target) {
            (true, _) => {
                validated::<1, 1, true>(args, |[channel], [reason]| Command::Part(channel, reason))
            }
            (_, Some(channel)) => {
                validated::<0, 1, true>(args, |_, [reason]| Command::Part(channel, reason))
            }
            (false, None) => Err(Error::NoTarget),
        },
        Kind::Nick => validated::<1, 0, false>(args, |[nick], _| Command::Nick(nick)),
        Kind::Quit => validated::<0, 1, true>(args, |_, [reason]| Command::Quit(reason)),
        Kind::Msg => validated::<2, 0, true>(args, |[target, text], _| Command::Msg(target, text)),
        Kind::Notice => {
            validated::<2, 0, true>(args, |[target, text], _| Command::Notice(target, text))
        }
        Kind::Me => {
            let target = target.ok_or(Error::NoTarget)?;
            validated::<1, 0, true>(args, |[text], _| Command::Me(target, text))
        }
        Kind::Ctcp => validated::<2, 1, true>(args, |[target, command], [params]| {
            Command::Ctcp(target, command.to_uppercase(), params)
        }),
        Kind::Mode => mode(args, target),
        Kind::Topic => match (explicit_channel, target) {
            (true, _) => {
                validated::<1, 1, true>(args, |[channel], [topic]| Command::Topic(channel, topic))
            }
            (_, Some(channel)) => {
                validated::<0, 1, true>(args, |_, [topic]| Command::Topic(channel, topic))
            }
            (false, None) => Err(Error::NoTarget),
        },
        Kind::Away => validated::<0, 1, true>(args, |_, [reason]| Command::Away(reason)),
        Kind::Raw => validated::<1, 0, true>(args, |[line], _| Command::Raw(line)),
    }
}

fn message(text: &str, context: &Context) -> Result<Command, Error> {
    let target = context.target().ok_or(Error::NoTarget)?;

    if text.is_empty() {
        return Err(Error::MissingCommand);
    }

    Ok(Command::Msg(target.to_string(), text.to_string()))
}

// `/mode +m` applies to the channel in context
fn mode(args: Vec<&str>, target: Option<String>) -> Result<Command, Error> {
    let (target, rest) = match (args.split_first(), target) {
        (Some((first, _)), Some(target)) if first.starts_with(['+', '-']) => {
            (target, &args[..])
        }
        (Some((first, rest)), _) => (first.to_string(), rest),
        (None, Some(target)) => (target, &args[..]),
        (None, None) => return Err(Error::NoTarget),
    };

    let mut rest = rest.iter().map(ToString::to_string);
    let modes = rest.next().unwrap_or_default();

    Ok(Command::Mode(target, modes, rest.collect()))
}

fn validated<const EXACT: usize, const OPT: usize, const TEXT: bool>(
    args: Vec<&str>,
    f: impl FnOnce([String; EXACT], [Option<String>; OPT]) -> Command,
) -> Result<Command, Error> {
    let max = EXACT + OPT;

    let args: Vec<String> = if TEXT {
        // Combine everything from last arg on
        let combined = args.iter().skip(max.saturating_sub(1)).join(" ");
        args.iter()
            .take(max.saturating_sub(1))
            .map(ToString::to_string)
            .chain((!combined.is_empty()).then_some(combined))
            .collect()
    } else {
        args.into_iter().map(String::from).collect()
    };

    if args.len() < EXACT || args.len() > max {
        return Err(Error::IncorrectArgCount {
            min: EXACT,
            max,
            actual: args.len(),
        });
    }

    let mut args = args.into_iter();
    let exact = std::array::from_fn(|_| args.next().unwrap_or_default());
    let opt = std::array::from_fn(|_| args.next());

    Ok((f)(exact, opt))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("{}", fmt_incorrect_arg_count(*min, *max, *actual))]
    IncorrectArgCount {
        min: usize,
        max: usize,
        actual: usize,
    },
    #[error("missing command")]
    MissingCommand,
    #[error("no channel or query to send to")]
    NoTarget,
}

fn fmt_incorrect_arg_count(min: usize, max: usize, actual: usize) -> String {
    if min == max {
        let s = if min == 1 { "" } else { "s" };

        format!("expected {min} argument{s}, received {actual}")
    } else {
        format!("expected {min} to {max} arguments, received {actual}")
    }
}

#[cfg(test)]
mod test {
    use super::{Command, Context, Error, parse};

    fn channel() -> Context {
        Context::Channel("#rust".to_string())
    }

    #[test]
    fn commands() {
        let tests = [
            ("/join #rust", Command::Join("#rust".into(), None)),
            ("/JOIN #a,#b k1,k2", Command::Join("#a,#b".into(), Some("k1,k2".into()))),
            ("/msg dan hello  there", Command::Msg("dan".into(), "hello there".into())),
            ("/quit", Command::Quit(None)),
            ("/quit see you", Command::Quit(Some("see you".into()))),
            ("/me waves", Command::Me("#rust".into(), "waves".into())),
            (
                "/ctcp dan version",
                Command::Ctcp("dan".into(), "VERSION".into(), None),
            ),
            ("/part", Command::Part("#rust".into(), None)),
            ("/part #go bye", Command::Part("#go".into(), Some("bye".into()))),
            ("/part brb", Command::Part("#rust".into(), Some("brb".into()))),
            ("/topic", Command::Topic("#rust".into(), None)),
            ("/topic new topic", Command::Topic("#rust".into(), Some("new topic".into()))),
            (
                "/mode +b *!*@spam",
                Command::Mode("#rust".into(), "+b".into(), vec!["*!*@spam".into()]),
            ),
            ("/mode tern +i", Command::Mode("tern".into(), "+i".into(), vec![])),
            ("/mode", Command::Mode("#rust".into(), String::new(), vec![])),
            ("/quote CAP LS 302", Command::Raw("CAP LS 302".into())),
            (
                "/whois dan",
                Command::Unknown("whois".into(), vec!["dan".into()]),
            ),
            ("hello", Command::Msg("#rust".into(), "hello".into())),
            ("//usr/bin", Command::Msg("#rust".into(), "/usr/bin".into())),
        ];

        for (input, expected) in tests {
            assert_eq!(parse(input, &channel()), Ok(expected), "{input}");
        }
    }

    #[test]
    fn errors() {
        assert_eq!(
            parse("/join", &channel()),
            Err(Error::IncorrectArgCount {
                min: 1,
                max: 2,
                actual: 0
            })
        );
        assert_eq!(parse("/", &channel()), Err(Error::MissingCommand));
        assert_eq!(parse("hello", &Context::Server), Err(Error::NoTarget));
        assert_eq!(parse("/me waves", &Context::Server), Err(Error::NoTarget));
        assert_eq!(parse("/topic", &Context::Server), Err(Error::NoTarget));
    }
}
