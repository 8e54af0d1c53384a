use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, char, none_of, one_of, satisfy};
use nom::combinator::{all_consuming, map, opt, peek, recognize, value, verify};
use nom::multi::{many0, many0_count, many1, many1_count, many_m_n, separated_list1};
use nom::sequence::{preceded, terminated, tuple};
use nom::{Finish, IResult};

use crate::{Message, Source, Tag, User};

/// Parses a single IRC line. A trailing `\r\n` (or a bare `\n`) is optional.
pub fn message(input: &str) -> Result<Message, Error> {
    let line = input.trim_end_matches(['\r', '\n']);

    if line.trim_matches(' ').is_empty() {
        return Err(Error::Malformed {
            input: input.to_string(),
            reason: "empty line".to_string(),
        });
    }

    let mut message = all_consuming(terminated(
        preceded(
            many0_count(char(' ')),
            tuple((opt(tags), opt(source), command)),
        ),
        // Some servers send whitespace before the line ending
        many0_count(char(' ')),
    ));

    message(line)
        .finish()
        .map(|(_, (tags, source, (command, params)))| Message {
            tags: tags.unwrap_or_default(),
            source,
            command,
            params,
        })
        .map_err(|e| Error::Malformed {
            input: input.to_string(),
            reason: e.to_string(),
        })
}

fn tags(input: &str) -> IResult<&str, Vec<Tag>> {
    let escaped_char = alt((
        value(';', tag(r"\:")),
        value(' ', tag(r"\s")),
        value('\\', tag(r"\\")),
        value('\r', tag(r"\r")),
        value('\n', tag(r"\n")),
        // drop escape char '\'
        preceded(char('\\'), none_of(r":s\rn ")),
    ));
    // <sequence of any escaped characters except NUL, CR, LF, semicolon (`;`) and SPACE>
    let escaped_value = map(
        terminated(
            many1(alt((escaped_char, none_of("\0\r\n;\\ ")))),
            // drop trailing escape char '\'
            opt(char('\\')),
        ),
        |value| value.into_iter().collect::<String>(),
    );
    // '+'
    let client_prefix = char('+');
    // [ <client_prefix> ] [ <vendor> '/' ] <sequence of letters, digits, hyphens (`-`)>
    let key = recognize(tuple((
        opt(client_prefix),
        opt(terminated(many1_count(none_of("/ ;=")), char('/'))),
        many1_count(satisfy(|c| c.is_ascii_alphanumeric() || c == '-')),
    )));
    // <key> ['=' <escaped value>]
    let tag = map(
        tuple((key, opt(preceded(char('='), escaped_value)))),
        |(key, value): (&str, _)| Tag {
            key: key.to_string(),
            value,
        },
    );
    // <tag> [';' <tag>]*
    let tags = separated_list1(char(';'), tag);
    // '@' <tags> <SPACE>
    preceded(char('@'), terminated(tags, space))(input)
}

fn source(input: &str) -> IResult<&str, Source> {
    // <servername> / <user>
    let source = alt((
        map(terminated(user, peek(space)), Source::User),
        // Default all non-valid users to server
        map(
            terminated(recognize(many1(none_of(" "))), peek(space)),
            |host| Source::Server(host.to_string()),
        ),
    ));
    // ':' <source> <SPACE>
    terminated(preceded(char(':'), source), space)(input)
}

fn command(input: &str) -> IResult<&str, (String, Vec<String>)> {
    // <sequence of any characters except NUL, CR, LF, colon (`:`) and SPACE>
    let nospcrlfcl = |input| recognize(many1_count(none_of("\0\r\n: ")))(input);
    // *( ":" / " " / nospcrlfcl )
    let trailing = recognize(many0_count(alt((tag(":"), tag(" "), nospcrlfcl))));
    // nospcrlfcl *( ":" / nospcrlfcl )
    let middle = recognize(tuple((
        nospcrlfcl,
        many0_count(alt((tag(":"), nospcrlfcl))),
    )));
    // *( SPACE middle ) [ SPACE ":" trailing ]
    let parameters = tuple((
        many0(preceded(space, middle)),
        opt(preceded(space, preceded(char(':'), trailing))),
    ));
    // letter* / 3digit
    let command = alt((
        alpha1,
        recognize(many_m_n(3, 3, satisfy(|c| c.is_ascii_digit()))),
    ));
    // <command> <parameters>
    let (input, (command, (leading, trailing))) = tuple((command, parameters))(input)?;

    let parameters = leading
        .into_iter()
        .chain(trailing)
        .map(String::from)
        .collect();

    Ok((input, (command.to_string(), parameters)))
}

fn space(input: &str) -> IResult<&str, ()> {
    map(many1_count(char(' ')), |_| ())(input)
}

fn user(input: &str) -> IResult<&str, User> {
    // <sequence of any characters except NUL, CR, LF, and SPACE> and @
    let username = recognize(many1_count(none_of("\0\r\n @")));
    // "-", "[", "]", "\", "`", "_", "^", "{", "|", "}", "*", "/", "@"
    let special = |input| one_of("-[]\\`_^{|}*/@")(input);
    // *( <letter> | <number> | <special> )
    let strict_nick = recognize(many1_count(alt((
        satisfy(|c| c.is_ascii_alphanumeric()),
        special,
    ))));
    // Bridged networks use `:` and `.` in nicknames, only accepted when
    // terminated by `!` so that a server name is never mistaken for a user
    let expanded_nick = verify(
        recognize(terminated(
            many1_count(alt((
                satisfy(|c| c.is_ascii_alphanumeric()),
                special,
                one_of(":."),
            ))),
            peek(char('!')),
        )),
        |s: &str| s.contains(':') && s.contains('.'),
    );
    let nickname = alt((expanded_nick, strict_nick));
    // Parse remainder after @ as hostname
    let hostname = recognize(many1_count(none_of(" ")));
    //( <nickname> [ "!" <user> ] [ "@" <host> ] )
    map(
        tuple((
            nickname,
            opt(preceded(char('!'), username)),
            opt(preceded(char('@'), hostname)),
        )),
        |(nickname, username, hostname): (&str, Option<&str>, Option<&str>)| User {
            nickname: nickname.to_string(),
            username: username.map(ToString::to_string),
            hostname: hostname.map(ToString::to_string),
        },
    )(input)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("malformed line {input:?}: {reason}")]
    Malformed { input: String, reason: String },
}

#[cfg(test)]
mod test {
    use nom::combinator::all_consuming;

    use crate::{Message, Source, Tag, User};

    fn params(params: &[&str]) -> Vec<String> {
        params.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn user() {
        let tests = [
            "dan!d@localhost",
            "dan@id/network!d@remote.host",
            "test!test@5555:5555:0:55:5555:5555:5555:5555",
            "[asdf]!~asdf@user/asdf/x-5555555",
        ];

        for test in tests {
            all_consuming(super::user)(test).unwrap();
        }
    }

    #[test]
    fn source() {
        let tests = [
            (
                ":irc.example.com ",
                Source::Server("irc.example.com".into()),
            ),
            (
                ":dan!d@localhost ",
                Source::User(User {
                    nickname: "dan".into(),
                    username: Some("d".into()),
                    hostname: Some("localhost".into()),
                }),
            ),
            (
                ":dan@id/network!d@remote.host ",
                Source::User(User {
                    nickname: "dan@id/network".into(),
                    username: Some("d".into()),
                    hostname: Some("remote.host".into()),
                }),
            ),
            (":*.freenode.net ", Source::Server("*.freenode.net".into())),
            (
                ":foo:matrix.org!foo@matrix.org ",
                Source::User(User {
                    nickname: "foo:matrix.org".into(),
                    username: Some("foo".into()),
                    hostname: Some("matrix.org".into()),
                }),
            ),
            (":1.1.1.1 ", Source::Server("1.1.1.1".to_string())),
            (":1111:FFFF::1 ", Source::Server("1111:FFFF::1".to_string())),
        ];

        for (test, expected) in tests {
            let (_, source) = super::source(test).unwrap();
            assert_eq!(source, expected);
        }
    }

    #[test]
    fn prefix_command_and_trailing() {
        let message =
            super::message(":nick!user@host COMMAND p1 p2 :trailing with spaces").unwrap();

        assert_eq!(message.prefix().as_deref(), Some("nick!user@host"));
        assert_eq!(message.command, "COMMAND");
        assert_eq!(message.params, params(&["p1", "p2", "trailing with spaces"]));
    }

    #[test]
    fn message() {
        let tests = [
            (
                ":irc.example.com CAP LS * :multi-prefix extended-join sasl\r\n",
                Message {
                    tags: vec![],
                    source: Some(Source::Server("irc.example.com".to_string())),
                    command: "CAP".to_string(),
                    params: params(&["LS", "*", "multi-prefix extended-join sasl"]),
                },
            ),
            (
                "@id=234AB :dan!d@localhost PRIVMSG #chan :Hey what's up! \r\n",
                Message {
                    tags: vec![Tag {
                        key: "id".to_string(),
                        value: Some("234AB".to_string()),
                    }],
                    source: Some(Source::User(User {
                        nickname: "dan".into(),
                        username: Some("d".into()),
                        hostname: Some("localhost".into()),
                    })),
                    command: "PRIVMSG".to_string(),
                    params: params(&["#chan", "Hey what's up! "]),
                },
            ),
            (
                "CAP REQ :sasl",
                Message {
                    tags: vec![],
                    source: None,
                    command: "CAP".to_string(),
                    params: params(&["REQ", "sasl"]),
                },
            ),
            (
                "@tag=as\\\\\\:\\sdf\\z\\ UNKNOWN\r\n",
                Message {
                    tags: vec![Tag {
                        key: "tag".to_string(),
                        value: Some("as\\; dfz".to_string()),
                    }],
                    source: None,
                    command: "UNKNOWN".to_string(),
                    params: vec![],
                },
            ),
            (
                ":atw.hu.quakenet.org 001 test :Welcome to the QuakeNet IRC Network, test\r\n",
                Message {
                    tags: vec![],
                    source: Some(Source::Server("atw.hu.quakenet.org".to_string())),
                    command: "001".to_string(),
                    params: params(&["test", "Welcome to the QuakeNet IRC Network, test"]),
                },
            ),
            // Extra \r sent by some servers
            (
                ":foo!~foo@F3FF3610.5A633F24.29800D3F.IP JOIN #pixelcove * :foo\r\r\n",
                Message {
                    tags: vec![],
                    source: Some(Source::User(User {
                        nickname: "foo".into(),
                        username: Some("~foo".into()),
                        hostname: Some("F3FF3610.5A633F24.29800D3F.IP".into()),
                    })),
                    command: "JOIN".to_string(),
                    params: params(&["#pixelcove", "*", "foo"]),
                },
            ),
            // Space between message and line ending
            (
                ":atarians.dejatoons.net MODE #test +nt \r\n",
                Message {
                    tags: vec![],
                    source: Some(Source::Server("atarians.dejatoons.net".to_string())),
                    command: "MODE".to_string(),
                    params: params(&["#test", "+nt"]),
                },
            ),
            // Lowercase verbs are kept as-is
            (
                "privmsg #a :hi",
                Message {
                    tags: vec![],
                    source: None,
                    command: "privmsg".to_string(),
                    params: params(&["#a", "hi"]),
                },
            ),
            (
                "PRIVMSG #a :",
                Message {
                    tags: vec![],
                    source: None,
                    command: "PRIVMSG".to_string(),
                    params: params(&["#a", ""]),
                },
            ),
        ];

        for (test, expected) in tests {
            let message = super::message(test).unwrap();
            assert_eq!(message, expected);
        }
    }

    #[test]
    fn malformed() {
        let tests = ["", "\r\n", "   ", ":irc.example.com", ":irc.example.com ", "12345 x"];

        for test in tests {
            assert!(
                matches!(super::message(test), Err(super::Error::Malformed { .. })),
                "{test:?} should not parse"
            );
        }
    }
}
