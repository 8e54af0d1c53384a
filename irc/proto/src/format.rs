use std::fmt::Write;

use itertools::Itertools;

use crate::{Message, Tag};

/// Most IRC servers limit messages to 512 bytes in length, including the trailing CR-LF characters.
pub const BYTE_LIMIT: usize = 512;

/// Serializes a message for the wire, terminated by CR-LF.
pub fn message(message: Message) -> String {
    let mut output = line(message);
    output.push_str("\r\n");
    output
}

/// Serializes a message without the line terminator.
pub fn line(message: Message) -> String {
    let mut output = String::with_capacity(BYTE_LIMIT);

    let tags = tags(message.tags);

    if !tags.is_empty() {
        let _ = write!(&mut output, "@{tags} ");
    }

    if let Some(source) = &message.source {
        let _ = write!(&mut output, ":{source} ");
    }

    let _ = write!(&mut output, "{}", message.command);

    if !message.params.is_empty() {
        let params = parameters(message.params);
        let _ = write!(&mut output, " {params}");
    }

    output
}

fn tags(tags: Vec<Tag>) -> String {
    tags.into_iter().map(tag).join(";")
}

fn tag(Tag { key, value }: Tag) -> String {
    let Some(value) = value.filter(|value| !value.is_empty()) else {
        return key;
    };

    let mappings = [
        ('\\', r"\\"),
        (';', r"\:"),
        (' ', r"\s"),
        ('\r', r"\r"),
        ('\n', r"\n"),
    ];

    let escaped = mappings
        .into_iter()
        .fold(value, |value, (from, to)| value.replace(from, to));

    format!("{key}={escaped}")
}

fn parameters(parameters: Vec<String>) -> String {
    let params_len = parameters.len();
    parameters
        .into_iter()
        .enumerate()
        .map(|(index, param)| {
            if index == params_len - 1 {
                trailing(param)
            } else {
                param
            }
        })
        .join(" ")
}

fn trailing(parameter: String) -> String {
    if needs_colon(&parameter) {
        format!(":{parameter}")
    } else {
        parameter
    }
}

/// Whether a final parameter has to be written as `:parameter`.
pub fn needs_colon(parameter: &str) -> bool {
    parameter.contains(' ') || parameter.is_empty() || parameter.starts_with(':')
}

#[cfg(test)]
mod test {
    use crate::{Message, Source, Tag, User, command, format, parse};

    #[test]
    fn commands() {
        let tests = [
            command!("CAP", "LS", "302"),
            command!("privmsg", "#a", "nospace"),
            command!("privmsg", "b", "spa ces"),
            command!("quit", "nocolon"),
            command!("quit", ":startscolon"),
            command!("quit", "not:starting"),
            command!("quit", "not:starting space"),
            command!("notice", ""),
            command!("notice", " "),
            command!("USER", "test", "0", "*", "test"),
            command!("QUIT"),
        ];
        let expected = [
            "CAP LS 302\r\n",
            "PRIVMSG #a nospace\r\n",
            "PRIVMSG b :spa ces\r\n",
            "QUIT nocolon\r\n",
            "QUIT ::startscolon\r\n",
            "QUIT not:starting\r\n",
            "QUIT :not:starting space\r\n",
            "NOTICE :\r\n",
            "NOTICE : \r\n",
            "USER test 0 * test\r\n",
            "QUIT\r\n",
        ];

        for (test, expected) in tests.into_iter().zip(expected) {
            let formatted = format::message(test);
            assert_eq!(formatted, expected);
        }
    }

    #[test]
    fn tags() {
        let test = vec![
            Tag {
                key: "id".to_string(),
                value: Some("234AB".to_string()),
            },
            Tag {
                key: "tag".to_string(),
                value: Some("as\\; \r\n".to_string()),
            },
            Tag {
                key: "test".to_string(),
                value: None,
            },
        ];
        let expected = r"id=234AB;tag=as\\\:\s\r\n;test";

        let tags = super::tags(test);
        assert_eq!(tags, expected);
    }

    #[test]
    fn parsed_lines_format_back() {
        let user = Source::User(User {
            nickname: "nick".into(),
            username: Some("user".into()),
            hostname: Some("host".into()),
        });
        let server = Source::Server("irc.example.com".into());

        let tests = [
            Message {
                tags: vec![],
                source: Some(user.clone()),
                command: "PRIVMSG".into(),
                params: vec!["#chan".into(), "hello there".into()],
            },
            Message {
                tags: vec![
                    Tag {
                        key: "time".into(),
                        value: Some("2024-01-01T00:00:00.000Z".into()),
                    },
                    Tag {
                        key: "+draft/reply".into(),
                        value: Some("a b;c".into()),
                    },
                    Tag {
                        key: "bot".into(),
                        value: None,
                    },
                ],
                source: Some(user.clone()),
                command: "PRIVMSG".into(),
                params: vec!["#chan".into(), "tagged".into()],
            },
            Message {
                tags: vec![],
                source: Some(server.clone()),
                command: "001".into(),
                params: vec!["tern".into(), "Welcome to the network".into()],
            },
            command!("QUIT"),
            Message {
                source: Some(server),
                ..command!("PING")
            },
            command!("PRIVMSG", "#chan", ""),
            command!("PRIVMSG", "#chan", ":starts with a colon"),
            command!("PRIVMSG", "#chan", ":x"),
            command!("PRIVMSG", "#chan", " "),
            Message {
                source: Some(user),
                ..command!("MODE", "#chan", "+ov", "nick", "not:first")
            },
        ];

        for message in tests {
            let line = format::message(message.clone());
            let parsed = parse::message(&line).unwrap();

            assert_eq!(
                (parsed.prefix(), &parsed.command, &parsed.params),
                (message.prefix(), &message.command, &message.params),
                "{line:?}"
            );
            assert_eq!(parsed, message, "{line:?}");
        }
    }
}
