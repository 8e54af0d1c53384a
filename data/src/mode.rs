use crate::isupport::{ISupport, ModeKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Add(char, Option<String>),
    Remove(char, Option<String>),
}

impl Mode {
    pub fn value(&self) -> char {
        match self {
            Mode::Add(value, _) | Mode::Remove(value, _) => *value,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Mode::Add(_, _) => Operation::Add,
            Mode::Remove(_, _) => Operation::Remove,
        }
    }

    pub fn arg(&self) -> Option<&str> {
        match self {
            Mode::Add(_, arg) | Mode::Remove(_, arg) => arg.as_deref(),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = match self.operation() {
            Operation::Add => '+',
            Operation::Remove => '-',
        };

        match self.arg() {
            Some(arg) => write!(f, "{sign}{} {arg}", self.value()),
            None => write!(f, "{sign}{}", self.value()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Remove,
}

// Reference: https://defs.ircdocs.horse/defs/chanmodes
//
// Parameters are consumed according to the server's CHANMODES and PREFIX
// groups. A mode the server never advertised takes no parameter.
pub fn parse_channel(encoded: &str, args: &[String], isupport: &ISupport) -> Vec<Mode> {
    parse(encoded, args, |mode, operation| {
        match isupport.mode_kind(mode) {
            Some(ModeKind::List | ModeKind::AlwaysParameter | ModeKind::Membership) => true,
            Some(ModeKind::SetParameter) => operation == Operation::Add,
            Some(ModeKind::Flag) | None => false,
        }
    })
}

/// User modes never carry parameters, except server notice masks.
pub fn parse_user(encoded: &str, args: &[String]) -> Vec<Mode> {
    parse(encoded, args, |mode, operation| {
        mode == 's' && operation == Operation::Add
    })
}

fn parse(
    encoded: &str,
    args: &[String],
    takes_arg: impl Fn(char, Operation) -> bool,
) -> Vec<Mode> {
    let mut args = args.iter();
    let mut operation = Operation::Add;
    let mut parsed = vec![];

    for c in encoded.chars() {
        match c {
            '+' => operation = Operation::Add,
            '-' => operation = Operation::Remove,
            mode => {
                let arg = if takes_arg(mode, operation) {
                    args.next().cloned()
                } else {
                    None
                };

                parsed.push(match operation {
                    Operation::Add => Mode::Add(mode, arg),
                    Operation::Remove => Mode::Remove(mode, arg),
                });
            }
        }
    }

    parsed
}
