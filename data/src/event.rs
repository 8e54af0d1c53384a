use std::time::Duration;

use irc::proto;
use strum::{Display, EnumDiscriminants, EnumIter};

use crate::channel::{ListEntry, Topic};
use crate::mode::Mode;
use crate::state::State;

/// Where a message, notice or CTCP was addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A channel, possibly narrowed to members with `prefix` (e.g. `@#chan`).
    Channel { name: String, prefix: Option<char> },
    /// Directly to us.
    Private,
    /// Neither one of our channels nor our nickname, e.g. `$*` broadcasts.
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Level {
    Fatal,
    Error,
    Warning,
    Info,
}

/// A problem the core absorbed, reported to consumers instead of raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub line: Option<String>,
}

impl Diagnostic {
    pub fn new(level: Level, message: impl Into<String>, line: Option<String>) -> Self {
        Self {
            level,
            message: message.into(),
            line,
        }
    }
}

/// Everything a connection reports to the outside world.
///
/// Subscriptions are keyed by [`Kind`], the field-less mirror of this enum.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(Kind), derive(Hash, Display, EnumIter))]
pub enum Event {
    DataIn(String),
    DataOut(String),
    StateChanged {
        from: State,
        to: State,
    },
    Connected,
    ConnectionFailed {
        reason: String,
    },
    Registered {
        nickname: String,
    },
    /// `005` has been processed and the connection is fully usable.
    ServerReady,
    NetworkDiscovered {
        network: String,
        server: String,
    },
    NoticeAuth {
        text: String,
    },
    PasswordRequired,
    NickInUse {
        nickname: String,
    },
    NickChanged {
        old: String,
        new: String,
        own: bool,
        channels: Vec<String>,
    },
    SelfJoin {
        channel: String,
    },
    Join {
        channel: String,
        user: proto::User,
    },
    Part {
        channel: String,
        user: proto::User,
        reason: Option<String>,
        own: bool,
    },
    Kick {
        channel: String,
        kicker: Option<proto::Source>,
        victim: String,
        reason: Option<String>,
        own: bool,
    },
    Quit {
        user: proto::User,
        reason: Option<String>,
        channels: Vec<String>,
    },
    Topic {
        channel: String,
        topic: Option<Topic>,
        changed: bool,
    },
    Names {
        channel: String,
        nicknames: Vec<String>,
    },
    ChannelModeChanged {
        channel: String,
        setter: Option<proto::Source>,
        modes: Vec<Mode>,
    },
    ChannelUserModeChanged {
        channel: String,
        setter: Option<proto::Source>,
        nickname: String,
        mode: Mode,
    },
    UserModeChanged {
        setter: Option<proto::Source>,
        modes: Vec<Mode>,
    },
    ListModesComplete {
        channel: String,
        mode: char,
        entries: Vec<ListEntry>,
    },
    Message {
        target: Target,
        from: proto::Source,
        text: String,
    },
    Notice {
        target: Target,
        from: Option<proto::Source>,
        text: String,
    },
    Action {
        target: Target,
        from: proto::Source,
        text: String,
    },
    Ctcp {
        target: Target,
        from: proto::Source,
        command: String,
        params: Option<String>,
    },
    CtcpReply {
        target: Target,
        from: proto::Source,
        command: String,
        params: Option<String>,
    },
    /// Our own away state changed.
    Away {
        away: bool,
        reason: Option<String>,
    },
    UserAway {
        nickname: String,
        reason: Option<String>,
    },
    MotdEnd {
        motd: Vec<String>,
        missing: bool,
    },
    Numeric {
        code: u16,
        params: Vec<String>,
    },
    PingSent {
        token: String,
    },
    PingSuccess {
        lag: Duration,
    },
    PingFailed {
        elapsed: Duration,
    },
    ServerError {
        message: String,
    },
    /// The socket closed. Sent exactly once per connection attempt that
    /// got past `Connected`.
    Disconnected {
        reason: Option<String>,
    },
    Error(Diagnostic),
}

impl Event {
    pub fn kind(&self) -> Kind {
        Kind::from(self)
    }

    /// The channel this event concerns, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Event::SelfJoin { channel }
            | Event::Join { channel, .. }
            | Event::Part { channel, .. }
            | Event::Kick { channel, .. }
            | Event::Topic { channel, .. }
            | Event::Names { channel, .. }
            | Event::ChannelModeChanged { channel, .. }
            | Event::ChannelUserModeChanged { channel, .. }
            | Event::ListModesComplete { channel, .. } => Some(channel),
            Event::Message { target, .. }
            | Event::Notice { target, .. }
            | Event::Action { target, .. }
            | Event::Ctcp { target, .. }
            | Event::CtcpReply { target, .. } => match target {
                Target::Channel { name, .. } => Some(name),
                Target::Private | Target::Unknown(_) => None,
            },
            _ => None,
        }
    }

    /// Nickname of the user who caused this event, if any.
    pub fn nickname(&self) -> Option<&str> {
        match self {
            Event::Join { user, .. } | Event::Part { user, .. } | Event::Quit { user, .. } => {
                Some(&user.nickname)
            }
            Event::NickChanged { old, .. } => Some(old),
            Event::UserAway { nickname, .. } => Some(nickname),
            Event::Message { from, .. }
            | Event::Action { from, .. }
            | Event::Ctcp { from, .. }
            | Event::CtcpReply { from, .. } => from.user().map(|user| user.nickname.as_str()),
            Event::Notice { from, .. } => from
                .as_ref()
                .and_then(proto::Source::user)
                .map(|user| user.nickname.as_str()),
            Event::Kick { kicker, .. } => kicker
                .as_ref()
                .and_then(proto::Source::user)
                .map(|user| user.nickname.as_str()),
            _ => None,
        }
    }
}
