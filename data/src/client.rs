use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use irc::proto::{self, Message, format, parse};
use tokio::time::Instant;

use crate::channel::{Channel, Request};
use crate::command::Command;
use crate::dispatch::Dispatcher;
use crate::event::{Diagnostic, Event, Level, Target};
use crate::isupport::{ISupport, ModeKind};
use crate::rate_limit::{RateLimiter, TokenBucket, TokenPriority};
use crate::server::Server;
use crate::state::{self, State};
use crate::user::{self, User, Users};
use crate::{config, ctcp};

pub mod handlers;
pub mod on_connect;

// `!` + `~` and a 10 character username + `@` + a 63 character hostname
const UNKNOWN_USERHOST_LEN: usize = 1 + 11 + 1 + 63;

/// The session model of a single server connection.
///
/// `Client` performs no I/O. The driver in [`crate::stream`] feeds it
/// parsed lines and clock ticks, and writes out whatever
/// [`Client::drain_outbound`] hands back. Everything worth reporting is
/// collected as [`Event`]s and taken with [`Client::take_events`].
pub struct Client {
    server: Server,
    config: Arc<config::Server>,
    dispatcher: Arc<Dispatcher<Client>>,
    state: State,
    isupport: ISupport,
    users: Users,
    // Keyed by case-folded name
    channels: IndexMap<String, Channel>,
    me: user::Id,
    nickname: String,
    alt_nick: usize,
    registered: bool,
    server_ready: bool,
    ping: Ping,
    outbound: Box<dyn RateLimiter<Message>>,
    immediate: VecDeque<Message>,
    events: Vec<Event>,
    motd: Vec<String>,
    away_reason: Option<String>,
    replies: ctcp::Replies,
    socket_open: bool,
}

#[derive(Debug, Default)]
struct Ping {
    last_activity: Option<Instant>,
    pending: Option<(String, Instant)>,
    lag: Option<Duration>,
}

/// What a periodic [`Client::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle,
    PingSent,
    TimedOut,
}

impl Client {
    pub fn new(server: Server, config: Arc<config::Server>) -> Self {
        let mut users = Users::default();
        let me = users.resolve_nickname(&config.nickname);

        Self {
            outbound: Box::new(TokenBucket::new(
                config.flood.interval(),
                config.flood.burst,
            )),
            replies: config.ctcp.replies(),
            nickname: config.nickname.clone(),
            dispatcher: Arc::new(handlers::dispatcher()),
            state: State::Disconnected,
            isupport: ISupport::default(),
            users,
            channels: IndexMap::new(),
            me,
            alt_nick: 0,
            registered: false,
            server_ready: false,
            ping: Ping::default(),
            immediate: VecDeque::new(),
            events: vec![],
            motd: vec![],
            away_reason: None,
            socket_open: false,
            server,
            config,
        }
    }

    /// Replaces the default token bucket used to pace outbound lines.
    pub fn with_rate_limiter(mut self, limiter: Box<dyn RateLimiter<Message>>) -> Self {
        self.outbound = limiter;
        self
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn config(&self) -> &config::Server {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The nickname we are registered with, or the one currently being attempted.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn me(&self) -> Option<&User> {
        self.users.get(self.me)
    }

    pub fn isupport(&self) -> &ISupport {
        &self.isupport
    }

    pub fn lag(&self) -> Option<Duration> {
        self.ping.lag
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&self.isupport.fold(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn user(&self, nickname: &str) -> Option<&User> {
        self.users.find(nickname).and_then(|id| self.users.get(id))
    }

    pub fn users(&self) -> &Users {
        &self.users
    }

    /// Nicknames of a channel's members, each with its highest prefix.
    pub fn members(&self, channel: &str) -> Vec<String> {
        self.channel(channel)
            .map(|channel| {
                channel
                    .members()
                    .filter_map(|(id, member)| {
                        let user = self.users.get(id)?;
                        Some(match member.highest() {
                            Some(prefix) => format!("{prefix}{}", user.nickname),
                            None => user.nickname.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Moves to `to`, reporting the change. Illegal edges leave the state as is.
    pub fn transition(&mut self, to: State) -> Result<(), state::Error> {
        let from = self.state;

        if let Err(error) = self.state.transition(to) {
            log::warn!("[{}] {error}", self.server);
            return Err(error);
        }

        log::debug!("[{}] {from} -> {to}", self.server);
        self.emit(Event::StateChanged { from, to });

        Ok(())
    }

    /// Starts a new connection attempt with a fresh session model.
    pub fn connecting(&mut self) -> Result<(), state::Error> {
        self.transition(State::Connecting)?;
        self.reset();
        Ok(())
    }

    /// The socket is up. Queues registration and starts the ping clock.
    ///
    /// Returns `false` when the attempt was abandoned while connecting, in
    /// which case the socket should be closed without registering.
    pub fn connected(&mut self, now: Instant) -> bool {
        if self.state != State::Connecting {
            return false;
        }

        self.socket_open = true;
        self.ping.last_activity = Some(now);
        self.emit(Event::Connected);

        if let Some(password) = self.config.password.clone() {
            self.enqueue(proto::command!("PASS", password), TokenPriority::High);
        }

        let nickname = self.nickname.clone();
        let user = proto::command!(
            "USER",
            self.config.username(),
            "0",
            "*",
            self.config.realname()
        );

        self.enqueue(proto::command!("NICK", nickname), TokenPriority::High);
        self.enqueue(user, TokenPriority::High);

        true
    }

    /// A disconnect or close arrived before the socket was up.
    pub fn connect_aborted(&mut self) {
        self.outbound.drain_tokens();
        self.immediate.clear();

        if self.state == State::Disconnecting {
            let _ = self.transition(State::Disconnected);
        }
    }

    /// The socket could not be opened.
    pub fn connection_failed(&mut self, reason: String) {
        let target = match self.state {
            State::Disconnecting => State::Disconnected,
            State::Connecting => State::TransientlyDisconnected,
            _ => return,
        };

        let _ = self.transition(target);
        self.emit(Event::ConnectionFailed { reason });
    }

    /// The socket closed. Reported once per open socket, however many
    /// times the driver calls this.
    pub fn disconnected(&mut self, reason: Option<String>) {
        if !self.socket_open {
            return;
        }
        self.socket_open = false;

        match self.state {
            State::Disconnecting => {
                let _ = self.transition(State::Disconnected);
            }
            State::Connecting | State::Connected => {
                let _ = self.transition(State::TransientlyDisconnected);
            }
            _ => {}
        }

        self.outbound.drain_tokens();
        self.immediate.clear();
        self.ping = Ping::default();

        log::info!(
            "[{}] disconnected: {}",
            self.server,
            reason.as_deref().unwrap_or("closed")
        );
        self.emit(Event::Disconnected { reason });
    }

    /// Sends `QUIT` and moves to `DISCONNECTING`. The driver closes the
    /// socket once the queue has been written.
    pub fn request_disconnect(&mut self, reason: Option<&str>) -> Result<(), Error> {
        match self.state {
            State::Connecting | State::Connected => {
                self.transition(State::Disconnecting)?;
                self.immediate.push_back(quit(reason));
                Ok(())
            }
            // A pending reconnect is simply abandoned
            State::ReconnectWait => Ok(self.transition(State::Disconnected)?),
            _ => Ok(self.transition(State::Disconnecting)?),
        }
    }

    /// Moves to the terminal `CLOSING` state.
    pub fn close(&mut self, reason: Option<&str>) {
        if self.state.is_closing() {
            return;
        }

        // A disconnect in progress has already queued its QUIT
        if self.socket_open && self.state != State::Disconnecting {
            self.immediate.push_back(quit(reason));
        }

        let _ = self.transition(State::Closing);
    }

    /// Handles one inbound line.
    pub fn receive(&mut self, message: Message, now: Instant) {
        self.ping.last_activity = Some(now);
        self.emit(Event::DataIn(format::line(message.clone())));

        if !self.registered && !handlers::before_registration(self, &message) {
            return;
        }

        if self.registered && !self.server_ready && !matches!(message.numeric(), Some(1..=5)) {
            self.server_ready = true;
            self.emit(Event::ServerReady);
        }

        let dispatcher = self.dispatcher.clone();
        let report = dispatcher.dispatch(&message, self);

        for error in report.errors {
            self.emit(Event::Error(Diagnostic::new(
                Level::Error,
                error.to_string(),
                Some(format::line(message.clone())),
            )));
        }

        if let Some(code) = message.numeric() {
            self.emit(Event::Numeric {
                code,
                params: message.params,
            });
        }
    }

    /// Reports a line that could not be tokenized. The connection carries on.
    pub fn malformed(&mut self, error: &parse::Error, now: Instant) {
        self.ping.last_activity = Some(now);

        log::warn!("[{}] {error}", self.server);
        self.emit(Event::Error(Diagnostic::new(
            Level::Warning,
            error.to_string(),
            match error {
                parse::Error::Malformed { input, .. } => Some(input.clone()),
            },
        )));
    }

    /// Drives ping timeout detection. Called periodically by the driver.
    pub fn tick(&mut self, now: Instant) -> Tick {
        if !self.socket_open || !matches!(self.state, State::Connecting | State::Connected) {
            return Tick::Idle;
        }

        if let Some((_, sent)) = &self.ping.pending {
            let elapsed = now.saturating_duration_since(*sent);

            if elapsed < self.config.ping_timeout() {
                return Tick::Idle;
            }

            log::warn!("[{}] ping timeout after {elapsed:?}", self.server);
            self.emit(Event::PingFailed { elapsed });
            self.disconnected(Some(format!(
                "ping timeout ({}s)",
                elapsed.as_secs()
            )));

            return Tick::TimedOut;
        }

        let idle = self
            .ping
            .last_activity
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));

        if idle < self.config.ping_time() {
            return Tick::Idle;
        }

        let token = Utc::now().timestamp_millis().to_string();

        self.immediate
            .push_back(proto::command!("PING", token.clone()));
        self.ping.pending = Some((token.clone(), now));
        self.emit(Event::PingSent { token });

        Tick::PingSent
    }

    /// Lines ready to be written now. Server replies such as `PONG` skip
    /// flood control; everything else is paced by the rate limiter.
    pub fn drain_outbound(&mut self, now: Instant) -> Vec<Message> {
        self.outbound.add_permit(now);

        let messages = self
            .immediate
            .drain(..)
            .chain(self.outbound.acquire_tokens())
            .collect::<Vec<_>>();

        for message in &messages {
            self.events
                .push(Event::DataOut(format::line(message.clone())));
        }

        messages
    }

    pub fn has_outbound(&self) -> bool {
        !self.immediate.is_empty() || !self.outbound.is_empty()
    }

    /// Longest text that fits in `command target :text` once the server
    /// has prepended our prefix.
    pub fn max_length(&self, command: &str, target: &str) -> usize {
        let overhead = format!(": {command} {target} :\r\n").len() + self.prefix_len();
        self.isupport.linelen.saturating_sub(overhead)
    }

    pub fn send_raw(&mut self, line: &str) -> Result<(), Error> {
        let message = parse::message(line)?;
        self.send(message, TokenPriority::User)
    }

    pub fn send_message(&mut self, target: &str, text: &str) -> Result<(), Error> {
        self.send(proto::command!("PRIVMSG", target, text), TokenPriority::User)
    }

    pub fn send_notice(&mut self, target: &str, text: &str) -> Result<(), Error> {
        self.send(proto::command!("NOTICE", target, text), TokenPriority::User)
    }

    pub fn send_action(&mut self, target: &str, text: &str) -> Result<(), Error> {
        self.send_ctcp(target, &ctcp::Command::Action, Some(text))
    }

    pub fn send_ctcp(
        &mut self,
        target: &str,
        command: &ctcp::Command,
        params: Option<&str>,
    ) -> Result<(), Error> {
        self.send(
            ctcp::query_message(command, target.to_string(), params),
            TokenPriority::User,
        )
    }

    pub fn send_ctcp_reply(
        &mut self,
        target: &str,
        command: &ctcp::Command,
        params: Option<&str>,
    ) -> Result<(), Error> {
        self.send(
            ctcp::response_message(command, target.to_string(), params),
            TokenPriority::User,
        )
    }

    pub fn join(&mut self, channel: &str, key: Option<&str>) -> Result<(), Error> {
        let message = match key {
            Some(key) => proto::command!("JOIN", channel, key),
            None => proto::command!("JOIN", channel),
        };
        self.send(message, TokenPriority::User)
    }

    pub fn part(&mut self, channel: &str, reason: Option<&str>) -> Result<(), Error> {
        let message = match reason {
            Some(reason) => proto::command!("PART", channel, reason),
            None => proto::command!("PART", channel),
        };
        self.send(message, TokenPriority::User)
    }

    /// Sends `MODE`. A bare list mode such as `+b` queries the list.
    pub fn set_mode(&mut self, target: &str, modes: &str, args: &[&str]) -> Result<(), Error> {
        let params = [target, modes]
            .into_iter()
            .chain(args.iter().copied())
            .filter(|param| !param.is_empty())
            .map(ToString::to_string)
            .collect();

        self.send(proto::command("MODE", params), TokenPriority::User)
    }

    pub fn set_topic(&mut self, channel: &str, topic: &str) -> Result<(), Error> {
        self.send(proto::command!("TOPIC", channel, topic), TokenPriority::User)
    }

    pub fn change_nickname(&mut self, nickname: &str) -> Result<(), Error> {
        self.send(proto::command!("NICK", nickname), TokenPriority::User)?;

        // Before registration nobody confirms the change
        if !self.registered {
            self.set_nickname(nickname);
        }

        Ok(())
    }

    pub fn set_away(&mut self, reason: Option<&str>) -> Result<(), Error> {
        let message = match reason {
            Some(reason) => proto::command!("AWAY", reason),
            None => proto::command!("AWAY"),
        };
        self.send(message, TokenPriority::User)?;
        self.away_reason = reason.map(ToString::to_string);

        Ok(())
    }

    pub fn quit(&mut self, reason: Option<&str>) -> Result<(), Error> {
        self.request_disconnect(reason)
    }

    /// Runs a parsed user command.
    pub fn execute(&mut self, command: Command) -> Result<(), Error> {
        match command {
            Command::Join(channel, key) => self.join(&channel, key.as_deref()),
            Command::Part(channel, reason) => self.part(&channel, reason.as_deref()),
            Command::Nick(nickname) => self.change_nickname(&nickname),
            Command::Quit(reason) => self.quit(reason.as_deref()),
            Command::Msg(target, text) => self.send_message(&target, &text),
            Command::Notice(target, text) => self.send_notice(&target, &text),
            Command::Me(target, text) => self.send_action(&target, &text),
            Command::Ctcp(target, command, params) => {
                self.send_ctcp(&target, &ctcp::Command::from(command.as_str()), params.as_deref())
            }
            Command::Mode(target, modes, args) => {
                let args = args.iter().map(String::as_str).collect::<Vec<_>>();
                self.set_mode(&target, &modes, &args)
            }
            Command::Topic(channel, Some(topic)) => self.set_topic(&channel, &topic),
            Command::Topic(channel, None) => {
                self.send(proto::command!("TOPIC", channel), TokenPriority::User)
            }
            Command::Away(reason) => self.set_away(reason.as_deref()),
            Command::Raw(line) => self.send_raw(&line),
            Command::Unknown(command, args) => {
                self.send(proto::command(&command, args), TokenPriority::User)
            }
        }
    }

    fn send(&mut self, message: Message, priority: TokenPriority) -> Result<(), Error> {
        if !self.socket_open {
            return Err(Error::NotConnected);
        }

        let length = self.relayed_length(&message);
        let limit = self.isupport.linelen;

        if length > limit {
            return Err(Error::MessageTooLong { length, limit });
        }

        self.track_requests(&message);
        self.enqueue(message, priority);

        Ok(())
    }

    fn enqueue(&mut self, message: Message, priority: TokenPriority) {
        self.outbound.add_token(message, priority);
    }

    // Length of `message` as other clients receive it: behind our prefix
    // and with the final parameter always colon-prefixed
    fn relayed_length(&self, message: &Message) -> usize {
        let colon = message
            .trailing()
            .is_some_and(|trailing| !format::needs_colon(trailing));

        let line = format::message(message.clone());

        // `:` and the space around our prefix
        2 + self.prefix_len() + line.len() + usize::from(colon)
    }

    // Length of `nick!user@host` as the server sees us. Until our own JOIN
    // echo shows it, budget for the longest user@host a server sends.
    fn prefix_len(&self) -> usize {
        match self.me() {
            Some(me) if me.username.is_some() && me.hostname.is_some() => me.to_string().len(),
            _ => self.nickname.len() + UNKNOWN_USERHOST_LEN,
        }
    }

    // Remembers what a 482 could be refusing, in send order
    fn track_requests(&mut self, message: &Message) {
        let (Some(name), Some(second)) = (message.param(0), message.param(1)) else {
            return;
        };

        let requests = match message.command.as_str() {
            "KICK" | "TOPIC" => vec![Request::Operator],
            // `MODE #chan +b` without a mask asks for the ban list
            "MODE" if message.params.len() == 2 && !second.starts_with('-') => {
                let mut requests = vec![];

                for mode in second.trim_start_matches('+').chars() {
                    if self.isupport.mode_kind(mode) == Some(ModeKind::List) {
                        requests.push(Request::List(mode));
                    } else if !requests.contains(&Request::Operator) {
                        requests.push(Request::Operator);
                    }
                }

                requests
            }
            "MODE" => vec![Request::Operator],
            _ => return,
        };

        let Some(channel) = self.channels.get_mut(&self.isupport.fold(name)) else {
            return;
        };

        for request in requests {
            match request {
                Request::List(mode) => channel.request_list(mode),
                Request::Operator => channel.request_operator(),
            }
        }
    }

    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    fn reset(&mut self) {
        self.users = Users::default();
        self.me = self.users.resolve_nickname(&self.config.nickname);
        self.nickname.clone_from(&self.config.nickname);
        self.alt_nick = 0;
        self.registered = false;
        self.server_ready = false;
        self.isupport = ISupport::default();
        self.channels.clear();
        self.motd.clear();
        self.away_reason = None;
        self.ping = Ping::default();
        self.outbound.drain_tokens();
        self.immediate.clear();
    }

    fn is_me(&self, nickname: &str) -> bool {
        self.isupport
            .casemapping
            .equals(nickname, &self.nickname)
    }

    fn set_nickname(&mut self, nickname: &str) {
        self.users.rename(self.me, nickname);
        self.nickname = nickname.to_string();
    }

    /// The next nickname to try after a collision during registration:
    /// each alternate in turn, then the prepend character in front of the
    /// primary, then the prepend character in front of the last attempt.
    fn next_nickname(&mut self) -> String {
        let config = &self.config;
        let prepend = config.nick_prepend;

        let next = if let Some(alternate) = config.alt_nicks.get(self.alt_nick) {
            alternate.clone()
        } else if self.alt_nick == config.alt_nicks.len() {
            format!("{prepend}{}", config.nickname)
        } else {
            format!("{prepend}{}", self.nickname)
        };

        self.alt_nick = self.alt_nick.saturating_add(1);
        next
    }

    fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&self.isupport.fold(name))
    }

    fn channels_with(&self, id: user::Id) -> Vec<String> {
        self.channels
            .values()
            .filter(|channel| channel.contains(id))
            .map(|channel| channel.name.clone())
            .collect()
    }

    // Users we share no channel with are dropped from the arena
    fn forget_if_orphaned(&mut self, id: user::Id) {
        if id != self.me && self.channels.values().all(|channel| !channel.contains(id)) {
            self.users.remove(id);
        }
    }

    fn target(&self, target: &str) -> Target {
        let mut chars = target.chars();

        let (prefix, name) = match chars.next() {
            Some(c)
                if self.isupport.mode_for_prefix(c).is_some()
                    && self.isupport.is_channel(chars.as_str()) =>
            {
                (Some(c), chars.as_str())
            }
            _ => (None, target),
        };

        if self.channels.contains_key(&self.isupport.fold(name)) {
            Target::Channel {
                name: name.to_string(),
                prefix,
            }
        } else if self.is_me(target) {
            Target::Private
        } else {
            Target::Unknown(target.to_string())
        }
    }
}

fn quit(reason: Option<&str>) -> Message {
    match reason {
        Some(reason) => proto::command!("QUIT", reason),
        None => proto::command!("QUIT"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("message is {length} bytes, the server allows {limit}")]
    MessageTooLong { length: usize, limit: usize },
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Parse(#[from] parse::Error),
    #[error(transparent)]
    State(#[from] state::Error),
}
