//! Protocol handlers, one per command or numeric.
//!
//! Each handler updates the session model and records the events it
//! caused. A handler returning an error is reported and skipped; the
//! remaining handlers and lines are still processed.

use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use irc::proto::{self, Message, Numeric};

use super::{Client, on_connect};
use crate::channel::{Channel, ListEntry, Request, Topic};
use crate::dispatch::Dispatcher;
use crate::event::Event;
use crate::isupport::ModeKind;
use crate::mode;
use crate::rate_limit::TokenPriority;
use crate::state::State;
use crate::{ctcp, user};

pub fn dispatcher() -> Dispatcher<Client> {
    use Numeric::*;

    let mut dispatcher = Dispatcher::new();

    dispatcher.register("PING", ping);
    dispatcher.register("PONG", pong);
    dispatcher.register("ERROR", error);
    dispatcher.register("NICK", nick);
    dispatcher.register("JOIN", join);
    dispatcher.register("PART", part);
    dispatcher.register("KICK", kick);
    dispatcher.register("QUIT", quit);
    dispatcher.register("TOPIC", topic);
    dispatcher.register("MODE", mode_change);
    dispatcher.register("PRIVMSG", privmsg);
    dispatcher.register("NOTICE", notice);
    dispatcher.register("AWAY", away_notify);

    dispatcher.register(RPL_WELCOME.command(), welcome);
    dispatcher.register(RPL_WELCOME.command(), on_connect::on_connect);
    dispatcher.register(RPL_ISUPPORT.command(), isupport);
    dispatcher.register(RPL_UMODEIS.command(), user_modes);
    dispatcher.register(RPL_AWAY.command(), away_reply);
    dispatcher.register(RPL_UNAWAY.command(), unaway);
    dispatcher.register(RPL_NOWAWAY.command(), now_away);
    dispatcher.register(RPL_CHANNELMODEIS.command(), channel_modes);
    dispatcher.register(RPL_CREATIONTIME.command(), creation_time);
    dispatcher.register(RPL_NOTOPIC.command(), no_topic);
    dispatcher.register(RPL_TOPIC.command(), topic_reply);
    dispatcher.register(RPL_TOPICWHOTIME.command(), topic_who_time);
    dispatcher.register(RPL_NAMREPLY.command(), names);
    dispatcher.register(RPL_ENDOFNAMES.command(), end_of_names);
    dispatcher.register(RPL_MOTDSTART.command(), motd_start);
    dispatcher.register(RPL_MOTD.command(), motd);
    dispatcher.register(RPL_ENDOFMOTD.command(), end_of_motd);
    dispatcher.register(ERR_NOMOTD.command(), no_motd);
    dispatcher.register(ERR_NICKNAMEINUSE.command(), nick_in_use);
    dispatcher.register(ERR_NICKCOLLISION.command(), nick_in_use);
    dispatcher.register(ERR_PASSWDMISMATCH.command(), password_required);
    dispatcher.register(ERR_CHANOPRIVSNEEDED.command(), chanop_needed);

    for (entry, end, mode) in [
        (RPL_BANLIST, RPL_ENDOFBANLIST, 'b'),
        (RPL_EXCEPTLIST, RPL_ENDOFEXCEPTLIST, 'e'),
        (RPL_INVEXLIST, RPL_ENDOFINVEXLIST, 'I'),
    ] {
        dispatcher.register(entry.command(), move |client: &mut Client, message: &Message| {
            list_entry(client, message, mode)
        });
        dispatcher.register(end.command(), move |client: &mut Client, message: &Message| {
            list_end(client, message, mode)
        });
    }

    dispatcher
}

/// Before `001` only a handful of lines matter. Everything else is a
/// notice from the server's auth stage. Returns whether to dispatch.
pub fn before_registration(client: &mut Client, message: &Message) -> bool {
    match message.command.as_str() {
        "PING" | "PONG" | "ERROR" => true,
        // Some networks echo a nick change made before the welcome
        "NICK" => false,
        "PRIVMSG" | "NOTICE" if message.trailing().is_some_and(ctcp::is_query) => true,
        _ => match message.numeric() {
            Some(1 | 433 | 436 | 464) => true,
            _ => {
                client.emit(Event::NoticeAuth {
                    text: message.trailing().unwrap_or_default().to_string(),
                });
                false
            }
        },
    }
}

pub fn ping(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    client
        .immediate
        .push_back(proto::command("PONG", message.params.clone()));
    Ok(())
}

pub fn pong(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let token = message.trailing().unwrap_or_default();

    // Only the answer to our own ping counts
    match client.ping.pending.take() {
        Some((pending, sent)) if pending == token => {
            let lag = client
                .ping
                .last_activity
                .map_or(Duration::ZERO, |now| now.saturating_duration_since(sent));

            log::trace!("[{}] lag {lag:?}", client.server);
            client.ping.lag = Some(lag);
            client.emit(Event::PingSuccess { lag });
        }
        pending => client.ping.pending = pending,
    }

    Ok(())
}

pub fn error(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let text = message.trailing().unwrap_or_default().to_string();

    log::warn!("[{}] server error: {text}", client.server);
    client.emit(Event::ServerError { message: text });

    Ok(())
}

pub fn welcome(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let nickname = message
        .param(0)
        .context("welcome without a nickname")?
        .to_string();

    client.set_nickname(&nickname);
    client.registered = true;
    client.transition(State::Connected)?;

    log::info!("[{}] registered as {nickname}", client.server);
    client.emit(Event::Registered { nickname });

    Ok(())
}

pub fn isupport(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let network = client.isupport.network.clone();

    // First is our nickname, last is "are supported by this server"
    let tokens = message
        .params
        .get(1..message.params.len().saturating_sub(1))
        .unwrap_or_default();

    for token in tokens {
        if let Err(reason) = client.isupport.apply(token) {
            log::debug!("[{}] ignoring ISUPPORT {token}: {reason}", client.server);
        }
    }

    // Keys depend on the casemapping
    client.users.set_casemapping(client.isupport.casemapping);
    client.channels = std::mem::take(&mut client.channels)
        .into_values()
        .map(|channel| (client.isupport.fold(&channel.name), channel))
        .collect();

    if client.isupport.network != network {
        if let Some(network) = client.isupport.network.clone() {
            client.emit(Event::NetworkDiscovered {
                network,
                server: message.prefix().unwrap_or_default(),
            });
        }
    }

    Ok(())
}

pub fn nick_in_use(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let taken = message.param(1).unwrap_or(&client.nickname).to_string();

    client.emit(Event::NickInUse { nickname: taken });

    if client.registered {
        return Ok(());
    }

    let next = client.next_nickname();
    log::debug!("[{}] nickname in use, trying {next}", client.server);

    client.set_nickname(&next);
    client.enqueue(proto::command!("NICK", next), TokenPriority::High);

    Ok(())
}

pub fn password_required(client: &mut Client, _: &Message) -> anyhow::Result<()> {
    client.emit(Event::PasswordRequired);
    Ok(())
}

pub fn nick(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let user = source(message)?;
    let new = message.param(0).context("NICK without a nickname")?;

    let id = client.users.resolve(user);
    let own = id == client.me;

    client.users.rename(id, new);
    if own {
        client.nickname = new.to_string();
    }

    let channels = client.channels_with(id);
    client.forget_if_orphaned(id);

    client.emit(Event::NickChanged {
        old: user.nickname.clone(),
        new: new.to_string(),
        own,
        channels,
    });

    Ok(())
}

pub fn join(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let user = source(message)?;
    let name = message.param(0).context("JOIN without a channel")?;

    let id = client.users.resolve(user);

    // extended-join: JOIN #channel account :realname
    if let (Some(realname), Some(known)) = (message.param(2), client.users.get_mut(id)) {
        known.realname = Some(realname.to_string());
    }

    if id == client.me {
        client
            .channels
            .entry(client.isupport.fold(name))
            .or_insert_with(|| Channel::new(name))
            .join(id);

        client.enqueue(proto::command!("MODE", name), TokenPriority::Low);
        client.emit(Event::SelfJoin {
            channel: name.to_string(),
        });
    } else if let Some(channel) = client.channels.get_mut(&client.isupport.fold(name)) {
        channel.join(id);
        client.emit(Event::Join {
            channel: name.to_string(),
            user: user.clone(),
        });
    } else {
        log::debug!("[{}] {} joined {name} without us", client.server, user.nickname);
        client.forget_if_orphaned(id);
    }

    Ok(())
}

pub fn part(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let user = source(message)?;
    let name = message.param(0).context("PART without a channel")?;
    let own = client.is_me(&user.nickname);

    if own {
        client.remove_channel(name);
    } else if let Some(id) = client.users.find(&user.nickname) {
        if let Some(channel) = client.channel_mut(name) {
            channel.leave(id);
        }
        client.forget_if_orphaned(id);
    }

    client.emit(Event::Part {
        channel: name.to_string(),
        user: user.clone(),
        reason: message.param(1).map(ToString::to_string),
        own,
    });

    Ok(())
}

pub fn kick(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let name = message.param(0).context("KICK without a channel")?;
    let victim = message.param(1).context("KICK without a victim")?;
    let own = client.is_me(victim);

    operator_done(client, message, name);

    if own {
        client.remove_channel(name);
    } else if let Some(id) = client.users.find(victim) {
        if let Some(channel) = client.channel_mut(name) {
            channel.leave(id);
        }
        client.forget_if_orphaned(id);
    }

    client.emit(Event::Kick {
        channel: name.to_string(),
        kicker: message.source.clone(),
        victim: victim.to_string(),
        reason: message.param(2).map(ToString::to_string),
        own,
    });

    Ok(())
}

pub fn quit(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let user = source(message)?;

    let channels = match client.users.find(&user.nickname) {
        Some(id) => {
            let channels = client.channels_with(id);

            for channel in client.channels.values_mut() {
                channel.leave(id);
            }
            if id != client.me {
                client.users.remove(id);
            }

            channels
        }
        None => vec![],
    };

    client.emit(Event::Quit {
        user: user.clone(),
        reason: message.param(0).map(ToString::to_string),
        channels,
    });

    Ok(())
}

pub fn topic(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let name = message.param(0).context("TOPIC without a channel")?;
    let text = message.param(1).unwrap_or_default();

    operator_done(client, message, name);

    let topic = (!text.is_empty()).then(|| Topic {
        text: text.to_string(),
        setter: message.prefix(),
        time: Some(Utc::now()),
    });

    if let Some(channel) = client.channel_mut(name) {
        channel.topic.clone_from(&topic);
    }

    client.emit(Event::Topic {
        channel: name.to_string(),
        topic,
        changed: true,
    });

    Ok(())
}

pub fn no_topic(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let name = message.param(1).context("331 without a channel")?;

    if let Some(channel) = client.channel_mut(name) {
        channel.topic = None;
    }

    client.emit(Event::Topic {
        channel: name.to_string(),
        topic: None,
        changed: false,
    });

    Ok(())
}

pub fn topic_reply(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let name = message.param(1).context("332 without a channel")?;
    let text = message.param(2).unwrap_or_default();

    if let Some(channel) = client.channel_mut(name) {
        channel.topic = Some(Topic {
            text: text.to_string(),
            setter: None,
            time: None,
        });
    }

    Ok(())
}

// Completes the topic sent in 332
pub fn topic_who_time(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let name = message.param(1).context("333 without a channel")?;

    let Some(channel) = client.channel_mut(name) else {
        return Ok(());
    };

    let topic = channel.topic.get_or_insert_with(|| Topic {
        text: String::new(),
        setter: None,
        time: None,
    });
    topic.setter = message.param(2).map(ToString::to_string);
    topic.time = timestamp(message.param(3));

    let event = Event::Topic {
        channel: channel.name.clone(),
        topic: channel.topic.clone(),
        changed: false,
    };
    client.emit(event);

    Ok(())
}

pub fn names(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let name = message.param(2).context("353 without a channel")?;
    let key = client.isupport.fold(name);

    if !client.channels.contains_key(&key) {
        return Ok(());
    }

    for entry in message.param(3).unwrap_or_default().split_ascii_whitespace() {
        let nickname =
            entry.trim_start_matches(|c: char| client.isupport.mode_for_prefix(c).is_some());
        let prefixes = &entry[..entry.len() - nickname.len()];

        // userhost-in-names sends full masks
        let id = client.users.resolve(&proto::User::parse(nickname));

        if let Some(channel) = client.channels.get_mut(&key) {
            channel.join(id);
            channel.set_prefixes(id, prefixes, &client.isupport);
        }
    }

    Ok(())
}

pub fn end_of_names(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let name = message.param(1).context("366 without a channel")?;

    if let Some(channel) = client.channel(name) {
        let event = Event::Names {
            channel: channel.name.clone(),
            nicknames: client.members(name),
        };
        client.emit(event);
    }

    Ok(())
}

pub fn mode_change(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let target = message.param(0).context("MODE without a target")?;
    let encoded = message.param(1).unwrap_or_default();
    let args = message.params.get(2..).unwrap_or_default();

    if !client.isupport.is_channel(target) {
        if client.is_me(target) {
            client.emit(Event::UserModeChanged {
                setter: message.source.clone(),
                modes: mode::parse_user(encoded, args),
            });
        }
        return Ok(());
    }

    let modes = mode::parse_channel(encoded, args, &client.isupport);

    operator_done(client, message, target);

    let Some(channel) = client.channels.get_mut(&client.isupport.fold(target)) else {
        return Ok(());
    };
    let name = channel.name.clone();

    let mut changed = vec![];
    let mut membership = vec![];

    for mode in modes {
        if client.isupport.mode_kind(mode.value()) != Some(ModeKind::Membership) {
            channel.apply_mode(&mode, &client.isupport);
            changed.push(mode);
            continue;
        }

        let Some(nickname) = mode.arg().map(ToString::to_string) else {
            continue;
        };
        if let Some(id) = client.users.find(&nickname) {
            channel.set_membership(id, &mode, &client.isupport);
        }
        membership.push((nickname, mode));
    }

    for (nickname, mode) in membership {
        client.emit(Event::ChannelUserModeChanged {
            channel: name.clone(),
            setter: message.source.clone(),
            nickname,
            mode,
        });
    }

    if !changed.is_empty() {
        client.emit(Event::ChannelModeChanged {
            channel: name,
            setter: message.source.clone(),
            modes: changed,
        });
    }

    Ok(())
}

pub fn user_modes(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let modes = mode::parse_user(
        message.param(1).unwrap_or_default(),
        message.params.get(2..).unwrap_or_default(),
    );

    client.emit(Event::UserModeChanged {
        setter: None,
        modes,
    });

    Ok(())
}

pub fn channel_modes(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let name = message.param(1).context("324 without a channel")?;
    let modes = mode::parse_channel(
        message.param(2).unwrap_or_default(),
        message.params.get(3..).unwrap_or_default(),
        &client.isupport,
    );

    let Some(channel) = client.channels.get_mut(&client.isupport.fold(name)) else {
        return Ok(());
    };
    channel.reset_modes(&modes, &client.isupport);

    let event = Event::ChannelModeChanged {
        channel: channel.name.clone(),
        setter: None,
        modes,
    };
    client.emit(event);

    Ok(())
}

pub fn creation_time(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let name = message.param(1).context("329 without a channel")?;

    if let Some(channel) = client.channel_mut(name) {
        channel.created = timestamp(message.param(2));
    }

    Ok(())
}

fn list_entry(client: &mut Client, message: &Message, guess: char) -> anyhow::Result<()> {
    let name = message.param(1).context("list reply without a channel")?;

    let Some(channel) = client.channels.get_mut(&client.isupport.fold(name)) else {
        return Ok(());
    };

    let mode = channel.list_mode_for(guess);
    if mode != guess {
        log::debug!("[{}] list reply for {guess} attributed to {mode}", client.server);
    }

    channel.list_entry(
        mode,
        ListEntry {
            mask: message.param(2).unwrap_or_default().to_string(),
            setter: message.param(3).map(ToString::to_string),
            time: timestamp(message.param(4)),
        },
    );

    Ok(())
}

fn list_end(client: &mut Client, message: &Message, guess: char) -> anyhow::Result<()> {
    let name = message.param(1).context("end of list without a channel")?;

    let Some(channel) = client.channel_mut(name) else {
        return Ok(());
    };

    let mode = channel.list_mode_for(guess);

    if channel.list_end(mode) {
        let event = Event::ListModesComplete {
            channel: channel.name.clone(),
            mode,
            entries: channel.list(mode).to_vec(),
        };
        client.emit(event);
    }

    Ok(())
}

// Refuses the oldest request we sent to the channel
pub fn chanop_needed(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let Some(name) = message.param(1) else {
        return Ok(());
    };

    if let Some(Request::List(mode)) = client
        .channel_mut(name)
        .and_then(Channel::refuse_request)
    {
        log::debug!("[{}] {name} refused the +{mode} list", client.server);
    }

    Ok(())
}

// Our own KICK, TOPIC or MODE came back, so it was not refused
fn operator_done(client: &mut Client, message: &Message, name: &str) {
    if !message.nickname().is_some_and(|nickname| client.is_me(nickname)) {
        return;
    }

    if let Some(channel) = client.channel_mut(name) {
        channel.operator_done();
    }
}

pub fn privmsg(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let from = message
        .source
        .clone()
        .context("PRIVMSG without a source")?;
    let target = client.target(message.param(0).context("PRIVMSG without a target")?);
    let text = message.param(1).unwrap_or_default();

    let Some(query) = ctcp::is_query(text)
        .then(|| ctcp::parse_query(text))
        .flatten()
    else {
        client.emit(Event::Message {
            target,
            from,
            text: text.to_string(),
        });
        return Ok(());
    };

    if query.command == ctcp::Command::Action {
        client.emit(Event::Action {
            target,
            from,
            text: query.params.unwrap_or_default().to_string(),
        });
        return Ok(());
    }

    if let (Some(nickname), Some(params)) = (message.nickname(), client.replies.reply(&query)) {
        let reply = ctcp::response_message(&query.command, nickname.to_string(), params);
        client.enqueue(reply, TokenPriority::Low);
    }

    client.emit(Event::Ctcp {
        target,
        from,
        command: query.command.to_string(),
        params: query.params.map(ToString::to_string),
    });

    Ok(())
}

pub fn notice(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let text = message.param(1).unwrap_or_default();

    // `NOTICE AUTH :...` without a prefix
    let Some(from) = message.source.clone() else {
        client.emit(Event::NoticeAuth {
            text: text.to_string(),
        });
        return Ok(());
    };

    let target = client.target(message.param(0).context("NOTICE without a target")?);

    match ctcp::is_query(text)
        .then(|| ctcp::parse_query(text))
        .flatten()
    {
        Some(query) => client.emit(Event::CtcpReply {
            target,
            from,
            command: query.command.to_string(),
            params: query.params.map(ToString::to_string),
        }),
        None => client.emit(Event::Notice {
            target,
            from: Some(from),
            text: text.to_string(),
        }),
    }

    Ok(())
}

pub fn away_reply(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let nickname = message.param(1).context("301 without a nickname")?;
    let reason = message.param(2).map(ToString::to_string);

    set_away(client, nickname, Some(reason));

    Ok(())
}

// away-notify
pub fn away_notify(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let user = source(message)?;
    let reason = message.param(0).map(ToString::to_string);

    set_away(client, &user.nickname, reason.is_some().then_some(reason));

    Ok(())
}

pub fn unaway(client: &mut Client, _: &Message) -> anyhow::Result<()> {
    if let Some(me) = client.users.get_mut(client.me) {
        me.away = None;
    }

    client.emit(Event::Away {
        away: false,
        reason: None,
    });

    Ok(())
}

pub fn now_away(client: &mut Client, _: &Message) -> anyhow::Result<()> {
    let reason = client.away_reason.clone();

    if let Some(me) = client.users.get_mut(client.me) {
        me.away = Some(user::Away {
            reason: reason.clone(),
        });
    }

    client.emit(Event::Away { away: true, reason });

    Ok(())
}

pub fn motd_start(client: &mut Client, _: &Message) -> anyhow::Result<()> {
    client.motd.clear();
    Ok(())
}

pub fn motd(client: &mut Client, message: &Message) -> anyhow::Result<()> {
    let line = message.param(1).unwrap_or_default();
    client
        .motd
        .push(line.strip_prefix("- ").unwrap_or(line).to_string());
    Ok(())
}

pub fn end_of_motd(client: &mut Client, _: &Message) -> anyhow::Result<()> {
    let motd = std::mem::take(&mut client.motd);
    client.emit(Event::MotdEnd {
        motd,
        missing: false,
    });
    Ok(())
}

pub fn no_motd(client: &mut Client, _: &Message) -> anyhow::Result<()> {
    client.motd.clear();
    client.emit(Event::MotdEnd {
        motd: vec![],
        missing: true,
    });
    Ok(())
}

impl Client {
    // Leaving a channel forgets everyone we no longer share one with
    fn remove_channel(&mut self, name: &str) -> Option<Channel> {
        let channel = self.channels.shift_remove(&self.isupport.fold(name))?;

        for (id, _) in channel.members() {
            self.forget_if_orphaned(id);
        }

        Some(channel)
    }
}

// `Some(None)` marks away without a reason, `None` marks back
fn set_away(client: &mut Client, nickname: &str, away: Option<Option<String>>) {
    if let Some(user) = client
        .users
        .find(nickname)
        .and_then(|id| client.users.get_mut(id))
    {
        user.away = away.clone().map(|reason| user::Away { reason });
    }

    client.emit(Event::UserAway {
        nickname: nickname.to_string(),
        reason: away.flatten(),
    });
}

fn source(message: &Message) -> anyhow::Result<&proto::User> {
    message
        .source
        .as_ref()
        .and_then(proto::Source::user)
        .with_context(|| format!("{} without a user prefix", message.command))
}

fn timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value?
        .parse::<i64>()
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
}
