use irc::proto::{self, Message};

use super::Client;
use crate::command::{self, Context};
use crate::rate_limit::TokenPriority;

/// Runs on `001`: joins the configured channels, then sends each
/// configured `on_connect` command as if it were typed by the user.
pub fn on_connect(client: &mut Client, _: &Message) -> anyhow::Result<()> {
    let config = client.config.clone();

    for channel in &config.channels {
        let join = match config.channel_keys.get(channel) {
            Some(key) => proto::command!("JOIN", channel, key),
            None => proto::command!("JOIN", channel),
        };
        client.enqueue(join, TokenPriority::High);
    }

    for line in &config.on_connect {
        let result = command::parse(line, &Context::Server)
            .map_err(anyhow::Error::from)
            .and_then(|command| Ok(client.execute(command)?));

        if let Err(error) = result {
            log::warn!("[{}] on_connect {line:?} failed: {error}", client.server);
        }
    }

    Ok(())
}
