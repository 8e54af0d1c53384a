use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use irc::proto::Message;
use irc::{Codec, Connection, codec};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::client::{Client, Tick};
use crate::server::Handle;

const PING_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Drives one connection attempt until the socket closes.
///
/// Reconnecting is left to whoever listens for the resulting events.
pub async fn run(handle: Arc<Handle>, mut shutdown: watch::Receiver<bool>) {
    let server = handle.server().clone();
    let config = handle.config().clone();

    let connect = time::timeout(
        config.connect_timeout(),
        Connection::new(config.connection(), config.codec()),
    );

    let result = tokio::select! {
        result = connect => result,
        _ = shutdown.changed() => {
            log::debug!("[{server}] connection attempt abandoned");
            handle.update(Client::connect_aborted);
            return;
        }
    };

    let mut connection = match result {
        Ok(Ok(connection)) => connection,
        Ok(Err(error)) => {
            let error = error.to_string();
            log::warn!("[{server}] connection failed: {error}");

            handle.update(|client| client.connection_failed(error));
            return;
        }
        Err(_) => {
            log::warn!("[{server}] connection timed out");

            handle.update(|client| client.connection_failed("connection timed out".to_string()));
            return;
        }
    };

    if !handle.update(|client| client.connected(Instant::now())) {
        log::debug!("[{server}] connected after the attempt was abandoned");

        if let Err(error) = connection.shutdown().await {
            log::debug!("[{server}] socket shutdown failed: {error}");
        }
        handle.update(Client::connect_aborted);
        return;
    }

    log::info!("[{server}] connected");

    let mut flood = time::interval(config.flood.interval());
    flood.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ping = time::interval(PING_CHECK_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let reason = loop {
        if let Err(error) = flush(&handle, &mut connection).await {
            break Some(error.to_string());
        }

        tokio::select! {
            input = connection.next() => match input {
                Some(Ok(Ok(message))) => {
                    handle.update(|client| client.receive(message, Instant::now()));
                }
                Some(Ok(Err(error))) => {
                    log::debug!("[{server}] malformed line: {error}");
                    handle.update(|client| client.malformed(&error, Instant::now()));
                }
                Some(Err(error)) => break Some(error.to_string()),
                None => break Some("connection closed by server".to_string()),
            },
            () = handle.wake().notified() => {}
            _ = flood.tick() => {}
            _ = ping.tick() => {
                if let Tick::TimedOut = handle.update(|client| client.tick(Instant::now())) {
                    break None;
                }
            }
            _ = shutdown.changed() => {
                // Write the QUIT before hanging up
                if let Err(error) = flush(&handle, &mut connection).await {
                    log::debug!("[{server}] final flush failed: {error}");
                }
                break None;
            }
        }
    };

    if let Err(error) = connection.shutdown().await {
        log::debug!("[{server}] socket shutdown failed: {error}");
    }

    handle.update(|client| client.disconnected(reason));
    log::debug!("[{server}] connection task finished");
}

async fn flush(handle: &Handle, connection: &mut Connection<Codec>) -> Result<(), codec::Error> {
    let messages: Vec<Message> = handle.update(|client| client.drain_outbound(Instant::now()));

    if messages.is_empty() {
        return Ok(());
    }

    for message in messages {
        connection.feed(message).await?;
    }

    connection.flush().await
}
