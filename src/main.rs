mod logger;

use std::sync::Arc;

use data::callback::{self, Filter, Registry};
use data::command::{self, Context};
use data::config::Config;
use data::event::{Event, Kind, Target};
use data::server::{self, Handle, Manager};
use data::{Server, State, environment};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(debug_assertions)]
    let is_debug = true;
    #[cfg(not(debug_assertions))]
    let is_debug = false;

    logger::setup(is_debug)?;
    log::info!("{} has started", environment::formatted_version());

    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => {
            log::error!("{error}");
            return Err(error.into());
        }
    };

    let registry = Arc::new(Registry::new());
    subscribe(&registry);

    let manager = Manager::new();
    let mut handles = vec![];

    for (name, config) in config.servers {
        let entry = server::Entry {
            server: Server::from(name),
            config: Arc::new(config),
        };

        let handle = Handle::new(entry, registry.clone(), &manager);
        manager.register(handle.clone());
        reconnect_on_failure(&registry, &handle);

        match handle.connect() {
            Ok(()) => handles.push(handle),
            Err(error) => log::error!("[{}] {error}", handle.server()),
        }
    }

    if handles.is_empty() {
        anyhow::bail!("no servers configured in {}", Config::path().display());
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        () = input(&handles) => {}
    }

    log::info!("shutting down");
    manager.close_all(Some("Leaving"));

    for handle in &handles {
        handle.closed().await;
    }

    Ok(())
}

/// Reads commands from stdin. `/server <name>` picks which connection
/// the following lines go to, and `/query <target>` sets the target for
/// plain text.
async fn input(handles: &[Arc<Handle>]) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut current = 0;
    let mut context = Context::Server;

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();

        if let Some(name) = line.strip_prefix("/server ") {
            match handles
                .iter()
                .position(|handle| handle.server().name.as_ref() == name.trim())
            {
                Some(index) => current = index,
                None => log::warn!("unknown server {name}"),
            }
            continue;
        }

        if let Some(target) = line.strip_prefix("/query ") {
            let target = target.trim().to_string();
            context = if target.starts_with(['#', '&']) {
                Context::Channel(target)
            } else {
                Context::Query(target)
            };
            continue;
        }

        let Some(handle) = handles.get(current) else {
            continue;
        };

        let result = command::parse(line, &context)
            .map_err(anyhow::Error::from)
            .and_then(|command| Ok(handle.execute(command)?));

        if let Err(error) = result {
            log::warn!("[{}] {line:?}: {error:#}", handle.server());
        }
    }

    // Without stdin, run until interrupted
    std::future::pending::<()>().await;
}

fn subscribe(registry: &Registry) {
    registry.subscribe(
        Kind::Message,
        callback::listener(|server, event| {
            if let Event::Message { target, from, text } = event {
                log::info!("[{server}] {} <{from}> {text}", describe(target));
            }
            Ok(())
        }),
        None,
    );

    registry.subscribe(
        Kind::Notice,
        callback::listener(|server, event| {
            if let Event::Notice { from, text, .. } = event {
                let from = from.as_ref().map(ToString::to_string).unwrap_or_default();
                log::info!("[{server}] -{from}- {text}");
            }
            Ok(())
        }),
        None,
    );

    registry.subscribe(
        Kind::Registered,
        callback::listener(|server, event| {
            if let Event::Registered { nickname } = event {
                log::info!("[{server}] registered as {nickname}");
            }
            Ok(())
        }),
        None,
    );

    registry.subscribe(
        Kind::Names,
        callback::listener(|server, event| {
            if let Event::Names { channel, nicknames } = event {
                log::info!("[{server}] {channel}: {}", nicknames.join(" "));
            }
            Ok(())
        }),
        None,
    );

    registry.subscribe(
        Kind::Error,
        callback::listener(|server, event| {
            if let Event::Error(diagnostic) = event {
                log::warn!("[{server}] {}: {}", diagnostic.level, diagnostic.message);
            }
            Ok(())
        }),
        None,
    );
}

/// Retries transient failures after the server's reconnect delay.
fn reconnect_on_failure(registry: &Registry, handle: &Arc<Handle>) {
    let weak = Arc::downgrade(handle);

    let listener = callback::listener(move |server, _| {
        let Some(handle) = weak.upgrade() else {
            return Ok(());
        };
        if handle.state() != State::TransientlyDisconnected {
            return Ok(());
        }

        let delay = handle.config().reconnect_delay();
        log::info!("[{server}] reconnecting in {}s", delay.as_secs());
        handle.reconnect_after(delay)?;

        Ok(())
    });

    for kind in [Kind::Disconnected, Kind::ConnectionFailed] {
        registry.subscribe(
            kind,
            listener.clone(),
            Some(Filter::Server(handle.server().clone())),
        );
    }
}

fn describe(target: &Target) -> String {
    match target {
        Target::Channel { name, .. } => name.clone(),
        Target::Private => "(private)".to_string(),
        Target::Unknown(target) => target.clone(),
    }
}
