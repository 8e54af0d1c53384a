use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::event::{Diagnostic, Event, Kind, Level};
use crate::isupport::Casemapping;
use crate::server::Server;

pub type Listener = Arc<dyn Fn(&Server, &Event) -> anyhow::Result<()> + Send + Sync>;

/// Wraps a closure as a [`Listener`].
pub fn listener(
    f: impl Fn(&Server, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
) -> Listener {
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u64);

/// Narrows a subscription to part of the traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Server(Server),
    Channel(String),
    Nickname(String),
}

impl Filter {
    fn matches(&self, server: &Server, casemapping: Casemapping, event: &Event) -> bool {
        match self {
            Filter::Server(filter) => filter == server,
            Filter::Channel(channel) => event
                .channel()
                .is_some_and(|target| casemapping.equals(target, channel)),
            Filter::Nickname(nickname) => event
                .nickname()
                .is_some_and(|target| casemapping.equals(target, nickname)),
        }
    }
}

#[derive(Clone)]
struct Subscription {
    id: Id,
    listener: Listener,
    filter: Option<Filter>,
}

/// Listeners keyed by event kind.
///
/// Publishing works on a snapshot, so listeners may subscribe or unsubscribe
/// (themselves or others) while being called without affecting the round in
/// progress.
#[derive(Default)]
pub struct Registry {
    next_id: AtomicU64,
    subscriptions: RwLock<HashMap<Kind, Vec<Subscription>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener for `kind`. Subscribing the same listener again with
    /// an equal filter returns the existing id instead of adding a copy.
    pub fn subscribe(&self, kind: Kind, listener: Listener, filter: Option<Filter>) -> Id {
        let mut subscriptions = self.subscriptions.write();
        let entries = subscriptions.entry(kind).or_default();

        if let Some(existing) = entries.iter().find(|subscription| {
            std::ptr::addr_eq(Arc::as_ptr(&subscription.listener), Arc::as_ptr(&listener))
                && subscription.filter == filter
        }) {
            return existing.id;
        }

        let id = Id(self.next_id.fetch_add(1, Ordering::Relaxed));

        entries.push(Subscription {
            id,
            listener,
            filter,
        });

        id
    }

    pub fn unsubscribe(&self, kind: Kind, id: Id) -> bool {
        let mut subscriptions = self.subscriptions.write();

        let Some(entries) = subscriptions.get_mut(&kind) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|subscription| subscription.id != id);
        before != entries.len()
    }

    /// Removes `id` from every kind it was subscribed to.
    pub fn unsubscribe_all(&self, id: Id) -> bool {
        let mut removed = false;

        for entries in self.subscriptions.write().values_mut() {
            let before = entries.len();
            entries.retain(|subscription| subscription.id != id);
            removed |= before != entries.len();
        }

        removed
    }

    pub fn count(&self, kind: Kind) -> usize {
        self.subscriptions.read().get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `event` to every matching listener. Channel and nickname
    /// filters compare names with the connection's `casemapping`.
    pub fn publish(&self, server: &Server, casemapping: Casemapping, event: &Event) {
        let kind = event.kind();

        let snapshot = self
            .subscriptions
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for subscription in snapshot {
            if let Some(filter) = &subscription.filter {
                if !filter.matches(server, casemapping, event) {
                    continue;
                }
            }

            let result =
                panic::catch_unwind(AssertUnwindSafe(|| (subscription.listener)(server, event)));

            let failure = match result {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => format!("{error:#}"),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };

            log::error!("[{server}] {kind} listener failed: {failure}");

            // Errors raised while reporting errors are only logged
            if kind != Kind::Error {
                self.publish(
                    server,
                    casemapping,
                    &Event::Error(Diagnostic::new(
                        Level::Error,
                        format!("{kind} listener failed: {failure}"),
                        None,
                    )),
                );
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{Filter, Id, Listener, Registry, listener};
    use crate::event::{Event, Kind, Target};
    use crate::isupport::Casemapping;
    use crate::server::Server;

    fn message(channel: &str) -> Event {
        Event::Message {
            target: Target::Channel {
                name: channel.to_string(),
                prefix: None,
            },
            from: irc::proto::Source::User(irc::proto::User::parse("dan!d@localhost")),
            text: "hello".to_string(),
        }
    }

    #[test]
    fn unsubscribe_during_publish() {
        let registry = Arc::new(Registry::new());
        let server = Server::from("libera");
        let calls = Arc::new(Mutex::new(vec![]));
        let ids = Arc::new(Mutex::new(Vec::<Id>::new()));

        for index in 0..100 {
            let calls = calls.clone();
            let victims = ids.clone();
            let weak = Arc::downgrade(&registry);

            let listener = listener(move |_, _| {
                calls.lock().push(index);

                if index == 49 {
                    let victim = victims.lock()[98];
                    if let Some(registry) = weak.upgrade() {
                        assert!(registry.unsubscribe(Kind::Message, victim));
                    }
                }

                Ok(())
            });

            let id = registry.subscribe(Kind::Message, listener, None);
            ids.lock().push(id);
        }

        registry.publish(&server, Casemapping::default(), &message("#rust"));

        assert_eq!(*calls.lock(), (0..100).collect::<Vec<_>>());
        assert_eq!(registry.count(Kind::Message), 99);

        calls.lock().clear();
        registry.publish(&server, Casemapping::default(), &message("#rust"));
        assert_eq!(calls.lock().len(), 99);
        assert!(!calls.lock().contains(&98));
    }

    #[test]
    fn filters() {
        let registry = Registry::new();
        let calls = Arc::new(Mutex::new(vec![]));

        for (name, filter) in [
            ("channel", Some(Filter::Channel("#Rust".to_string()))),
            ("other", Some(Filter::Channel("#go".to_string()))),
            ("server", Some(Filter::Server(Server::from("oftc")))),
            ("nickname", Some(Filter::Nickname("DAN".to_string()))),
            ("all", None),
        ] {
            let calls = calls.clone();
            registry.subscribe(
                Kind::Message,
                listener(move |_, _| {
                    calls.lock().push(name);
                    Ok(())
                }),
                filter,
            );
        }

        registry.publish(&Server::from("libera"), Casemapping::default(), &message("#rust"));

        assert_eq!(*calls.lock(), vec!["channel", "nickname", "all"]);
    }

    #[test]
    fn filters_follow_casemapping() {
        let registry = Registry::new();
        let server = Server::from("libera");
        let calls = Arc::new(Mutex::new(0));

        {
            let calls = calls.clone();
            registry.subscribe(
                Kind::Message,
                listener(move |_, _| {
                    *calls.lock() += 1;
                    Ok(())
                }),
                Some(Filter::Channel("#A{B}".to_string())),
            );
        }

        registry.publish(&server, Casemapping::Ascii, &message("#a[b]"));
        assert_eq!(*calls.lock(), 0);

        registry.publish(&server, Casemapping::Ascii, &message("#a{b}"));
        assert_eq!(*calls.lock(), 1);

        registry.publish(&server, Casemapping::Rfc1459, &message("#a[b]"));
        assert_eq!(*calls.lock(), 2);
    }

    #[test]
    fn failures_are_isolated() {
        let registry = Registry::new();
        let server = Server::from("libera");
        let calls = Arc::new(Mutex::new(vec![]));
        let errors = Arc::new(Mutex::new(vec![]));

        registry.subscribe(
            Kind::Message,
            listener(|_, _| Err(anyhow::anyhow!("broken listener"))),
            None,
        );
        registry.subscribe(
            Kind::Message,
            listener(|_, _| panic!("listener exploded")),
            None,
        );
        {
            let calls = calls.clone();
            registry.subscribe(
                Kind::Message,
                listener(move |_, _| {
                    calls.lock().push("after");
                    Ok(())
                }),
                None,
            );
        }
        {
            let errors = errors.clone();
            registry.subscribe(
                Kind::Error,
                listener(move |_, event| {
                    if let Event::Error(diagnostic) = event {
                        errors.lock().push(diagnostic.message.clone());
                    }
                    // Must not recurse
                    Err(anyhow::anyhow!("error listener failed too"))
                }),
                None,
            );
        }

        registry.publish(&server, Casemapping::default(), &message("#rust"));

        assert_eq!(*calls.lock(), vec!["after"]);

        let errors = errors.lock();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("broken listener"));
        assert!(errors[1].contains("listener exploded"));
    }

    #[test]
    fn duplicate_subscribe_is_idempotent() {
        let registry = Registry::new();
        let calls = Arc::new(Mutex::new(0));

        let shared: Listener = {
            let calls = calls.clone();
            listener(move |_, _| {
                *calls.lock() += 1;
                Ok(())
            })
        };

        let first = registry.subscribe(Kind::Message, shared.clone(), None);
        let second = registry.subscribe(Kind::Message, shared.clone(), None);
        let filtered = registry.subscribe(
            Kind::Message,
            shared.clone(),
            Some(Filter::Channel("#other".to_string())),
        );
        let other_kind = registry.subscribe(Kind::Join, shared, None);

        assert_eq!(first, second);
        assert_ne!(first, filtered);
        assert_eq!(registry.count(Kind::Message), 2);

        registry.publish(&Server::from("libera"), Casemapping::default(), &message("#rust"));
        assert_eq!(*calls.lock(), 1);

        assert!(registry.unsubscribe_all(first));
        assert!(registry.unsubscribe_all(other_kind));
        assert_eq!(registry.count(Kind::Message), 1);
        assert_eq!(registry.count(Kind::Join), 0);
        assert!(!registry.unsubscribe(Kind::Message, first));
    }
}
