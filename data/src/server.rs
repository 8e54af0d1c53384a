use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use std::{cmp, fmt};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time;

use crate::callback::Registry;
use crate::client::{self, Client};
use crate::command::Command;
use crate::state::{self, State};
use crate::{config, stream};

pub type ServerName = Arc<str>;

/// Name a server is configured under. Used to tag events and log lines.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Server {
    pub name: ServerName,
}

impl From<ServerName> for Server {
    fn from(name: ServerName) -> Self {
        Self { name }
    }
}

impl From<&str> for Server {
    fn from(name: &str) -> Self {
        Self { name: name.into() }
    }
}

impl From<String> for Server {
    fn from(name: String) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

// Use case-insensitive comparison first, falling back to case-sensitive
// only when server names are equal (in a case-insensitive context).
impl Ord for Server {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.name
            .to_lowercase()
            .cmp(&other.name.to_lowercase())
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for Server {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub server: Server,
    pub config: Arc<config::Server>,
}

/// What the [`Manager`] needs from a managed connection.
pub trait Lifecycle: Send + Sync {
    fn server(&self) -> &Server;

    /// Leaves the server but keeps the connection reusable.
    fn disconnect(&self, reason: Option<&str>);

    /// Tears the connection down for good and unregisters it.
    fn close(&self, reason: Option<&str>);
}

/// A live connection: the session core behind a lock, plus the task that
/// drives its socket.
///
/// Events are published after the lock is released, so listeners can call
/// back into the handle.
pub struct Handle {
    server: Server,
    config: Arc<config::Server>,
    client: Mutex<Client>,
    registry: Arc<Registry>,
    manager: Weak<Manager>,
    wake: Notify,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Handle {
    pub fn new(entry: Entry, registry: Arc<Registry>, manager: &Arc<Manager>) -> Arc<Self> {
        let Entry { server, config } = entry;

        Arc::new(Self {
            client: Mutex::new(Client::new(server.clone(), config.clone())),
            server,
            config,
            registry,
            manager: Arc::downgrade(manager),
            wake: Notify::new(),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn config(&self) -> &Arc<config::Server> {
        &self.config
    }

    pub fn state(&self) -> State {
        self.client.lock().state()
    }

    /// Runs `f` against the session and publishes whatever it emitted.
    pub fn update<T>(&self, f: impl FnOnce(&mut Client) -> T) -> T {
        let (result, events, casemapping) = {
            let mut client = self.client.lock();
            let result = f(&mut client);
            (result, client.take_events(), client.isupport().casemapping)
        };

        for event in &events {
            self.registry.publish(&self.server, casemapping, event);
        }

        result
    }

    /// Starts a connection attempt on a new task.
    pub fn connect(self: &Arc<Self>) -> Result<(), state::Error> {
        self.update(Client::connecting)?;

        let (sender, receiver) = watch::channel(false);
        *self.shutdown.lock() = Some(sender);

        let task = tokio::spawn(stream::run(self.clone(), receiver));
        *self.task.lock() = Some(task);

        Ok(())
    }

    /// Waits out `delay` in `RECONNECT_WAIT`, then connects again. A
    /// disconnect or close during the wait abandons it.
    pub fn reconnect_after(self: &Arc<Self>, delay: Duration) -> Result<(), state::Error> {
        self.update(|client| client.transition(State::ReconnectWait))?;

        let (sender, mut shutdown) = watch::channel(false);
        *self.shutdown.lock() = Some(sender);

        let handle = self.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                () = time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }

            if let Err(error) = handle.connect() {
                log::debug!("[{}] reconnect abandoned: {error}", handle.server);
            }
        });
        *self.task.lock() = Some(task);

        Ok(())
    }

    pub fn send_message(&self, target: &str, text: &str) -> Result<(), client::Error> {
        self.send(|client| client.send_message(target, text))
    }

    pub fn send_raw(&self, line: &str) -> Result<(), client::Error> {
        self.send(|client| client.send_raw(line))
    }

    pub fn join(&self, channel: &str, key: Option<&str>) -> Result<(), client::Error> {
        self.send(|client| client.join(channel, key))
    }

    pub fn part(&self, channel: &str, reason: Option<&str>) -> Result<(), client::Error> {
        self.send(|client| client.part(channel, reason))
    }

    pub fn execute(&self, command: Command) -> Result<(), client::Error> {
        if let Command::Quit(reason) = command {
            return self.disconnect(reason.as_deref());
        }

        self.send(|client| client.execute(command))
    }

    /// Sends `QUIT` and closes the socket once it has been written.
    pub fn disconnect(&self, reason: Option<&str>) -> Result<(), client::Error> {
        self.update(|client| client.request_disconnect(reason))?;
        self.signal_shutdown();
        Ok(())
    }

    pub fn close(&self, reason: Option<&str>) {
        self.update(|client| client.close(reason));
        self.signal_shutdown();

        if let Some(manager) = self.manager.upgrade() {
            manager.unregister(self);
        }
    }

    /// Resolves once the driving task has finished.
    pub async fn closed(&self) {
        let task = self.task.lock().take();

        if let Some(task) = task {
            if let Err(error) = task.await {
                log::error!("[{}] connection task failed: {error}", self.server);
            }
        }
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }

    fn send(
        &self,
        f: impl FnOnce(&mut Client) -> Result<(), client::Error>,
    ) -> Result<(), client::Error> {
        let result = self.update(f);
        self.wake.notify_one();
        result
    }

    fn signal_shutdown(&self) {
        if let Some(sender) = self.shutdown.lock().as_ref() {
            let _ = sender.send(true);
        }
    }
}

impl Lifecycle for Handle {
    fn server(&self) -> &Server {
        &self.server
    }

    fn disconnect(&self, reason: Option<&str>) {
        if let Err(error) = Handle::disconnect(self, reason) {
            log::debug!("[{}] nothing to disconnect: {error}", self.server);
        }
    }

    fn close(&self, reason: Option<&str>) {
        Handle::close(self, reason);
    }
}

/// Every open connection.
///
/// Closing a connection unregisters it, which may happen while the manager
/// itself is walking the list in [`Manager::close_all`]. The list lock is
/// reentrant for that reason, and unregistering is ignored while closing.
#[derive(Default)]
pub struct Manager {
    servers: ReentrantMutex<RefCell<Vec<Arc<dyn Lifecycle>>>>,
    closing: AtomicBool,
}

impl Manager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates, registers and connects a handle for `entry`.
    pub fn connect(
        self: &Arc<Self>,
        entry: Entry,
        registry: Arc<Registry>,
    ) -> Result<Arc<Handle>, state::Error> {
        let handle = Handle::new(entry, registry, self);

        self.register(handle.clone());
        handle.connect()?;

        Ok(handle)
    }

    pub fn register(&self, server: Arc<dyn Lifecycle>) {
        let servers = self.servers.lock();
        let mut servers = servers.borrow_mut();

        if !servers
            .iter()
            .any(|existing| std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&server)))
        {
            servers.push(server);
        }
    }

    pub fn unregister(&self, server: &dyn Lifecycle) {
        let servers = self.servers.lock();

        if self.closing.load(Ordering::Acquire) {
            return;
        }

        servers
            .borrow_mut()
            .retain(|existing| !std::ptr::addr_eq(Arc::as_ptr(existing), std::ptr::from_ref(server)));
    }

    pub fn disconnect_all(&self, reason: Option<&str>) {
        for server in self.servers() {
            server.disconnect(reason);
        }
    }

    /// Disconnects and closes every server, then empties the list.
    pub fn close_all(&self, reason: Option<&str>) {
        let servers = self.servers.lock();
        self.closing.store(true, Ordering::Release);

        let snapshot = servers.borrow().clone();

        for server in &snapshot {
            log::info!("[{}] closing", server.server());
            server.disconnect(reason);
            server.close(reason);
        }

        servers.borrow_mut().clear();
        self.closing.store(false, Ordering::Release);
    }

    pub fn count(&self) -> usize {
        self.servers.lock().borrow().len()
    }

    pub fn servers(&self) -> Vec<Arc<dyn Lifecycle>> {
        self.servers.lock().borrow().clone()
    }

    pub fn find(&self, server: &Server) -> Option<Arc<dyn Lifecycle>> {
        self.servers
            .lock()
            .borrow()
            .iter()
            .find(|existing| existing.server() == server)
            .cloned()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Weak};
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::{Entry, Lifecycle, Manager, Server};
    use crate::callback::{self, Registry};
    use crate::config;
    use crate::event::{Event, Kind};
    use crate::state::State;

    struct Fake {
        server: Server,
        manager: Weak<Manager>,
        disconnects: AtomicUsize,
        closes: AtomicUsize,
    }

    impl Fake {
        fn new(name: &str, manager: &Arc<Manager>) -> Arc<Self> {
            Arc::new(Self {
                server: Server::from(name),
                manager: Arc::downgrade(manager),
                disconnects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            })
        }
    }

    impl Lifecycle for Fake {
        fn server(&self) -> &Server {
            &self.server
        }

        fn disconnect(&self, _: Option<&str>) {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
        }

        fn close(&self, _: Option<&str>) {
            self.closes.fetch_add(1, Ordering::Relaxed);

            if let Some(manager) = self.manager.upgrade() {
                manager.unregister(self);
            }
        }
    }

    #[test]
    fn close_unregisters() {
        let manager = Manager::new();
        let libera = Fake::new("libera", &manager);
        let oftc = Fake::new("oftc", &manager);

        manager.register(libera.clone());
        manager.register(libera.clone());
        manager.register(oftc.clone());
        assert_eq!(manager.count(), 2);

        Lifecycle::close(&*libera, None);
        assert_eq!(manager.count(), 1);
        assert!(manager.find(&Server::from("libera")).is_none());
        assert!(manager.find(&Server::from("oftc")).is_some());
    }

    #[test]
    fn close_all_tolerates_reentrant_unregister() {
        let manager = Manager::new();
        let fakes = ["libera", "oftc", "rizon"].map(|name| Fake::new(name, &manager));

        for fake in &fakes {
            manager.register(fake.clone());
        }

        manager.close_all(Some("bye"));

        assert_eq!(manager.count(), 0);
        for fake in &fakes {
            assert_eq!(fake.disconnects.load(Ordering::Relaxed), 1);
            assert_eq!(fake.closes.load(Ordering::Relaxed), 1);
        }

        // Usable again afterwards
        manager.register(fakes[0].clone());
        Lifecycle::close(&*fakes[0], None);
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn server_ordering() {
        let mut servers = ["oftc", "Libera", "libera", "efnet"].map(Server::from);
        servers.sort();

        assert_eq!(
            servers.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["efnet", "Libera", "libera", "oftc"]
        );
    }

    #[tokio::test]
    async fn session_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let ircd = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();

            let nick = lines.next_line().await.unwrap().unwrap();
            let user = lines.next_line().await.unwrap().unwrap();

            write
                .write_all(b":irc.test 001 tern :Welcome\r\n")
                .await
                .unwrap();

            let mut rest = vec![];
            while let Ok(Some(line)) = lines.next_line().await {
                let quit = line.starts_with("QUIT");
                rest.push(line);
                if quit {
                    break;
                }
            }

            (nick, user, rest)
        });

        let registry = Arc::new(Registry::new());
        let events = Arc::new(Mutex::new(vec![]));

        for kind in [Kind::Registered, Kind::Disconnected] {
            let events = events.clone();
            registry.subscribe(
                kind,
                callback::listener(move |_, event| {
                    events.lock().push(event.clone());
                    Ok(())
                }),
                None,
            );
        }

        let manager = Manager::new();
        let handle = manager
            .connect(
                Entry {
                    server: Server::from("local"),
                    config: Arc::new(config::Server::new("127.0.0.1", port, "tern")),
                },
                registry,
            )
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.state() != State::Connected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        manager.close_all(Some("bye"));
        tokio::time::timeout(Duration::from_secs(5), handle.closed())
            .await
            .unwrap();

        let (nick, user, rest) = ircd.await.unwrap();
        assert_eq!(nick, "NICK tern");
        assert_eq!(user, "USER tern 0 * tern");
        assert_eq!(rest, vec!["QUIT bye"]);

        assert_eq!(manager.count(), 0);
        assert_eq!(handle.state(), State::Closing);
        assert_eq!(
            *events.lock(),
            vec![
                Event::Registered {
                    nickname: "tern".to_string()
                },
                Event::Disconnected { reason: None },
            ]
        );
    }

    // Accepts one connection and never answers, so a TLS handshake stalls
    async fn silent_listener() -> (u16, oneshot::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (accepted, on_accept) = oneshot::channel();

        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            let _ = accepted.send(());
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        (port, on_accept)
    }

    fn stalled_entry(port: u16, connect_timeout: u64) -> Entry {
        Entry {
            server: Server::from("stalled"),
            config: Arc::new(config::Server {
                use_tls: true,
                ping_time: 1,
                ping_timeout: 1,
                connect_timeout,
                ..config::Server::new("127.0.0.1", port, "tern")
            }),
        }
    }

    #[tokio::test]
    async fn close_during_stalled_handshake() {
        let (port, on_accept) = silent_listener().await;

        let registry = Arc::new(Registry::new());
        let events = Arc::new(Mutex::new(vec![]));
        for kind in [Kind::Connected, Kind::ConnectionFailed, Kind::Disconnected] {
            let events = events.clone();
            registry.subscribe(
                kind,
                callback::listener(move |_, event| {
                    events.lock().push(event.clone());
                    Ok(())
                }),
                None,
            );
        }

        let manager = Manager::new();
        let handle = manager.connect(stalled_entry(port, 600), registry).unwrap();

        on_accept.await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(handle.state(), State::Connecting);

        manager.close_all(Some("bye"));
        tokio::time::timeout(Duration::from_secs(5), handle.closed())
            .await
            .unwrap();

        assert_eq!(handle.state(), State::Closing);
        assert_eq!(manager.count(), 0);
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        let (port, _on_accept) = silent_listener().await;

        let manager = Manager::new();
        let handle = manager
            .connect(stalled_entry(port, 1), Arc::new(Registry::new()))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle.closed())
            .await
            .unwrap();

        assert_eq!(handle.state(), State::TransientlyDisconnected);
    }
}
