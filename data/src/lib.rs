pub use self::callback::Registry;
pub use self::client::Client;
pub use self::command::Command;
pub use self::config::Config;
pub use self::event::Event;
pub use self::server::Server;
pub use self::state::State;

pub mod callback;
pub mod channel;
pub mod client;
pub mod command;
pub mod config;
pub mod ctcp;
pub mod dispatch;
pub mod environment;
pub mod event;
pub mod isupport;
pub mod mode;
pub mod rate_limit;
pub mod server;
pub mod state;
pub mod stream;
pub mod user;
