pub use self::codec::Codec;
pub use self::connection::Connection;

pub mod codec;
pub mod connection;

pub use proto;
