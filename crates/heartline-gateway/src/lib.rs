pub mod connection;
pub mod dispatcher;
pub mod live;

pub use dispatcher::Dispatcher;
pub use live::Subscription;
