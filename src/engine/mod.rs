pub mod dispatcher;

pub use dispatcher::{Decision, DispatchStats, Dispatcher};
