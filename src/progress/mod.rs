pub mod dispatcher;
pub mod playback;
pub mod reconcile;
pub mod store;

pub use dispatcher::SyncDispatcher;
pub use store::ProgressStore;
