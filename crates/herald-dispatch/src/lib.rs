pub mod dispatcher;
pub mod watcher;

pub use dispatcher::{Dispatcher, PlannedAction};
pub use watcher::{InboxWatcher, WatchOptions, WatcherState, run_watch_loop};
