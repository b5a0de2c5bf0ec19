//! Background scheduling for reversion: the process that keeps retention
//! sweeps and filesystem-watch-driven auto-commits running for work
//! directories the user has registered or tracked, independent of any
//! foreground UI.

pub mod daemon;
pub mod jobs;
pub mod queue;
pub mod state;
pub mod watch;

pub use daemon::Daemon;
pub use jobs::RepositoryJob;
pub use queue::TaskQueue;
pub use state::PathSet;
pub use watch::WatchJob;
