pub mod daemon;
pub mod demote;
pub mod evict;
pub mod history;
pub mod list;
pub mod promote;
pub mod status;
pub mod sweep;
pub mod topology;

pub use daemon::Daemon;
pub use demote::Demote;
pub use evict::Evict;
pub use history::History;
pub use list::List;
pub use promote::Promote;
pub use status::Status;
pub use sweep::Sweep;
pub use topology::Topology;
