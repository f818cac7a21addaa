// Dashboard - HTTP + SSE presentation layer
// Only the data contract lives here; all protocol state belongs to the
// network layer

pub mod history;
pub mod server;
pub mod types;

pub use history::HistoryLog;
pub use server::{
    Broadcaster, DashboardServer, DashboardState, BROADCAST_THROTTLE,
};
pub use types::StatsSnapshot;
