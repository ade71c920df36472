// Portfolio accounting: pure functions over the trade log
pub mod runway;
pub mod stats;

pub use runway::{runway, Runway};
pub use stats::{
    blend_breakdown, compute_stats, pnl_percent, unrealized_pnl, BlendBreakdown, PortfolioStats,
    Slice,
};
