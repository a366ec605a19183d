//! Domain types for barplay

pub mod bar;
pub mod ids;
pub mod timeframe;

pub use bar::Bar;
pub use ids::{SessionId, SessionMeta};
pub use timeframe::{base_resolution, Timeframe, TimeframeError};
