//! Domain types shared by every layer of the engine.

pub mod bar;
pub mod fill;
pub mod ids;
pub mod order;
pub mod position;
pub mod timeframe;
pub mod trade;

pub use bar::Bar;
pub use fill::Fill;
pub use ids::{FeedId, IdGen, LineId, NodeId, OcoGroupId, OrderId, TradeId};
pub use order::{
    Order, OrderRequest, OrderSide, OrderStatus, OrderType, RunLogEntry, RunLogEvent, Trail,
    TriggerState, Validity,
};
pub use position::{Account, Position, PositionChange, SIZE_EPSILON};
pub use timeframe::TimeFrame;
pub use trade::{Trade, TradeStatus};

/// Instrument key. Orders, positions and trades are keyed by the name of the
/// feed they trade against.
pub type Instrument = String;
