use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// Order identifier. Allocated in submission order, so sorting by id
    /// is sorting by submission time.
    OrderId,
    "ord-"
);
numeric_id!(
    /// OCO group identifier.
    OcoGroupId,
    "oco-"
);
numeric_id!(
    /// Round-trip trade identifier.
    TradeId,
    "trd-"
);

/// Index of a feed registered with the synchronizer. Also the clock id of
/// every line driven by that feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeedId(pub usize);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed-{}", self.0)
    }
}

/// Handle to a line in a [`crate::line::LineStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineId(pub usize);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line-{}", self.0)
    }
}

/// Handle to a computation node; also its declaration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Monotonic id allocator for orders, OCO groups and trades.
#[derive(Debug, Clone, Default)]
pub struct IdGen {
    next_order: u64,
    next_group: u64,
    next_trade: u64,
}

impl IdGen {
    pub fn new() -> Self {
        Self {
            next_order: 1,
            next_group: 1,
            next_trade: 1,
        }
    }

    pub fn order(&mut self) -> OrderId {
        let id = OrderId(self.next_order.max(1));
        self.next_order = id.0 + 1;
        id
    }

    pub fn group(&mut self) -> OcoGroupId {
        let id = OcoGroupId(self.next_group.max(1));
        self.next_group = id.0 + 1;
        id
    }

    pub fn trade(&mut self) -> TradeId {
        let id = TradeId(self.next_trade.max(1));
        self.next_trade = id.0 + 1;
        id
    }
}
