#![deny(unreachable_pub)]
pub mod config;
pub mod grid;
pub mod store;

pub use config::Settings;
pub use grid::{
    ExchangeProduct, GridError, GridResult, JobState, LoopAction, LoopRunner, Order,
    OrderIdGenerator, OrderStatus, Pair, PricePoint, PriceTick, RunnerConfig, Side, Summary,
    TradeLoop,
};
pub use store::{MemoryStore, Store, StoreError, StoreResult, StoreTxn};
