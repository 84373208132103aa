pub mod app;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod model;
pub mod order_handlers;
pub mod orders;
pub mod reservation;
pub mod stock_handlers;
pub mod store;

pub use app::{build_router, AppState};
pub use config::ServiceConfig;
pub use error::{LedgerError, LedgerResult};
pub use ledger::{NewStock, StockLedger};
pub use orders::{NewOrder, OrderService, OrderUpdate};
