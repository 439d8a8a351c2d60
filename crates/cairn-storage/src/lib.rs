pub mod keys;
pub mod mem;
pub mod mvcc;
pub mod traits;
pub mod types;
pub mod undo;

pub use mem::MemEngine;
pub use traits::MvccEngine;
pub use types::{Intent, IntentResolution, KeyRecord, MvccStats, TxnMeta};
pub use undo::UndoLog;
