mod account;
mod calculator;
mod ledger;
mod money;
mod record;
mod transaction;

pub use account::*;
pub use calculator::*;
pub use ledger::*;
pub use money::*;
pub use record::*;
pub use transaction::*;
