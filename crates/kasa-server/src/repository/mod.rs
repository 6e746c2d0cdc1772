//! Repository implementations over the canonical store.
//!
//! Reads run on the pool; writes that must be atomic with other writes take
//! an open transaction (`*_in` variants), so the service layer decides the
//! transaction boundaries.

pub mod customer;
pub mod product;
pub mod transaction;

pub use customer::CustomerRepository;
pub use product::ProductRepository;
pub use transaction::{NewTransactionItem, TransactionRepository, TransactionTotals};
