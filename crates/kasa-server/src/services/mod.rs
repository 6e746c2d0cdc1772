//! Service layer: the batch reconciliation algorithm and the receipt
//! lifecycle operations, kept free of HTTP concerns.

pub mod receipts;
pub mod sync;
