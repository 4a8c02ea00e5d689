pub mod jobs;
pub mod ledger;
pub mod receipts;
pub mod store;
