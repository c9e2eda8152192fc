pub mod fakes;
#[cfg(test)]
mod generators;
pub mod store;
pub mod threads;
pub mod traits;
pub mod types;

pub use store::{StateStore, StoreChange};
pub use threads::{Thread, ThreadView, aggregate, reply_forest, reply_tree};
pub use traits::*;
pub use types::*;
