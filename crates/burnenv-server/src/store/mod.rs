pub mod memory;
pub mod model;

pub use memory::{generate_id, unix_now, GetResult, Reason, Store, SweepHandle};
pub use model::StoredSecret;
