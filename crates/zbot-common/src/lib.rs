pub mod error;
pub mod handle;

pub use error::{Error, Result};
pub use handle::{Destination, normalize_email, normalize_phone};
