pub mod imessage;
pub mod traits;

pub use imessage::{CycleOutcome, IMessageBot, OnTriggerFn};
pub use traits::{MessageSource, ReplySender};
