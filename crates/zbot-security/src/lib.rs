pub mod credentials;
pub mod redaction;

pub use credentials::{OPENAI_API_KEY_VAR, resolve_openai_key};
pub use redaction::{RedactingWriter, redact_secrets};
