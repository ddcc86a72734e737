use std::sync::LazyLock;

use regex::Regex;

/// Loose E.164 shape: optional `+`, a digit, then at least six more digits or
/// formatting characters.
static PHONE_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?\d[\d\-\(\)\s]{6,}$").expect("phone shape regex should compile")
});

static NON_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\D").expect("non-digit regex should compile"));

/// Normalize a phone number into `+<digits>` form.
///
/// Ten-digit numbers are assumed to be North American and get a `+1` prefix.
/// Returns `None` when the input does not look like a phone number.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let phone = phone.trim();
    if phone.is_empty() || !PHONE_SHAPE.is_match(phone) {
        return None;
    }

    let digits = NON_DIGIT.replace_all(phone, "");
    if digits.is_empty() {
        return None;
    }

    let digit_count = digits.chars().count();
    if digit_count == 10 {
        return Some(format!("+1{digits}"));
    }
    if phone.starts_with('+') {
        return Some(format!("+{digits}"));
    }
    if digit_count == 11 && digits.starts_with('1') {
        return Some(format!("+{digits}"));
    }
    Some(format!("+{digits}"))
}

/// Lowercase and trim an email address. Returns `None` without an `@`.
pub fn normalize_email(email: &str) -> Option<String> {
    if email.is_empty() {
        return None;
    }

    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        return None;
    }

    Some(email)
}

/// Where an outgoing message is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A 1:1 conversation addressed by phone number or email.
    Handle(String),
    /// A named (usually group) conversation.
    ChatName(String),
}

impl Destination {
    /// Classify the send name of a chat: phone numbers and emails are
    /// handles, anything else is a chat name.
    pub fn from_chat_name(name: &str) -> Self {
        if name.starts_with('+') || name.contains('@') {
            Self::Handle(name.to_string())
        } else {
            Self::ChatName(name.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Handle(h) => h,
            Self::ChatName(n) => n,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
