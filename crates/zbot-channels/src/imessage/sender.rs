use async_trait::async_trait;
use tracing::debug;
use zbot_common::{Destination, Error, Result};

use crate::traits::ReplySender;

/// Escape a string for use inside an AppleScript double-quoted literal.
///
/// Handles backslashes, double quotes, and newlines.
pub fn applescript_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

/// Script sending `text` to a named chat (group conversations).
pub fn chat_script(chat_name: &str, text: &str) -> String {
    let escaped_name = applescript_escape(chat_name);
    let escaped_text = applescript_escape(text);
    format!(
        r#"tell application "Messages"
    set targetChat to first chat whose name is "{escaped_name}"
    send "{escaped_text}" to targetChat
end tell"#
    )
}

/// Script sending `text` to a phone/email handle, trying iMessage before SMS.
pub fn handle_script(handle: &str, text: &str) -> String {
    let escaped_handle = applescript_escape(handle);
    let escaped_text = applescript_escape(text);
    format!(
        r#"tell application "Messages"
    set theText to "{escaped_text}"

    try
        set svc to first service whose service type = iMessage
        set b to buddy "{escaped_handle}" of svc
        send theText to b
        return "sent_imessage"
    end try

    try
        set svc2 to first service whose service type = SMS
        set b2 to buddy "{escaped_handle}" of svc2
        send theText to b2
        return "sent_sms"
    end try

    error "No valid service/buddy for {escaped_handle}"
end tell"#
    )
}

/// Delivers replies by driving Messages.app through `osascript`.
#[derive(Debug, Clone, Default)]
pub struct AppleScriptSender;

impl AppleScriptSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReplySender for AppleScriptSender {
    fn channel_type(&self) -> &str {
        "imessage"
    }

    async fn send_text(&self, to: &Destination, text: &str) -> Result<()> {
        let script = match to {
            Destination::Handle(handle) => handle_script(handle, text),
            Destination::ChatName(name) => chat_script(name, text),
        };
        debug!("imessage: sending to {to} ({} chars)", text.len());
        let stdout = run_osascript(&script).await?;
        if !stdout.is_empty() {
            debug!("imessage: osascript returned {stdout}");
        }
        Ok(())
    }
}

/// Execute an AppleScript via `osascript`, returning its trimmed stdout.
async fn run_osascript(script: &str) -> Result<String> {
    let output = tokio::process::Command::new("osascript")
        .arg("-e")
        .arg(script)
        .output()
        .await
        .map_err(|e| Error::Channel(format!("failed to spawn osascript: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Channel(stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
