use anyhow::{Result, bail};
use chrono::{DateTime, Local, Utc};
use dialoguer::Input;
use zbot_channels::imessage::chatdb::{ChatDb, ChatSummary};
use zbot_channels::imessage::contacts::ContactBook;

/// How many chats are scanned before hint filtering.
const CHAT_SCAN_LIMIT: usize = 3000;

/// A selectable chat row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub chat_id: i64,
    pub last_message_id: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub label: String,
}

/// What the user typed at the picker prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Quit,
    /// Zero-based index into the shown entries.
    Pick(usize),
    NotANumber,
    OutOfRange,
}

/// Label, filter and order chats for the picker.
///
/// Labels go through `contacts` when given. The hint matches
/// case-insensitively against the display name, identifier and label.
/// Entries are ordered by latest message id, newest first; chats without
/// messages sort last.
pub fn build_entries(
    chats: &[ChatSummary],
    contacts: Option<&ContactBook>,
    hint: Option<&str>,
) -> Vec<ChatEntry> {
    let hint = hint.map(|h| h.trim().to_lowercase()).unwrap_or_default();

    let mut entries: Vec<ChatEntry> = chats
        .iter()
        .filter_map(|chat| {
            let label = match contacts {
                Some(book) => book.format_chat_label(&chat.display_name, &chat.identifier),
                None => chat.fallback_label(),
            };
            let matches = hint.is_empty()
                || [chat.display_name.as_str(), chat.identifier.as_str(), label.as_str()]
                    .iter()
                    .any(|s| s.to_lowercase().contains(&hint));
            matches.then(|| ChatEntry {
                chat_id: chat.chat_id,
                last_message_id: chat.last_message_id.unwrap_or(0),
                last_message_at: chat.last_message_at,
                label,
            })
        })
        .collect();

    entries.sort_by(|a, b| b.last_message_id.cmp(&a.last_message_id));
    entries
}

pub fn parse_choice(input: &str, shown: usize) -> Choice {
    let input = input.trim();
    if matches!(input.to_lowercase().as_str(), "q" | "quit" | "exit") {
        return Choice::Quit;
    }
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Choice::NotANumber;
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=shown).contains(&n) => Choice::Pick(n - 1),
        _ => Choice::OutOfRange,
    }
}

/// When the chat last saw a message, in local time; `-` for empty chats.
pub fn format_last_seen(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

pub fn format_entry(position: usize, entry: &ChatEntry) -> String {
    format!(
        "{position:2}) chat_id={:<6} last_msg={:<10} at={:<16}  name={}",
        entry.chat_id,
        entry.last_message_id,
        format_last_seen(entry.last_message_at),
        entry.label
    )
}

/// Show recent chats and ask which one to watch. `None` means the user quit.
pub fn pick_chat(
    db: &ChatDb,
    contacts: Option<&ContactBook>,
    hint: Option<&str>,
    limit: usize,
) -> Result<Option<ChatEntry>> {
    let chats = db.fetch_chats(CHAT_SCAN_LIMIT)?;
    let mut entries = build_entries(&chats, contacts, hint);
    if entries.is_empty() {
        bail!("No recent chats matched. Try a different --hint.");
    }
    entries.truncate(limit.max(1));

    println!("\nChoose a recent chat:\n");
    for (i, entry) in entries.iter().enumerate() {
        println!("{}", format_entry(i + 1, entry));
    }
    println!();

    loop {
        let input: String = Input::new()
            .with_prompt(format!("Enter 1-{} (or 'q' to quit)", entries.len()))
            .allow_empty(true)
            .interact_text()?;

        match parse_choice(&input, entries.len()) {
            Choice::Quit => return Ok(None),
            Choice::Pick(index) => return Ok(Some(entries.swap_remove(index))),
            Choice::NotANumber => println!("Please enter a number."),
            Choice::OutOfRange => println!("Out of range."),
        }
    }
}
