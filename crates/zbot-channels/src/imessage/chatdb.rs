use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::debug;
use zbot_common::{Error, Result};

use crate::traits::MessageSource;

/// One row of the `message` table as the bot sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub text: Option<String>,
    /// Serialized `NSAttributedString`, set when `text` is empty.
    pub attributed_body: Option<Vec<u8>>,
    pub is_from_me: bool,
}

/// A chat row with its most recent activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub chat_id: i64,
    pub display_name: String,
    pub identifier: String,
    pub last_message_id: Option<i64>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ChatSummary {
    /// Display name, else identifier, else `(Unknown)`.
    pub fn fallback_label(&self) -> String {
        [self.display_name.trim(), self.identifier.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("(Unknown)")
            .to_string()
    }
}

/// macOS Core Data epoch offset: seconds between Unix epoch (1970) and Apple epoch (2001).
const CORE_DATA_EPOCH_OFFSET: i64 = 978_307_200;

/// Convert a chat.db `date` value to Unix seconds.
///
/// Recent macOS versions store nanoseconds since 2001; older ones stored seconds.
pub fn core_data_to_unix(raw: i64) -> i64 {
    if raw.abs() >= 1_000_000_000_000 {
        raw / 1_000_000_000 + CORE_DATA_EPOCH_OFFSET
    } else {
        raw + CORE_DATA_EPOCH_OFFSET
    }
}

/// Read-only access to `~/Library/Messages/chat.db`.
///
/// Every query opens its own short-lived connection so the bot never holds a
/// lock that Messages.app could trip over.
pub struct ChatDb {
    path: PathBuf,
    busy_timeout: Duration,
}

impl ChatDb {
    /// Check that the database can be opened and return a handle to it.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let db = Self {
            path: path.to_path_buf(),
            busy_timeout,
        };
        db.connect()?;
        debug!("opened chat.db at {}", path.display());
        Ok(db)
    }

    fn connect(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags).map_err(|e| {
            Error::Database(format!(
                "failed to open chat.db at {}: {e}. \
                 Ensure Full Disk Access is granted to the terminal running zbot \
                 in System Settings → Privacy & Security → Full Disk Access.",
                self.path.display()
            ))
        })?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        Ok(conn)
    }

    /// Most recent chats (by ROWID, descending) with their latest message.
    pub fn fetch_chats(&self, limit: usize) -> Result<Vec<ChatSummary>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.ROWID, c.display_name, c.chat_identifier, \
                        (SELECT MAX(m.ROWID) FROM message m \
                         JOIN chat_message_join cmj ON cmj.message_id = m.ROWID \
                         WHERE cmj.chat_id = c.ROWID) AS last_id, \
                        (SELECT m.date FROM message m \
                         JOIN chat_message_join cmj ON cmj.message_id = m.ROWID \
                         WHERE cmj.chat_id = c.ROWID \
                         ORDER BY m.ROWID DESC LIMIT 1) AS last_date \
                 FROM chat c \
                 ORDER BY c.ROWID DESC \
                 LIMIT ?1",
            )
            .map_err(|e| Error::Database(format!("failed to prepare chat query: {e}")))?;

        let rows = stmt
            .query_map([limit as i64], |row| {
                let last_date: Option<i64> = row.get(4)?;
                Ok(ChatSummary {
                    chat_id: row.get(0)?,
                    display_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    identifier: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    last_message_id: row.get(3)?,
                    last_message_at: last_date
                        .and_then(|d| DateTime::from_timestamp(core_data_to_unix(d), 0)),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query chats: {e}")))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(format!("failed to read chat row: {e}")))
    }

    /// Send name for a chat: its display name, else its identifier.
    pub fn chat_name(&self, chat_id: i64) -> Result<String> {
        let conn = self.connect()?;
        let row: Option<(Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT display_name, chat_identifier FROM chat WHERE ROWID = ?1",
                [chat_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to look up chat {chat_id}: {e}")))?;

        let (display_name, identifier) =
            row.ok_or_else(|| Error::NotFound(format!("chat_id {chat_id}")))?;
        let display_name = display_name.unwrap_or_default();
        let display_name = display_name.trim();
        if !display_name.is_empty() {
            return Ok(display_name.to_string());
        }
        Ok(identifier.unwrap_or_default().trim().to_string())
    }
}

impl MessageSource for ChatDb {
    fn latest_message_id(&self, chat_id: i64) -> Result<Option<i64>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT MAX(m.ROWID) FROM message m \
             JOIN chat_message_join cmj ON cmj.message_id = m.ROWID \
             WHERE cmj.chat_id = ?1",
            [chat_id],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to query latest message id: {e}")))
    }

    fn fetch_messages(&self, chat_id: i64, limit: usize) -> Result<Vec<MessageRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT m.ROWID, m.text, m.attributedBody, m.is_from_me \
                 FROM message m \
                 JOIN chat_message_join cmj ON cmj.message_id = m.ROWID \
                 WHERE cmj.chat_id = ?1 \
                 ORDER BY m.ROWID DESC \
                 LIMIT ?2",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![chat_id, limit as i64], |row| {
                let text = match row.get_ref(1)? {
                    ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
                    _ => None,
                };
                let attributed_body = match row.get_ref(2)? {
                    ValueRef::Blob(b) => Some(b.to_vec()),
                    _ => None,
                };
                let is_from_me: Option<i64> = row.get(3)?;
                Ok(MessageRecord {
                    id: row.get(0)?,
                    text,
                    attributed_body,
                    is_from_me: is_from_me.unwrap_or(0) != 0,
                })
            })
            .map_err(|e| Error::Database(format!("failed to query messages: {e}")))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(format!("failed to read message row: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn nanosecond_timestamp_conversion() {
        // 2024-01-01 00:00:00 UTC = Unix 1704067200 = Core Data 725760000 s
        let core_data_ns: i64 = 725_760_000 * 1_000_000_000;
        assert_eq!(core_data_to_unix(core_data_ns), 1_704_067_200);
    }

    #[test]
    fn second_timestamp_conversion() {
        assert_eq!(core_data_to_unix(725_760_000), 1_704_067_200);
        assert_eq!(core_data_to_unix(0), CORE_DATA_EPOCH_OFFSET);
    }

    // --- Mock chat.db integration tests ---

    /// Create an on-disk SQLite database with the iMessage schema subset we need.
    fn mock_chat_db() -> (TempDir, PathBuf, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE chat (
                ROWID INTEGER PRIMARY KEY,
                chat_identifier TEXT,
                display_name TEXT
            );
            CREATE TABLE message (
                ROWID INTEGER PRIMARY KEY,
                text TEXT,
                attributedBody BLOB,
                date INTEGER NOT NULL DEFAULT 0,
                is_from_me INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE chat_message_join (
                chat_id INTEGER REFERENCES chat(ROWID),
                message_id INTEGER REFERENCES message(ROWID)
            );",
        )
        .unwrap();
        (dir, path, conn)
    }

    fn insert_message(conn: &Connection, chat_id: i64, id: i64, text: Option<&str>, from_me: bool) {
        conn.execute(
            "INSERT INTO message (ROWID, text, date, is_from_me) VALUES (?1, ?2, ?3, ?4)",
            params![id, text, 725_760_000_000_000_000i64 + id, from_me as i64],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO chat_message_join (chat_id, message_id) VALUES (?1, ?2)",
            params![chat_id, id],
        )
        .unwrap();
    }

    fn open(path: &Path) -> ChatDb {
        ChatDb::open(path, Duration::from_millis(100)).unwrap()
    }

    #[test]
    fn open_missing_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChatDb::open(&dir.path().join("missing.db"), Duration::from_millis(10))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Full Disk Access"));
    }

    #[test]
    fn latest_message_id_per_chat() {
        let (_dir, path, conn) = mock_chat_db();
        conn.execute("INSERT INTO chat (ROWID, chat_identifier) VALUES (1, '+15551234567'), (2, 'chat42')", [])
            .unwrap();
        insert_message(&conn, 1, 10, Some("a"), false);
        insert_message(&conn, 1, 12, Some("b"), true);
        insert_message(&conn, 2, 11, Some("c"), false);

        let db = open(&path);
        assert_eq!(db.latest_message_id(1).unwrap(), Some(12));
        assert_eq!(db.latest_message_id(2).unwrap(), Some(11));
    }

    #[test]
    fn latest_message_id_of_empty_chat_is_none() {
        let (_dir, path, conn) = mock_chat_db();
        conn.execute("INSERT INTO chat (ROWID, chat_identifier) VALUES (1, 'x@y.z')", [])
            .unwrap();

        let db = open(&path);
        assert_eq!(db.latest_message_id(1).unwrap(), None);
    }

    #[test]
    fn fetch_messages_newest_first_with_limit() {
        let (_dir, path, conn) = mock_chat_db();
        conn.execute("INSERT INTO chat (ROWID, chat_identifier) VALUES (1, '+15551234567')", [])
            .unwrap();
        for id in 1..=5 {
            insert_message(&conn, 1, id, Some(&format!("m{id}")), id % 2 == 0);
        }

        let db = open(&path);
        let msgs = db.fetch_messages(1, 3).unwrap();
        let ids: Vec<i64> = msgs.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
        assert_eq!(msgs[0].text.as_deref(), Some("m5"));
        assert!(!msgs[0].is_from_me);
        assert!(msgs[1].is_from_me);
    }

    #[test]
    fn fetch_messages_returns_attributed_body() {
        let (_dir, path, conn) = mock_chat_db();
        conn.execute("INSERT INTO chat (ROWID, chat_identifier) VALUES (1, '+15551234567')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO message (ROWID, text, attributedBody) VALUES (1, NULL, ?1)",
            [b"\x04\x0bstreamtyped\x81".to_vec()],
        )
        .unwrap();
        conn.execute("INSERT INTO chat_message_join VALUES (1, 1)", []).unwrap();

        let db = open(&path);
        let msgs = db.fetch_messages(1, 30).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text, None);
        assert_eq!(
            msgs[0].attributed_body.as_deref(),
            Some(&b"\x04\x0bstreamtyped\x81"[..])
        );
    }

    #[test]
    fn fetch_messages_ignores_other_chats() {
        let (_dir, path, conn) = mock_chat_db();
        conn.execute("INSERT INTO chat (ROWID, chat_identifier) VALUES (1, 'a'), (2, 'b')", [])
            .unwrap();
        insert_message(&conn, 2, 1, Some("elsewhere"), false);

        let db = open(&path);
        assert!(db.fetch_messages(1, 30).unwrap().is_empty());
    }

    #[test]
    fn chat_name_prefers_display_name() {
        let (_dir, path, conn) = mock_chat_db();
        conn.execute(
            "INSERT INTO chat (ROWID, chat_identifier, display_name) VALUES \
             (1, 'chat123', ' Weekend Crew '), (2, '+15551234567', ''), (3, 'me@example.com', NULL)",
            [],
        )
        .unwrap();

        let db = open(&path);
        assert_eq!(db.chat_name(1).unwrap(), "Weekend Crew");
        assert_eq!(db.chat_name(2).unwrap(), "+15551234567");
        assert_eq!(db.chat_name(3).unwrap(), "me@example.com");
    }

    #[test]
    fn chat_name_for_unknown_chat_is_not_found() {
        let (_dir, path, _conn) = mock_chat_db();
        let db = open(&path);
        assert!(matches!(db.chat_name(99), Err(Error::NotFound(_))));
    }

    #[test]
    fn fetch_chats_includes_latest_activity() {
        let (_dir, path, conn) = mock_chat_db();
        conn.execute(
            "INSERT INTO chat (ROWID, chat_identifier, display_name) VALUES \
             (1, '+15551234567', NULL), (2, 'chat99', 'Family'), (3, 'quiet@example.com', NULL)",
            [],
        )
        .unwrap();
        insert_message(&conn, 1, 7, Some("x"), false);
        insert_message(&conn, 2, 5, Some("y"), false);

        let db = open(&path);
        let chats = db.fetch_chats(10).unwrap();
        let ids: Vec<i64> = chats.iter().map(|c| c.chat_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        assert_eq!(chats[0].last_message_id, None);
        assert_eq!(chats[0].last_message_at, None);
        assert_eq!(chats[1].display_name, "Family");
        assert_eq!(chats[1].last_message_id, Some(5));
        assert_eq!(chats[2].last_message_id, Some(7));
        assert_eq!(
            chats[2].last_message_at.map(|d| d.timestamp()),
            Some(1_704_067_200)
        );

        assert_eq!(db.fetch_chats(1).unwrap().len(), 1);
    }

    #[test]
    fn fallback_label_order() {
        let mut chat = ChatSummary {
            chat_id: 1,
            display_name: String::new(),
            identifier: "+15551234567".into(),
            last_message_id: None,
            last_message_at: None,
        };
        assert_eq!(chat.fallback_label(), "+15551234567");
        chat.display_name = "Crew".into();
        assert_eq!(chat.fallback_label(), "Crew");
        chat.display_name.clear();
        chat.identifier.clear();
        assert_eq!(chat.fallback_label(), "(Unknown)");
    }
}
