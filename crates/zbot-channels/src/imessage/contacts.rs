use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};
use zbot_common::{normalize_email, normalize_phone};

/// A person from the address book.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub given_name: String,
    pub family_name: String,
    pub nickname: String,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
}

impl Contact {
    /// Given + family name, else nickname, else `(No Name)`.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.given_name.trim(), self.family_name.trim());
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        let nick = self.nickname.trim();
        if !nick.is_empty() {
            return nick.to_string();
        }
        "(No Name)".to_string()
    }
}

/// What a contact source could provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directory {
    Available(Vec<Contact>),
    /// Contacts could not be read; carries the reason.
    Unavailable(String),
}

pub trait ContactSource {
    fn load(&self) -> Directory;
}

/// Reads the macOS AddressBook SQLite stores.
///
/// Contacts live in a root store plus one store per account under `Sources/`.
#[derive(Debug, Clone)]
pub struct AddressBookSource {
    root: PathBuf,
}

const STORE_FILE: &str = "AddressBook-v22.abcddb";

impl AddressBookSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/Library/Application Support/AddressBook`.
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join("Library/Application Support/AddressBook"))
    }

    fn store_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let root_store = self.root.join(STORE_FILE);
        if root_store.is_file() {
            paths.push(root_store);
        }
        if let Ok(entries) = std::fs::read_dir(self.root.join("Sources")) {
            let mut sources: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path().join(STORE_FILE))
                .filter(|p| p.is_file())
                .collect();
            sources.sort();
            paths.extend(sources);
        }
        paths
    }
}

impl ContactSource for AddressBookSource {
    fn load(&self) -> Directory {
        let paths = self.store_paths();
        if paths.is_empty() {
            return Directory::Unavailable(format!(
                "no address book found under {}",
                self.root.display()
            ));
        }

        let mut contacts = Vec::new();
        let mut failures = Vec::new();
        for path in &paths {
            match read_store(path) {
                Ok(mut found) => {
                    debug!("read {} contacts from {}", found.len(), path.display());
                    contacts.append(&mut found);
                }
                Err(e) => failures.push(format!("{}: {e}", path.display())),
            }
        }

        if contacts.is_empty() && !failures.is_empty() {
            return Directory::Unavailable(failures.join("; "));
        }
        for failure in &failures {
            warn!("skipped address book store {failure}");
        }
        Directory::Available(contacts)
    }
}

fn read_store(path: &Path) -> rusqlite::Result<Vec<Contact>> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    let mut contacts: Vec<Contact> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    let mut stmt =
        conn.prepare("SELECT Z_PK, ZFIRSTNAME, ZLASTNAME, ZNICKNAME FROM ZABCDRECORD ORDER BY Z_PK")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            Contact {
                given_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                family_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                nickname: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                ..Contact::default()
            },
        ))
    })?;
    for row in rows {
        let (pk, contact) = row?;
        index.insert(pk, contacts.len());
        contacts.push(contact);
    }

    let mut stmt = conn.prepare(
        "SELECT ZOWNER, ZFULLNUMBER FROM ZABCDPHONENUMBER WHERE ZFULLNUMBER IS NOT NULL ORDER BY Z_PK",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (owner, number) = row?;
        if let Some(&i) = index.get(&owner) {
            contacts[i].phones.push(number);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT ZOWNER, ZADDRESS FROM ZABCDEMAILADDRESS WHERE ZADDRESS IS NOT NULL ORDER BY Z_PK",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (owner, address) = row?;
        if let Some(&i) = index.get(&owner) {
            contacts[i].emails.push(address);
        }
    }

    Ok(contacts)
}

/// Normalized phone/email to contact name.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    lookup: HashMap<String, String>,
    available: bool,
}

impl ContactBook {
    /// Load `source`; an unavailable directory yields an empty book.
    pub fn build(source: &dyn ContactSource) -> Self {
        Self::from_directory(source.load())
    }

    pub fn from_directory(directory: Directory) -> Self {
        match directory {
            Directory::Available(contacts) => Self::from_contacts(&contacts),
            Directory::Unavailable(reason) => {
                warn!("contacts unavailable, showing raw identifiers: {reason}");
                Self::default()
            }
        }
    }

    /// The first contact to claim a phone or email keeps it.
    pub fn from_contacts(contacts: &[Contact]) -> Self {
        let mut lookup = HashMap::new();
        for contact in contacts {
            let name = contact.display_name();
            let keys = contact
                .phones
                .iter()
                .filter_map(|p| normalize_phone(p))
                .chain(contact.emails.iter().filter_map(|e| normalize_email(e)));
            for key in keys {
                lookup.entry(key).or_insert_with(|| name.clone());
            }
        }
        Self {
            lookup,
            available: true,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn name_for(&self, key: &str) -> Option<&str> {
        self.lookup.get(key).map(String::as_str)
    }

    /// Human label for a chat row.
    ///
    /// The display name when set; otherwise `Name (normalized)` when the
    /// identifier resolves as a phone, then as an email; otherwise the raw
    /// identifier, or `(Unknown)`.
    pub fn format_chat_label(&self, display_name: &str, identifier: &str) -> String {
        let display_name = display_name.trim();
        let identifier = identifier.trim();
        if !display_name.is_empty() {
            return display_name.to_string();
        }

        let resolved = normalize_phone(identifier)
            .and_then(|phone| self.name_for(&phone).map(|name| format!("{name} ({phone})")))
            .or_else(|| {
                normalize_email(identifier)
                    .and_then(|email| self.name_for(&email).map(|name| format!("{name} ({email})")))
            });
        if let Some(label) = resolved {
            return label;
        }

        if identifier.is_empty() {
            "(Unknown)".to_string()
        } else {
            identifier.to_string()
        }
    }
}
