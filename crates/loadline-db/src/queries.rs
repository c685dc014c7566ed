use crate::Database;
use crate::models::{MessageRow, ProfileRow, UserRow};
use anyhow::Result;
use loadline_types::api::MessageFilter;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

/// Column list shared by every message read. Joins profiles so each row
/// carries both display names in a single query.
const MESSAGE_COLUMNS: &str = "m.id, m.content, m.sender_id, s.name, m.receiver_id, r.name, m.created_at";

impl Database {
    // -- Users --

    /// Create the auth user and its profile row atomically. Returns `false`,
    /// with nothing written, when `email` is already registered.
    pub fn create_account(&self, email: &str, password_hash: &str, profile: &ProfileRow) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO users (id, email, password) VALUES (?1, ?2, ?3)",
                (&profile.id, email, password_hash),
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
            insert_profile_row(&tx, profile)?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, email, password, created_at FROM users WHERE email = ?1")?;
            let row = stmt
                .query_row([email], |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        password: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    // -- Profiles --

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, phone_number, address, is_admin FROM profiles WHERE id = ?1",
            )?;
            let row = stmt.query_row([id], map_profile).optional()?;
            Ok(row)
        })
    }

    /// Batch-fetch profiles for a set of user IDs. Missing IDs are skipped.
    pub fn get_profiles(&self, ids: &[String]) -> Result<Vec<ProfileRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, name, phone_number, address, is_admin FROM profiles WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter()), map_profile)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn get_admin_profiles(&self) -> Result<Vec<ProfileRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, phone_number, address, is_admin FROM profiles WHERE is_admin = 1 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map([], map_profile)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Apply the given field changes. `None` leaves a column untouched.
    /// Returns false when no profile has this id.
    pub fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        phone_number: Option<&str>,
        address: Option<&str>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE profiles SET
                    name = COALESCE(?2, name),
                    phone_number = COALESCE(?3, phone_number),
                    address = COALESCE(?4, address)
                 WHERE id = ?1",
                rusqlite::params![id, name, phone_number, address],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Insert a message and read it back joined with profile names.
    pub fn insert_message(
        &self,
        id: &str,
        content: &str,
        sender_id: &str,
        receiver_id: Option<&str>,
        created_at: &str,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, content, sender_id, receiver_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, content, sender_id, receiver_id, created_at],
            )?;
            let row = query_message(&tx, id)?
                .ok_or_else(|| anyhow::anyhow!("Message {} vanished after insert", id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// The newest `limit` messages matching `filter`, returned oldest first.
    /// Rows sharing a timestamp keep insertion order.
    pub fn get_messages(&self, filter: &MessageFilter, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let (clause, mut params) = filter_clause(filter);
            params.push(Value::Integer(i64::from(limit)));

            let sql = format!(
                "SELECT id, content, sender_id, sender_name, receiver_id, receiver_name, created_at FROM (
                    SELECT m.id AS id, m.content AS content, m.sender_id AS sender_id, s.name AS sender_name,
                           m.receiver_id AS receiver_id, r.name AS receiver_name,
                           m.created_at AS created_at, m.rowid AS seq
                    FROM messages m
                    LEFT JOIN profiles s ON s.id = m.sender_id
                    LEFT JOIN profiles r ON r.id = m.receiver_id
                    WHERE {clause}
                    ORDER BY m.created_at DESC, m.rowid DESC
                    LIMIT ?{limit_idx}
                 )
                 ORDER BY created_at ASC, seq ASC",
                limit_idx = params.len(),
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Distinct senders among messages matching `filter`, most recent first.
    /// Distinct senders of matching messages, most recent first.
    pub fn get_distinct_senders(&self, filter: &MessageFilter) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let (clause, params) = filter_clause(filter);
            let sql = format!(
                "SELECT m.sender_id, MAX(m.created_at) AS last_at
                 FROM messages m
                 WHERE {clause}
                 GROUP BY m.sender_id
                 ORDER BY last_at DESC"
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

/// WHERE clause (over alias `m`) and its positional parameters.
fn filter_clause(filter: &MessageFilter) -> (&'static str, Vec<Value>) {
    match *filter {
        MessageFilter::Participant(id) => (
            "(m.sender_id = ?1 OR m.receiver_id = ?1)",
            vec![Value::Text(id.to_string())],
        ),
        MessageFilter::AddressedTo {
            receiver,
            include_unaddressed,
        } => (
            "m.sender_id != ?1 AND (m.receiver_id = ?1 OR (?2 = 1 AND m.receiver_id IS NULL))",
            vec![
                Value::Text(receiver.to_string()),
                Value::Integer(i64::from(include_unaddressed)),
            ],
        ),
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn insert_profile_row(conn: &Connection, profile: &ProfileRow) -> Result<()> {
    conn.execute(
        "INSERT INTO profiles (id, name, phone_number, address, is_admin) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            profile.id,
            profile.name,
            profile.phone_number,
            profile.address,
            profile.is_admin
        ],
    )?;
    Ok(())
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m
         LEFT JOIN profiles s ON s.id = m.sender_id
         LEFT JOIN profiles r ON r.id = m.receiver_id
         WHERE m.id = ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([id], map_message).optional()?;
    Ok(row)
}

fn map_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(0)?,
        name: row.get(1)?,
        phone_number: row.get(2)?,
        address: row.get(3)?,
        is_admin: row.get(4)?,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        content: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        receiver_id: row.get(4)?,
        receiver_name: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
