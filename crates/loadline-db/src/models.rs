//! Database row types. These map directly to SQLite rows,
//! separate from the loadline-types models.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct ProfileRow {
    pub id: String,
    pub name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub is_admin: bool,
}

/// A message joined with the profile names of both parties.
pub struct MessageRow {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub receiver_id: Option<String>,
    pub receiver_name: Option<String>,
    pub created_at: String,
}
