//! Recipient contact database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::ContactInfo;

/// Row of the `user_contact` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContactDbModel {
    pub user_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub push_token: Option<String>,
    pub updated_at: i64,
}

impl From<ContactDbModel> for ContactInfo {
    fn from(row: ContactDbModel) -> Self {
        // Blank columns count as missing addresses.
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        ContactInfo {
            user_id: row.user_id,
            email: non_blank(row.email),
            phone: non_blank(row.phone),
            push_token: non_blank(row.push_token),
        }
    }
}
