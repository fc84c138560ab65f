//! Recipient contact lookup.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::ContactDbModel;
use crate::database::time::now_ms;
use crate::domain::ContactInfo;
use crate::Result;

/// Resolves a user id to the addresses alerts can be delivered to.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// `None` when the user is unknown.
    async fn get_contact_info(&self, user_id: &str) -> Result<Option<ContactInfo>>;
}

/// SQLx implementation of RecipientDirectory backed by `user_contact`.
pub struct SqlxRecipientDirectory {
    pool: SqlitePool,
}

impl SqlxRecipientDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a user's contact row.
    pub async fn upsert(&self, contact: &ContactInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_contact (user_id, email, phone, push_token, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                phone = excluded.phone,
                push_token = excluded.push_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&contact.user_id)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(&contact.push_token)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecipientDirectory for SqlxRecipientDirectory {
    async fn get_contact_info(&self, user_id: &str) -> Result<Option<ContactInfo>> {
        let row = sqlx::query_as::<_, ContactDbModel>("SELECT * FROM user_contact WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ContactInfo::from))
    }
}
