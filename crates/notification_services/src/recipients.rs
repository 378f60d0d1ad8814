use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::NotificationError;

/// A user subscribed to a location, with their contact preferences
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct Recipient {
    /// User identifier
    pub user_id: i32,
    /// Primary email address
    pub email: String,
    /// Secondary email address
    pub alternate_email: Option<String>,
    /// Phone number as entered by the user
    pub phone: Option<String>,
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub last_name: Option<String>,
    /// Opted into email notifications
    pub notify_by_email: bool,
    /// Opted into SMS notifications
    pub notify_by_sms: bool,
    /// Primary address verified
    pub email_confirmed: bool,
    /// Secondary address verified
    pub alternate_email_confirmed: bool,
    /// Phone number verified
    pub phone_confirmed: bool,
    /// Location the subscription is for
    pub location_id: i32,
    /// Display name of the location
    pub location_name: String,
    /// Extra location text, e.g. the address
    pub location_description: Option<String>,
}

impl Recipient {
    /// "First Last", trimmed
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
        .trim()
        .to_string()
    }

    /// Whether any contact channel has been verified
    pub fn has_confirmed_channel(&self) -> bool {
        self.email_confirmed || self.alternate_email_confirmed || self.phone_confirmed
    }

    /// Phone to text, when the user opted in and verified it
    pub fn sms_number(&self) -> Option<&str> {
        if !(self.notify_by_sms && self.phone_confirmed) {
            return None;
        }
        self.phone.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// Verified addresses to email, empty when the user opted out
    pub fn email_addresses(&self) -> Vec<&str> {
        if !self.notify_by_email {
            return Vec::new();
        }

        let mut addresses = Vec::new();
        if self.email_confirmed && !self.email.trim().is_empty() {
            addresses.push(self.email.as_str());
        }
        if let Some(alternate) = self
            .alternate_email
            .as_deref()
            .filter(|a| self.alternate_email_confirmed && !a.trim().is_empty())
        {
            addresses.push(alternate);
        }
        addresses
    }

    /// "Name (description)" used in message footers
    pub fn location_label(&self) -> String {
        match self.location_description.as_deref() {
            Some(description) if !description.is_empty() => {
                format!("{} ({})", self.location_name, description)
            }
            _ => self.location_name.clone(),
        }
    }
}

/// Lookup of the users to notify for a location
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Active users subscribed to an active location
    async fn recipients_for_location(
        &self,
        location_id: i32,
    ) -> Result<Vec<Recipient>, NotificationError>;
}

/// Directory backed by the users, locations and user_locations tables
pub struct PgRecipientDirectory {
    pool: PgPool,
}

impl PgRecipientDirectory {
    /// Wrap a connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn recipients_for_location(
        &self,
        location_id: i32,
    ) -> Result<Vec<Recipient>, NotificationError> {
        let recipients = sqlx::query_as::<_, Recipient>(
            r#"
            SELECT u.user_id, u.email, u.alternate_email, u.phone, u.first_name, u.last_name,
                   u.notify_by_email, u.notify_by_sms,
                   u.email_confirmed, u.alternate_email_confirmed, u.phone_confirmed,
                   l.location_id, l.location_name, l.location_description
            FROM users u
            INNER JOIN user_locations ul ON u.user_id = ul.user_id
            INNER JOIN locations l ON ul.location_id = l.location_id
            WHERE l.location_id = $1
              AND u.is_active = TRUE AND l.is_active = TRUE
            ORDER BY u.user_id
            "#,
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(recipients)
    }
}
