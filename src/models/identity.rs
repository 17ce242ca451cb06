use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Allow-list entry keyed by normalized CPF. The presence of a row is
/// what authorizes self-registration; `blocked` is the soft-deny flag
/// toggled by submission status changes and by the admin directly.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub cpf: String,
    pub added_by: Uuid,
    pub added_at: DateTime<Utc>,
    pub has_account: bool,
    pub email: Option<String>,
    pub user_id: Option<Uuid>,
    pub blocked: bool,
}

impl crate::events::Loggable for Identity {
    fn entity_type() -> &'static str {
        "identity"
    }
    fn subject_key(&self) -> String {
        self.cpf.clone()
    }
    fn severity(&self) -> crate::events::Severity {
        crate::events::Severity::Critical
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbIdentity {
    pub cpf: String,
    pub added_by: Uuid,
    pub added_at: DateTime<Utc>,
    pub has_account: bool,
    pub email: Option<String>,
    pub user_id: Option<Uuid>,
    pub blocked: bool,
}

impl From<DbIdentity> for Identity {
    fn from(db: DbIdentity) -> Self {
        Identity {
            cpf: db.cpf,
            added_by: db.added_by,
            added_at: db.added_at,
            has_account: db.has_account,
            email: db.email,
            user_id: db.user_id,
            blocked: db.blocked,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IdentityCreateRequest {
    /// CPF of the client, masked or digits-only. Only the digit count is
    /// validated on this path.
    #[schema(example = "000.000.000-00")]
    pub cpf: String,
}

/// Returned when an admin provisions a client: the credentials to hand
/// over.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProvisionResponse {
    pub cpf: String,
    pub email: String,
    pub temporary_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BlockRequest {
    pub blocked: bool,
}
