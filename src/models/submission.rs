use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::cpf;
use crate::errors::AppError;

/// Review status of a submission. "processado" has the side effect of
/// blocking the owning identity; "pendente" unblocks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Status {
    #[serde(rename = "pendente")]
    Pendente,
    #[serde(rename = "processado")]
    Processado,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pendente => "pendente",
            Status::Processado => "processado",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pendente" => Ok(Status::Pendente),
            "processado" => Ok(Status::Processado),
            other => Err(format!("unknown submission status: {other}")),
        }
    }
}

/// The intake form payload. Field names mirror the stored document keys
/// (camelCase). Everything is free-form text; required-field enforcement
/// lives in the presentation layer, so any subset deserializes and
/// persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmissionData {
    // dados pessoais
    pub full_name: String,
    pub previous_name: String,
    pub name_change_reason: String,
    pub mother_name: String,
    pub father_name: String,
    pub birth_date: String,
    pub birth_city: String,
    pub birth_state: String,
    pub gender: String,
    pub skin_color: String,
    pub marital_status: String,
    pub responsible_cpf: String,
    // documentação
    pub cpf: String,
    pub rg: String,
    pub rg_issuer: String,
    pub rg_issue_date: String,
    pub previous_passport: String,
    pub passport_series: String,
    pub passport_number: String,
    pub passport_status: String,
    // certidão
    pub certificate_type: String,
    pub certificate_model: String,
    pub certificate_number_new: String,
    pub certificate_number_old: String,
    pub certificate_book: String,
    pub certificate_page: String,
    // contato e endereço
    pub address: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub phone: String,
    pub email: String,
    pub profession: String,
    // autorização de viagem (menor) e tipo
    pub travel_authorization: String,
    pub passport_type: String,
}

impl SubmissionData {
    /// Strip mask characters from the numeric sub-fields before the
    /// payload is persisted.
    pub fn normalized(mut self) -> Self {
        self.cpf = cpf::normalize(&self.cpf);
        self.responsible_cpf = cpf::normalize(&self.responsible_cpf);
        self.zip_code = cpf::normalize(&self.zip_code);
        self.phone = cpf::normalize(&self.phone);
        self
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Submission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cpf: String,
    pub dados: SubmissionData,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

impl crate::events::Loggable for Submission {
    fn entity_type() -> &'static str {
        "submission"
    }
    fn subject_key(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSubmission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cpf: String,
    pub dados: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbSubmission> for Submission {
    type Error = AppError;

    fn try_from(value: DbSubmission) -> Result<Self, Self::Error> {
        let dados: SubmissionData = serde_json::from_str(&value.dados)
            .map_err(|err| AppError::internal(format!("corrupt submission payload: {err}")))?;
        let status: Status = value.status.parse().map_err(AppError::internal)?;
        Ok(Submission {
            id: value.id,
            user_id: value.user_id,
            cpf: value.cpf,
            dados,
            status,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusUpdateRequest {
    pub status: Status,
}
