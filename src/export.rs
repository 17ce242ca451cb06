//! Plain-text dossier rendering for a submission, in the layout the
//! agency prints and files.

use chrono::{DateTime, Utc};

use crate::cpf;
use crate::models::submission::Submission;

/// File name for the downloaded dossier: `PASSAPORTE_<NAME>.txt` with
/// whitespace collapsed to underscores.
pub fn dossier_filename(submission: &Submission) -> String {
    let name = if submission.dados.full_name.is_empty() {
        "CLIENTE"
    } else {
        submission.dados.full_name.as_str()
    };
    let name: String = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    format!("PASSAPORTE_{}.txt", name)
}

/// Render the submission as the sectioned text form.
pub fn render_dossier(submission: &Submission, generated_at: DateTime<Utc>) -> String {
    let d = &submission.dados;
    let mut content = String::new();

    content.push_str("FORMULÁRIO PARA EMISSÃO DE PASSAPORTE BRASILEIRO\n");
    content.push_str(&format!(
        "Gerado em: {}\n",
        generated_at.format("%d/%m/%Y %H:%M:%S")
    ));
    content.push_str("==================================================\n\n");

    content.push_str("1. DADOS PESSOAIS\n");
    content.push_str("------------------\n");
    push_field(&mut content, "NOME COMPLETO", &d.full_name);
    push_optional(&mut content, "NOME ANTERIOR", &d.previous_name);
    push_optional(&mut content, "MOTIVO ALTERAÇÃO", &d.name_change_reason);
    push_field(&mut content, "NOME DA MÃE", &d.mother_name);
    push_optional(&mut content, "NOME DO PAI", &d.father_name);
    push_field(&mut content, "DATA DE NASCIMENTO", &format_form_date(&d.birth_date));
    let naturalidade = if d.birth_state.is_empty() {
        or_dash(&d.birth_city)
    } else {
        format!("{}/{}", or_dash(&d.birth_city), d.birth_state)
    };
    content.push_str(&format!("NATURALIDADE: {}\n", naturalidade));
    let sexo = match d.gender.as_str() {
        "M" => "MASCULINO",
        "F" => "FEMININO",
        _ => "-",
    };
    content.push_str(&format!("SEXO: {}\n", sexo));
    push_field(&mut content, "COR/RAÇA", &d.skin_color);
    push_field(&mut content, "ESTADO CIVIL", &d.marital_status);
    push_optional(&mut content, "CPF DO RESPONSÁVEL", &d.responsible_cpf);

    content.push_str("\n2. DOCUMENTAÇÃO\n");
    content.push_str("----------------\n");
    content.push_str(&format!("CPF: {}\n", cpf::format_cpf(&submission.cpf)));
    push_field(&mut content, "RG", &d.rg);
    push_field(&mut content, "ÓRGÃO EXPEDIDOR", &d.rg_issuer);
    push_field(&mut content, "DATA EXPEDIÇÃO RG", &format_form_date(&d.rg_issue_date));
    push_field(&mut content, "POSSUI PASSAPORTE ANTERIOR", &d.previous_passport);
    if d.previous_passport == "SIM" {
        push_field(&mut content, "SÉRIE PASSAPORTE", &d.passport_series);
        push_field(&mut content, "NÚMERO PASSAPORTE", &d.passport_number);
        push_field(&mut content, "SITUAÇÃO", &d.passport_status);
    }

    content.push_str("\n3. CERTIDÃO\n");
    content.push_str("-----------\n");
    push_field(&mut content, "TIPO", &d.certificate_type);
    let modelo = match d.certificate_model.as_str() {
        "NOVO" => "MODELO NOVO",
        "ANTIGO" => "MODELO ANTIGO",
        _ => "-",
    };
    content.push_str(&format!("MODELO: {}\n", modelo));
    if d.certificate_model == "NOVO" {
        push_field(&mut content, "NÚMERO CERTIDÃO", &d.certificate_number_new);
    } else if d.certificate_model == "ANTIGO" {
        push_field(&mut content, "NÚMERO", &d.certificate_number_old);
        push_field(&mut content, "LIVRO", &d.certificate_book);
        push_field(&mut content, "FOLHA", &d.certificate_page);
    }

    content.push_str("\n4. CONTATO E ENDEREÇO\n");
    content.push_str("----------------------\n");
    push_field(&mut content, "ENDEREÇO", &d.address);
    push_field(&mut content, "BAIRRO", &d.neighborhood);
    push_field(&mut content, "CIDADE", &d.city);
    push_field(&mut content, "ESTADO", &d.state);
    push_field(&mut content, "CEP", &d.zip_code);
    push_field(&mut content, "TELEFONE", &d.phone);
    push_field(&mut content, "E-MAIL", &d.email);
    push_field(&mut content, "PROFISSÃO", &d.profession);

    if !d.travel_authorization.is_empty() {
        content.push_str("\n5. AUTORIZAÇÃO DE VIAGEM (MENOR)\n");
        content.push_str("----------------------------------\n");
        content.push_str(&format!("{}\n", d.travel_authorization));
    }

    content.push_str("\n6. INFORMAÇÕES ADICIONAIS\n");
    content.push_str("----------------------------\n");
    push_field(&mut content, "TIPO PASSAPORTE", &d.passport_type);

    content.push_str("\n==================================================\n");
    content.push_str("SB TURISMO E VIAGENS\n");

    content
}

fn or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

fn push_field(content: &mut String, label: &str, value: &str) {
    content.push_str(&format!("{}: {}\n", label, or_dash(value)));
}

fn push_optional(content: &mut String, label: &str, value: &str) {
    if !value.is_empty() {
        content.push_str(&format!("{}: {}\n", label, value));
    }
}

/// Form dates arrive as `YYYY-MM-DD`; print `DD/MM/YYYY`. Anything else
/// (including empty) passes through, empty becoming a dash.
fn format_form_date(value: &str) -> String {
    let parts: Vec<&str> = value.split('-').collect();
    if parts.len() == 3 {
        format!("{}/{}/{}", parts[2], parts[1], parts[0])
    } else {
        or_dash(value)
    }
}
