//! Typed rows for every record shape and their column mappings

use crate::codec::{clean_field, parse_date, parse_decimal};
use chrono::NaiveDate;
use sqlx::types::BigDecimal;
use std::fmt;

/// A key column was empty after cleaning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField(pub &'static str);

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "required column {} is empty", self.0)
    }
}

impl std::error::Error for MissingField {}

/// Build a typed row from raw `;`-separated fields
pub trait FromFields: Sized + Send + Sync {
    /// Rows with fewer fields are incomplete and skipped before mapping
    const MIN_FIELDS: usize;

    fn from_fields(fields: &[String]) -> Result<Self, MissingField>;
}

fn text(fields: &[String], index: usize) -> Option<String> {
    fields.get(index).and_then(|raw| clean_field(raw))
}

fn required(fields: &[String], index: usize, column: &'static str) -> Result<String, MissingField> {
    text(fields, index).ok_or(MissingField(column))
}

fn date(fields: &[String], index: usize) -> Option<NaiveDate> {
    parse_date(text(fields, index).as_deref())
}

fn decimal(fields: &[String], index: usize) -> Option<BigDecimal> {
    parse_decimal(text(fields, index).as_deref())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub cnpj_basico: String,
    pub razao_social: Option<String>,
    pub natureza_juridica: Option<String>,
    pub qualificacao_responsavel: Option<String>,
    pub capital_social: Option<BigDecimal>,
    pub porte_empresa: Option<String>,
    pub ente_federativo: Option<String>,
}

impl FromFields for Company {
    const MIN_FIELDS: usize = 7;

    fn from_fields(fields: &[String]) -> Result<Self, MissingField> {
        Ok(Self {
            cnpj_basico: required(fields, 0, "cnpj_basico")?,
            razao_social: text(fields, 1),
            natureza_juridica: text(fields, 2),
            qualificacao_responsavel: text(fields, 3),
            capital_social: decimal(fields, 4),
            porte_empresa: text(fields, 5),
            ente_federativo: text(fields, 6),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Establishment {
    pub cnpj_basico: String,
    pub cnpj_ordem: Option<String>,
    pub cnpj_dv: Option<String>,
    /// basico + ordem + dv, when all three are present
    pub cnpj_completo: Option<String>,
    pub identificador_matriz_filial: Option<String>,
    pub nome_fantasia: Option<String>,
    pub situacao_cadastral: Option<String>,
    pub data_situacao_cadastral: Option<NaiveDate>,
    pub motivo_situacao_cadastral: Option<String>,
    pub nome_cidade_exterior: Option<String>,
    pub pais: Option<String>,
    pub data_inicio_atividade: Option<NaiveDate>,
    pub cnae_fiscal_principal: Option<String>,
    pub cnae_fiscal_secundaria: Option<String>,
    pub tipo_logradouro: Option<String>,
    pub logradouro: Option<String>,
    pub numero: Option<String>,
    pub complemento: Option<String>,
    pub bairro: Option<String>,
    pub cep: Option<String>,
    pub uf: Option<String>,
    pub municipio: Option<String>,
    pub ddd_1: Option<String>,
    pub telefone_1: Option<String>,
    pub ddd_2: Option<String>,
    pub telefone_2: Option<String>,
    pub ddd_fax: Option<String>,
    pub fax: Option<String>,
    pub correio_eletronico: Option<String>,
    pub situacao_especial: Option<String>,
    pub data_situacao_especial: Option<NaiveDate>,
}

impl FromFields for Establishment {
    const MIN_FIELDS: usize = 30;

    fn from_fields(fields: &[String]) -> Result<Self, MissingField> {
        let cnpj_basico = required(fields, 0, "cnpj_basico")?;
        let cnpj_ordem = text(fields, 1);
        let cnpj_dv = text(fields, 2);
        let cnpj_completo = match (&cnpj_ordem, &cnpj_dv) {
            (Some(ordem), Some(dv)) => Some(format!("{}{}{}", cnpj_basico, ordem, dv)),
            _ => None,
        };

        Ok(Self {
            cnpj_basico,
            cnpj_ordem,
            cnpj_dv,
            cnpj_completo,
            identificador_matriz_filial: text(fields, 3),
            nome_fantasia: text(fields, 4),
            situacao_cadastral: text(fields, 5),
            data_situacao_cadastral: date(fields, 6),
            motivo_situacao_cadastral: text(fields, 7),
            nome_cidade_exterior: text(fields, 8),
            pais: text(fields, 9),
            data_inicio_atividade: date(fields, 10),
            cnae_fiscal_principal: text(fields, 11),
            cnae_fiscal_secundaria: text(fields, 12),
            tipo_logradouro: text(fields, 13),
            logradouro: text(fields, 14),
            numero: text(fields, 15),
            complemento: text(fields, 16),
            bairro: text(fields, 17),
            cep: text(fields, 18),
            uf: text(fields, 19),
            municipio: text(fields, 20),
            ddd_1: text(fields, 21),
            telefone_1: text(fields, 22),
            ddd_2: text(fields, 23),
            telefone_2: text(fields, 24),
            ddd_fax: text(fields, 25),
            fax: text(fields, 26),
            correio_eletronico: text(fields, 27),
            situacao_especial: text(fields, 28),
            data_situacao_especial: date(fields, 29),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partner {
    pub cnpj_basico: String,
    pub identificador_socio: Option<String>,
    pub nome_socio: Option<String>,
    pub cnpj_cpf_socio: Option<String>,
    pub qualificacao_socio: Option<String>,
    pub data_entrada_sociedade: Option<NaiveDate>,
    pub pais: Option<String>,
    pub representante_legal: Option<String>,
    pub nome_representante: Option<String>,
    pub qualificacao_representante: Option<String>,
    pub faixa_etaria: Option<String>,
}

impl FromFields for Partner {
    const MIN_FIELDS: usize = 11;

    fn from_fields(fields: &[String]) -> Result<Self, MissingField> {
        Ok(Self {
            cnpj_basico: required(fields, 0, "cnpj_basico")?,
            identificador_socio: text(fields, 1),
            nome_socio: text(fields, 2),
            cnpj_cpf_socio: text(fields, 3),
            qualificacao_socio: text(fields, 4),
            data_entrada_sociedade: date(fields, 5),
            pais: text(fields, 6),
            representante_legal: text(fields, 7),
            nome_representante: text(fields, 8),
            qualificacao_representante: text(fields, 9),
            faixa_etaria: text(fields, 10),
        })
    }
}

/// Simples Nacional / MEI option flags
#[derive(Debug, Clone, PartialEq)]
pub struct SimplesOption {
    pub cnpj_basico: String,
    pub opcao_simples: Option<String>,
    pub data_opcao_simples: Option<NaiveDate>,
    pub data_exclusao_simples: Option<NaiveDate>,
    pub opcao_mei: Option<String>,
    pub data_opcao_mei: Option<NaiveDate>,
    pub data_exclusao_mei: Option<NaiveDate>,
}

impl FromFields for SimplesOption {
    const MIN_FIELDS: usize = 7;

    fn from_fields(fields: &[String]) -> Result<Self, MissingField> {
        Ok(Self {
            cnpj_basico: required(fields, 0, "cnpj_basico")?,
            opcao_simples: text(fields, 1),
            data_opcao_simples: date(fields, 2),
            data_exclusao_simples: date(fields, 3),
            opcao_mei: text(fields, 4),
            data_opcao_mei: date(fields, 5),
            data_exclusao_mei: date(fields, 6),
        })
    }
}

/// Row of any of the six code/description tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEntry {
    pub codigo: String,
    pub descricao: Option<String>,
}

impl FromFields for CodeEntry {
    const MIN_FIELDS: usize = 2;

    fn from_fields(fields: &[String]) -> Result<Self, MissingField> {
        Ok(Self {
            codigo: required(fields, 0, "codigo")?,
            descricao: text(fields, 1),
        })
    }
}
