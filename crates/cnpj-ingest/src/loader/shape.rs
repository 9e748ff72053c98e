//! Record shapes and file-name classification
//!
//! Receita Federal file names carry a token that identifies their layout,
//! either the archive name (`Estabelecimentos3.zip`) or the inner entry
//! suffix (`K3241.K03200Y3.D40810.ESTABELE`). Matching is a case-insensitive
//! substring test against the table below.

use crate::error::IngestError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordShape {
    Companies,
    Establishments,
    Partners,
    Simples,
    Cnaes,
    LegalNatures,
    Qualifications,
    Countries,
    Municipalities,
    Reasons,
}

const SHAPE_TOKENS: &[(RecordShape, &[&str])] = &[
    (RecordShape::Companies, &["empresas", "emprecsv"]),
    (RecordShape::Establishments, &["estabelecimentos", "estabele"]),
    (RecordShape::Partners, &["socios", "sociocsv"]),
    (RecordShape::Simples, &["simples"]),
    (RecordShape::Cnaes, &["cnaes", "cnaecsv"]),
    (RecordShape::LegalNatures, &["naturezas", "natjucsv"]),
    (RecordShape::Qualifications, &["qualificacoes", "qualscsv"]),
    (RecordShape::Countries, &["paises", "paiscsv"]),
    (RecordShape::Municipalities, &["municipios", "municcsv"]),
    (RecordShape::Reasons, &["motivos", "moticsv"]),
];

impl RecordShape {
    pub const ALL: [RecordShape; 10] = [
        RecordShape::Companies,
        RecordShape::Establishments,
        RecordShape::Partners,
        RecordShape::Simples,
        RecordShape::Cnaes,
        RecordShape::LegalNatures,
        RecordShape::Qualifications,
        RecordShape::Countries,
        RecordShape::Municipalities,
        RecordShape::Reasons,
    ];

    /// Classify a file by name; `None` means the layout is unknown
    pub fn from_file_name(name: &str) -> Option<RecordShape> {
        let lower = name.to_lowercase();
        SHAPE_TOKENS
            .iter()
            .find(|(_, tokens)| tokens.iter().any(|token| lower.contains(token)))
            .map(|(shape, _)| *shape)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordShape::Companies => "companies",
            RecordShape::Establishments => "establishments",
            RecordShape::Partners => "partners",
            RecordShape::Simples => "simples",
            RecordShape::Cnaes => "cnaes",
            RecordShape::LegalNatures => "legal_natures",
            RecordShape::Qualifications => "qualifications",
            RecordShape::Countries => "countries",
            RecordShape::Municipalities => "municipalities",
            RecordShape::Reasons => "reasons",
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            RecordShape::Companies => "rf_empresas",
            RecordShape::Establishments => "rf_estabelecimentos",
            RecordShape::Partners => "rf_socios",
            RecordShape::Simples => "rf_simples",
            RecordShape::Cnaes => "rf_cnaes",
            RecordShape::LegalNatures => "rf_naturezas",
            RecordShape::Qualifications => "rf_qualificacoes",
            RecordShape::Countries => "rf_paises",
            RecordShape::Municipalities => "rf_municipios",
            RecordShape::Reasons => "rf_motivos",
        }
    }
}

impl fmt::Display for RecordShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordShape {
    type Err = IngestError;

    /// Accepts the shape label (`companies`) or its table (`rf_empresas`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        RecordShape::ALL
            .into_iter()
            .find(|shape| shape.as_str() == wanted || shape.table_name() == wanted)
            .ok_or_else(|| IngestError::Config(format!("Unknown record shape: {}", s)))
    }
}
