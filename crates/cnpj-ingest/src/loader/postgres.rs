//! Postgres record sink
//!
//! Every batch is written inside its own transaction, split into multi-row
//! `INSERT` statements that stay under the protocol's bind-parameter limit.

use super::records::{CodeEntry, Company, Establishment, Partner, SimplesOption};
use super::shape::RecordShape;
use super::sink::{RecordBatch, RecordSink};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

const MAX_BIND_PARAMS: usize = 65_535;

const COMPANY_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "razao_social",
    "natureza_juridica",
    "qualificacao_responsavel",
    "capital_social",
    "porte_empresa",
    "ente_federativo",
];

const ESTABLISHMENT_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "cnpj_ordem",
    "cnpj_dv",
    "cnpj_completo",
    "identificador_matriz_filial",
    "nome_fantasia",
    "situacao_cadastral",
    "data_situacao_cadastral",
    "motivo_situacao_cadastral",
    "nome_cidade_exterior",
    "pais",
    "data_inicio_atividade",
    "cnae_fiscal_principal",
    "cnae_fiscal_secundaria",
    "tipo_logradouro",
    "logradouro",
    "numero",
    "complemento",
    "bairro",
    "cep",
    "uf",
    "municipio",
    "ddd_1",
    "telefone_1",
    "ddd_2",
    "telefone_2",
    "ddd_fax",
    "fax",
    "correio_eletronico",
    "situacao_especial",
    "data_situacao_especial",
];

const PARTNER_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "identificador_socio",
    "nome_socio",
    "cnpj_cpf_socio",
    "qualificacao_socio",
    "data_entrada_sociedade",
    "pais",
    "representante_legal",
    "nome_representante",
    "qualificacao_representante",
    "faixa_etaria",
];

const SIMPLES_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "opcao_simples",
    "data_opcao_simples",
    "data_exclusao_simples",
    "opcao_mei",
    "data_opcao_mei",
    "data_exclusao_mei",
];

const CODE_COLUMNS: &[&str] = &["codigo", "descricao"];

#[derive(Clone)]
pub struct PgRecordSink {
    pool: PgPool,
}

impl PgRecordSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_rows<'r, T, F>(
        &self,
        shape: RecordShape,
        columns: &[&str],
        rows: &'r [T],
        mut bind: F,
    ) -> Result<u64>
    where
        T: Sync,
        F: FnMut(Separated<'_, 'r, Postgres, &'static str>, &'r T) + Send,
    {
        if rows.is_empty() {
            return Ok(0);
        }

        let header = format!(
            "INSERT INTO {} ({}) ",
            shape.table_name(),
            columns.join(", ")
        );
        let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in rows.chunks(rows_per_statement) {
            let mut builder: QueryBuilder<'r, Postgres> = QueryBuilder::new(&header);
            builder.push_values(chunk, &mut bind);
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(table = shape.table_name(), rows = inserted, "Batch committed");
        Ok(inserted)
    }

    async fn insert_companies(&self, rows: &[Company]) -> Result<u64> {
        self.insert_rows(RecordShape::Companies, COMPANY_COLUMNS, rows, |mut b, r| {
            b.push_bind(&r.cnpj_basico)
                .push_bind(&r.razao_social)
                .push_bind(&r.natureza_juridica)
                .push_bind(&r.qualificacao_responsavel)
                .push_bind(&r.capital_social)
                .push_bind(&r.porte_empresa)
                .push_bind(&r.ente_federativo);
        })
        .await
    }

    async fn insert_establishments(&self, rows: &[Establishment]) -> Result<u64> {
        self.insert_rows(RecordShape::Establishments, ESTABLISHMENT_COLUMNS, rows, |mut b, r| {
            b.push_bind(&r.cnpj_basico)
                .push_bind(&r.cnpj_ordem)
                .push_bind(&r.cnpj_dv)
                .push_bind(&r.cnpj_completo)
                .push_bind(&r.identificador_matriz_filial)
                .push_bind(&r.nome_fantasia)
                .push_bind(&r.situacao_cadastral)
                .push_bind(r.data_situacao_cadastral)
                .push_bind(&r.motivo_situacao_cadastral)
                .push_bind(&r.nome_cidade_exterior)
                .push_bind(&r.pais)
                .push_bind(r.data_inicio_atividade)
                .push_bind(&r.cnae_fiscal_principal)
                .push_bind(&r.cnae_fiscal_secundaria)
                .push_bind(&r.tipo_logradouro)
                .push_bind(&r.logradouro)
                .push_bind(&r.numero)
                .push_bind(&r.complemento)
                .push_bind(&r.bairro)
                .push_bind(&r.cep)
                .push_bind(&r.uf)
                .push_bind(&r.municipio)
                .push_bind(&r.ddd_1)
                .push_bind(&r.telefone_1)
                .push_bind(&r.ddd_2)
                .push_bind(&r.telefone_2)
                .push_bind(&r.ddd_fax)
                .push_bind(&r.fax)
                .push_bind(&r.correio_eletronico)
                .push_bind(&r.situacao_especial)
                .push_bind(r.data_situacao_especial);
        })
        .await
    }

    async fn insert_partners(&self, rows: &[Partner]) -> Result<u64> {
        self.insert_rows(RecordShape::Partners, PARTNER_COLUMNS, rows, |mut b, r| {
            b.push_bind(&r.cnpj_basico)
                .push_bind(&r.identificador_socio)
                .push_bind(&r.nome_socio)
                .push_bind(&r.cnpj_cpf_socio)
                .push_bind(&r.qualificacao_socio)
                .push_bind(r.data_entrada_sociedade)
                .push_bind(&r.pais)
                .push_bind(&r.representante_legal)
                .push_bind(&r.nome_representante)
                .push_bind(&r.qualificacao_representante)
                .push_bind(&r.faixa_etaria);
        })
        .await
    }

    async fn insert_simples(&self, rows: &[SimplesOption]) -> Result<u64> {
        self.insert_rows(RecordShape::Simples, SIMPLES_COLUMNS, rows, |mut b, r| {
            b.push_bind(&r.cnpj_basico)
                .push_bind(&r.opcao_simples)
                .push_bind(r.data_opcao_simples)
                .push_bind(r.data_exclusao_simples)
                .push_bind(&r.opcao_mei)
                .push_bind(r.data_opcao_mei)
                .push_bind(r.data_exclusao_mei);
        })
        .await
    }

    async fn insert_codes(&self, shape: RecordShape, rows: &[CodeEntry]) -> Result<u64> {
        self.insert_rows(shape, CODE_COLUMNS, rows, |mut b, r| {
            b.push_bind(&r.codigo).push_bind(&r.descricao);
        })
        .await
    }
}

#[async_trait]
impl RecordSink for PgRecordSink {
    async fn add_batch(&self, batch: RecordBatch) -> Result<u64> {
        match &batch {
            RecordBatch::Companies(rows) => self.insert_companies(rows).await,
            RecordBatch::Establishments(rows) => self.insert_establishments(rows).await,
            RecordBatch::Partners(rows) => self.insert_partners(rows).await,
            RecordBatch::Simples(rows) => self.insert_simples(rows).await,
            RecordBatch::Codes { shape, entries } => self.insert_codes(*shape, entries).await,
        }
    }

    async fn count(&self, shape: RecordShape) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", shape.table_name());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn clear_table(&self, shape: RecordShape) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {} RESTART IDENTITY", shape.table_name());
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}
