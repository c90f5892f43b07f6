use async_trait::async_trait;
use sqlx::{Acquire, PgPool, Postgres, QueryBuilder, Transaction};

use super::{CatalogStore, ReconcileTx};
use crate::catalog_types::{
    GeneratedContent, NewSubspecialty, NewTemplate, Page, Paged, Subspecialty, Template,
    TemplateFilter, TemplatePatch, TemplateSummary,
};
use crate::error::CatalogResult;

const SUBSPECIALTY_COLUMNS: &str =
    "id, code, short_name, name, radlex_id, count, created_at, updated_at";

const TEMPLATE_COLUMNS: &str = "id, template_id, template_version, title, lang, created, \
    specialty, spec_code, views, downloads, description, author, firstname, lastname, \
    data_type, template_data, created_at, updated_at";

const SUMMARY_COLUMNS: &str = "t.id, t.template_id, t.template_version, t.title, t.lang, \
    t.created, t.specialty, t.spec_code, t.views, t.downloads, t.author, t.data_type, \
    (t.template_data IS NOT NULL) AS has_data";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn push_template_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a TemplateFilter) {
    if let Some(code) = &filter.spec_code {
        qb.push(
            " AND EXISTS (SELECT 1 FROM subspecialty_templates st \
             JOIN subspecialties s ON s.id = st.subspecialty_id \
             WHERE st.template_id = t.id AND s.code = ",
        )
        .push_bind(code)
        .push(")");
    }
    if let Some(lang) = &filter.lang {
        qb.push(" AND t.lang = ").push_bind(lang);
    }
    match filter.has_data {
        Some(true) => {
            qb.push(" AND t.template_data IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND t.template_data IS NULL");
        }
        None => {}
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn begin_reconcile(&self) -> CatalogResult<Box<dyn ReconcileTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgReconcileTx { tx }))
    }

    async fn templates_missing_data(&self) -> CatalogResult<Vec<Template>> {
        let query = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates \
             WHERE template_data IS NULL \
             ORDER BY views DESC, template_id"
        );
        Ok(sqlx::query_as::<_, Template>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_template(&self, template_id: &str) -> CatalogResult<Option<Template>> {
        let query = format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE template_id = $1");
        Ok(sqlx::query_as::<_, Template>(&query)
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn merge_template_fields(
        &self,
        template_id: &str,
        patch: &TemplatePatch,
    ) -> CatalogResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE templates
               SET template_data = COALESCE($2, template_data),
                   description = COALESCE($3, description),
                   author = COALESCE($4, author),
                   firstname = COALESCE($5, firstname),
                   lastname = COALESCE($6, lastname),
                   updated_at = now()
             WHERE template_id = $1
            "#,
        )
        .bind(template_id)
        .bind(&patch.template_data)
        .bind(&patch.description)
        .bind(&patch.author)
        .bind(&patch.firstname)
        .bind(&patch.lastname)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn store_generated(
        &self,
        template_id: &str,
        content: &GeneratedContent,
    ) -> CatalogResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE templates
               SET template_data = $2,
                   description = $3,
                   author = $4,
                   firstname = $5,
                   lastname = $6,
                   updated_at = now()
             WHERE template_id = $1
               AND template_data IS NULL
            "#,
        )
        .bind(template_id)
        .bind(&content.template_data)
        .bind(&content.description)
        .bind(&content.author)
        .bind(&content.firstname)
        .bind(&content.lastname)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_subspecialties(&self, page: Page) -> CatalogResult<Paged<Subspecialty>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subspecialties")
            .fetch_one(&self.pool)
            .await?;

        let query = format!(
            "SELECT {SUBSPECIALTY_COLUMNS} FROM subspecialties ORDER BY code LIMIT $1 OFFSET $2"
        );
        let items = sqlx::query_as::<_, Subspecialty>(&query)
            .bind(page.limit)
            .bind(page.skip)
            .fetch_all(&self.pool)
            .await?;

        Ok(Paged { items, total })
    }

    async fn find_subspecialty(&self, code: &str) -> CatalogResult<Option<Subspecialty>> {
        let query = format!("SELECT {SUBSPECIALTY_COLUMNS} FROM subspecialties WHERE code = $1");
        Ok(sqlx::query_as::<_, Subspecialty>(&query)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_templates(
        &self,
        filter: &TemplateFilter,
        page: Page,
    ) -> CatalogResult<Paged<TemplateSummary>> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM templates t WHERE TRUE");
        push_template_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {SUMMARY_COLUMNS} FROM templates t WHERE TRUE"));
        push_template_filters(&mut qb, filter);
        qb.push(" ORDER BY t.views DESC, t.template_id LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.skip);
        let items = qb
            .build_query_as::<TemplateSummary>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Paged { items, total })
    }

    async fn subspecialty_codes_for_template(
        &self,
        template_id: &str,
    ) -> CatalogResult<Vec<String>> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT s.code
              FROM subspecialty_templates st
              JOIN subspecialties s ON s.id = st.subspecialty_id
              JOIN templates t ON t.id = st.template_id
             WHERE t.template_id = $1
             ORDER BY s.code
            "#,
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

/// One transaction spanning the whole run; each item gets its own savepoint so
/// a failed statement does not abort the outer transaction.
struct PgReconcileTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ReconcileTx for PgReconcileTx {
    async fn clear_links(&mut self) -> CatalogResult<u64> {
        let result = sqlx::query("DELETE FROM subspecialty_templates")
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_subspecialty(&mut self, input: &NewSubspecialty) -> CatalogResult<Subspecialty> {
        let query = format!(
            "INSERT INTO subspecialties (code, short_name, name, radlex_id) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (code) DO UPDATE SET \
                short_name = EXCLUDED.short_name, \
                name = EXCLUDED.name, \
                radlex_id = EXCLUDED.radlex_id, \
                updated_at = now() \
             RETURNING {SUBSPECIALTY_COLUMNS}"
        );

        let mut savepoint = Acquire::begin(&mut self.tx).await?;
        let row = sqlx::query_as::<_, Subspecialty>(&query)
            .bind(&input.code)
            .bind(&input.short_name)
            .bind(&input.name)
            .bind(&input.radlex_id)
            .fetch_one(&mut *savepoint)
            .await?;
        savepoint.commit().await?;

        Ok(row)
    }

    async fn upsert_template(&mut self, input: &NewTemplate) -> CatalogResult<Template> {
        let query = format!(
            "INSERT INTO templates \
                (template_id, template_version, title, lang, created, specialty, spec_code, \
                 views, downloads, description, author, firstname, lastname, data_type, \
                 template_data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (template_id) DO UPDATE SET \
                template_version = EXCLUDED.template_version, \
                title = EXCLUDED.title, \
                lang = EXCLUDED.lang, \
                created = EXCLUDED.created, \
                specialty = EXCLUDED.specialty, \
                spec_code = EXCLUDED.spec_code, \
                views = EXCLUDED.views, \
                downloads = EXCLUDED.downloads, \
                description = COALESCE(EXCLUDED.description, templates.description), \
                author = COALESCE(EXCLUDED.author, templates.author), \
                firstname = COALESCE(EXCLUDED.firstname, templates.firstname), \
                lastname = COALESCE(EXCLUDED.lastname, templates.lastname), \
                data_type = EXCLUDED.data_type, \
                template_data = COALESCE(EXCLUDED.template_data, templates.template_data), \
                updated_at = now() \
             RETURNING {TEMPLATE_COLUMNS}"
        );

        let mut savepoint = Acquire::begin(&mut self.tx).await?;
        let row = sqlx::query_as::<_, Template>(&query)
            .bind(&input.template_id)
            .bind(&input.template_version)
            .bind(&input.title)
            .bind(&input.lang)
            .bind(input.created)
            .bind(&input.specialty)
            .bind(&input.spec_code)
            .bind(input.views)
            .bind(input.downloads)
            .bind(&input.description)
            .bind(&input.author)
            .bind(&input.firstname)
            .bind(&input.lastname)
            .bind(&input.data_type)
            .bind(&input.template_data)
            .fetch_one(&mut *savepoint)
            .await?;
        savepoint.commit().await?;

        Ok(row)
    }

    async fn link(&mut self, subspecialty_id: i32, template_id: i32) -> CatalogResult<bool> {
        let mut savepoint = Acquire::begin(&mut self.tx).await?;
        let result = sqlx::query(
            r#"
            INSERT INTO subspecialty_templates (subspecialty_id, template_id)
            VALUES ($1, $2)
            ON CONFLICT (subspecialty_id, template_id) DO NOTHING
            "#,
        )
        .bind(subspecialty_id)
        .bind(template_id)
        .execute(&mut *savepoint)
        .await?;
        savepoint.commit().await?;

        Ok(result.rows_affected() == 1)
    }

    async fn recount(&mut self) -> CatalogResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subspecialties s
               SET count = (
                   SELECT COUNT(*)::int
                     FROM subspecialty_templates st
                    WHERE st.subspecialty_id = s.id
               )
            "#,
        )
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> CatalogResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
