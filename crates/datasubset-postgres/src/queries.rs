use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{PgPool, Row};

use datasubset_core::Result;

use crate::db_error;
use crate::sql::ColumnInfo;

pub struct RawTable {
    pub schema: String,
    pub name: String,
}

/// Regular and partitioned tables of `schemas`. Partitions and system
/// schemas are excluded.
pub async fn list_tables(pool: &PgPool, schemas: &[String]) -> Result<Vec<RawTable>> {
    let rows = sqlx::query(
        r#"
        select
          n.nspname::text as schema_name,
          c.relname::text as table_name
        from pg_class c
        join pg_namespace n on n.oid = c.relnamespace
        where c.relkind in ('r','p')
          and not c.relispartition
          and n.nspname <> 'information_schema'
          and n.nspname not like 'pg\_%'
          and n.nspname = any($1)
        order by n.nspname, c.relname
        "#,
    )
    .bind(schemas.to_vec())
    .fetch_all(pool)
    .await
    .map_err(db_error)?;

    rows.iter()
        .map(|row| {
            Ok(RawTable {
                schema: text(row, "schema_name")?,
                name: text(row, "table_name")?,
            })
        })
        .collect()
}

pub struct RawPrimaryKey {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
}

/// Primary keys of every table in `schemas`, columns in key order.
pub async fn list_primary_keys(pool: &PgPool, schemas: &[String]) -> Result<Vec<RawPrimaryKey>> {
    let rows = sqlx::query(
        r#"
        select
          nsp.nspname::text as schema_name,
          rel.relname::text as table_name,
          array_agg(att.attname::text order by ord.ordinality) as columns
        from pg_constraint con
        join pg_class rel on rel.oid = con.conrelid
        join pg_namespace nsp on nsp.oid = rel.relnamespace
        join unnest(con.conkey) with ordinality as ord(attnum, ordinality) on true
        join pg_attribute att on att.attrelid = rel.oid and att.attnum = ord.attnum
        where nsp.nspname = any($1)
          and con.contype = 'p'
        group by nsp.nspname, rel.relname, con.conname
        "#,
    )
    .bind(schemas.to_vec())
    .fetch_all(pool)
    .await
    .map_err(db_error)?;

    rows.iter()
        .map(|row| {
            Ok(RawPrimaryKey {
                schema: text(row, "schema_name")?,
                table: text(row, "table_name")?,
                columns: row.try_get("columns").map_err(db_error)?,
            })
        })
        .collect()
}

pub struct RawForeignKey {
    pub name: String,
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

/// Foreign keys declared by tables of `schemas`. Source and referenced
/// columns are paired by key position.
pub async fn list_foreign_keys(pool: &PgPool, schemas: &[String]) -> Result<Vec<RawForeignKey>> {
    let rows = sqlx::query(
        r#"
        select
          con.conname::text as name,
          src_nsp.nspname::text as schema_name,
          src_rel.relname::text as table_name,
          array_agg(src_att.attname::text order by k.ordinality) as columns,
          ref_nsp.nspname::text as referenced_schema,
          ref_rel.relname::text as referenced_table,
          array_agg(ref_att.attname::text order by k.ordinality) as referenced_columns
        from pg_constraint con
        join pg_class src_rel on src_rel.oid = con.conrelid
        join pg_namespace src_nsp on src_nsp.oid = src_rel.relnamespace
        join pg_class ref_rel on ref_rel.oid = con.confrelid
        join pg_namespace ref_nsp on ref_nsp.oid = ref_rel.relnamespace
        join unnest(con.conkey, con.confkey)
          with ordinality as k(src_attnum, ref_attnum, ordinality) on true
        join pg_attribute src_att
          on src_att.attrelid = src_rel.oid and src_att.attnum = k.src_attnum
        join pg_attribute ref_att
          on ref_att.attrelid = ref_rel.oid and ref_att.attnum = k.ref_attnum
        where src_nsp.nspname = any($1)
          and con.contype = 'f'
          and not src_rel.relispartition
        group by con.conname, src_nsp.nspname, src_rel.relname, ref_nsp.nspname, ref_rel.relname
        order by src_nsp.nspname, src_rel.relname, con.conname
        "#,
    )
    .bind(schemas.to_vec())
    .fetch_all(pool)
    .await
    .map_err(db_error)?;

    rows.iter()
        .map(|row| {
            Ok(RawForeignKey {
                name: text(row, "name")?,
                schema: text(row, "schema_name")?,
                table: text(row, "table_name")?,
                columns: row.try_get("columns").map_err(db_error)?,
                referenced_schema: text(row, "referenced_schema")?,
                referenced_table: text(row, "referenced_table")?,
                referenced_columns: row.try_get("referenced_columns").map_err(db_error)?,
            })
        })
        .collect()
}

/// Insertable columns of one table in ordinal order. Generated columns are
/// left out.
pub async fn list_columns(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query(
        r#"
        select
          a.attname::text as name,
          t.typname::text as type_name,
          format_type(a.atttypid, a.atttypmod) as sql_type
        from pg_attribute a
        join pg_class c on c.oid = a.attrelid
        join pg_namespace n on n.oid = c.relnamespace
        join pg_type t on t.oid = a.atttypid
        where n.nspname = $1
          and c.relname = $2
          and a.attnum > 0
          and not a.attisdropped
          and a.attgenerated = ''
        order by a.attnum
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    rows.iter()
        .map(|row| {
            Ok(ColumnInfo {
                name: text(row, "name")?,
                type_name: text(row, "type_name")?,
                sql_type: text(row, "sql_type")?,
            })
        })
        .collect()
}

fn text(row: &PgRow, column: &str) -> Result<String> {
    row.try_get(column).map_err(db_error)
}
