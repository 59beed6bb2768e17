//! SQL text used by the loader, store and workers.
//!
//! Table names arrive unquoted from configuration and are quoted here.

use super::quote_ident;

/// Bind parameter limit of the PostgreSQL wire protocol.
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

pub const DISABLE_PARALLEL_GATHER: &str = "SET max_parallel_workers_per_gather = 0";

pub fn table_exists(table: &str) -> String {
    format!(
        "SELECT to_regclass('{}') IS NOT NULL",
        quote_ident(table).replace('\'', "''")
    )
}

/// Distinct node pairs of every origin/destination combination not yet in
/// the cost matrix.
pub fn pending_pairs(origins: &str, destinations: &str, cost_matrix: &str) -> String {
    format!(
        "SELECT DISTINCT o.node_id::bigint AS origin_node_id, d.node_id::bigint AS destination_node_id \
         FROM {o} o CROSS JOIN {d} d \
         WHERE o.node_id IS NOT NULL AND d.node_id IS NOT NULL \
         AND NOT EXISTS (\
           SELECT 1 FROM {m} m \
           WHERE m.origin_node_id = o.node_id AND m.destination_node_id = d.node_id) \
         ORDER BY 1, 2",
        o = quote_ident(origins),
        d = quote_ident(destinations),
        m = quote_ident(cost_matrix),
    )
}

/// Staging table shared by all worker sessions, hence unlogged rather than temporary.
pub fn create_staging(staging: &str) -> String {
    let s = quote_ident(staging);
    format!(
        "DROP TABLE IF EXISTS {s}; \
         CREATE UNLOGGED TABLE {s} (\
           origin_node_id bigint NOT NULL, \
           destination_node_id bigint NOT NULL, \
           chunk integer NOT NULL)",
        s = s
    )
}

pub fn index_staging(staging: &str) -> String {
    let s = quote_ident(staging);
    format!("CREATE INDEX ON {s} (chunk); ANALYZE {s}", s = s)
}

pub fn drop_staging(staging: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(staging))
}

pub fn chunk_pairs(staging: &str) -> String {
    format!(
        "SELECT origin_node_id, destination_node_id FROM {} WHERE chunk = $1",
        quote_ident(staging)
    )
}

/// Tiles containing at least one origin.
pub fn pending_tiles(tiles: &str, origins: &str) -> String {
    format!(
        "SELECT t.tile_id::bigint FROM {t} t \
         WHERE EXISTS (SELECT 1 FROM {o} o WHERE ST_Intersects(t.geom, o.geom)) \
         ORDER BY 1",
        t = quote_ident(tiles),
        o = quote_ident(origins),
    )
}

/// Pending pairs of one tile's origins. An origin on a shared tile edge
/// belongs to the lowest intersecting tile id.
pub fn tile_pairs(tiles: &str, origins: &str, destinations: &str, cost_matrix: &str) -> String {
    format!(
        "SELECT DISTINCT o.node_id::bigint, d.node_id::bigint \
         FROM {o} o CROSS JOIN {d} d \
         WHERE o.node_id IS NOT NULL AND d.node_id IS NOT NULL \
         AND (SELECT min(t.tile_id) FROM {t} t WHERE ST_Intersects(t.geom, o.geom)) = $1::bigint \
         AND NOT EXISTS (\
           SELECT 1 FROM {m} m \
           WHERE m.origin_node_id = o.node_id AND m.destination_node_id = d.node_id)",
        t = quote_ident(tiles),
        o = quote_ident(origins),
        d = quote_ident(destinations),
        m = quote_ident(cost_matrix),
    )
}

/// Multi-row insert of `rows` rows with `arity` columns each.
pub fn insert_rows(table: &str, arity: usize, rows: usize) -> String {
    let mut sql = format!("INSERT INTO {} VALUES ", quote_ident(table));
    let mut param = 1;
    for r in 0..rows {
        if r > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for c in 0..arity {
            if c > 0 {
                sql.push_str(", ");
            }
            sql.push('$');
            sql.push_str(&param.to_string());
            param += 1;
        }
        sql.push(')');
    }
    sql
}

/// Rows per insert statement, bounded by the bind parameter limit.
pub fn rows_per_statement(arity: usize, batch_rows: usize) -> usize {
    (MAX_BIND_PARAMS / arity.max(1)).min(batch_rows).max(1)
}

pub fn create_origins(table: &str, with_count: bool) -> String {
    let t = quote_ident(table);
    let count = if with_count { "count bigint, " } else { "" };
    format!(
        "DROP TABLE IF EXISTS {t}; \
         CREATE TABLE {t} (\
           origin_id integer PRIMARY KEY, \
           biomass double precision, \
           {count}\
           x double precision, \
           y double precision)",
        t = t,
        count = count
    )
}

pub fn create_destinations(table: &str, name_column: &str) -> String {
    let t = quote_ident(table);
    format!(
        "DROP TABLE IF EXISTS {t}; \
         CREATE TABLE {t} (\
           destination_id integer PRIMARY KEY, \
           {name} text, \
           x double precision, \
           y double precision)",
        t = t,
        name = quote_ident(name_column)
    )
}

pub fn copy_csv_in(table: &str) -> String {
    format!("COPY {} FROM STDIN WITH (FORMAT csv, HEADER true)", quote_ident(table))
}

/// Replace x/y columns with an indexed point geometry in `target_srid`.
pub fn add_point_geometry(table: &str, source_srid: i32, target_srid: i32) -> String {
    let t = quote_ident(table);
    format!(
        "ALTER TABLE {t} ADD COLUMN geom geometry(Point, {target}); \
         UPDATE {t} SET geom = ST_Transform(ST_SetSRID(ST_Point(x, y), {source}), {target}); \
         ALTER TABLE {t} DROP COLUMN x; \
         ALTER TABLE {t} DROP COLUMN y; \
         CREATE INDEX ON {t} USING GIST (geom)",
        t = t,
        source = source_srid,
        target = target_srid
    )
}

/// Set `node_id` to the id of the closest network vertex.
pub fn add_nearest_node(table: &str, vertices: &str, vertex_id: &str, vertex_geom: &str) -> String {
    let t = quote_ident(table);
    format!(
        "ALTER TABLE {t} ADD COLUMN IF NOT EXISTS node_id bigint; \
         UPDATE {t} AS p SET node_id = (\
           SELECT v.{id} FROM {v} v ORDER BY v.{geom} <-> p.geom LIMIT 1); \
         CREATE INDEX ON {t} (node_id)",
        t = t,
        v = quote_ident(vertices),
        id = quote_ident(vertex_id),
        geom = quote_ident(vertex_geom),
    )
}

pub fn add_topology_columns(table: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS source integer, \
         ADD COLUMN IF NOT EXISTS target integer",
        quote_ident(table)
    )
}

pub fn create_topology() -> &'static str {
    "SELECT pgr_createTopology($1, $2::float8, $3, $4)"
}

/// Default report: the whole cost matrix.
pub fn report(cost_matrix: &str) -> String {
    format!("SELECT * FROM {} ORDER BY 1, 2", quote_ident(cost_matrix))
}

pub fn copy_csv_out(query: &str) -> String {
    format!(
        "COPY ({}) TO STDOUT WITH CSV HEADER",
        query.trim().trim_end_matches(';')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_rows_numbering() {
        assert_eq!(
            insert_rows("public.m", 3, 2),
            "INSERT INTO \"public\".\"m\" VALUES ($1, $2, $3), ($4, $5, $6)"
        );
    }

    #[test]
    fn test_rows_per_statement() {
        assert_eq!(rows_per_statement(14, 1000), 1000);
        assert_eq!(rows_per_statement(14, 100_000), 65535 / 14);
        assert_eq!(rows_per_statement(70_000, 10), 1);
    }

    #[test]
    fn test_copy_out_strips_terminator() {
        assert_eq!(
            copy_csv_out("SELECT * FROM t;\n"),
            "COPY (SELECT * FROM t) TO STDOUT WITH CSV HEADER"
        );
    }

    #[test]
    fn test_pending_pairs_quotes_tables() {
        let sql = pending_pairs("origins", "destinations", "public.cost");
        assert!(sql.contains("FROM \"origins\" o CROSS JOIN \"destinations\" d"));
        assert!(sql.contains("\"public\".\"cost\" m"));
    }
}
