//! PostgreSQL implementations of the routing traits.

use super::{
    pair_parameters, statements, ConnectionFactory, CostMatrixStore, Database, RoutingQuery,
    WorkerConnection,
};
use crate::config::Config;
use crate::pipeline::partition::Chunk;
use crate::pipeline::types::{CostRow, CostValue, OdPair, WorkUnit};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{CancelToken, Client, NoTls, Row, Statement};

/// Table names the routing stage reads and writes.
#[derive(Debug, Clone)]
pub struct RoutingTables {
    pub origins: String,
    pub destinations: String,
    pub cost_matrix: String,
    pub staging: String,
    pub tiles: String,
}

impl RoutingTables {
    pub fn from_config(config: &Config) -> Self {
        let routing = &config.routing;
        Self {
            origins: routing.origins_table.clone(),
            destinations: routing.destinations_table.clone(),
            cost_matrix: routing.cost_matrix_table.clone(),
            staging: routing.staging_table.clone(),
            tiles: routing.tiles_table.clone(),
        }
    }
}

/// Opens one fresh connection per call and prepares the routing statement on it.
pub struct PgConnectionFactory {
    database: Database,
    routing_sql: Arc<str>,
    chunk_pairs_sql: Arc<str>,
    tile_pairs_sql: Arc<str>,
}

impl PgConnectionFactory {
    pub fn new(database: Database, routing_sql: String, tables: &RoutingTables) -> Self {
        Self {
            database,
            routing_sql: routing_sql.into(),
            chunk_pairs_sql: statements::chunk_pairs(&tables.staging).into(),
            tile_pairs_sql: statements::tile_pairs(
                &tables.tiles,
                &tables.origins,
                &tables.destinations,
                &tables.cost_matrix,
            )
            .into(),
        }
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn WorkerConnection>> {
        let client = self.database.connect().await?;
        let routing = client
            .prepare(&self.routing_sql)
            .await
            .context("Failed to prepare routing query")?;
        tracing::debug!(
            "Worker connection open, routing query takes {} parameter(s)",
            routing.params().len()
        );
        Ok(Box::new(PgWorkerConnection {
            cancel: client.cancel_token(),
            client,
            routing,
            chunk_pairs_sql: self.chunk_pairs_sql.clone(),
            tile_pairs_sql: self.tile_pairs_sql.clone(),
        }))
    }
}

struct PgWorkerConnection {
    client: Client,
    cancel: CancelToken,
    routing: Statement,
    chunk_pairs_sql: Arc<str>,
    tile_pairs_sql: Arc<str>,
}

#[async_trait]
impl RoutingQuery for PgWorkerConnection {
    async fn execute(&mut self, pair: OdPair) -> Result<Vec<CostRow>> {
        let params = pair_parameters(pair, self.routing.params().len());
        let rows = self
            .client
            .query(&self.routing, &as_params(&params))
            .await
            .with_context(|| format!("Routing query failed for pair {}", pair))?;
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait]
impl WorkerConnection for PgWorkerConnection {
    async fn disable_parallel_query(&mut self) -> Result<()> {
        self.client
            .batch_execute(statements::DISABLE_PARALLEL_GATHER)
            .await
            .context("Failed to disable parallel query")
    }

    async fn assigned_pairs(&mut self, unit: WorkUnit) -> Result<Vec<OdPair>> {
        let rows = match unit {
            WorkUnit::Chunk(id) => {
                let id = i32::try_from(id).context("Chunk id out of range")?;
                self.client.query(&*self.chunk_pairs_sql, &[&id]).await
            }
            WorkUnit::Tile(id) => self.client.query(&*self.tile_pairs_sql, &[&id]).await,
        }
        .with_context(|| format!("Failed to fetch pairs for {}", unit))?;

        rows.iter()
            .map(|row| Ok(OdPair::new(row.try_get(0)?, row.try_get(1)?)))
            .collect()
    }

    async fn cancel_query(&mut self) -> Result<()> {
        self.cancel
            .cancel_query(NoTls)
            .await
            .context("Failed to send cancel request")
    }
}

/// Orchestrator connection to the cost matrix.
pub struct PgCostMatrixStore {
    client: Mutex<Client>,
    tables: RoutingTables,
    cost_matrix_ddl: PathBuf,
    insert_batch_rows: usize,
}

impl PgCostMatrixStore {
    pub async fn connect(database: &Database, config: &Config) -> Result<Self> {
        let client = database.connect().await?;
        Ok(Self {
            client: Mutex::new(client),
            tables: RoutingTables::from_config(config),
            cost_matrix_ddl: config.routing.cost_matrix_ddl.clone(),
            insert_batch_rows: config.routing.insert_batch_rows,
        })
    }
}

#[async_trait]
impl CostMatrixStore for PgCostMatrixStore {
    async fn ensure_output_table(&self) -> Result<bool> {
        let client = self.client.lock().await;
        let exists: bool = client
            .query_one(&statements::table_exists(&self.tables.cost_matrix), &[])
            .await
            .context("Failed to look up cost matrix table")?
            .try_get(0)?;
        if exists {
            return Ok(false);
        }

        tracing::info!("Creating output table {}", self.tables.cost_matrix);
        let ddl = std::fs::read_to_string(&self.cost_matrix_ddl).with_context(|| {
            format!(
                "Cost matrix table {} is missing and its DDL file {} cannot be read",
                self.tables.cost_matrix,
                self.cost_matrix_ddl.display()
            )
        })?;
        client
            .batch_execute(&ddl)
            .await
            .context("Failed to create cost matrix table")?;
        Ok(true)
    }

    async fn pending_pairs(&self) -> Result<Vec<OdPair>> {
        let sql = statements::pending_pairs(
            &self.tables.origins,
            &self.tables.destinations,
            &self.tables.cost_matrix,
        );
        let client = self.client.lock().await;
        let rows = client
            .query(&sql, &[])
            .await
            .context("Failed to find pending origin-destination pairs")?;
        rows.iter()
            .map(|row| Ok(OdPair::new(row.try_get(0)?, row.try_get(1)?)))
            .collect()
    }

    async fn stage_chunks(&self, chunks: &[Chunk]) -> Result<u64> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        tx.batch_execute(&statements::create_staging(&self.tables.staging))
            .await
            .context("Failed to create staging table")?;

        let assignments: Vec<[CostValue; 3]> = chunks
            .iter()
            .flat_map(|chunk| {
                chunk.pairs.iter().map(move |pair| {
                    [
                        CostValue::Int(pair.origin_node_id),
                        CostValue::Int(pair.destination_node_id),
                        CostValue::Int(chunk.id as i64),
                    ]
                })
            })
            .collect();

        let per_statement = statements::rows_per_statement(3, usize::MAX);
        let mut staged = 0;
        for batch in assignments.chunks(per_statement) {
            let sql = statements::insert_rows(&self.tables.staging, 3, batch.len());
            let params: Vec<&(dyn ToSql + Sync)> = batch
                .iter()
                .flatten()
                .map(|v| v as &(dyn ToSql + Sync))
                .collect();
            staged += tx
                .execute(&sql, &params)
                .await
                .context("Failed to stage chunk assignment")?;
        }

        tx.batch_execute(&statements::index_staging(&self.tables.staging))
            .await?;
        tx.commit().await.context("Failed to commit staging table")?;
        Ok(staged)
    }

    async fn pending_tiles(&self) -> Result<Vec<i64>> {
        let sql = statements::pending_tiles(&self.tables.tiles, &self.tables.origins);
        let client = self.client.lock().await;
        let rows = client
            .query(&sql, &[])
            .await
            .with_context(|| format!("Failed to list tiles from {}", self.tables.tiles))?;
        rows.iter().map(|row| Ok(row.try_get(0)?)).collect()
    }

    async fn insert_rows(&self, rows: &[CostRow]) -> Result<u64> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };
        let arity = first.arity();
        let per_statement = statements::rows_per_statement(arity, self.insert_batch_rows);

        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        let mut inserted = 0;
        for batch in rows.chunks(per_statement) {
            let values: Vec<CostValue> = batch.iter().flat_map(CostRow::values).collect();
            let sql = statements::insert_rows(&self.tables.cost_matrix, arity, batch.len());
            inserted += tx
                .execute(&sql, &as_params(&values))
                .await
                .with_context(|| {
                    format!("Failed to insert into {}", self.tables.cost_matrix)
                })?;
        }
        // Dropping `tx` on an error above rolls the whole load back
        tx.commit().await.context("Failed to commit cost matrix insert")?;
        Ok(inserted)
    }

    async fn drop_staging(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .batch_execute(&statements::drop_staging(&self.tables.staging))
            .await
            .context("Failed to drop staging table")
    }
}

fn as_params(values: &[CostValue]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

/// Decode a routing result row; the first two columns are the pair's node ids.
fn decode_row(row: &Row) -> Result<CostRow> {
    if row.len() < 2 {
        anyhow::bail!(
            "Routing query returned {} column(s), expected origin and destination node ids first",
            row.len()
        );
    }
    let mut values = (0..row.len())
        .map(|idx| decode_value(row, idx))
        .collect::<Result<Vec<_>>>()?
        .into_iter();

    let mut node_id = |name: &str| -> Result<i64> {
        match values.next() {
            Some(CostValue::Int(id)) => Ok(id),
            other => anyhow::bail!(
                "Routing result column {} must be an integer, got {:?}",
                name,
                other
            ),
        }
    };
    let origin_node_id = node_id("origin_node_id")?;
    let destination_node_id = node_id("destination_node_id")?;

    Ok(CostRow {
        origin_node_id,
        destination_node_id,
        costs: values.collect(),
    })
}

fn decode_value(row: &Row, idx: usize) -> Result<CostValue> {
    let column = &row.columns()[idx];
    let ty = column.type_();
    let value = if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.map(|v| CostValue::Int(v.into()))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.map(|v| CostValue::Int(v.into()))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(CostValue::Int)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.map(|v| CostValue::Float(v.into()))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(CostValue::Float)
    } else if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(CostValue::Bool)
    } else if <&str as tokio_postgres::types::FromSql>::accepts(ty) {
        row.try_get::<_, Option<String>>(idx)?.map(CostValue::Text)
    } else {
        anyhow::bail!(
            "Unsupported type {} for routing result column {}; cast it to float8, bigint or text",
            ty,
            column.name()
        );
    };
    Ok(value.unwrap_or(CostValue::Null))
}

impl ToSql for CostValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            CostValue::Null => Ok(IsNull::Yes),
            CostValue::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    v.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else {
                    Err(format!("cannot bind an integer to a {} column", ty).into())
                }
            }
            CostValue::Float(v) => {
                if *ty == Type::FLOAT8 {
                    v.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    Err(format!("cannot bind a float to a {} column", ty).into())
                }
            }
            CostValue::Bool(v) => {
                if *ty == Type::BOOL {
                    v.to_sql(ty, out)
                } else {
                    Err(format!("cannot bind a boolean to a {} column", ty).into())
                }
            }
            CostValue::Text(v) => {
                if <&str as ToSql>::accepts(ty) {
                    v.as_str().to_sql(ty, out)
                } else {
                    Err(format!("cannot bind text to a {} column", ty).into())
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
