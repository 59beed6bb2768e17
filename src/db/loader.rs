//! Loading origins, destinations and the road network, and exporting the
//! cost matrix.

use super::{statements, Database};
use crate::config::Config;
use crate::io::{read_csv_header, DestinationHeader, OriginSchema};
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{pin_mut, SinkExt, TryStreamExt};
use std::io::Write;
use std::path::Path;
use tokio_postgres::Client;

/// Load an origins CSV into the origins table, add geometry and nearest node ids.
pub async fn load_origins(config: &Config, database: &Database, csv_path: &Path) -> Result<u64> {
    let schema = OriginSchema::detect(&read_csv_header(csv_path)?)?;
    let table = &config.routing.origins_table;
    tracing::info!("Loading {:?} origins from {} into {}", schema, csv_path.display(), table);

    let client = database.connect().await?;
    client
        .batch_execute(&statements::create_origins(table, schema == OriginSchema::V2))
        .await
        .with_context(|| format!("Failed to create {}", table))?;

    let rows = copy_csv(&client, table, csv_path).await?;
    finish_point_table(&client, config, table).await?;
    tracing::info!("Loaded {} origins", rows);
    Ok(rows)
}

/// Load a destinations CSV into the destinations table, add geometry and nearest node ids.
pub async fn load_destinations(
    config: &Config,
    database: &Database,
    csv_path: &Path,
) -> Result<u64> {
    let header = DestinationHeader::detect(&read_csv_header(csv_path)?)?;
    let table = &config.routing.destinations_table;
    tracing::info!("Loading destinations from {} into {}", csv_path.display(), table);

    let client = database.connect().await?;
    client
        .batch_execute(&statements::create_destinations(table, header.name_column()))
        .await
        .with_context(|| format!("Failed to create {}", table))?;

    let rows = copy_csv(&client, table, csv_path).await?;
    finish_point_table(&client, config, table).await?;
    tracing::info!("Loaded {} destinations", rows);
    Ok(rows)
}

async fn copy_csv(client: &Client, table: &str, csv_path: &Path) -> Result<u64> {
    let data = tokio::fs::read(csv_path)
        .await
        .with_context(|| format!("Cannot read {}", csv_path.display()))?;

    let sink = client
        .copy_in(&statements::copy_csv_in(table))
        .await
        .with_context(|| format!("Failed to start COPY into {}", table))?;
    pin_mut!(sink);
    sink.send(Bytes::from(data))
        .await
        .with_context(|| format!("Failed to COPY {} into {}", csv_path.display(), table))?;
    let rows = sink
        .finish()
        .await
        .with_context(|| format!("Failed to finish COPY into {}", table))?;
    Ok(rows)
}

async fn finish_point_table(client: &Client, config: &Config, table: &str) -> Result<()> {
    let db = &config.database;
    client
        .batch_execute(&statements::add_point_geometry(table, db.source_srid, db.target_srid))
        .await
        .with_context(|| format!("Failed to build geometry for {}", table))?;

    tracing::info!("Matching {} to nearest vertex of {}", table, db.vertex_table);
    client
        .batch_execute(&statements::add_nearest_node(
            table,
            &db.vertex_table,
            &db.vertex_id_column,
            &db.vertex_geom_column,
        ))
        .await
        .with_context(|| format!("Failed to add nearest node ids to {}", table))?;
    Ok(())
}

/// Import a vector road layer with ogr2ogr and build its routing topology.
pub async fn build_network(config: &Config, database: &Database, source: &Path) -> Result<()> {
    let db = &config.database;
    if !source.exists() {
        anyhow::bail!("Network source {} does not exist", source.display());
    }

    tracing::info!("Importing {} into {}", source.display(), db.network_table);
    let status = tokio::process::Command::new(&db.ogr2ogr)
        .args(ogr2ogr_args(config, database, source))
        .status()
        .await
        .with_context(|| format!("Failed to run {}", db.ogr2ogr))?;
    if !status.success() {
        anyhow::bail!("{} exited with {}", db.ogr2ogr, status);
    }

    let client = database.connect().await?;
    client
        .batch_execute(&statements::add_topology_columns(&db.network_table))
        .await
        .context("Failed to add topology columns")?;

    tracing::info!(
        "Building topology on {} (tolerance {})",
        db.network_table,
        db.topology_tolerance
    );
    let row = client
        .query_one(
            statements::create_topology(),
            &[
                &db.network_table,
                &db.topology_tolerance,
                &db.vertex_geom_column,
                &db.vertex_id_column,
            ],
        )
        .await
        .context("pgr_createTopology failed")?;
    let result: String = row.try_get(0)?;
    if result != "OK" {
        anyhow::bail!("pgr_createTopology returned {}", result);
    }
    Ok(())
}

fn ogr2ogr_args(config: &Config, database: &Database, source: &Path) -> Vec<String> {
    let db = &config.database;
    vec![
        "-f".to_string(),
        "PostgreSQL".to_string(),
        database.ogr_datasource(),
        source.display().to_string(),
        "-nln".to_string(),
        db.network_table.clone(),
        "-t_srs".to_string(),
        format!("EPSG:{}", db.target_srid),
        "-lco".to_string(),
        format!("GEOMETRY_NAME={}", db.vertex_geom_column),
        "-lco".to_string(),
        format!("FID={}", db.vertex_id_column),
        "-explodecollections".to_string(),
        "-nlt".to_string(),
        "LINESTRING".to_string(),
        "-overwrite".to_string(),
    ]
}

/// Dump the report query (default: the whole cost matrix) to a CSV with header.
pub async fn export_matrix(config: &Config, database: &Database, out_csv: &Path) -> Result<u64> {
    let query = match &config.routing.report_sql {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read report query {}", path.display()))?,
        None => statements::report(&config.routing.cost_matrix_table),
    };

    tracing::info!("Dumping results to file {}", out_csv.display());
    let client = database.connect().await?;
    let stream = client
        .copy_out(&statements::copy_csv_out(&query))
        .await
        .context("Failed to start export")?;
    pin_mut!(stream);

    let file = std::fs::File::create(out_csv)
        .with_context(|| format!("Cannot create {}", out_csv.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    let mut bytes = 0u64;
    while let Some(chunk) = stream.try_next().await.context("Export stream failed")? {
        writer.write_all(&chunk)?;
        bytes += chunk.len() as u64;
    }
    writer.flush()?;
    tracing::info!("Wrote {} bytes to {}", bytes, out_csv.display());
    Ok(bytes)
}
