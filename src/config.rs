//! Configuration for origin extraction and OD routing.

use crate::io::OriginSchema;
use crate::pipeline::PartitionStrategy;
use crate::raster::PixelAnchor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database connection and geometry settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Raster to origin extraction
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Cost matrix routing
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Progress reporting
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection url; `DATABASE_URL` or `--db-url` when unset
    #[serde(default)]
    pub url: Option<String>,

    /// SRID of input CSV coordinates
    #[serde(default = "default_source_srid")]
    pub source_srid: i32,

    /// SRID of stored geometries
    #[serde(default = "default_target_srid")]
    pub target_srid: i32,

    /// Edge table created by `build-network`
    #[serde(default = "default_network_table")]
    pub network_table: String,

    /// Vertex table used for nearest-node lookup
    #[serde(default = "default_vertex_table")]
    pub vertex_table: String,

    #[serde(default = "default_vertex_id_column")]
    pub vertex_id_column: String,

    #[serde(default = "default_vertex_geom_column")]
    pub vertex_geom_column: String,

    /// Snapping tolerance for topology building, in target SRID units
    #[serde(default = "default_topology_tolerance")]
    pub topology_tolerance: f64,

    /// ogr2ogr executable
    #[serde(default = "default_ogr2ogr")]
    pub ogr2ogr: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            source_srid: default_source_srid(),
            target_srid: default_target_srid(),
            network_table: default_network_table(),
            vertex_table: default_vertex_table(),
            vertex_id_column: default_vertex_id_column(),
            vertex_geom_column: default_vertex_geom_column(),
            topology_tolerance: default_topology_tolerance(),
            ogr2ogr: default_ogr2ogr(),
        }
    }
}

/// Origin extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Cells strictly above this value are foreground
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Where in a cell projected centroids are anchored
    #[serde(default)]
    pub pixel_anchor: PixelAnchor,

    /// Origins CSV header version
    #[serde(default)]
    pub schema: OriginSchema,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            pixel_anchor: PixelAnchor::default(),
            schema: OriginSchema::default(),
        }
    }
}

/// Routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Number of workers, each holding its own connection
    #[serde(default = "default_n_processes")]
    pub n_processes: usize,

    #[serde(default)]
    pub strategy: PartitionStrategy,

    /// Routing statement; `$1..$n` are bound to (o, d, o, d, ...)
    #[serde(default = "default_routing_sql")]
    pub routing_sql: PathBuf,

    /// DDL run when the cost matrix table is missing
    #[serde(default = "default_cost_matrix_ddl")]
    pub cost_matrix_ddl: PathBuf,

    /// Query exported by `export-matrix`; defaults to the whole cost matrix
    #[serde(default)]
    pub report_sql: Option<PathBuf>,

    #[serde(default = "default_origins_table")]
    pub origins_table: String,

    #[serde(default = "default_destinations_table")]
    pub destinations_table: String,

    #[serde(default = "default_cost_matrix_table")]
    pub cost_matrix_table: String,

    #[serde(default = "default_staging_table")]
    pub staging_table: String,

    /// Tile polygons used by the `tiles` strategy
    #[serde(default = "default_tiles_table")]
    pub tiles_table: String,

    /// Deadline per unit attempt in seconds
    #[serde(default)]
    pub chunk_timeout_secs: Option<u64>,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Rows per INSERT statement (capped by the bind parameter limit)
    #[serde(default = "default_insert_batch_rows")]
    pub insert_batch_rows: usize,

    /// Also write inserted rows to this CSV
    #[serde(default)]
    pub output_csv: Option<PathBuf>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            n_processes: default_n_processes(),
            strategy: PartitionStrategy::default(),
            routing_sql: default_routing_sql(),
            cost_matrix_ddl: default_cost_matrix_ddl(),
            report_sql: None,
            origins_table: default_origins_table(),
            destinations_table: default_destinations_table(),
            cost_matrix_table: default_cost_matrix_table(),
            staging_table: default_staging_table(),
            tiles_table: default_tiles_table(),
            chunk_timeout_secs: None,
            retry: RetryConfig::default(),
            insert_batch_rows: default_insert_batch_rows(),
            output_csv: None,
        }
    }
}

/// Retry configuration for failed units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per unit, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub output_path: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable: true,
            interval_secs: default_metrics_interval(),
            output_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The configured database url, required by every database command.
    pub fn database_url(&self) -> anyhow::Result<&str> {
        match self.database.url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => anyhow::bail!("No database url: set DATABASE_URL, pass --db-url, or set database.url"),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let threshold = self.extraction.threshold;
        if !threshold.is_finite() {
            anyhow::bail!("Extraction threshold must be finite, got {}", threshold);
        }
        if self.database.source_srid <= 0 || self.database.target_srid <= 0 {
            anyhow::bail!("SRIDs must be positive");
        }
        if self.database.topology_tolerance < 0.0 {
            anyhow::bail!("Topology tolerance must be >= 0");
        }
        if self.routing.n_processes == 0 {
            anyhow::bail!("n_processes must be > 0");
        }
        if self.routing.insert_batch_rows == 0 {
            anyhow::bail!("insert_batch_rows must be > 0");
        }
        if self.routing.chunk_timeout_secs == Some(0) {
            anyhow::bail!("chunk_timeout_secs must be > 0 when set");
        }
        if self.routing.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be >= 1");
        }
        if self.routing.retry.initial_backoff_ms > self.routing.retry.max_backoff_ms {
            anyhow::bail!("retry.initial_backoff_ms must not exceed retry.max_backoff_ms");
        }
        if self.metrics.interval_secs == 0 {
            anyhow::bail!("Metrics interval must be > 0");
        }
        let tables = [
            &self.routing.origins_table,
            &self.routing.destinations_table,
            &self.routing.cost_matrix_table,
            &self.routing.staging_table,
            &self.routing.tiles_table,
            &self.database.network_table,
            &self.database.vertex_table,
        ];
        if let Some(empty) = tables.iter().find(|t| t.trim().is_empty()) {
            anyhow::bail!("Table names must not be empty (got {:?})", empty);
        }
        if self.routing.staging_table == self.routing.cost_matrix_table {
            anyhow::bail!("Staging table must differ from the cost matrix table");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_source_srid() -> i32 { 4326 }
fn default_target_srid() -> i32 { 3005 }
fn default_network_table() -> String { "ways".to_string() }
fn default_vertex_table() -> String { "ways_vertices_pgr".to_string() }
fn default_vertex_id_column() -> String { "id".to_string() }
fn default_vertex_geom_column() -> String { "the_geom".to_string() }
fn default_topology_tolerance() -> f64 { 0.001 }
fn default_ogr2ogr() -> String { "ogr2ogr".to_string() }
fn default_threshold() -> f64 { 1.0 }
fn default_n_processes() -> usize { 1 }
fn default_routing_sql() -> PathBuf { PathBuf::from("sql/routing.sql") }
fn default_cost_matrix_ddl() -> PathBuf { PathBuf::from("sql/create_origin_destination_cost_matrix.sql") }
fn default_origins_table() -> String { "origins".to_string() }
fn default_destinations_table() -> String { "destinations".to_string() }
fn default_cost_matrix_table() -> String { "public.origin_destination_cost_matrix".to_string() }
fn default_staging_table() -> String { "temp_origin_destinations".to_string() }
fn default_tiles_table() -> String { "tiles".to_string() }
fn default_insert_batch_rows() -> usize { 1000 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 10000 }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
