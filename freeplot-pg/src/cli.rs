//! Définition et implémentation des commandes CLI
//!
//! - `run` : base moins exclusions -> nouvelle version
//! - `shapes` / `versions` : consultation et annotations
//! - `preview` : aperçu GeoJSON d'une couche de référence
//! - `artifacts` : fichiers produits par les runs
//! - `init-db` : création du schéma

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tracing::info;

use freeplot_pg::export::pool::{create_pool, test_connection, DatabaseConfig};
use freeplot_pg::export::{list_artifacts, read_artifact};
use freeplot_pg::preview::preview_layer;
use freeplot_pg::versioning::{MemoryShapeStore, PgShapeStore, Shape, ShapeFilter, ShapeStore};
use freeplot_pg::{Config, Orchestrator};

#[derive(Subcommand)]
pub enum Commands {
    /// Compute the free-plot remainder and commit it as a new version
    Run {
        /// Base layer (registry key or path). Default: the configured base
        #[arg(short, long)]
        base: Option<String>,

        /// Exclusion layer, in application order (repeatable). Default: the configured list
        #[arg(short = 'x', long = "exclude")]
        exclusions: Vec<String>,

        /// Keep versions in memory instead of PostgreSQL
        #[arg(long)]
        memory: bool,

        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Query and annotate shapes
    Shapes {
        #[command(subcommand)]
        action: ShapeCommand,
    },

    /// List committed versions
    Versions,

    /// Reproject a reference layer and write a colored GeoJSON preview
    Preview {
        /// Layer registry key or path
        #[arg(short, long)]
        layer: String,

        /// Attribute used for the color categories (default: the registry column)
        #[arg(short, long)]
        column: Option<String>,

        /// Output GeoJSON file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Files written by previous runs
    Artifacts {
        #[command(subcommand)]
        action: ArtifactCommand,
    },

    /// Create the PostGIS schema
    InitDb {
        /// Drop the schema first
        #[arg(long)]
        drop: bool,
    },
}

#[derive(Subcommand)]
pub enum ShapeCommand {
    /// List shapes (latest version first)
    List {
        #[arg(long)]
        favorites: bool,
        #[arg(long)]
        version: Option<i32>,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show one shape (latest version of its lineage by default)
    Get {
        id: i64,
        #[arg(long)]
        version: Option<i32>,
    },
    /// Set or clear the favorite flag
    Favorite {
        id: i64,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
    /// Replace the comment
    Comment { id: i64, text: String },
    /// Replace the AI review text
    AiComment { id: i64, text: String },
    /// All shapes of a version
    Version { version: i32 },
}

#[derive(Subcommand)]
pub enum ArtifactCommand {
    /// List files in the output directory
    List,
    /// Print an artifact, or copy it to a file
    Show {
        name: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Connexion PostgreSQL (défauts : variables PG*)
#[derive(Args, Clone, Default)]
pub struct DbArgs {
    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// PostgreSQL database name (défaut : env PGDATABASE / freeplot)
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long, global = true)]
    pub ssl: Option<String>,

    /// Target schema (défaut : env FREEPLOT_SCHEMA / freeplot)
    #[arg(long, global = true)]
    pub schema: Option<String>,
}

/// Charge la configuration : preset embarqué ou fichier JSON, puis variables d'environnement
pub fn load_config(spec: &str) -> Result<Config> {
    Config::resolve(spec)?.with_env_overrides()
}

pub async fn execute(command: Commands, config: Config, db: DbArgs) -> Result<()> {
    match command {
        Commands::Run {
            base,
            exclusions,
            memory,
            report,
        } => cmd_run(config, &db, base, exclusions, memory, report.as_deref()).await,
        Commands::Shapes { action } => {
            let store = open_store(&config, &db).await?;
            cmd_shapes(store.as_ref(), action).await
        }
        Commands::Versions => {
            let store = open_store(&config, &db).await?;
            cmd_versions(store.as_ref()).await
        }
        Commands::Preview {
            layer,
            column,
            output,
        } => cmd_preview(&config, &layer, column, &output),
        Commands::Artifacts { action } => cmd_artifacts(&config.output_dir, action),
        Commands::InitDb { drop } => cmd_init_db(&config, &db, drop).await,
    }
}

/// Exécute un run
async fn cmd_run(
    config: Config,
    db: &DbArgs,
    base: Option<String>,
    exclusions: Vec<String>,
    memory: bool,
    report: Option<&Path>,
) -> Result<()> {
    let store: Arc<dyn ShapeStore> = if memory {
        Arc::new(MemoryShapeStore::with_lineage(config.lineage))
    } else {
        open_store(&config, db).await?
    };

    let base_key = base.unwrap_or_else(|| config.solution.base.clone());
    let exclusion_keys = if exclusions.is_empty() {
        config.solution.exclusions.clone()
    } else {
        exclusions
    };

    println!("=== Run ===");
    println!("Base: {}", base_key);
    println!("Exclusions: {}", exclusion_keys.join(", "));
    println!("Target CRS: {}", config.target_crs);
    println!("Output: {}", config.output_dir.display());
    println!("Store: {}", if memory { "memory" } else { "postgresql" });

    let orchestrator = Orchestrator::new(config, store)?;
    let base_spec = orchestrator.resolve(&base_key)?;
    let exclusion_specs = exclusion_keys
        .iter()
        .map(|key| orchestrator.resolve(key))
        .collect::<freeplot_pg::Result<Vec<_>>>()?;

    let result = orchestrator
        .run(base_spec, exclusion_specs)
        .await
        .context("Run failed")?;

    result.display();
    if let Some(path) = report {
        result
            .save_to_file(path)
            .context(format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "Report saved");
    }
    info!("{}", result.summary());
    Ok(())
}

async fn cmd_shapes(store: &dyn ShapeStore, action: ShapeCommand) -> Result<()> {
    match action {
        ShapeCommand::List {
            favorites,
            version,
            offset,
            limit,
        } => {
            let filter = ShapeFilter {
                favorites_only: favorites,
                version,
            };
            let shapes = store.list(filter, offset, limit).await?;
            for shape in &shapes {
                print_row(shape);
            }
            println!("{} shape(s)", shapes.len());
        }
        ShapeCommand::Get { id, version } => {
            let shape = match version {
                Some(v) => store.get_at(id, v).await?,
                None => store.get(id).await?,
            };
            println!("{}", serde_json::to_string_pretty(&shape)?);
        }
        ShapeCommand::Favorite { id, value } => print_row(&store.set_favorite(id, value).await?),
        ShapeCommand::Comment { id, text } => print_row(&store.update_comment(id, &text).await?),
        ShapeCommand::AiComment { id, text } => {
            print_row(&store.update_ai_comment(id, &text).await?)
        }
        ShapeCommand::Version { version } => {
            let shapes = store.get_version(version).await?;
            for shape in &shapes {
                print_row(shape);
            }
            println!("Version {}: {} shape(s)", version, shapes.len());
        }
    }
    Ok(())
}

fn print_row(shape: &Shape) {
    println!(
        "{:>8}  v{:<4} {}  {}",
        shape.shape_id,
        shape.version,
        if shape.added_to_favorites { "★" } else { " " },
        shape.comment
    );
}

async fn cmd_versions(store: &dyn ShapeStore) -> Result<()> {
    let versions = store.list_versions().await?;
    if versions.is_empty() {
        println!("No version committed yet");
        return Ok(());
    }
    for v in &versions {
        let created = v
            .created_at
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        println!("v{:<4} {:>6} shapes  (unix {})", v.version, v.shape_count, created);
    }
    Ok(())
}

fn cmd_preview(config: &Config, layer: &str, column: Option<String>, output: &Path) -> Result<()> {
    let spec = freeplot_pg::LayerSpec::resolve(config, layer)?;
    let column = column.or_else(|| config.layer(layer).and_then(|e| e.column.clone()));
    let geojson = preview_layer(&spec, &config.target_crs()?, column.as_deref())?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, geojson)
        .context(format!("Failed to write {}", output.display()))?;
    println!("Preview written to {}", output.display());
    Ok(())
}

fn cmd_artifacts(dir: &Path, action: ArtifactCommand) -> Result<()> {
    match action {
        ArtifactCommand::List => {
            let artifacts = list_artifacts(dir)?;
            for a in &artifacts {
                println!("{:>12}  {}", a.size, a.name);
            }
            println!("{} artifact(s) in {}", artifacts.len(), dir.display());
        }
        ArtifactCommand::Show { name, output } => {
            let content = read_artifact(dir, &name)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &content)
                        .context(format!("Failed to write {}", path.display()))?;
                    println!("{} copied to {}", name, path.display());
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&content)?;
                }
            }
        }
    }
    Ok(())
}

async fn cmd_init_db(config: &Config, db: &DbArgs, drop: bool) -> Result<()> {
    let store = connect(config, db).await?;
    store.init_schema(drop).await?;
    println!("Schema {} ready", store.schema());
    Ok(())
}

async fn open_store(config: &Config, db: &DbArgs) -> Result<Arc<dyn ShapeStore>> {
    Ok(Arc::new(connect(config, db).await?))
}

async fn connect(config: &Config, db: &DbArgs) -> Result<PgShapeStore> {
    let mut db_config = DatabaseConfig::from_env();
    apply_database_overrides(&mut db_config, db.clone());
    println!("Database: {} (SSL: {:?})", db_config.display_target(), db_config.ssl_mode);

    let pool = create_pool(&db_config).await?;
    test_connection(&pool).await?;

    let srid = config.target_crs()?.epsg().unwrap_or(4326);
    Ok(PgShapeStore::new(pool, db_config.schema, srid).with_lineage(config.lineage))
}

fn apply_database_overrides(config: &mut DatabaseConfig, args: DbArgs) {
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(database) = args.database {
        config.dbname = database;
    }
    if let Some(user) = args.user {
        config.user = user;
    }
    if let Some(password) = args.password {
        config.password = Some(password);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ssl) = args.ssl {
        if let Ok(mode) = ssl.parse() {
            config.ssl_mode = mode;
        }
    }
    if let Some(schema) = args.schema {
        config.schema = schema;
    }
}
