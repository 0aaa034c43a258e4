#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the civic map ingestion tool.

use std::path::PathBuf;
use std::time::Instant;

use civic_map_bicycle_network::LogMessages;
use civic_map_bicycle_network::process::{export_network, upload_network};
use civic_map_cli_utils::{IndicatifProgress, init_logger};
use civic_map_database::{environment_db, network_db, paths};
use civic_map_environment_data::reconcile::ImportOptions;
use civic_map_environment_data::registry::all_data_types;
use civic_map_environment_data_models::DataType;
use civic_map_ingest::{
    format_data_types, format_import_state, format_import_summary, format_networks,
    import_environment_file, locate_station, parse_data_type,
};
use civic_map_spatial::GeometrySettings;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "civic_map_ingest", about = "Civic map data ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage bicycle networks and upload their `GeoJSON` geometry
    #[command(subcommand)]
    Network(NetworkCommand),
    /// Import time-bucketed environmental measurements
    #[command(subcommand)]
    Environment(EnvironmentCommand),
}

#[derive(Subcommand)]
enum NetworkCommand {
    /// Create an empty bicycle network and print its id
    Create {
        /// Human-readable name
        #[arg(long)]
        name: Option<String>,
    },
    /// List bicycle networks with part counts and lengths
    List,
    /// Upload a `GeoJSON` file into a network, replacing its parts
    Upload {
        /// Network id
        #[arg(long)]
        id: i64,
        /// `GeoJSON` `FeatureCollection` of line geometries
        file: PathBuf,
    },
    /// Print a network's parts as a `GeoJSON` `FeatureCollection`
    Export {
        /// Network id
        #[arg(long)]
        id: i64,
    },
    /// Delete a network and its parts
    Delete {
        /// Network id
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum EnvironmentCommand {
    /// Import a measurement CSV (`"{station} {parameter}"` columns)
    Import {
        /// Data type code (AQ or WO)
        #[arg(long, value_parser = parse_data_type)]
        data_type: DataType,
        /// CSV file with a timestamp column followed by measurement columns
        file: PathBuf,
        /// Wipe all stored data for the data type and import from scratch
        #[arg(long)]
        initial_import: bool,
        /// Import even if months between the import state and the data are missing
        #[arg(long)]
        allow_gap: bool,
    },
    /// Show the import state and where the next fetch should start
    State {
        /// Data type code (AQ or WO)
        #[arg(long, value_parser = parse_data_type)]
        data_type: DataType,
    },
    /// Record a station's location (WGS84 longitude and latitude)
    Locate {
        /// Data type code (AQ or WO)
        #[arg(long, value_parser = parse_data_type)]
        data_type: DataType,
        /// Station name as it appears in column headers
        #[arg(long)]
        station: String,
        /// Longitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        longitude: f64,
        /// Latitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        latitude: f64,
    },
    /// List registered data types and their parameters
    DataTypes,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Network(command) => {
            let conn = network_db::open_default()?;
            match command {
                NetworkCommand::Create { name } => {
                    let id = network_db::create_network(&conn, name.as_deref())?;
                    log::info!("Created bicycle network {id}");
                    println!("{id}");
                }
                NetworkCommand::List => {
                    print!("{}", format_networks(&network_db::list_networks(&conn)?));
                }
                NetworkCommand::Upload { id, file } => {
                    let settings = GeometrySettings::from_env();
                    let start = Instant::now();
                    let saved = upload_network(
                        &conn,
                        &file,
                        &paths::uploads_dir(),
                        id,
                        &settings,
                        &LogMessages,
                    )?;
                    if !saved {
                        return Err(format!("{} was not imported", file.display()).into());
                    }
                    let network = network_db::get_network(&conn, id)?;
                    log::info!(
                        "Uploaded {} into network {id} ({:.2} m) in {:.1}s",
                        file.display(),
                        network.map_or(0.0, |n| n.length),
                        start.elapsed().as_secs_f64()
                    );
                }
                NetworkCommand::Export { id } => {
                    let settings = GeometrySettings::from_env();
                    let collection = export_network(&conn, id, &settings)?;
                    println!("{}", serde_json::to_string_pretty(&collection)?);
                }
                NetworkCommand::Delete { id } => {
                    if network_db::delete_network(&conn, id)? {
                        log::info!("Deleted bicycle network {id}");
                    } else {
                        return Err(format!("Bicycle network {id} not found").into());
                    }
                }
            }
        }
        Commands::Environment(command) => match command {
            EnvironmentCommand::Import {
                data_type,
                file,
                initial_import,
                allow_gap,
            } => {
                let conn = environment_db::open_default()?;
                let progress =
                    IndicatifProgress::import_bar(&multi, &format!("Importing {data_type}"));
                let start = Instant::now();
                let summary = import_environment_file(
                    &conn,
                    &file,
                    data_type,
                    ImportOptions {
                        initial_import,
                        allow_gap,
                    },
                    progress.as_ref(),
                )?;
                match summary {
                    Some(summary) => {
                        println!("{}", format_import_summary(data_type, &summary));
                        log::info!("Import finished in {:.1}s", start.elapsed().as_secs_f64());
                    }
                    None => log::warn!("{} holds no measurements", file.display()),
                }
            }
            EnvironmentCommand::State { data_type } => {
                let conn = environment_db::open_default()?;
                let state = environment_db::get_import_state(&conn, data_type)?;
                println!("{}", format_import_state(data_type, state.as_ref()));
            }
            EnvironmentCommand::Locate {
                data_type,
                station,
                longitude,
                latitude,
            } => {
                let conn = environment_db::open_default()?;
                let id = locate_station(&conn, data_type, &station, longitude, latitude)?;
                println!("{id}");
            }
            EnvironmentCommand::DataTypes => {
                print!("{}", format_data_types(&all_data_types()));
            }
        },
    }

    Ok(())
}
