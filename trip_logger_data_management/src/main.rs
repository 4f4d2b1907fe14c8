use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use trip_logger_data_management::{TripPatch, TripStore, database::db::SqliteTripStore};
use trip_logger_lib::{statistics, trip::{TripRecord, TripStatus}};

#[derive(Parser)]
#[command(name = "TripCLI")]
#[command(about = "A CLI to inspect and maintain logged trips", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all trips
    List,
    /// List trips still marked active (left over from an interrupted run)
    Active,
    /// Show a trip with its waypoints
    Show { trip_id: i64 },
    /// Set the label of a waypoint
    Label {
        trip_id: i64,
        waypoint_id: i64,
        label: String,
    },
    /// Set the note of a waypoint
    Note {
        trip_id: i64,
        waypoint_id: i64,
        note: String,
    },
    /// Close out a trip an interrupted run left active
    CloseOut { trip_id: i64 },
    /// Delete a trip. BE CAREFUL
    Delete { trip_id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = SqliteTripStore::connect().await?;

    match &cli.command {
        Commands::List => {
            for trip in store.list_all().await? {
                print_trip_line(&trip);
            }
        }
        Commands::Active => {
            let active = store.query_active().await?;
            if active.is_empty() {
                println!("No trips left active");
            }
            for trip in active {
                print_trip_line(&trip);
            }
        }
        Commands::Show { trip_id } => {
            let trip = store.get(*trip_id).await?;
            print_trip_line(&trip);
            for wp in &trip.waypoints {
                println!(
                    "  {}\t{}\t{}\t{:.5},{:.5}\t{}",
                    wp.waypoint_id,
                    wp.kind.as_str(),
                    wp.timestamp.format("%H:%M:%S"),
                    wp.position.y(),
                    wp.position.x(),
                    wp.label.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Label { trip_id, waypoint_id, label } => {
            edit_waypoint(&store, *trip_id, *waypoint_id, |wp| wp.label = Some(label.clone())).await?;
        }
        Commands::Note { trip_id, waypoint_id, note } => {
            edit_waypoint(&store, *trip_id, *waypoint_id, |wp| wp.note = Some(note.clone())).await?;
        }
        Commands::CloseOut { trip_id } => {
            let trip = store.get(*trip_id).await?;
            if trip.status != TripStatus::Active {
                bail!("Trip {} is already {}", trip_id, trip.status.as_str());
            }

            // End the trip at its last recorded waypoint; the live clock
            // is gone, so that is the best end time we have.
            let end_time = trip.waypoints.last().map(|wp| wp.timestamp).unwrap_or(trip.updated_at);
            let duration = ((end_time - trip.start_time).num_seconds() - trip.paused_secs).max(0);
            let stats = statistics::compute(&trip.waypoints, duration);

            store
                .update(*trip_id, TripPatch {
                    updated_at: Some(Utc::now()),
                    status: Some(TripStatus::Completed),
                    end_time: Some(end_time),
                    end_location: trip.waypoints.last().map(|wp| wp.position),
                    total_distance_km: Some(stats.distance_km),
                    total_duration_secs: Some(duration),
                    ..Default::default()
                })
                .await?;

            println!("Closed out trip {} ({:.1} km, {} s)", trip_id, stats.distance_km, duration);
        }
        Commands::Delete { trip_id } => {
            store.delete(*trip_id).await?;
        }
    }

    println!("Success!");
    Ok(())
}

fn print_trip_line(trip: &TripRecord) {
    let status = match trip.status {
        TripStatus::Active => "A",
        TripStatus::Completed => ".",
        TripStatus::Cancelled => "X",
    };
    println!(
        "{}\t{}\t{}\t{} waypoints\t{}",
        trip.trip_id,
        status,
        trip.trip_date,
        trip.waypoints.len(),
        trip.total_distance_km.map(|d| format!("{d:.1} km")).unwrap_or_else(|| "-".into()),
    );
}

async fn edit_waypoint<F>(store: &SqliteTripStore, trip_id: i64, waypoint_id: i64, edit: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut trip_logger_lib::waypoint::Waypoint),
{
    let mut trip = store.get(trip_id).await?;

    let Some(wp) = trip.waypoints.iter_mut().find(|wp| wp.waypoint_id == waypoint_id) else {
        bail!("Trip {} has no waypoint {}", trip_id, waypoint_id);
    };
    edit(wp);

    store
        .update(trip_id, TripPatch {
            updated_at: Some(Utc::now()),
            waypoints: Some(trip.waypoints),
            ..Default::default()
        })
        .await?;

    Ok(())
}
