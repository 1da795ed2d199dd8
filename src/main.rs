use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mangomusic::db::GenreLister;
use mangomusic::db::models::{Album, ReportResult};
use mangomusic::db::queries::ReportStrategy;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mangomusic", version, about = "Album catalog queries and play reports")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Print results as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List an artist's albums, newest first
    ByArtist {
        /// Artist id
        artist_id: i64,
    },

    /// List albums whose artist has this primary genre (exact match)
    ByGenre {
        genre: String,
    },

    /// Find albums whose title contains a term (substring match)
    Search {
        term: String,
    },

    /// Most-played albums per genre
    MostPlayed {
        /// Albums per genre (defaults to config, then 5)
        #[arg(short = 'n', long)]
        top: Option<usize>,

        /// Compute with a single windowed query instead of one query per genre
        #[arg(long)]
        windowed: bool,
    },

    /// List all known genres
    Genres,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = mangomusic::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(mangomusic::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = mangomusic::db::Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::ByArtist { artist_id } => {
            let albums = db
                .albums()
                .albums_by_artist(artist_id)
                .context("Query failed")?;
            if albums.is_empty() && !cli.json {
                println!("No albums for artist {}.", artist_id);
                return Ok(());
            }
            print_albums(&albums, cli.json)?;
        }

        Commands::ByGenre { genre } => {
            let albums = db.albums().albums_by_genre(&genre).context("Query failed")?;
            if albums.is_empty() && !cli.json {
                println!("No albums in genre \"{}\".", genre);
                return Ok(());
            }
            print_albums(&albums, cli.json)?;
        }

        Commands::Search { term } => {
            let albums = db.albums().search_albums(&term).context("Search failed")?;
            if albums.is_empty() && !cli.json {
                println!("No albums matching \"{}\".", term);
                return Ok(());
            }
            print_albums(&albums, cli.json)?;
        }

        Commands::MostPlayed { top, windowed } => {
            let strategy = if windowed {
                ReportStrategy::Windowed
            } else {
                config.report.strategy
            };
            let queries = db
                .albums()
                .with_top_n(top.unwrap_or(config.report.top_n))
                .with_strategy(strategy);

            // Show whatever genres completed rather than nothing
            let rows = match queries.most_played_albums_by_genre() {
                Ok(rows) => rows,
                Err(partial) => {
                    eprintln!("Warning: {partial}. Showing completed genres only.");
                    partial.into_rows()
                }
            };

            if rows.is_empty() && !cli.json {
                println!("No plays recorded.");
                return Ok(());
            }
            print_report(&rows, cli.json)?;
        }

        Commands::Genres => {
            let genres = db.genres().context("Failed to list genres")?;
            if cli.json {
                print_json(&genres)?;
            } else {
                for genre in &genres {
                    println!("{}", genre);
                }
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Print a table of albums.
fn print_albums(albums: &[Album], json: bool) -> Result<()> {
    if json {
        return print_json(albums);
    }

    println!("{:>6} {:<35} {:<25} {:>4}", "ID", "Title", "Artist", "Year");
    println!("{}", "-".repeat(73));

    for a in albums {
        println!(
            "{:>6} {:<35} {:<25} {:>4}",
            a.album_id,
            truncate(&a.title, 35),
            truncate(&a.artist_name, 25),
            a.release_year,
        );
    }
    Ok(())
}

/// Print report rows as a table, sizing each column to its widest cell.
fn print_report(rows: &[ReportResult], json: bool) -> Result<()> {
    if json {
        return print_json(rows);
    }
    let Some(first) = rows.first() else {
        return Ok(());
    };

    let headers: Vec<&str> = first.columns().collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|r| r.values().map(|v| truncate(&v.to_string(), 35)).collect())
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .filter_map(|row| row.get(i))
                .map(|c| c.chars().count())
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<&str>| {
        let padded: Vec<String> = values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<w$}", v, w = *w))
            .collect();
        println!("{}", padded.join("  ").trim_end());
    };

    line(headers.clone());
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1)));
    for row in &cells {
        line(row.iter().map(String::as_str).collect());
    }
    Ok(())
}
