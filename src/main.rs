use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use movie_reviews::api::{MovieReviewStats, PageResponse, UserReviewStats};
use movie_reviews::{
    Backend, Config, ErrorResponse, JsonStore, MemoryStore, PostgresStore, ReviewError,
    ReviewRequest, ReviewResponse, ReviewService, ReviewStore, Status, UpsertReview,
};

#[derive(Parser)]
#[command(name = "movie-reviews")]
#[command(about = "Store and query user reviews of movies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the YAML config file
    #[arg(long, default_value = ".movie-reviews/config.yml")]
    config: PathBuf,

    /// Storage backend, overriding the config file
    #[arg(long, value_enum)]
    backend: Option<Backend>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the review of a movie by a user
    Upsert {
        /// User ID
        #[arg(long, required_unless_present = "json")]
        user: Option<Uuid>,

        /// Movie ID
        #[arg(long, required_unless_present = "json")]
        movie: Option<Uuid>,

        /// Rating; an omitted rating leaves an existing one untouched
        #[arg(long)]
        rating: Option<i32>,

        /// Review title
        #[arg(long)]
        title: Option<String>,

        /// Review body
        #[arg(long, required_unless_present = "json")]
        content: Option<String>,

        /// Read a JSON review request from a file instead of flags
        #[arg(long, conflicts_with_all = ["user", "movie", "rating", "title", "content"])]
        json: Option<PathBuf>,
    },

    /// Show the review a user wrote for a movie
    Show {
        #[arg(long)]
        user: Uuid,

        #[arg(long)]
        movie: Uuid,
    },

    /// Delete the review a user wrote for a movie
    Delete {
        #[arg(long)]
        user: Uuid,

        #[arg(long)]
        movie: Uuid,
    },

    /// Most recently updated reviews of a movie
    Latest {
        movie: Uuid,

        /// Maximum number of reviews (defaults to the configured limit)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// One page of a movie's reviews
    Page {
        movie: Uuid,

        /// Zero-based page number
        #[arg(long)]
        page: Option<u32>,

        /// Page size (defaults to the configured size)
        #[arg(long)]
        size: Option<u32>,
    },

    /// Number of reviews for a movie
    MovieStats { movie: Uuid },

    /// Number of movies a user has reviewed
    UserStats { user: Uuid },

    /// A user's most recently created reviews
    UserLatest {
        user: Uuid,

        /// Maximum number of reviews (defaults to the configured limit)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run database migrations (postgres backend only)
    Migrate,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so stdout carries only response bodies
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("movie_reviews=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let backend = cli.backend.unwrap_or(config.store.backend);

    debug!(?backend, "Selected storage backend");

    match backend {
        Backend::Memory => {
            let service = ReviewService::new(MemoryStore::new(), config.limits);
            run(&service, cli.command).await
        }
        Backend::Json => {
            let store = JsonStore::new(&config.store.path).with_context(|| {
                format!("Failed to open JSON store: {}", config.store.path.display())
            })?;
            let service = ReviewService::new(store, config.limits);
            run(&service, cli.command).await
        }
        Backend::Postgres => {
            let url = config
                .store
                .database_url
                .as_deref()
                .context("DATABASE_URL not set and no store.database_url configured")?;
            let store = PostgresStore::new(url, config.store.max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;

            if let Commands::Migrate = cli.command {
                store.migrate().await.context("Failed to run database migrations")?;
                return Ok(ExitCode::SUCCESS);
            }

            let service = ReviewService::new(store, config.limits);
            run(&service, cli.command).await
        }
    }
}

/// Execute one command and print its response; errors become an
/// `ErrorResponse` on stderr and a non-zero exit code.
async fn run<S: ReviewStore>(service: &ReviewService<S>, command: Commands) -> Result<ExitCode> {
    match execute(service, command).await {
        Ok((status, body)) => {
            info!(status = status.code(), "Request completed");
            if let Some(body) = body {
                println!("{}", body);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            let (status, body) = ErrorResponse::from_error(&err);
            eprintln!("{}", serde_json::to_string_pretty(&body)?);
            Ok(match status {
                Status::NotFound => ExitCode::from(1),
                _ => ExitCode::from(2),
            })
        }
    }
}

async fn execute<S: ReviewStore>(
    service: &ReviewService<S>,
    command: Commands,
) -> movie_reviews::Result<(Status, Option<String>)> {
    match command {
        Commands::Upsert {
            user,
            movie,
            rating,
            title,
            content,
            json,
        } => {
            let request = match json {
                Some(path) => read_request(&path)?,
                None => UpsertReview {
                    user_id: user.ok_or_else(|| missing_flag("--user"))?,
                    movie_id: movie.ok_or_else(|| missing_flag("--movie"))?,
                    rating,
                    title,
                    content: content.ok_or_else(|| missing_flag("--content"))?,
                },
            };
            let review = service.upsert(request).await?.into_review();
            respond(Status::Created, &ReviewResponse::from(review))
        }
        Commands::Show { user, movie } => {
            let review = service.find_by_user_and_movie(user, movie).await?;
            respond(Status::Ok, &ReviewResponse::from(review))
        }
        Commands::Delete { user, movie } => {
            service.remove(user, movie).await?;
            Ok((Status::NoContent, None))
        }
        Commands::Latest { movie, limit } => {
            let reviews = service.latest_for_movie(movie, limit).await?;
            respond(Status::Ok, &to_responses(reviews))
        }
        Commands::Page { movie, page, size } => {
            let page = service.page_for_movie(movie, page, size).await?;
            respond(Status::Ok, &PageResponse::from(page))
        }
        Commands::MovieStats { movie } => {
            let total_reviews = service.count_reviews_for_movie(movie).await?;
            respond(Status::Ok, &MovieReviewStats { total_reviews })
        }
        Commands::UserStats { user } => {
            let reviewed_movies = service.count_movies_reviewed_by_user(user).await?;
            respond(Status::Ok, &UserReviewStats { reviewed_movies })
        }
        Commands::UserLatest { user, limit } => {
            let reviews = service.latest_for_user(user, limit).await?;
            respond(Status::Ok, &to_responses(reviews))
        }
        // postgres runs migrations before a service exists
        Commands::Migrate => Err(ReviewError::InvalidRequest(
            "Migrations only apply to the postgres backend".to_string(),
        )),
    }
}

fn read_request(path: &Path) -> movie_reviews::Result<UpsertReview> {
    let content = fs::read_to_string(path).map_err(|source| ReviewError::File {
        path: path.to_path_buf(),
        source,
    })?;
    let request: ReviewRequest =
        serde_json::from_str(&content).map_err(|source| ReviewError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(request.into())
}

fn missing_flag(flag: &str) -> ReviewError {
    ReviewError::InvalidRequest(format!("{} is required", flag))
}

fn to_responses(reviews: Vec<movie_reviews::Review>) -> Vec<ReviewResponse> {
    reviews.into_iter().map(ReviewResponse::from).collect()
}

fn respond(status: Status, body: &impl Serialize) -> movie_reviews::Result<(Status, Option<String>)> {
    Ok((status, Some(serde_json::to_string_pretty(body)?)))
}
