// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit-Harvest command line
//!
//! Authorizes against the Fitbit Web API and archives the account's data
//! one day at a time, newest first.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use fitbit_harvest::{
    config::{Config, DumpBackend},
    db::{DumpSink, FirestoreDb, LocalStore, TokenStore},
    models::Credential,
    routes::{self, CallbackParams, CallbackState},
    services::{FitbitClient, HarvestDriver, ReqwestTransport, ScanEnd, TokenAuthority},
    time_utils::parse_day,
};
use std::io::BufRead;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fitbit-harvest", version, about = "Archive a Fitbit account day by day")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect days backwards until an already dumped day or one without steps
    Harvest {
        /// First day to collect (YYYY-MM-DD); defaults to today
        #[arg(long, value_parser = parse_day)]
        date: Option<NaiveDate>,
    },
    /// Run the OAuth authorization flow and store the token pair
    Authorize {
        /// Paste the redirected URL instead of running the callback server
        #[arg(long)]
        console: bool,
    },
    /// Print the authorized user's profile
    Profile,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from environment
    let config = Config::from_env().context("Failed to load configuration")?;
    init_logging(config.log_json);

    let (token_store, sink) = open_storage(&config).await?;

    let tokens = token_store
        .load_token()
        .await
        .context("Failed to load stored token pair")?;
    let credential = Credential::with_tokens(
        config.fitbit_client_id.clone(),
        config.fitbit_client_secret.clone(),
        tokens,
    );

    let authority = Arc::new(
        TokenAuthority::new(credential, Arc::new(ReqwestTransport::new()), token_store)
            .with_redirect_uri(config.redirect_uri.clone())
            .with_timeout(config.request_timeout),
    );
    let client = FitbitClient::new(authority.clone()).with_locale(config.locale.clone());

    match cli.command {
        Command::Harvest { date } => harvest(&config, client, sink, date).await,
        Command::Authorize { console } => authorize(&config, client, console).await,
        Command::Profile => {
            let profile = client.user_profile().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
    }
}

async fn open_storage(config: &Config) -> anyhow::Result<(Arc<dyn TokenStore>, Arc<dyn DumpSink>)> {
    match config.dump_backend {
        DumpBackend::Local => {
            let store = Arc::new(LocalStore::new(&config.dump_dir, &config.token_file));
            tracing::info!(
                dump_dir = %config.dump_dir.display(),
                token_file = %config.token_file.display(),
                "Using local storage"
            );
            let tokens: Arc<dyn TokenStore> = store.clone();
            let sink: Arc<dyn DumpSink> = store;
            Ok((tokens, sink))
        }
        DumpBackend::Firestore => {
            let db = Arc::new(
                FirestoreDb::new(&config.gcp_project_id)
                    .await
                    .context("Failed to connect to Firestore")?,
            );
            let tokens: Arc<dyn TokenStore> = db.clone();
            let sink: Arc<dyn DumpSink> = db;
            Ok((tokens, sink))
        }
    }
}

async fn harvest(
    config: &Config,
    client: FitbitClient,
    sink: Arc<dyn DumpSink>,
    date: Option<NaiveDate>,
) -> anyhow::Result<()> {
    if !client.authority().is_authenticated().await {
        anyhow::bail!("No stored tokens; run `fitbit-harvest authorize` first");
    }

    let start_day = date.unwrap_or_else(|| chrono::Local::now().date_naive());
    let driver = HarvestDriver::new(Arc::new(client), sink).with_pace_seconds(config.pace_seconds);

    match driver.run(start_day).await {
        Ok(report) => {
            let reason = match report.end {
                ScanEnd::AlreadyDumped(day) => format!("{} was already dumped", day),
                ScanEnd::NoMoreData(day) => format!("{} had no steps", day),
            };
            tracing::info!(
                days = report.days_collected.len(),
                pace_seconds = report.pace_seconds,
                "Harvest complete: {}",
                reason
            );
            Ok(())
        }
        Err(abort) => {
            tracing::error!(
                resume_day = %abort.resume_day,
                error = %abort.error,
                "Harvest aborted"
            );
            eprintln!(
                "Harvest aborted: {}\nResume with: fitbit-harvest harvest --date {}",
                abort.error, abort.resume_day
            );
            std::process::exit(1);
        }
    }
}

async fn authorize(config: &Config, client: FitbitClient, console: bool) -> anyhow::Result<()> {
    let authority = client.authority().clone();
    let request = authority.begin_authorization(None, None).await?;

    println!("Open this URL in a browser to authorize access:\n\n{}\n", request.authorization_url);

    if console {
        println!("Paste the URL you were redirected to:");
        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await
        .context("Failed to read from stdin")??;

        let params = CallbackParams::from_redirect_url(&line)?;
        routes::complete_authorization(&authority, params).await?;
    } else {
        let state = Arc::new(CallbackState::new(authority.clone()));
        let done = state.done.clone();
        let app = routes::create_router(state);

        let addr = format!("127.0.0.1:{}", config.callback_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(address = %addr, "Waiting for authorization callback");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { done.notified().await })
            .await?;

        if !authority.is_authenticated().await {
            anyhow::bail!("Authorization failed");
        }
    }

    let profile = client.user_profile().await?;
    let name = profile
        .get("user")
        .and_then(|user| user.get("fullName"))
        .and_then(|name| name.as_str())
        .unwrap_or("unknown user");
    tracing::info!(user = %name, "Authorized");
    println!("Authorized as {}", name);

    Ok(())
}

/// Initialize logging: JSON lines (GCP-compliant) or human-readable.
fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fitbit_harvest=debug,info"));

    if json {
        let format = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(true)
            .flatten_event(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(format)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
