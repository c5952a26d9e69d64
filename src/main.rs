use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use nestegg::api::{
    ProjectionArgs, bracket_years, build_inputs, current_year, load_repository, run_http_server,
    run_projection, tax_report,
};

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Retirement savings projection with progressive tax and benefit estimates"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "JSON file of bracket tables keyed by year, replacing the built-in tables"
    )]
    brackets: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Tax owed on an income in a calendar year.
    Tax {
        #[arg(long)]
        income: f64,
        #[arg(long, help = "Calendar year, defaults to the current year")]
        year: Option<i32>,
    },
    /// Bracket table for a calendar year, known or extrapolated.
    Brackets {
        #[arg(long, help = "Calendar year; lists the stored years when omitted")]
        year: Option<i32>,
    },
    /// Accumulation and distribution projection.
    Project(ProjectionArgs),
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let repository = match load_repository(cli.brackets.as_deref()) {
        Ok(repository) => repository,
        Err(e) => fail(&e),
    };

    match cli.command {
        Command::Serve { port } => {
            if let Err(e) = run_http_server(port, repository).await {
                fail(&format!("Server error: {e}"));
            }
        }
        Command::Tax { income, year } => {
            let year = year.unwrap_or_else(current_year);
            match tax_report(&repository, income, year) {
                Ok(report) => print_json(&report),
                Err(e) => fail(&e.to_string()),
            }
        }
        Command::Brackets { year: None } => print_json(&bracket_years(&repository)),
        Command::Brackets { year: Some(year) } => match repository.brackets_for_year(year) {
            Ok(table) => print_json(&table),
            Err(e) => fail(&e.to_string()),
        },
        Command::Project(args) => {
            let result =
                build_inputs(&args).and_then(|request| run_projection(&repository, &request));
            match result {
                Ok(response) => print_json(&response),
                Err(e) => fail(&e.to_string()),
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => fail(&format!("failed to serialize output: {e}")),
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}
