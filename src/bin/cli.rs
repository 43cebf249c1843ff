use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use cms_puf::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pufcli")]
#[command(
    about = "CMS claims PUF CLI - aggregate Medicare utilization extracts into provider and hospital reports",
    long_about = None
)]
struct Cli {
    /// Emit library diagnostics to stderr (repeat for more detail)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank providers billing a set of procedure codes
    Doctors(DoctorsArgs),
    /// Roll provider volume up to affiliated hospitals
    Hospitals(HospitalsArgs),
    /// Full per-(provider, code) table with suppression/derivation notes
    Report(QueryArgs),
    /// Rank codes by total volume, across the whole extract by default
    TopCodes(TopCodesArgs),
    /// Rank the physicians affiliated with one facility
    Physicians(PhysiciansArgs),
}

#[derive(Args)]
struct QueryArgs {
    /// Directory containing the CMS extract files
    #[arg(short, long, env = "PUF_DATA_DIR")]
    data_dir: PathBuf,
    /// Procedure codes (HCPCS and/or CPT), comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    codes: Vec<String>,
    /// Two-letter state filters, comma separated
    #[arg(long, value_delimiter = ',')]
    states: Vec<String>,
    /// Limit number of result rows
    #[arg(long)]
    limit: Option<usize>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Args)]
struct DoctorsArgs {
    #[command(flatten)]
    query: QueryArgs,
    /// Drop providers below this total service volume
    #[arg(long)]
    min_services: Option<f64>,
}

#[derive(Args)]
struct HospitalsArgs {
    #[command(flatten)]
    query: QueryArgs,
    /// Drop facilities below this total procedure volume
    #[arg(long)]
    min_procedures: Option<f64>,
}

#[derive(Args)]
struct TopCodesArgs {
    /// Directory containing the CMS extract files
    #[arg(short, long, env = "PUF_DATA_DIR")]
    data_dir: PathBuf,
    /// Procedure codes to total; omit to total every code in the extracts
    #[arg(long, value_delimiter = ',')]
    codes: Vec<String>,
    /// Two-letter state filters, comma separated
    #[arg(long, value_delimiter = ',')]
    states: Vec<String>,
    /// Drop codes below this total service volume
    #[arg(long)]
    min_services: Option<f64>,
    /// Limit number of result rows
    #[arg(long)]
    limit: Option<usize>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Args)]
struct PhysiciansArgs {
    #[command(flatten)]
    query: QueryArgs,
    /// Facility certification number (CCN)
    #[arg(long)]
    facility: String,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match cli.command {
        Commands::Doctors(args) => cmd_doctors(args),
        Commands::Hospitals(args) => cmd_hospitals(args),
        Commands::Report(args) => cmd_report(args),
        Commands::TopCodes(args) => cmd_top_codes(args),
        Commands::Physicians(args) => cmd_physicians(args),
    };

    if let Err(e) = outcome {
        match e.downcast_ref::<PufError>() {
            Some(puf) => eprintln!("{}", puf.user_message()),
            None => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cms_puf={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_dataset(data_dir: &Path) -> anyhow::Result<ClaimsDataset> {
    let dataset = ClaimsDatasetBuilder::from_directory(data_dir)?.build()?;
    Ok(dataset)
}

fn note_truncation(truncated: bool) {
    if truncated {
        eprintln!("note: scan stopped at the row cap; results describe a partial sample");
    }
}

fn print_json<T: serde::Serialize>(rows: &[T]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(rows).context("serializing result rows")?;
    println!("{json}");
    Ok(())
}

fn cmd_doctors(args: DoctorsArgs) -> anyhow::Result<()> {
    let dataset = open_dataset(&args.query.data_dir)?;
    let result = dataset.doctors_by_codes(
        &args.query.codes,
        &args.query.states,
        args.min_services,
        args.query.limit,
    )?;
    note_truncation(result.truncated);

    match args.query.format {
        OutputFormat::Json => print_json(&result.rows)?,
        OutputFormat::Text => {
            for doc in &result.rows {
                let hospital = doc.primary_hospital_name.as_deref().unwrap_or("-");
                println!(
                    "{} | {} | {} | {}, {} | svcs {} | paid {:.2} | {} | {}",
                    doc.npi,
                    doc.doctor_name,
                    doc.specialty,
                    doc.city,
                    doc.state,
                    doc.total_services,
                    doc.total_payments,
                    hospital,
                    doc.code_breakdown,
                );
            }
            println!("Total providers: {}", result.rows.len());
        }
    }
    Ok(())
}

fn cmd_hospitals(args: HospitalsArgs) -> anyhow::Result<()> {
    let dataset = open_dataset(&args.query.data_dir)?;
    let result = dataset.hospitals_by_codes(
        &args.query.codes,
        &args.query.states,
        args.min_procedures,
        args.query.limit,
    )?;
    note_truncation(result.truncated);

    match args.query.format {
        OutputFormat::Json => print_json(&result.rows)?,
        OutputFormat::Text => {
            for h in &result.rows {
                println!(
                    "{} | {} | {}, {} | procs {} | paid {:.2} | {} physicians | {}",
                    h.facility_id,
                    h.hospital_name,
                    h.hospital_city,
                    h.hospital_state,
                    h.total_procedures,
                    h.total_payments,
                    h.num_physicians,
                    h.code_breakdown,
                );
            }
            println!("Total hospitals: {}", result.rows.len());
        }
    }
    Ok(())
}

fn cmd_report(args: QueryArgs) -> anyhow::Result<()> {
    let dataset = open_dataset(&args.data_dir)?;
    let result = dataset.provider_code_report(&args.codes, &args.states, args.limit)?;
    note_truncation(result.truncated);

    match args.format {
        OutputFormat::Json => print_json(&result.rows)?,
        OutputFormat::Text => {
            for row in &result.rows {
                let benes = match (row.total_beneficiaries, row.suppression_note()) {
                    (_, Some(note)) => note.to_string(),
                    (Some(b), None) => format!("{b}"),
                    (None, None) => "-".to_string(),
                };
                let payment = match row.total_payment {
                    Some(p) if row.derived.payment => format!("{p:.2}*"),
                    Some(p) => format!("{p:.2}"),
                    None => "-".to_string(),
                };
                println!(
                    "{} #{} | {} | {} | svcs {} | benes {} | paid {}",
                    row.code,
                    row.rank_within_code,
                    row.npi,
                    row.name,
                    row.total_services,
                    benes,
                    payment,
                );
            }
            println!("Total rows: {} (* = derived from average)", result.rows.len());
        }
    }
    Ok(())
}

fn cmd_top_codes(args: TopCodesArgs) -> anyhow::Result<()> {
    let dataset = open_dataset(&args.data_dir)?;
    let result =
        dataset.top_codes_by_volume(&args.codes, &args.states, args.min_services, args.limit)?;
    note_truncation(result.truncated);

    match args.format {
        OutputFormat::Json => print_json(&result.rows)?,
        OutputFormat::Text => {
            for v in &result.rows {
                println!("{} | svcs {} | paid {:.2}", v.code, v.total_services, v.total_payments);
            }
        }
    }
    Ok(())
}

fn cmd_physicians(args: PhysiciansArgs) -> anyhow::Result<()> {
    let dataset = open_dataset(&args.query.data_dir)?;
    let result = dataset.hospital_physicians(
        &args.facility,
        &args.query.codes,
        &args.query.states,
        args.query.limit,
    )?;
    note_truncation(result.truncated);

    match args.query.format {
        OutputFormat::Json => print_json(&result.rows)?,
        OutputFormat::Text => {
            for doc in &result.rows {
                println!(
                    "{} | {} | {} | svcs {} | paid {:.2} | {}",
                    doc.npi,
                    doc.doctor_name,
                    doc.specialty,
                    doc.total_services,
                    doc.total_payments,
                    doc.code_breakdown,
                );
            }
            println!("Total physicians: {}", result.rows.len());
        }
    }
    Ok(())
}
