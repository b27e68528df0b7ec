//! expressgen CLI
//!
//! - `check`: read and build a schema, report the model summary
//! - `outline`: render the reference JSON outline into a directory
//! - `inspect`: print one definition's outline document

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::prelude::*;

use expressgen_model::{compile, ModelConfig, SemanticModel};
use expressgen_render::{render_outline, OutlineOptions};

#[derive(Parser)]
#[command(name = "expressgen")]
#[command(author, version, about = "expressgen: EXPRESS schema compiler")]
struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read and build a schema, then print the model summary.
    Check {
        /// EXPRESS schema (`.exp`)
        schema: PathBuf,
        /// Model configuration JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Fail on names that are referenced but never declared
        #[arg(long)]
        strict: bool,
    },

    /// Render the JSON outline: one document per definition plus a manifest.
    Outline {
        /// EXPRESS schema (`.exp`)
        schema: PathBuf,
        /// Output directory (created if missing)
        #[arg(short, long)]
        out: PathBuf,
        /// Model configuration JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Outline options JSON
        #[arg(long)]
        options: Option<PathBuf>,
    },

    /// Print the outline document of one definition.
    Inspect {
        /// EXPRESS schema (`.exp`)
        schema: PathBuf,
        /// Definition name
        name: String,
        /// Model configuration JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check {
            schema,
            config,
            strict,
        } => cmd_check(&schema, config.as_ref(), strict),
        Commands::Outline {
            schema,
            out,
            config,
            options,
        } => {
            let written = cmd_outline(&schema, &out, config.as_ref(), options.as_ref())?;
            eprintln!(
                "{} {} files to {}",
                "wrote".green().bold(),
                written.len(),
                out.display().to_string().bold()
            );
            Ok(())
        }
        Commands::Inspect {
            schema,
            name,
            config,
        } => cmd_inspect(&schema, &name, config.as_ref()),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "expressgen_model=debug,expressgen_render=debug"
    } else {
        "expressgen_model=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ModelConfig> {
    match path {
        Some(path) => ModelConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(ModelConfig::default()),
    }
}

/// Schema text plus the model built from it.
fn load_model(schema: &Path, config: ModelConfig) -> Result<(String, SemanticModel)> {
    let text = fs::read_to_string(schema)
        .with_context(|| format!("failed to read {}", schema.display()))?;
    let model = compile(&text, config)
        .with_context(|| format!("failed to compile {}", schema.display()))?;
    Ok((text, model))
}

fn cmd_check(schema: &Path, config: Option<&PathBuf>, strict: bool) -> Result<()> {
    let mut config = load_config(config)?;
    config.strict_references |= strict;
    let (_, model) = load_model(schema, config)?;

    println!(
        "{} schema {} ({})",
        "ok".green().bold(),
        model.schema_name().bold(),
        model.summary()
    );
    let undeclared = model.placeholders();
    if !undeclared.is_empty() {
        println!(
            "{} referenced but never declared: {}",
            "info:".yellow().bold(),
            undeclared.join(", ")
        );
    }
    Ok(())
}

fn cmd_outline(
    schema: &Path,
    out: &Path,
    config: Option<&PathBuf>,
    options: Option<&PathBuf>,
) -> Result<Vec<PathBuf>> {
    let options: OutlineOptions = match options {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid outline options {}", path.display()))?
        }
        None => OutlineOptions::default(),
    };
    let pretty = options.pretty;
    let (text, model) = load_model(schema, load_config(config)?)?;
    let outline = render_outline(&model, options, Some(&text))?;

    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    let encode = |value: &serde_json::Value| -> Result<String> {
        Ok(if pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        })
    };

    let mut written = Vec::with_capacity(outline.documents.len() + 2);
    for (entry, document) in outline.manifest.entries.iter().zip(&outline.documents) {
        let path = out.join(&entry.artifact);
        fs::write(&path, encode(&document.body)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }

    let path = out.join("functions.json");
    fs::write(&path, encode(&outline.functions)?)?;
    written.push(path);

    let path = out.join("manifest.json");
    fs::write(&path, encode(&serde_json::to_value(&outline.manifest)?)?)?;
    written.push(path);

    info!(
        schema = %outline.manifest.schema,
        documents = outline.documents.len(),
        out = %out.display(),
        "outline written"
    );
    Ok(written)
}

fn cmd_inspect(schema: &Path, name: &str, config: Option<&PathBuf>) -> Result<()> {
    let (text, model) = load_model(schema, load_config(config)?)?;
    // Validate the name before rendering so the error names the lookup.
    let kind = model.get(name)?.kind();
    let outline = render_outline(&model, OutlineOptions::default(), Some(&text))?;
    let document = outline
        .document(name)
        .ok_or_else(|| anyhow!("`{name}` is referenced but never declared"))?;

    eprintln!("{} {} ({})", "→".cyan(), name.bold(), kind);
    println!("{}", serde_json::to_string_pretty(&document.body)?);
    Ok(())
}
