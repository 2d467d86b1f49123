use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use anyhow::{Context, Result};
use serde_json::json;
use contract_verifier::{
    bind, parser, verify_dir, verify_file, ast, Error, FileReport, Invocation, Policy, Schema, Verifier,
};
use std::fs;

#[derive(Parser)]
#[command(name = "cverify")]
#[command(about = "Contract module verifier and schema extractor")]
#[command(version)]
struct Cli {
    /// Policy file (TOML); the reference policy is used when omitted
    #[arg(long, global = true, value_name = "TOML")]
    policy: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a contract module
    Verify {
        /// Input module
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Verify a module and print its calling interface
    Schema {
        /// Input module
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Write the schema to this file instead of stdout
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,

        /// Pretty-print the schema
        #[arg(long)]
        pretty: bool,
    },

    /// Verify every module in a directory
    Check {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Bind an invocation request against a module's schema
    Bind {
        /// Input module
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Invocation request, e.g. {"method": "get", "args": {"key": "a"}}
        #[arg(value_name = "INVOCATION")]
        invocation: PathBuf,
    },

    /// Parse a module and show the AST
    Parse {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Show the full debug representation
        #[arg(short, long)]
        detailed: bool,
    },

    /// Lexically analyze a module
    Lex {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Show token locations
        #[arg(short, long)]
        locations: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::builder().filter_level(level).format_timestamp_millis().init();

    let policy = match &cli.policy {
        Some(path) => Policy::from_file(path)
            .with_context(|| format!("failed to load policy {}", path.display()))?,
        None => Policy::default(),
    };
    let verifier = Verifier::new(policy);

    match &cli.command {
        Commands::Verify { input } => verify_one(&verifier, input, cli.json),
        Commands::Schema { input, output, pretty } => {
            schema_one(&verifier, input, output.as_deref(), *pretty, cli.json)
        }
        Commands::Check { dir } => check_dir(&verifier, dir, cli.json),
        Commands::Bind { input, invocation } => bind_one(&verifier, input, invocation, cli.json),
        Commands::Parse { input, detailed } => {
            parse_file(input, *detailed)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Lex { input, locations } => {
            lex_file(input, *locations)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print a rejection and turn it into a failing exit code; other errors propagate
fn rejected(input: &Path, err: Error, as_json: bool) -> Result<ExitCode> {
    let violation = match err {
        Error::Violation(violation) => violation,
        other => return Err(other).with_context(|| format!("failed to verify {}", input.display())),
    };
    if as_json {
        let report = json!({
            "file": input.display().to_string(),
            "accepted": false,
            "violation": {
                "code": violation.code(),
                "line": violation.line(),
                "message": violation.to_string(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprintln!("{}: rejected", input.display());
        eprintln!("{}", violation);
    }
    Ok(ExitCode::FAILURE)
}

fn verify_one(verifier: &Verifier, input: &Path, as_json: bool) -> Result<ExitCode> {
    match verifier.verify_file(input) {
        Ok(_) => {
            if as_json {
                println!("{}", json!({ "file": input.display().to_string(), "accepted": true }));
            } else {
                println!("{}: ok", input.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => rejected(input, err, as_json),
    }
}

fn render_schema(schema: &Schema, pretty: bool) -> Result<String> {
    Ok(if pretty { schema.to_json_pretty()? } else { schema.to_json()? })
}

fn schema_one(
    verifier: &Verifier,
    input: &Path,
    output: Option<&Path>,
    pretty: bool,
    as_json: bool,
) -> Result<ExitCode> {
    let schema = match verify_file(input, verifier) {
        Ok(schema) => schema,
        Err(err) => return rejected(input, err, as_json),
    };
    let rendered = render_schema(&schema, pretty)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, rendered + "\n")
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!("schema written to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(ExitCode::SUCCESS)
}

fn report_json(report: &FileReport) -> serde_json::Value {
    match &report.result {
        Ok(schema) => json!({
            "file": report.path.display().to_string(),
            "accepted": true,
            "schema": schema,
        }),
        Err(err) => json!({
            "file": report.path.display().to_string(),
            "accepted": false,
            "code": err.violation().map(|v| v.code()).unwrap_or("error"),
            "message": err.to_string(),
        }),
    }
}

fn check_dir(verifier: &Verifier, dir: &Path, as_json: bool) -> Result<ExitCode> {
    let reports = verify_dir(dir, verifier)?;
    let rejected = reports.iter().filter(|r| !r.is_accepted()).count();

    if as_json {
        let list: Vec<serde_json::Value> = reports.iter().map(report_json).collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else {
        for report in &reports {
            match &report.result {
                Ok(_) => println!("ok       {}", report.path.display()),
                Err(err) => {
                    println!("rejected {}", report.path.display());
                    for line in err.to_string().lines() {
                        println!("    {}", line);
                    }
                }
            }
        }
        println!("{} module(s), {} rejected", reports.len(), rejected);
    }

    Ok(if rejected == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn bind_one(verifier: &Verifier, input: &Path, invocation: &Path, as_json: bool) -> Result<ExitCode> {
    let schema = match verify_file(input, verifier) {
        Ok(schema) => schema,
        Err(err) => return rejected(input, err, as_json),
    };
    let request = fs::read_to_string(invocation)
        .with_context(|| format!("failed to read {}", invocation.display()))?;
    let request = Invocation::from_json(&request)?;
    match bind(&schema, verifier.policy(), &request) {
        Ok(call) => {
            println!("{}", serde_json::to_string_pretty(&call)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            if as_json {
                println!("{}", json!({ "method": request.method, "error": err.to_string() }));
            } else {
                eprintln!("{}", err);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn parse_file(input: &Path, detailed: bool) -> Result<()> {
    let source = fs::read_to_string(input)?;
    let module = parser::parse_module(&source)
        .map_err(|e| anyhow::anyhow!("Parse error: {}", e))?;

    if detailed {
        println!("{:#?}", module);
    } else {
        print!("{}", ast::dump(&module));
    }

    Ok(())
}

fn lex_file(input: &Path, locations: bool) -> Result<()> {
    let source = fs::read_to_string(input)?;
    let lexer = parser::Lexer::new(&source);
    let tokens = lexer.tokenize().map_err(|e| anyhow::anyhow!("Lexical error: {}", e))?;

    for token in tokens {
        if locations {
            println!("{} at {}:{}", token.kind().describe(), token.location().line, token.location().column);
        } else {
            println!("{}: '{}'", token.kind().describe(), token.lexeme());
        }
    }

    Ok(())
}
