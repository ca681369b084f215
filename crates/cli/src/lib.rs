pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "signoff",
    about = "Signoff operator CLI",
    long_about = "Apply approval-store migrations, inspect configuration, check readiness, and dry-run the approval matrix.",
    after_help = "Examples:\n  signoff doctor --json\n  signoff config\n  signoff resolve --company C1 --document-type purchase_order --amount 25000"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, and approval schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Show which approval levels a document amount would route through")]
    Resolve {
        #[arg(long, help = "Company whose approval matrix is evaluated")]
        company: String,
        #[arg(long = "document-type", help = "Document type, e.g. purchase_order")]
        document_type: String,
        #[arg(long, help = "Document amount in the company currency")]
        amount: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Resolve { company, document_type, amount } => {
            commands::resolve::run(&commands::resolve::ResolveArgs {
                company,
                document_type,
                amount,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn resolve_arguments_parse_with_kebab_case_flags() {
        let cli = Cli::try_parse_from([
            "signoff",
            "resolve",
            "--company",
            "C1",
            "--document-type",
            "purchase_order",
            "--amount",
            "25000.00",
        ])
        .expect("arguments should parse");

        match cli.command {
            Command::Resolve { company, document_type, amount } => {
                assert_eq!(company, "C1");
                assert_eq!(document_type, "purchase_order");
                assert_eq!(amount, "25000.00");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn resolve_requires_an_amount() {
        let parsed = Cli::try_parse_from([
            "signoff",
            "resolve",
            "--company",
            "C1",
            "--document-type",
            "purchase_order",
        ]);

        assert!(parsed.is_err());
    }
}
