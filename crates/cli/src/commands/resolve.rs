//! Dry run of the rule resolver against the stored approval matrix.
//!
//! Nothing is written beyond pending migrations; the command shows the levels
//! and approver roles a submission of the given amount would be routed to.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::json;
use signoff_core::approvals::ports::MatrixRepository;
use signoff_core::approvals::resolver;
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_core::domain::matrix::RuleFilter;
use signoff_core::{CompanyId, DocumentType};
use signoff_db::{connect_with_settings, migrations, SqlMatrixRepository};

use crate::commands::CommandResult;

const COMMAND: &str = "resolve";

#[derive(Clone, Debug)]
pub struct ResolveArgs {
    pub company: String,
    pub document_type: String,
    pub amount: String,
}

pub fn run(args: &ResolveArgs) -> CommandResult {
    let company_id = args.company.trim();
    if company_id.is_empty() {
        return CommandResult::failure(COMMAND, "validation_error", "company must not be empty", 6);
    }
    let Some(document_type) = DocumentType::parse(args.document_type.trim()) else {
        let known: Vec<&str> = DocumentType::ALL.iter().map(|kind| kind.as_str()).collect();
        return CommandResult::failure(
            COMMAND,
            "validation_error",
            format!(
                "unknown document type `{}`; expected one of {}",
                args.document_type,
                known.join(", ")
            ),
            6,
        );
    };
    let amount = match Decimal::from_str(args.amount.trim()) {
        Ok(amount) => amount,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "validation_error",
                format!("amount `{}` is not a decimal number: {error}", args.amount),
                6,
            );
        }
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let company_id = CompanyId(company_id.to_string());
    let rules = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let filter = RuleFilter { document_type: Some(document_type), is_active: Some(true) };
        let rules = SqlMatrixRepository::new(pool.clone())
            .list_rules(&company_id, &filter)
            .await
            .map_err(|error| ("persistence_error", error.to_string(), 4u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(rules)
    });
    let rules = match rules {
        Ok(rules) => rules,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure(COMMAND, error_class, message, exit_code);
        }
    };

    let resolution = match resolver::resolve(&rules, &company_id, document_type, amount) {
        Ok(resolution) => resolution,
        Err(error) => return CommandResult::failure(COMMAND, error.class(), error.to_string(), 6),
    };

    let message = if resolution.requires_approval() {
        let roles: Vec<String> = resolution
            .levels
            .iter()
            .map(|level| format!("L{} {}", level.approval_level, level.approver_role_id.0))
            .collect();
        format!("{} {amount} routes through {}", document_type.as_str(), roles.join(" -> "))
    } else {
        format!("{} {amount} is approved on submission", document_type.as_str())
    };

    CommandResult::success_with_details(
        COMMAND,
        message,
        Some(json!({
            "company_id": company_id.0,
            "document_type": document_type,
            "amount": amount,
            "requires_approval": resolution.requires_approval(),
            "levels": resolution.levels,
            "warnings": resolution.warnings,
        })),
    )
}
