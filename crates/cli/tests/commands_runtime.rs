use std::env;
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use signoff_cli::commands::resolve::ResolveArgs;
use signoff_cli::commands::{config, doctor, migrate, resolve};
use signoff_core::approvals::ports::MatrixRepository;
use signoff_core::{ApprovalMatrixRule, CompanyId, DocumentType, RoleId, RuleId};
use signoff_db::{connect_with_settings, migrations, SqlMatrixRepository, SqlRoleDirectory};

const MEMORY_DB: [(&str, &str); 2] =
    [("SIGNOFF_DATABASE_URL", "sqlite::memory:"), ("SIGNOFF_DATABASE_MAX_CONNECTIONS", "1")];

#[test]
fn migrate_reports_applied_schema_versions() {
    with_env(&MEMORY_DB, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        let versions = payload["details"]["applied_versions"].as_array().expect("versions");
        assert_eq!(versions.len(), 4);
        assert_eq!(payload["message"], "approval store schema at version 4");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_override() {
    with_env(&[("SIGNOFF_SERVER_PORT", "not-a-port")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("SIGNOFF_SERVER_PORT"));
    });
}

#[test]
fn migrate_rejects_non_sqlite_urls_before_connecting() {
    with_env(&[("SIGNOFF_DATABASE_URL", "postgres://localhost/erp")], || {
        let result = migrate::run();

        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
    });
}

#[test]
fn doctor_flags_an_unmigrated_store() {
    with_env(&MEMORY_DB, || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1, "fresh database has no schema: {}", result.output);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        let checks = report["checks"].as_array().expect("checks");
        assert_eq!(check_status(checks, "config_validation"), "pass");
        assert_eq!(check_status(checks, "database_connectivity"), "pass");
        assert_eq!(check_status(checks, "approval_schema"), "fail");
    });
}

#[test]
fn doctor_passes_once_migrations_are_applied() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("signoff.db").display());

    with_env(&[("SIGNOFF_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);

        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "expected all checks to pass: {}", result.output);
        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "pass");
        assert_eq!(check_status(report["checks"].as_array().expect("checks"), "approval_schema"), "pass");
    });
}

#[test]
fn doctor_skips_database_checks_when_config_is_invalid() {
    with_env(&[("SIGNOFF_DATABASE_MAX_CONNECTIONS", "0")], || {
        let result = doctor::run(false);

        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] database_connectivity"));
        assert!(result.output.contains("- [skip] approval_schema"));
    });
}

#[test]
fn config_attributes_env_overrides_and_defaults() {
    with_env(&[("SIGNOFF_DATABASE_URL", "sqlite::memory:"), ("SIGNOFF_LOG_LEVEL", "debug")], || {
        let output = config::run();

        assert!(output.starts_with("effective config (source precedence: env > file > default):"));
        assert!(output
            .contains("- database.url = sqlite::memory: (source: env (SIGNOFF_DATABASE_URL))"));
        assert!(output.contains("- logging.level = debug (source: env (SIGNOFF_LOG_LEVEL))"));
        assert!(output.contains("- approvals.allow_resubmission = true (source: default)"));
    });
}

#[test]
fn resolve_routes_through_the_stored_matrix() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("signoff.db").display());
    seed_matrix(&url);

    with_env(&[("SIGNOFF_DATABASE_URL", url.as_str())], || {
        let result = resolve::run(&args("C1", "purchase_order", "25000"));
        assert_eq!(result.exit_code, 0, "expected resolution: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "resolve");
        assert_eq!(payload["message"], "purchase_order 25000 routes through L1 finance -> L2 director");
        assert_eq!(payload["details"]["requires_approval"], true);
        let levels = payload["details"]["levels"].as_array().expect("levels");
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[1]["approver_role_id"], "director");

        let small = parse_payload(&resolve::run(&args("C1", "purchase_order", "500")).output);
        assert_eq!(small["details"]["levels"].as_array().map(Vec::len), Some(1));

        let other_company = parse_payload(&resolve::run(&args("C2", "purchase_order", "25000")).output);
        assert_eq!(other_company["details"]["requires_approval"], false);
        assert_eq!(other_company["message"], "purchase_order 25000 is approved on submission");
    });
}

#[test]
fn resolve_rejects_bad_input_without_touching_the_database() {
    with_env(&[("SIGNOFF_DATABASE_URL", "sqlite:///nonexistent/dir/signoff.db")], || {
        let unknown_type = resolve::run(&args("C1", "timesheet", "10"));
        assert_eq!(unknown_type.exit_code, 6);
        let payload = parse_payload(&unknown_type.output);
        assert_eq!(payload["error_class"], "validation_error");
        assert!(payload["message"].as_str().unwrap_or_default().contains("purchase_order"));

        let bad_amount = resolve::run(&args("C1", "purchase_order", "ten"));
        assert_eq!(bad_amount.exit_code, 6);
    });
}

#[test]
fn resolve_rejects_negative_amounts() {
    with_env(&MEMORY_DB, || {
        let result = resolve::run(&args("C1", "purchase_order", "-1"));

        assert_eq!(result.exit_code, 6);
        assert_eq!(parse_payload(&result.output)["error_class"], "validation_error");
    });
}

fn args(company: &str, document_type: &str, amount: &str) -> ResolveArgs {
    ResolveArgs {
        company: company.to_string(),
        document_type: document_type.to_string(),
        amount: amount.to_string(),
    }
}

fn seed_matrix(url: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    runtime.block_on(async {
        let pool = connect_with_settings(url, 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");

        let company = CompanyId("C1".to_string());
        let roles = SqlRoleDirectory::new(pool.clone());
        let matrix = SqlMatrixRepository::new(pool.clone());
        for (level, role, min) in [(1u8, "finance", 0i64), (2u8, "director", 10_000i64)] {
            let role_id = RoleId(role.to_string());
            roles.define_role(&company, &role_id, role).await.expect("role");
            matrix
                .insert_rule(ApprovalMatrixRule {
                    id: RuleId(format!("rule-{level}")),
                    company_id: company.clone(),
                    document_type: DocumentType::PurchaseOrder,
                    min_amount: Decimal::from(min),
                    max_amount: None,
                    approver_role_id: role_id,
                    approval_level: level,
                    is_mandatory: true,
                    is_active: true,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
                .await
                .expect("rule");
        }

        pool.close().await;
    });
}

fn check_status<'a>(checks: &'a [Value], name: &str) -> &'a str {
    checks
        .iter()
        .find(|check| check["name"] == name)
        .and_then(|check| check["status"].as_str())
        .unwrap_or("missing")
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SIGNOFF_DATABASE_URL",
        "SIGNOFF_DATABASE_MAX_CONNECTIONS",
        "SIGNOFF_DATABASE_TIMEOUT_SECS",
        "SIGNOFF_SERVER_BIND_ADDRESS",
        "SIGNOFF_SERVER_PORT",
        "SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SIGNOFF_LOGGING_LEVEL",
        "SIGNOFF_LOGGING_FORMAT",
        "SIGNOFF_LOG_LEVEL",
        "SIGNOFF_LOG_FORMAT",
        "SIGNOFF_APPROVALS_ALLOW_RESUBMISSION",
        "SIGNOFF_APPROVALS_MAX_APPROVAL_LEVEL",
        "SIGNOFF_APPROVALS_DEFAULT_PAGE_SIZE",
        "SIGNOFF_APPROVALS_MAX_PAGE_SIZE",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
