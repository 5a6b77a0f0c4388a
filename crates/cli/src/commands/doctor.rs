use serde::Serialize;
use showroom_core::config::{AppConfig, ExtractorKind, LoadOptions};
use showroom_db::{connect_with_settings, migrations::MIGRATOR, DbPool};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Verdict {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    status: Verdict,
    details: String,
}

#[derive(Debug, Default)]
struct Report {
    checks: Vec<Check>,
}

impl Report {
    fn record(&mut self, name: &'static str, status: Verdict, details: impl Into<String>) {
        self.checks.push(Check { name, status, details: details.into() });
    }

    fn skip_all(&mut self, names: &[&'static str], reason: &str) {
        for name in names {
            self.record(name, Verdict::Skipped, format!("skipped: {reason}"));
        }
    }

    fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.status == Verdict::Pass)
    }

    fn to_json(&self) -> String {
        let failing: Vec<&str> = self
            .checks
            .iter()
            .filter(|check| check.status != Verdict::Pass)
            .map(|check| check.name)
            .collect();
        serde_json::json!({
            "overall_status": if self.passed() { "pass" } else { "fail" },
            "failing": failing,
            "checks": self.checks,
        })
        .to_string()
    }

    fn to_text(&self) -> String {
        let headline = if self.passed() {
            "showroom doctor: ready".to_string()
        } else {
            format!(
                "showroom doctor: {} of {} check(s) need attention",
                self.checks.iter().filter(|check| check.status != Verdict::Pass).count(),
                self.checks.len()
            )
        };
        std::iter::once(headline)
            .chain(self.checks.iter().map(|check| {
                let mark = match check.status {
                    Verdict::Pass => "PASS",
                    Verdict::Fail => "FAIL",
                    Verdict::Skipped => "SKIP",
                };
                format!("  {mark:<4}  {:<22} {}", check.name, check.details)
            }))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs the readiness checks. Returns whether all passed and the rendered
/// report.
pub fn run(json_output: bool) -> (bool, String) {
    let report = inspect();
    let rendered = if json_output { report.to_json() } else { report.to_text() };
    (report.passed(), rendered)
}

fn inspect() -> Report {
    let mut report = Report::default();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            report.record("config_validation", Verdict::Pass, "configuration loaded and validated");
            config
        }
        Err(error) => {
            report.record("config_validation", Verdict::Fail, error.to_string());
            report.skip_all(
                &["extractor_readiness", "database_connectivity", "schema_migrations"],
                "configuration did not load",
            );
            return report;
        }
    };

    let extractor = match config.conversation.extractor {
        ExtractorKind::Keyword => "keyword extractor; no language model needed".to_string(),
        ExtractorKind::Llm => format!(
            "{:?} model `{}` via {}",
            config.llm.provider,
            config.llm.model,
            config.llm.base_url.as_deref().unwrap_or("the provider's default endpoint"),
        ),
    };
    report.record("extractor_readiness", Verdict::Pass, extractor);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            report.record("database_connectivity", Verdict::Fail, format!("async runtime: {error}"));
            report.skip_all(&["schema_migrations"], "no async runtime");
            return report;
        }
    };

    runtime.block_on(inspect_database(&config, &mut report));
    report
}

async fn inspect_database(config: &AppConfig, report: &mut Report) {
    let pool = match connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    {
        Ok(pool) => pool,
        Err(error) => {
            report.record("database_connectivity", Verdict::Fail, error.to_string());
            report.skip_all(&["schema_migrations"], "database unreachable");
            return;
        }
    };
    report.record(
        "database_connectivity",
        Verdict::Pass,
        format!("connected to `{}`", config.database.url),
    );

    let (status, details) = schema_status(&pool).await;
    report.record("schema_migrations", status, details);
    pool.close().await;
}

async fn schema_status(pool: &DbPool) -> (Verdict, String) {
    let known = MIGRATOR.iter().count() as i64;
    let applied =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    if applied >= known {
        (Verdict::Pass, format!("{applied}/{known} migration(s) applied"))
    } else {
        (Verdict::Fail, format!("{applied}/{known} migration(s) applied; run `showroom migrate`"))
    }
}
