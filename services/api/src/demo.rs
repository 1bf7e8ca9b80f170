use crate::infra::{
    demo_tenant_id, format_timestamp, parse_plan, seed_store, LoggingSenders, SAMPLE_DEBTORS,
};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use dunning::config::EngineConfig;
use dunning::error::AppError;
use dunning::workflows::collections::{
    CollectionsService, Debtor, DebtorId, DebtorImporter, InMemoryCollectionsStore,
    PollSummary, TenantPlan,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Debtor CSV export. Defaults to the bundled sample roster.
    #[arg(long)]
    pub(crate) debtors: Option<PathBuf>,
    /// Number of simulated days, one poll cycle per day.
    #[arg(long, default_value_t = 14)]
    pub(crate) days: u32,
    /// Tenant plan controlling which channels may run (free, starter, pro, enterprise).
    #[arg(long, default_value = "pro", value_parser = parse_plan)]
    pub(crate) plan: TenantPlan,
}

#[derive(Args, Debug)]
pub(crate) struct PollArgs {
    /// Debtor CSV export. Defaults to the bundled sample roster.
    #[arg(long)]
    pub(crate) debtors: Option<PathBuf>,
    /// Upper bound on executions processed in the cycle.
    #[arg(long)]
    pub(crate) limit: Option<usize>,
}

type DemoService = CollectionsService<InMemoryCollectionsStore>;

fn load_roster(path: Option<PathBuf>) -> Result<Vec<Debtor>, AppError> {
    let importer = DebtorImporter::new(demo_tenant_id());
    let debtors = match path {
        Some(path) => importer.from_path(path)?,
        None => importer.from_reader(SAMPLE_DEBTORS.as_bytes())?,
    };
    Ok(debtors)
}

fn build_service(
    plan: TenantPlan,
    debtors: Vec<Debtor>,
) -> (Arc<InMemoryCollectionsStore>, DemoService, Vec<DebtorId>) {
    let store = Arc::new(InMemoryCollectionsStore::new());
    let ids = seed_store(&store, plan, debtors);
    let service = CollectionsService::new(
        Arc::clone(&store),
        LoggingSenders::channel_senders(),
        &EngineConfig::default(),
    );
    (store, service, ids)
}

fn enroll_all(service: &DemoService, ids: &[DebtorId], now: DateTime<Utc>) -> usize {
    let mut enrolled = 0;
    for id in ids {
        match service.start_workflow(id, None, now) {
            Ok(_) => enrolled += 1,
            Err(error) => println!("  ! {id}: {error}"),
        }
    }
    enrolled
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        debtors,
        days,
        plan,
    } = args;

    let roster = load_roster(debtors)?;
    let (store, service, ids) = build_service(plan, roster);
    let start = Utc::now();

    println!("=== Collections campaign demo ===");
    println!("Tenant plan: {plan:?}");
    println!("Debtors imported: {}", ids.len());
    let enrolled = enroll_all(&service, &ids, start);
    println!("Enrolled: {enrolled}");
    println!();

    let mut totals = PollSummary::default();
    for day in 0..=days {
        let now = start + Duration::days(i64::from(day));
        let summary = service.execute_workflows(now, None).await?;
        if summary.executed + summary.skipped + summary.failed == 0 {
            continue;
        }
        println!(
            "Day {day:>2}: executed {}, skipped {}, failed {}",
            summary.executed, summary.skipped, summary.failed
        );
        for error in &summary.errors {
            println!("        - {error}");
        }
        totals.executed += summary.executed;
        totals.skipped += summary.skipped;
        totals.failed += summary.failed;
    }

    println!();
    println!(
        "Totals: executed {}, skipped {}, failed {}, communications {}",
        totals.executed,
        totals.skipped,
        totals.failed,
        store.communications().len()
    );
    println!();
    println!("=== Enrollment timelines ===");
    for id in &ids {
        let timeline = match service.enrollment_timeline(id) {
            Ok(timeline) => timeline,
            Err(_) => continue,
        };
        let enrollment = &timeline.enrollment;
        println!(
            "{id} [{}] step {}{}",
            enrollment.status.label(),
            enrollment.current_step_number,
            enrollment
                .note
                .as_deref()
                .map(|note| format!(" ({note})"))
                .unwrap_or_default()
        );
        for execution in &timeline.executions {
            let when = execution
                .executed_at
                .unwrap_or(execution.scheduled_at);
            println!(
                "    step {} attempt {} {:<9} {}{}",
                execution.step_number,
                execution.attempt,
                execution.status.label(),
                format_timestamp(when),
                execution
                    .error_message
                    .as_deref()
                    .map(|message| format!(" - {message}"))
                    .unwrap_or_default()
            );
        }
    }

    Ok(())
}

pub(crate) async fn run_poll(args: PollArgs) -> Result<(), AppError> {
    let PollArgs { debtors, limit } = args;
    let roster = load_roster(debtors)?;
    let (_store, service, ids) = build_service(TenantPlan::Pro, roster);
    let now = Utc::now();
    enroll_all(&service, &ids, now);

    let summary = service.execute_workflows(now, limit).await?;
    let rendered = serde_json::to_string_pretty(&summary)
        .map_err(|error| AppError::Io(std::io::Error::other(error)))?;
    println!("{rendered}");
    Ok(())
}
