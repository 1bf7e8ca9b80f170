use super::common::*;
use std::sync::Arc;

use crate::workflows::collections::domain::{ExecutionStatus, TenantPlan};
use crate::workflows::collections::ledger;
use crate::workflows::collections::memory::InMemoryCollectionsStore;
use crate::workflows::collections::scheduler::PollSummary;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_on_one_execution_have_a_single_winner() {
    let harness = Harness::new(TenantPlan::Pro, vec![email(1, 0)]);
    let enrollment = harness.enroll("deb-1", t0());
    let execution = harness.pending(&enrollment).remove(0);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store: Arc<InMemoryCollectionsStore> = Arc::clone(&harness.store);
        let execution = execution.clone();
        handles.push(tokio::spawn(async move {
            ledger::claim(&*store, &execution, t0()).expect("claim runs")
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("task joins").is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(
        harness.executions(&enrollment)[0].status,
        ExecutionStatus::Executing
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_polls_send_each_message_once() {
    let harness = Harness::new(TenantPlan::Pro, vec![email(1, 0), sms(2, 3)]);
    for index in 0..20 {
        harness.enroll(&format!("deb-{index}"), t0());
    }

    let mut polls = Vec::new();
    for _ in 0..4 {
        let service = Arc::clone(&harness.service);
        polls.push(tokio::spawn(async move {
            service.execute_workflows(t0(), None).await
        }));
    }

    let mut total = PollSummary::default();
    for poll in polls {
        let summary = poll.await.expect("task joins").expect("poll succeeds");
        total.executed += summary.executed;
        total.failed += summary.failed;
        total.skipped += summary.skipped;
    }

    assert_eq!(total.executed, 20);
    assert_eq!(total.failed, 0);
    assert_eq!(total.skipped, 0);
    assert_eq!(harness.channels.emails().len(), 20);
    assert_eq!(harness.store.communications().len(), 20);

    let completed = harness
        .store
        .executions()
        .iter()
        .filter(|execution| execution.status == ExecutionStatus::Completed)
        .count();
    assert_eq!(completed, 20);
}

#[tokio::test]
async fn batch_limit_is_clamped_and_leftovers_wait_for_the_next_poll() {
    let mut config = engine_config();
    config.batch_limit = 3;
    let harness = Harness::with_config(TenantPlan::Pro, vec![email(1, 0)], config);
    for index in 0..5 {
        harness.enroll(&format!("deb-{index}"), t0());
    }

    let first = harness
        .service
        .execute_workflows(t0(), Some(100))
        .await
        .expect("poll");
    assert_eq!(first.executed, 3);

    let second = harness
        .service
        .execute_workflows(t0(), Some(1))
        .await
        .expect("poll");
    assert_eq!(second.executed, 1);

    let third = harness.service.execute_workflows(t0(), None).await.expect("poll");
    assert_eq!(third.executed, 1);
    assert_eq!(harness.channels.emails().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn rows_not_reached_before_the_deadline_stay_pending() {
    let mut config = engine_config();
    config.concurrency = 1;
    config.dispatch_timeout = std::time::Duration::from_secs(30);
    config.poll_deadline = std::time::Duration::from_secs(15);
    let harness = Harness::with_config(TenantPlan::Pro, vec![email(1, 0)], config);
    for index in 0..3 {
        harness.enroll(&format!("deb-{index}"), t0());
    }
    harness
        .channels
        .delay_sends(std::time::Duration::from_secs(20));

    let summary = harness.service.execute_workflows(t0(), None).await.expect("poll");
    assert_eq!(summary.executed, 1);
    assert_eq!(summary.deferred, 2);

    let pending = harness
        .store
        .executions()
        .iter()
        .filter(|execution| execution.status == ExecutionStatus::Pending)
        .count();
    assert_eq!(pending, 2);
}
