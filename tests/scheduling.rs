mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{GatedStore, Harness};
use ptqs::clock::{after, Clock};
use ptqs::models::{FailOutcome, Priority, ResourceType, TaskStatus};
use serde_json::json;
use tokio_test::assert_ok;

#[tokio::test]
async fn claims_follow_priority_then_age() {
  let h = Harness::new();
  let rt = ResourceType::PropertyRecords;
  let submitted = [
    h.task(rt, Priority::Low, "inv"),
    h.task(rt, Priority::Critical, "inv"),
    h.task(rt, Priority::Low, "inv"),
    h.task(rt, Priority::Normal, "inv"),
    h.task(rt, Priority::Critical, "inv"),
  ];
  for t in &submitted {
    assert!(assert_ok!(h.scheduler.submit(t.clone()).await));
  }

  let mut claimed = Vec::new();
  while let Some(t) = assert_ok!(h.scheduler.claim(rt).await) {
    claimed.push(t);
  }
  assert_eq!(claimed.len(), submitted.len());
  assert!(claimed.windows(2).all(|w| {
    w[0].priority < w[1].priority || (w[0].priority == w[1].priority && w[0].created_at <= w[1].created_at)
  }));
}

#[tokio::test]
async fn scenario_a_mixed_priorities_come_out_in_rank_order() {
  let h = Harness::new();
  let rt = ResourceType::WebSearch;
  for priority in [Priority::Normal, Priority::Critical, Priority::High] {
    h.scheduler.submit(h.task(rt, priority, "inv-a")).await.unwrap();
  }
  let mut ranks = Vec::new();
  for _ in 0..3 {
    ranks.push(h.scheduler.claim(rt).await.unwrap().unwrap().priority.rank());
  }
  assert_eq!(ranks, vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_never_share_a_task() {
  let h = Harness::new();
  let rt = ResourceType::CompanyRegistry;
  let available = 20;
  for i in 0..available {
    let priority = Priority::ALL[i % Priority::ALL.len()];
    h.scheduler.submit(h.task(rt, priority, "inv-p2")).await.unwrap();
  }

  let claimers: Vec<_> = (0..50)
    .map(|_| {
      let scheduler = h.scheduler.clone();
      tokio::spawn(async move { scheduler.claim(rt).await.unwrap() })
    })
    .collect();
  let mut ids = Vec::new();
  for claimer in claimers {
    if let Some(task) = claimer.await.unwrap() {
      ids.push(task.id);
    }
  }
  let distinct: HashSet<_> = ids.iter().copied().collect();
  assert_eq!(ids.len(), available);
  assert_eq!(distinct.len(), available);
}

#[tokio::test]
async fn always_failing_task_exhausts_its_retries() {
  let h = Harness::new();
  let rt = ResourceType::SocialMedia;
  let task = h.task(rt, Priority::Normal, "inv-p3");
  let max_retries = task.max_retries;
  h.scheduler.submit(task.clone()).await.unwrap();

  let mut retrying = 0;
  let mut ready_times = Vec::new();
  loop {
    let claimed = h.scheduler.claim(rt).await.unwrap().expect("task should be claimable");
    assert_eq!(claimed.id, task.id);
    let failed_at = h.clock.now();
    match h.scheduler.fail(task.id, "connection reset").await.unwrap() {
      FailOutcome::Retrying { retry_count, ready_at } => {
        retrying += 1;
        assert_eq!(retry_count, retrying);
        assert_eq!(ready_at, after(failed_at, h.scheduler.config().retry_delay(retry_count)));
        ready_times.push(ready_at);
        h.clock.advance(h.scheduler.config().retry_delay(retry_count));
        assert_eq!(h.scheduler.sweep_retries().await.unwrap(), 1);
      }
      FailOutcome::Failed { retry_count } => {
        assert_eq!(retry_count, max_retries + 1);
        break;
      }
      FailOutcome::Ignored => panic!("running task failure was ignored"),
    }
  }

  assert_eq!(retrying, max_retries);
  assert!(ready_times.windows(2).all(|w| w[0] <= w[1]));
  let final_record = h.scheduler.get_task(task.id).await.unwrap().unwrap();
  assert_eq!(final_record.status, TaskStatus::Failed);
  assert_eq!(final_record.retry_count, max_retries + 1);
  assert!(final_record.completed_at.is_some());
  assert_eq!(final_record.error.as_deref(), Some("connection reset"));
}

#[tokio::test]
async fn scenario_b_two_retries_then_failed() {
  let h = Harness::new();
  let rt = ResourceType::CourtRecords;
  let task = h.task(rt, Priority::High, "inv-b").with_max_retries(2);
  h.scheduler.submit(task.clone()).await.unwrap();

  h.scheduler.claim(rt).await.unwrap().unwrap();
  let now = h.clock.now();
  assert_eq!(
    h.scheduler.fail(task.id, "timeout").await.unwrap(),
    FailOutcome::Retrying { retry_count: 1, ready_at: now }
  );
  assert_eq!(h.scheduler.get_task(task.id).await.unwrap().unwrap().status, TaskStatus::Retrying);
  assert_eq!(h.scheduler.sweep_retries().await.unwrap(), 1);
  assert_eq!(h.scheduler.get_task(task.id).await.unwrap().unwrap().status, TaskStatus::Pending);

  h.scheduler.claim(rt).await.unwrap().unwrap();
  let now = h.clock.now();
  assert_eq!(
    h.scheduler.fail(task.id, "timeout").await.unwrap(),
    FailOutcome::Retrying { retry_count: 2, ready_at: after(now, Duration::from_secs(30)) }
  );
  assert_eq!(h.scheduler.sweep_retries().await.unwrap(), 0);
  assert_eq!(h.scheduler.claim(rt).await.unwrap(), None);
  h.clock.advance(Duration::from_secs(30));
  assert_eq!(h.scheduler.sweep_retries().await.unwrap(), 1);

  h.scheduler.claim(rt).await.unwrap().unwrap();
  assert_eq!(
    h.scheduler.fail(task.id, "timeout").await.unwrap(),
    FailOutcome::Failed { retry_count: 3 }
  );

  let progress = h.scheduler.get_progress("inv-b").await.unwrap().unwrap();
  assert_eq!(progress.failed_tasks, 1);
  assert_eq!(progress.running_tasks, 0);
  assert_eq!(progress.total_tasks, 1);
}

#[tokio::test]
async fn scenario_c_breaker_blocks_claims_until_cooldown() {
  let h = Harness::new();
  let rt = ResourceType::CourtRecords;
  let tasks: Vec<_> = (0..6).map(|_| h.task(rt, Priority::Normal, "inv-c")).collect();
  for t in &tasks {
    h.scheduler.submit(t.clone()).await.unwrap();
  }
  for _ in 0..5 {
    h.scheduler.claim(rt).await.unwrap().unwrap();
  }
  for t in &tasks[..5] {
    h.scheduler.fail(t.id, "503 from registry").await.unwrap();
  }

  let status = h.scheduler.circuit_status(rt).await.unwrap();
  assert!(status.open);
  assert_eq!(status.consecutive_failures, 5);
  assert_eq!(status.threshold, 5);

  assert_eq!(h.scheduler.claim(rt).await.unwrap(), None);
  assert!(!h.scheduler.submit(h.task(rt, Priority::Critical, "inv-c")).await.unwrap());
  let stats = h.scheduler.queue_stats(Some(rt)).await.unwrap();
  assert_eq!(stats.pending_for(rt), 1);

  // Due retries stay parked while the breaker is open.
  assert_eq!(h.scheduler.sweep_retries().await.unwrap(), 0);
  assert_eq!(h.scheduler.queue_stats(Some(rt)).await.unwrap().retrying, 5);

  // Other resource types are unaffected.
  let other = h.task(ResourceType::WebSearch, Priority::Normal, "inv-c");
  assert!(h.scheduler.submit(other.clone()).await.unwrap());
  assert_eq!(h.scheduler.claim(ResourceType::WebSearch).await.unwrap().map(|t| t.id), Some(other.id));

  h.clock.advance(Duration::from_secs(301));
  let claimed = h.scheduler.claim(rt).await.unwrap().unwrap();
  assert_eq!(claimed.id, tasks[5].id);
  assert!(h.scheduler.sweep_retries().await.unwrap() > 0);
}

#[tokio::test]
async fn a_single_success_resets_the_breaker() {
  let h = Harness::new();
  let rt = ResourceType::PropertyRecords;
  let tasks: Vec<_> = (0..5).map(|_| h.task(rt, Priority::Normal, "inv-p5")).collect();
  for t in &tasks {
    h.scheduler.submit(t.clone()).await.unwrap();
    h.scheduler.claim(rt).await.unwrap().unwrap();
  }
  for t in &tasks[..4] {
    h.scheduler.fail(t.id, "boom").await.unwrap();
  }
  assert_eq!(h.scheduler.circuit_status(rt).await.unwrap().consecutive_failures, 4);

  assert!(h.scheduler.complete(tasks[4].id, json!({"parcels": 3})).await.unwrap());
  let status = h.scheduler.circuit_status(rt).await.unwrap();
  assert_eq!(status.consecutive_failures, 0);
  assert_eq!(status.open_until, None);
  assert!(!status.open);
}

#[tokio::test]
async fn scenario_d_cancelled_pending_task_is_never_claimed() {
  let h = Harness::new();
  let rt = ResourceType::CompanyRegistry;
  let doomed = h.task(rt, Priority::Critical, "inv-d");
  let kept = h.task(rt, Priority::Low, "inv-d");
  h.scheduler.submit(doomed.clone()).await.unwrap();
  h.scheduler.submit(kept.clone()).await.unwrap();

  assert!(h.scheduler.cancel(doomed.id).await.unwrap());
  assert_eq!(h.scheduler.claim(rt).await.unwrap().map(|t| t.id), Some(kept.id));
  assert_eq!(h.scheduler.claim(rt).await.unwrap(), None);

  let record = h.scheduler.get_task(doomed.id).await.unwrap().unwrap();
  assert_eq!(record.status, TaskStatus::Cancelled);
  assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn progress_counts_stay_consistent() {
  let h = Harness::new();
  let rt = ResourceType::WebSearch;
  let parent = "inv-p6";
  let tasks: Vec<_> = (0..6)
    .map(|i| h.task(rt, Priority::ALL[i % 3], parent).with_max_retries(1))
    .collect();

  let check = |p: &ptqs::models::ProgressRecord| {
    assert!(p.completed_tasks + p.failed_tasks + p.running_tasks + p.cancelled_tasks <= p.total_tasks);
  };

  for t in &tasks {
    h.scheduler.submit(t.clone()).await.unwrap();
    check(&h.scheduler.get_progress(parent).await.unwrap().unwrap());
  }

  let mut round = 0;
  loop {
    let Some(task) = h.scheduler.claim(rt).await.unwrap() else {
      h.clock.advance(Duration::from_secs(60));
      if h.scheduler.sweep_retries().await.unwrap() == 0 {
        break;
      }
      continue;
    };
    check(&h.scheduler.get_progress(parent).await.unwrap().unwrap());
    round += 1;
    if round % 2 == 0 {
      h.scheduler.complete(task.id, json!({"hits": round})).await.unwrap();
    } else {
      h.scheduler.fail(task.id, "rate limited").await.unwrap();
    }
    check(&h.scheduler.get_progress(parent).await.unwrap().unwrap());
  }

  let progress = h.scheduler.get_progress(parent).await.unwrap().unwrap();
  assert!(progress.is_finished());
  assert_eq!(progress.total_tasks, tasks.len() as u64);
  assert_eq!(progress.running_tasks, 0);
  assert_eq!(progress.completed_tasks + progress.failed_tasks, progress.total_tasks);

  let rebuilt = h.scheduler.rebuild_progress(parent).await.unwrap().unwrap();
  assert_eq!(rebuilt.completed_tasks, progress.completed_tasks);
  assert_eq!(rebuilt.failed_tasks, progress.failed_tasks);
}

#[tokio::test]
async fn store_outage_surfaces_as_infrastructure_error() {
  let h = Harness::new();
  let task = h.task(ResourceType::WebSearch, Priority::Normal, "inv-e");
  h.store.set_offline(true);
  let err = h.scheduler.submit(task.clone()).await.unwrap_err();
  assert!(err.is_infrastructure());
  h.store.set_offline(false);
  assert!(h.scheduler.get_task(task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn overlapping_sweeps_requeue_a_retry_once() {
  let h = Harness::new();
  let rt = ResourceType::WebSearch;
  let t = h.task(rt, Priority::Normal, "inv-sweep");
  h.scheduler.submit(t.clone()).await.unwrap();
  h.scheduler.claim(rt).await.unwrap().unwrap();
  assert!(h.scheduler.fail(t.id, "timeout").await.unwrap().will_retry());

  // The second instance stalls after taking the retry entry, before it
  // has re-enqueued the task.
  let gated = Arc::new(GatedStore::new(h.store.clone()));
  let other = h.peer(gated.clone());
  gated.arm();
  let stalled = tokio::spawn(async move { other.sweep_retries().await });
  gated.reached.notified().await;

  assert_eq!(h.scheduler.sweep_retries().await.unwrap(), 0);
  assert_eq!(h.scheduler.claim(rt).await.unwrap(), None);

  gated.release.notify_one();
  assert_eq!(stalled.await.unwrap().unwrap(), 1);
  assert_eq!(h.scheduler.sweep_retries().await.unwrap(), 0);

  assert_eq!(h.scheduler.claim(rt).await.unwrap().unwrap().id, t.id);
  assert_eq!(h.scheduler.claim(rt).await.unwrap(), None);
  assert_eq!(h.scheduler.get_task(t.id).await.unwrap().unwrap().status, TaskStatus::Running);
  let progress = h.scheduler.get_progress("inv-sweep").await.unwrap().unwrap();
  assert_eq!((progress.total_tasks, progress.running_tasks), (1, 1));
}

#[tokio::test]
async fn sweep_interrupted_before_queueing_is_finished_by_the_next_sweep() {
  let h = Harness::new();
  let rt = ResourceType::PropertyRecords;
  let t = h.task(rt, Priority::High, "inv-partial");
  h.scheduler.submit(t.clone()).await.unwrap();
  h.scheduler.claim(rt).await.unwrap().unwrap();
  h.scheduler.fail(t.id, "reset by peer").await.unwrap();

  h.store.fail_keys_containing(Some(":queue:"));
  assert!(h.scheduler.sweep_retries().await.unwrap_err().is_infrastructure());
  h.store.fail_keys_containing(None);

  assert_eq!(h.scheduler.get_task(t.id).await.unwrap().unwrap().status, TaskStatus::Pending);
  assert_eq!(h.scheduler.queue_stats(Some(rt)).await.unwrap().retrying, 1);

  assert_eq!(h.scheduler.sweep_retries().await.unwrap(), 1);
  assert_eq!(h.scheduler.queue_stats(Some(rt)).await.unwrap().retrying, 0);
  let claimed = h.scheduler.claim(rt).await.unwrap().unwrap();
  assert_eq!((claimed.id, claimed.retry_count), (t.id, 1));
}

#[tokio::test]
async fn colon_parent_ids_get_their_own_progress() {
  let h = Harness::new();
  h.scheduler.submit(h.task(ResourceType::CourtRecords, Priority::Normal, "inv-1")).await.unwrap();

  assert_eq!(h.scheduler.get_progress("inv-1:tasks").await.unwrap(), None);
  assert_eq!(h.scheduler.get_progress("inv-1").await.unwrap().unwrap().total_tasks, 1);
}
