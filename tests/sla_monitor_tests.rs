mod test_utils;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use leadflow::config::AppConfig;
use leadflow::distribution::{
    AssignRequest, AssignmentService, RedistributionAction, RedistributionStateMachine,
    RosterDirectory, RosterMember,
};
use leadflow::error::DistributionError;
use leadflow::models::assignment_record::AssignmentMode;
use leadflow::models::distribution_config::SlaLimitAction;
use leadflow::repositories::{
    AssignmentRecordRepository, ClaimOutcome, OpportunityRepository, PipelineMemberRepository,
};
use leadflow::sla_monitor::SlaMonitor;
use sea_orm::{DatabaseConnection, DbErr};
use test_utils::{
    TestPipeline, at, create_lead, create_pipeline, round_robin_config, setup_test_db_arc,
    sla_config, with_business_hours,
};
use uuid::Uuid;

fn monitor(db: &Arc<DatabaseConnection>) -> SlaMonitor {
    SlaMonitor::new(Arc::new(AppConfig::default()), db.clone())
}

async fn assigned_lead(
    db: &Arc<DatabaseConnection>,
    pipeline: &TestPipeline,
    when: DateTime<Utc>,
) -> Uuid {
    let lead = create_lead(db, pipeline).await.unwrap();
    AssignmentService::new(db.clone())
        .assign_at(AssignRequest::new_lead(lead, pipeline.pipeline_id), when)
        .await
        .unwrap();
    lead
}

#[tokio::test]
async fn scenario_b_redistributes_until_limit_then_unassigns() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        2,
        SlaLimitAction::Unassign,
    );
    let pipeline = create_pipeline(&db, config, 3).await.unwrap();
    let (ana, bruno, carla) = (pipeline.members[0], pipeline.members[1], pipeline.members[2]);
    let t0 = at("2025-06-04T10:00:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;
    let opportunities = OpportunityRepository::new(db.clone());
    let records = AssignmentRecordRepository::new(db.clone());
    let monitor = monitor(&db);

    let owner = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(owner.responsible_member_id, Some(ana));

    let report = monitor
        .scan_and_redistribute(t0 + Duration::minutes(31))
        .await
        .unwrap();
    assert_eq!(report.redistributions, 1);
    let current = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(current.responsible_member_id, Some(bruno));

    monitor
        .scan_and_redistribute(t0 + Duration::minutes(62))
        .await
        .unwrap();
    let current = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(current.responsible_member_id, Some(carla));

    let report = monitor
        .scan_and_redistribute(t0 + Duration::minutes(93))
        .await
        .unwrap();
    assert_eq!(report.limit_actions, 1);
    assert_eq!(report.redistributions, 0);

    let current = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(current.responsible_member_id, None);
    assert_eq!(current.assigned_at, None);
    assert!(current.sla_exhausted);

    let report = monitor
        .scan_and_redistribute(t0 + Duration::minutes(200))
        .await
        .unwrap();
    assert_eq!(report.candidates, 0);

    let history = records.list_for_opportunity(lead).await.unwrap();
    let summary: Vec<(Uuid, AssignmentMode, i32)> = history
        .iter()
        .map(|r| (r.assigned_to, r.mode, r.redistribution_sequence))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ana, AssignmentMode::RoundRobin, 0),
            (bruno, AssignmentMode::SlaRedistribution, 1),
            (carla, AssignmentMode::SlaRedistribution, 2),
        ]
    );
    assert!(
        history[1..]
            .iter()
            .all(|r| r.reason.as_deref() == Some("sla_timeout"))
    );
    assert_eq!(records.count_redistributions(lead).await.unwrap(), 2);
}

#[tokio::test]
async fn lead_within_window_is_left_alone() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        1,
        SlaLimitAction::KeepLastAssignee,
    );
    let pipeline = create_pipeline(&db, config, 2).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    assigned_lead(&db, &pipeline, t0).await;

    let report = monitor(&db)
        .scan_and_redistribute(t0 + Duration::minutes(29))
        .await
        .unwrap();

    assert_eq!(report.pipelines_scanned, 1);
    assert_eq!(report.candidates, 0);
}

#[tokio::test]
async fn back_to_back_scans_redistribute_once() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        3,
        SlaLimitAction::KeepLastAssignee,
    );
    let pipeline = create_pipeline(&db, config, 3).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;
    let monitor = monitor(&db);
    let scan_at = t0 + Duration::minutes(31);

    let first = monitor.scan_and_redistribute(scan_at).await.unwrap();
    let second = monitor.scan_and_redistribute(scan_at).await.unwrap();

    assert_eq!(first.redistributions, 1);
    assert_eq!(second.candidates, 0);
    let history = AssignmentRecordRepository::new(db.clone())
        .list_for_opportunity(lead)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn overlapping_scans_make_one_decision() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        3,
        SlaLimitAction::KeepLastAssignee,
    );
    let pipeline = create_pipeline(&db, config, 3).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;
    let scan_at = t0 + Duration::minutes(31);

    let first = monitor(&db);
    let second = monitor(&db);
    let (a, b) = tokio::join!(
        first.scan_and_redistribute(scan_at),
        second.scan_and_redistribute(scan_at)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.claims_won + b.claims_won, 1);
    assert_eq!(a.redistributions + b.redistributions, 1);
    let redistributions = AssignmentRecordRepository::new(db.clone())
        .count_redistributions(lead)
        .await
        .unwrap();
    assert_eq!(redistributions, 1);
}

#[tokio::test]
async fn first_contact_stops_the_timer() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        1,
        SlaLimitAction::Unassign,
    );
    let pipeline = create_pipeline(&db, config, 2).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;
    let opportunities = OpportunityRepository::new(db.clone());

    assert!(
        opportunities
            .mark_first_contact(lead, t0 + Duration::minutes(10))
            .await
            .unwrap()
    );
    assert!(
        !opportunities
            .mark_first_contact(lead, t0 + Duration::minutes(20))
            .await
            .unwrap()
    );

    let report = monitor(&db)
        .scan_and_redistribute(t0 + Duration::minutes(90))
        .await
        .unwrap();
    assert_eq!(report.candidates, 0);

    let current = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(current.responsible_member_id, Some(pipeline.members[0]));
    assert_eq!(
        current.first_contact_at.map(|t| t.with_timezone(&Utc)),
        Some(t0 + Duration::minutes(10))
    );
}

#[tokio::test]
async fn concurrent_reassignment_makes_the_claim_lose() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        2,
        SlaLimitAction::KeepLastAssignee,
    );
    let pipeline = create_pipeline(&db, config, 3).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;
    let opportunities = OpportunityRepository::new(db.clone());
    let scan_at = t0 + Duration::minutes(31);

    let candidates = opportunities
        .sla_candidates(pipeline.pipeline_id, scan_at - Duration::minutes(30), 10)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);

    AssignmentService::new(db.clone())
        .assign_at(
            AssignRequest::explicit(lead, pipeline.pipeline_id, pipeline.members[2]),
            scan_at,
        )
        .await
        .unwrap();

    let outcome = opportunities
        .claim_for_sla(&candidates[0], scan_at)
        .await
        .unwrap();
    assert_eq!(outcome, ClaimOutcome::Lost);

    let current = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(current.responsible_member_id, Some(pipeline.members[2]));
}

#[tokio::test]
async fn decision_after_first_contact_is_discarded() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        2,
        SlaLimitAction::Unassign,
    );
    let pipeline = create_pipeline(&db, config, 2).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;
    let opportunities = OpportunityRepository::new(db.clone());
    let scan_at = t0 + Duration::minutes(45);

    let candidate = opportunities
        .sla_candidates(pipeline.pipeline_id, scan_at - Duration::minutes(30), 10)
        .await
        .unwrap()
        .remove(0);
    let ClaimOutcome::Won { version } = opportunities
        .claim_for_sla(&candidate, scan_at)
        .await
        .unwrap()
    else {
        panic!("claim should win");
    };

    opportunities.mark_first_contact(lead, scan_at).await.unwrap();

    let machine = RedistributionStateMachine::new(db.clone(), AssignmentService::new(db.clone()));
    let action = machine
        .decide(lead, pipeline.pipeline_id, version, scan_at)
        .await
        .unwrap();
    assert_eq!(action, RedistributionAction::Discarded);

    let current = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(current.responsible_member_id, Some(pipeline.members[0]));
    assert!(!current.sla_exhausted);
}

#[tokio::test]
async fn keep_last_assignee_marks_exhausted_and_stops() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        1,
        SlaLimitAction::KeepLastAssignee,
    );
    let pipeline = create_pipeline(&db, config, 3).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;
    let opportunities = OpportunityRepository::new(db.clone());
    let monitor = monitor(&db);

    monitor
        .scan_and_redistribute(t0 + Duration::minutes(31))
        .await
        .unwrap();
    let report = monitor
        .scan_and_redistribute(t0 + Duration::minutes(62))
        .await
        .unwrap();
    assert_eq!(report.limit_actions, 1);

    let current = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(current.responsible_member_id, Some(pipeline.members[1]));
    assert!(current.sla_exhausted);
    let history = AssignmentRecordRepository::new(db.clone())
        .list_for_opportunity(lead)
        .await
        .unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.assigned_to, pipeline.members[1]);
    assert_eq!(current.assigned_at, Some(last.assigned_at));
    assert_eq!(
        current.assigned_at.map(|t| t.with_timezone(&Utc)),
        Some(t0 + Duration::minutes(31))
    );

    for minutes in [93, 124, 500] {
        let report = monitor
            .scan_and_redistribute(t0 + Duration::minutes(minutes))
            .await
            .unwrap();
        assert_eq!(report.candidates, 0);
    }
    let redistributions = AssignmentRecordRepository::new(db.clone())
        .count_redistributions(lead)
        .await
        .unwrap();
    assert_eq!(redistributions, 1);
}

#[tokio::test]
async fn return_to_admin_queue_clears_owner_and_tags_lead() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        1,
        SlaLimitAction::ReturnToAdminQueue,
    );
    let pipeline = create_pipeline(&db, config, 2).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;
    let opportunities = OpportunityRepository::new(db.clone());
    let monitor = monitor(&db);

    monitor
        .scan_and_redistribute(t0 + Duration::minutes(31))
        .await
        .unwrap();
    monitor
        .scan_and_redistribute(t0 + Duration::minutes(62))
        .await
        .unwrap();

    let current = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(current.responsible_member_id, None);
    assert!(current.needs_manual_assignment);
    assert!(current.sla_exhausted);

    // An administrator picks it up; the SLA does not restart.
    let result = AssignmentService::new(db.clone())
        .assign_at(
            AssignRequest::explicit(lead, pipeline.pipeline_id, pipeline.members[0]),
            t0 + Duration::minutes(70),
        )
        .await
        .unwrap();
    assert!(matches!(
        result,
        leadflow::distribution::AssignmentResult::Assigned {
            mode: AssignmentMode::Fallback,
            ..
        }
    ));

    let report = monitor
        .scan_and_redistribute(t0 + Duration::minutes(300))
        .await
        .unwrap();
    assert_eq!(report.candidates, 0);
}

#[tokio::test]
async fn sole_member_gets_the_lead_back() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        1,
        SlaLimitAction::KeepLastAssignee,
    );
    let pipeline = create_pipeline(&db, config, 1).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;

    let report = monitor(&db)
        .scan_and_redistribute(t0 + Duration::minutes(31))
        .await
        .unwrap();
    assert_eq!(report.redistributions, 1);

    let history = AssignmentRecordRepository::new(db.clone())
        .list_for_opportunity(lead)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].assigned_to, pipeline.members[0]);
    assert_eq!(history[1].redistribution_sequence, 1);
}

#[tokio::test]
async fn no_eligible_member_queues_and_keeps_owner() {
    let db = setup_test_db_arc().await.unwrap();
    let config = with_business_hours(sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        2,
        SlaLimitAction::Unassign,
    ));
    let pipeline = create_pipeline(&db, config, 2).await.unwrap();
    // Wednesday 17:50, overdue after closing time
    let t0 = at("2025-06-04T17:50:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;
    let opportunities = OpportunityRepository::new(db.clone());
    let scan_at = t0 + Duration::minutes(31);

    let report = monitor(&db).scan_and_redistribute(scan_at).await.unwrap();
    assert_eq!(report.queued_for_manual, 1);

    let current = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(current.responsible_member_id, Some(pipeline.members[0]));
    assert!(current.needs_manual_assignment);
    assert!(!current.sla_exhausted);
    assert_eq!(current.assigned_at.map(|t| t.with_timezone(&Utc)), Some(t0));
    assert_eq!(
        current.sla_checked_at.map(|t| t.with_timezone(&Utc)),
        Some(scan_at)
    );

    let report = monitor(&db)
        .scan_and_redistribute(scan_at + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(report.candidates, 0);

    // Still after hours one window later: queued again, budget untouched.
    let report = monitor(&db)
        .scan_and_redistribute(scan_at + Duration::minutes(31))
        .await
        .unwrap();
    assert_eq!(report.queued_for_manual, 1);
    let current = opportunities.find(lead).await.unwrap().unwrap();
    assert_eq!(current.responsible_member_id, Some(pipeline.members[0]));
    assert_eq!(current.assigned_at.map(|t| t.with_timezone(&Utc)), Some(t0));

    let redistributions = AssignmentRecordRepository::new(db.clone())
        .count_redistributions(lead)
        .await
        .unwrap();
    assert_eq!(redistributions, 0);
}

#[tokio::test]
async fn no_assignee_available_keeps_owner_and_assignment_time() {
    let db = setup_test_db_arc().await.unwrap();
    let mut config = with_business_hours(sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        2,
        SlaLimitAction::Unassign,
    ));
    config.fallback_to_manual = false;
    let pipeline = create_pipeline(&db, config, 2).await.unwrap();
    // Wednesday 17:50, overdue after closing time
    let t0 = at("2025-06-04T17:50:00Z");
    let lead = assigned_lead(&db, &pipeline, t0).await;
    let scan_at = t0 + Duration::minutes(31);

    let report = monitor(&db).scan_and_redistribute(scan_at).await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.failures, 1);

    let current = OpportunityRepository::new(db.clone())
        .find(lead)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.responsible_member_id, Some(pipeline.members[0]));
    assert_eq!(current.assigned_at.map(|t| t.with_timezone(&Utc)), Some(t0));
    assert!(!current.needs_manual_assignment);
    assert!(!current.sla_exhausted);
}

/// Roster source that fails a fixed number of lookups before delegating.
struct FlakyRoster {
    inner: PipelineMemberRepository,
    failures_left: AtomicUsize,
}

#[async_trait]
impl RosterDirectory for FlakyRoster {
    async fn pipeline_members(
        &self,
        pipeline_id: Uuid,
    ) -> Result<Vec<RosterMember>, DistributionError> {
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DistributionError::database(
                "load pipeline roster",
                DbErr::Custom("roster unavailable".to_string()),
            ));
        }
        self.inner.pipeline_members(pipeline_id).await
    }
}

#[tokio::test]
async fn one_failed_decision_does_not_abort_the_batch() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        2,
        SlaLimitAction::Unassign,
    );
    let pipeline = create_pipeline(&db, config, 3).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let leads = [
        assigned_lead(&db, &pipeline, t0).await,
        assigned_lead(&db, &pipeline, t0).await,
    ];
    let opportunities = OpportunityRepository::new(db.clone());
    let roster: Arc<dyn RosterDirectory> = Arc::new(FlakyRoster {
        inner: PipelineMemberRepository::new(db.clone()),
        failures_left: AtomicUsize::new(1),
    });
    let monitor = SlaMonitor::with_assignments(
        Arc::new(AppConfig::default()),
        db.clone(),
        AssignmentService::with_roster(db.clone(), roster),
    );
    let scan_at = t0 + Duration::minutes(31);

    let report = monitor.scan_and_redistribute(scan_at).await.unwrap();
    assert_eq!(report.candidates, 2);
    assert_eq!(report.claims_won, 1);
    assert_eq!(report.failures, 1);
    assert_eq!(report.redistributions, 1);

    let mut untouched = 0;
    let mut moved = 0;
    for (lead, original_owner) in leads.iter().zip(&pipeline.members) {
        let current = opportunities.find(*lead).await.unwrap().unwrap();
        let assigned_at = current.assigned_at.map(|t| t.with_timezone(&Utc));
        if current.responsible_member_id == Some(*original_owner) {
            assert_eq!(assigned_at, Some(t0));
            untouched += 1;
        } else {
            assert_eq!(assigned_at, Some(scan_at));
            moved += 1;
        }
    }
    assert_eq!((untouched, moved), (1, 1));

    // The failed lead is picked up again one window later.
    let report = monitor
        .scan_and_redistribute(scan_at + Duration::minutes(31))
        .await
        .unwrap();
    assert_eq!(report.failures, 0);
    assert_eq!(report.redistributions, 2);
}

#[tokio::test]
async fn batch_size_limits_candidates_per_scan() {
    let db = setup_test_db_arc().await.unwrap();
    let config = sla_config(
        Uuid::new_v4(),
        Uuid::new_v4(),
        30,
        2,
        SlaLimitAction::Unassign,
    );
    let pipeline = create_pipeline(&db, config, 3).await.unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let older = assigned_lead(&db, &pipeline, t0).await;
    let newer = assigned_lead(&db, &pipeline, t0 + Duration::minutes(1)).await;
    let opportunities = OpportunityRepository::new(db.clone());
    let monitor = monitor(&db).with_batch_size(1);
    let scan_at = t0 + Duration::minutes(32);

    let first = monitor.scan_and_redistribute(scan_at).await.unwrap();
    assert_eq!(first.candidates, 1);
    assert_eq!(first.redistributions, 1);
    let current = opportunities.find(older).await.unwrap().unwrap();
    assert_eq!(current.assigned_at.map(|t| t.with_timezone(&Utc)), Some(scan_at));
    let current = opportunities.find(newer).await.unwrap().unwrap();
    assert_eq!(
        current.assigned_at.map(|t| t.with_timezone(&Utc)),
        Some(t0 + Duration::minutes(1))
    );

    let second = monitor.scan_and_redistribute(scan_at).await.unwrap();
    assert_eq!(second.candidates, 1);
    assert_eq!(second.redistributions, 1);

    let third = monitor.scan_and_redistribute(scan_at).await.unwrap();
    assert_eq!(third.candidates, 0);
}

#[tokio::test]
async fn closed_leads_and_disabled_pipelines_are_not_scanned() {
    let db = setup_test_db_arc().await.unwrap();
    let sla = create_pipeline(
        &db,
        sla_config(
            Uuid::new_v4(),
            Uuid::new_v4(),
            30,
            1,
            SlaLimitAction::Unassign,
        ),
        2,
    )
    .await
    .unwrap();
    let plain = create_pipeline(&db, round_robin_config(Uuid::new_v4(), Uuid::new_v4()), 2)
        .await
        .unwrap();
    let t0 = at("2025-06-04T10:00:00Z");
    let won = assigned_lead(&db, &sla, t0).await;
    assigned_lead(&db, &plain, t0).await;

    OpportunityRepository::new(db.clone())
        .close(won, leadflow::models::opportunity::StageStatus::Won)
        .await
        .unwrap();

    let report = monitor(&db)
        .scan_and_redistribute(t0 + Duration::minutes(120))
        .await
        .unwrap();
    assert_eq!(report.pipelines_scanned, 1);
    assert_eq!(report.candidates, 0);
}

#[tokio::test]
async fn monitor_stops_on_cancellation() {
    let db = setup_test_db_arc().await.unwrap();
    let monitor = monitor(&db);
    let shutdown = tokio_util::sync::CancellationToken::new();
    shutdown.cancel();

    tokio::time::timeout(std::time::Duration::from_secs(5), monitor.run(shutdown))
        .await
        .expect("monitor exits promptly")
        .unwrap();
}
