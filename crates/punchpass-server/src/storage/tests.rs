//! Storage layer tests for the Punchpass server.

use super::db::ServerDatabase;
use super::models::LoyaltyCard;
use super::queries_notifications::{LogOutcome, NewLog};
use super::queries_registrations::{NewRegistration, RegistrationOutcome};
use crate::notification::{
    Channel, DeliveryMode, LogStatus, Notification, NotificationStatus, ScheduleType, TriggerType,
};

async fn test_db() -> ServerDatabase {
    ServerDatabase::open_in_memory().await.unwrap()
}

fn card(id: &str, business: &str) -> LoyaltyCard {
    LoyaltyCard {
        id: id.to_string(),
        business_id: business.to_string(),
        business_name: "Bean There".to_string(),
        customer_name: "Ada".to_string(),
        max_points: 10,
        created_at: 1,
        updated_at: 1,
        ..LoyaltyCard::default()
    }
}

fn reg<'a>(device: &'a str, serial: &'a str, token: &'a str) -> NewRegistration<'a> {
    NewRegistration {
        device_library_identifier: device,
        pass_type_identifier: "pass.test",
        serial_number: serial,
        card_id: serial,
        push_token: token,
    }
}

fn notification(id: &str, schedule: ScheduleType, next_run_at: Option<i64>, created: i64) -> Notification {
    Notification {
        id: id.to_string(),
        business_id: "biz".to_string(),
        title: None,
        message: format!("message {id}"),
        status: NotificationStatus::Active,
        delivery_mode: DeliveryMode::Scheduled,
        schedule_type: schedule,
        scheduled_at: None,
        repeat_pattern: None,
        repeat_days: Vec::new(),
        monthly_day_of_month: None,
        repeat_time_local: None,
        timezone: None,
        next_run_at,
        last_run_at: None,
        created_at: created,
        updated_at: created,
    }
}

// === Card tests ===

#[tokio::test]
async fn card_lookup_by_effective_serial() {
    let db = test_db().await;
    let mut with_serial = card("card-1", "biz");
    with_serial.serial_number = Some("SER-1".into());
    db.upsert_card(&with_serial).await.unwrap();
    db.upsert_card(&card("card-2", "biz")).await.unwrap();

    assert_eq!(db.get_card_by_serial("SER-1").await.unwrap().unwrap().id, "card-1");
    assert!(db.get_card_by_serial("card-1").await.unwrap().is_none());
    assert_eq!(db.get_card_by_serial("card-2").await.unwrap().unwrap().id, "card-2");
}

#[tokio::test]
async fn cards_listed_per_business() {
    let db = test_db().await;
    db.upsert_card(&card("a", "biz")).await.unwrap();
    db.upsert_card(&card("b", "other")).await.unwrap();
    db.upsert_card(&card("c", "biz")).await.unwrap();

    let ids: Vec<String> = db
        .list_cards_for_business("biz")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, ["a", "c"]);
}

// === Registration tests ===

#[tokio::test]
async fn register_twice_keeps_one_row_with_new_token() {
    let db = test_db().await;

    let first = db.upsert_registration(reg("dev", "s1", "tok-a"), 100).await.unwrap();
    let second = db.upsert_registration(reg("dev", "s1", "tok-b"), 200).await.unwrap();
    assert_eq!(first, RegistrationOutcome::Created);
    assert_eq!(second, RegistrationOutcome::Updated);

    let row = db.get_registration("dev", "pass.test", "s1").await.unwrap().unwrap();
    assert_eq!(row.push_token, "tok-b");
    assert_eq!(row.created_at, 100);
    assert_eq!(row.updated_at, 200);
    assert_eq!(db.count_registrations_for_card("s1").await.unwrap(), 1);
}

#[tokio::test]
async fn first_registration_creates_watermark_once() {
    let db = test_db().await;
    db.upsert_registration(reg("dev-1", "s1", "tok-a"), 100).await.unwrap();
    db.upsert_registration(reg("dev-2", "s1", "tok-b"), 300).await.unwrap();

    let mark = db.get_serial_update("pass.test", "s1").await.unwrap().unwrap();
    assert_eq!(mark.updated_at, 100, "existing watermark time is kept");
    assert_eq!(mark.card_id, "s1");
}

#[tokio::test]
async fn watermark_never_moves_backwards() {
    let db = test_db().await;
    db.touch_serial("pass.test", "s1", "card", 5_000).await.unwrap();
    db.touch_serial("pass.test", "s1", "card", 9_000).await.unwrap();
    let mark = db.get_serial_update("pass.test", "s1").await.unwrap().unwrap();
    assert_eq!(mark.updated_at, 9_000);

    db.touch_serial("pass.test", "s1", "card", 2_000).await.unwrap();
    let mark = db.get_serial_update("pass.test", "s1").await.unwrap().unwrap();
    assert_eq!(mark.updated_at, 9_001);
}

#[tokio::test]
async fn touch_within_the_same_second_moves_to_the_next_second() {
    let db = test_db().await;
    db.touch_serial("pass.test", "s1", "card", 42_250).await.unwrap();
    db.touch_serial("pass.test", "s1", "card", 42_900).await.unwrap();

    let mark = db.get_serial_update("pass.test", "s1").await.unwrap().unwrap();
    assert_eq!(mark.updated_at, 43_001);

    db.touch_serial("pass.test", "s1", "card", 60_000).await.unwrap();
    let mark = db.get_serial_update("pass.test", "s1").await.unwrap().unwrap();
    assert_eq!(mark.updated_at, 60_000);
}

#[tokio::test]
async fn touch_returns_tokens_for_serial_only() {
    let db = test_db().await;
    db.upsert_registration(reg("dev-1", "s1", "tok-a"), 1).await.unwrap();
    db.upsert_registration(reg("dev-2", "s1", "tok-b"), 1).await.unwrap();
    db.upsert_registration(reg("dev-1", "s2", "tok-a"), 1).await.unwrap();

    let tokens = db.touch_serial("pass.test", "s1", "s1", 10).await.unwrap();
    assert_eq!(tokens, ["tok-a", "tok-b"]);
}

#[tokio::test]
async fn serials_use_later_of_watermark_and_registration() {
    let db = test_db().await;
    db.upsert_registration(reg("dev", "s1", "tok"), 100).await.unwrap();
    db.upsert_registration(reg("dev", "s2", "tok"), 100).await.unwrap();
    db.touch_serial("pass.test", "s2", "s2", 9_000).await.unwrap();
    db.upsert_registration(reg("dev", "s1", "tok"), 400).await.unwrap();

    let rows = db.serials_for_device("dev", "pass.test").await.unwrap();
    assert_eq!(rows, [("s1".to_string(), 400), ("s2".to_string(), 9_000)]);
    assert!(db.serials_for_device("dev", "pass.other").await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_and_prune_registrations() {
    let db = test_db().await;
    db.upsert_registration(reg("dev-1", "s1", "dead"), 1).await.unwrap();
    db.upsert_registration(reg("dev-1", "s2", "dead"), 1).await.unwrap();
    db.upsert_registration(reg("dev-2", "s1", "live"), 1).await.unwrap();

    assert!(db.delete_registration("dev-2", "pass.test", "s1").await.unwrap());
    assert!(!db.delete_registration("dev-2", "pass.test", "s1").await.unwrap());

    assert_eq!(db.delete_registrations_by_push_token("dead").await.unwrap(), 2);
    assert!(db.passes_for_card("s1").await.unwrap().is_empty());
}

// === Notification tests ===

#[tokio::test]
async fn notification_round_trips_through_row() {
    let db = test_db().await;
    let mut n = notification("n1", ScheduleType::Repeat, None, 5);
    n.repeat_days = vec!["MON".into(), "FRI".into()];
    n.monthly_day_of_month = None;
    n.title = Some("Hi".into());
    db.insert_notification(&n).await.unwrap();

    assert_eq!(db.get_notification("n1").await.unwrap().unwrap(), n);
    assert!(db.get_notification("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn due_selection_filters_and_orders() {
    let db = test_db().await;
    db.insert_notification(&notification("late", ScheduleType::Once, Some(50), 1)).await.unwrap();
    db.insert_notification(&notification("early", ScheduleType::Once, Some(10), 2)).await.unwrap();
    db.insert_notification(&notification("future", ScheduleType::Once, Some(500), 3)).await.unwrap();
    db.insert_notification(&notification("lazy", ScheduleType::Repeat, None, 4)).await.unwrap();
    db.insert_notification(&notification("once-unset", ScheduleType::Once, None, 5)).await.unwrap();

    let mut inactive = notification("inactive", ScheduleType::Once, Some(1), 6);
    inactive.status = NotificationStatus::Inactive;
    db.insert_notification(&inactive).await.unwrap();

    let mut manual = notification("manual", ScheduleType::Once, Some(1), 7);
    manual.delivery_mode = DeliveryMode::Now;
    db.insert_notification(&manual).await.unwrap();

    let ids: Vec<String> = db
        .due_notifications(100, 20)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, ["lazy", "early", "late"]);

    assert_eq!(db.due_notifications(100, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn record_run_updates_schedule_state() {
    let db = test_db().await;
    db.insert_notification(&notification("n1", ScheduleType::Once, Some(10), 1)).await.unwrap();

    db.record_run("n1", 20, None, NotificationStatus::Inactive).await.unwrap();
    let n = db.get_notification("n1").await.unwrap().unwrap();
    assert_eq!(n.status, NotificationStatus::Inactive);
    assert_eq!(n.last_run_at, Some(20));
    assert_eq!(n.next_run_at, None);

    db.set_next_run("n1", 99, 30).await.unwrap();
    assert_eq!(db.get_notification("n1").await.unwrap().unwrap().next_run_at, Some(99));
}

// === Log tests ===

#[tokio::test]
async fn log_rows_finish_exactly_once() {
    let db = test_db().await;
    db.insert_notification(&notification("n1", ScheduleType::Once, None, 1)).await.unwrap();

    let id = db
        .insert_queued_log(
            NewLog {
                notification_id: "n1",
                card_id: "card",
                execution_id: "exec",
                trigger_type: TriggerType::Scheduled,
                channel: Channel::AppleWallet,
                scheduled_for: Some(10),
            },
            11,
        )
        .await
        .unwrap();

    let failed = LogOutcome::failed("BadDeviceToken", "gateway said no");
    assert!(db.finish_log(&id, &failed, 12).await.unwrap());
    assert!(!db.finish_log(&id, &LogOutcome::sent(None), 13).await.unwrap());

    let logs = db.logs_for_execution("exec").await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Failed.as_str());
    assert_eq!(logs[0].error_code.as_deref(), Some("BadDeviceToken"));
    assert_eq!(logs[0].attempted_at, Some(12));
    assert_eq!(logs[0].scheduled_for, Some(10));
}

#[tokio::test]
async fn latest_message_ignores_failed_deliveries() {
    let db = test_db().await;
    let mut first = notification("n1", ScheduleType::Once, None, 1);
    first.title = Some("Old".into());
    db.insert_notification(&first).await.unwrap();
    db.insert_notification(&notification("n2", ScheduleType::Once, None, 2)).await.unwrap();

    let log = |id| NewLog {
        notification_id: id,
        card_id: "card",
        execution_id: "exec",
        trigger_type: TriggerType::ManualNow,
        channel: Channel::GoogleWallet,
        scheduled_for: None,
    };
    let sent = db.insert_queued_log(log("n1"), 10).await.unwrap();
    db.finish_log(&sent, &LogOutcome::sent(Some("m".into())), 10).await.unwrap();
    let failed = db.insert_queued_log(log("n2"), 20).await.unwrap();
    db.finish_log(&failed, &LogOutcome::failed("PATCH_FAILED", "500"), 20).await.unwrap();

    let latest = db.latest_message_for_card("card").await.unwrap().unwrap();
    assert_eq!(latest.title.as_deref(), Some("Old"));
    assert_eq!(latest.message, "message n1");
    assert!(db.latest_message_for_card("other").await.unwrap().is_none());
}
