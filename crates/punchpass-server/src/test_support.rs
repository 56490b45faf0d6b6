//! Fakes and fixtures shared by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::assets::{AssetError, AssetStore};
use crate::notification::{DeliveryMode, Notification, NotificationStatus, ScheduleType};
use crate::push::{PushFailure, PushReceipt, PushSender};
use crate::storage::LoyaltyCard;
use crate::wallet::{SyncResponse, WalletMessage, WalletObjectPatch, WalletSync};

/// Accepts every token except `dead` (permanent) and `flaky` (transient).
#[derive(Default)]
pub struct FakeSender {
    calls: Mutex<Vec<String>>,
}

impl FakeSender {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushSender for FakeSender {
    async fn push(&self, push_token: &str, _topic: &str) -> Result<PushReceipt, PushFailure> {
        self.calls.lock().unwrap().push(push_token.to_string());
        match push_token {
            "dead" => Err(PushFailure::permanent(Some(410), "Unregistered")),
            "flaky" => Err(PushFailure::transient(Some(503), "ServiceUnavailable")),
            _ => Ok(PushReceipt {
                apns_id: Some(format!("apns-{push_token}")),
            }),
        }
    }
}

/// Records calls. Object `reject-patch` fails the patch; object
/// `reject-message` fails the message. A non-zero `patch_delay_ms` stalls
/// each patch after it is recorded.
#[derive(Default)]
pub struct FakeWallet {
    pub patches: Mutex<Vec<(String, WalletObjectPatch)>>,
    pub messages: Mutex<Vec<(String, WalletMessage)>>,
    pub patch_delay_ms: AtomicU64,
}

#[async_trait]
impl WalletSync for FakeWallet {
    async fn patch_object(&self, object_id: &str, patch: &WalletObjectPatch) -> SyncResponse {
        self.patches
            .lock()
            .unwrap()
            .push((object_id.to_string(), patch.clone()));
        let delay = self.patch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if object_id == "reject-patch" {
            SyncResponse::failed(Some(409), "object locked")
        } else {
            SyncResponse::ok("{}")
        }
    }

    async fn add_message(&self, object_id: &str, message: &WalletMessage) -> SyncResponse {
        self.messages
            .lock()
            .unwrap()
            .push((object_id.to_string(), message.clone()));
        if object_id == "reject-message" {
            SyncResponse::failed(Some(500), "")
        } else {
            SyncResponse::ok("{}")
        }
    }
}

/// Keeps assets in memory and returns `memory://<key>` URLs.
#[derive(Default)]
pub struct MemoryAssets {
    keys: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl MemoryAssets {
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetStore for MemoryAssets {
    async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String, AssetError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AssetError::NotConfigured);
        }
        self.keys.lock().unwrap().push(key.to_string());
        Ok(format!("memory://{key}"))
    }
}

pub fn card(id: &str, business: &str) -> LoyaltyCard {
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

/// An ACTIVE SCHEDULED notification for business `biz`, created
/// 2026-01-05T00:00:00Z.
pub fn notification(id: &str, schedule_type: ScheduleType) -> Notification {
    Notification {
        id: id.to_string(),
        business_id: "biz".to_string(),
        title: None,
        message: format!("message {id}"),
        status: NotificationStatus::Active,
        delivery_mode: DeliveryMode::Scheduled,
        schedule_type,
        scheduled_at: None,
        repeat_pattern: None,
        repeat_days: Vec::new(),
        monthly_day_of_month: None,
        repeat_time_local: None,
        timezone: None,
        next_run_at: None,
        last_run_at: None,
        created_at: 1_767_571_200_000,
        updated_at: 1_767_571_200_000,
    }
}
