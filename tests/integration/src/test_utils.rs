//! Test utilities for custody integration tests

use custody_core::ManualClock;
use custody_handoff::{
    Caller, ContainerLine, CreateHandoff, DriverAccount, Handoff, HandoffService, HandoffStore,
    HandoffType, InMemoryHandoffStore, ReceiverSpec, RecordingNotifier, Role, SqliteHandoffStore,
    StaticDirectory,
};
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time-in-state limit used by every fixture
pub const TEST_TTL: Duration = Duration::from_secs(15 * 60);

static LOGGING: Once = Once::new();

/// Install a test-friendly subscriber once per process
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("warn")
            .try_init();
    });
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Service wired to a manual clock, a recording notifier and a seeded directory
pub struct TestWorld {
    pub service: Arc<HandoffService>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestWorld {
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(InMemoryHandoffStore::new()))
    }

    pub fn sqlite(path: &Path) -> Self {
        Self::with_store(Arc::new(SqliteHandoffStore::open(path).unwrap()))
    }

    pub fn with_store(store: Arc<dyn HandoffStore>) -> Self {
        init_test_logging();
        let clock = Arc::new(ManualClock::new(current_timestamp_ms()));
        let notifier = Arc::new(RecordingNotifier::new());
        let service = Arc::new(HandoffService::new(
            store,
            Arc::new(directory()),
            notifier.clone(),
            clock.clone(),
            TEST_TTL,
        ));
        Self {
            service,
            clock,
            notifier,
        }
    }
}

/// Directory with two companies and two drivers
pub fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_container("C1", "st-mary-hospital")
        .with_container("C2", "st-mary-hospital")
        .with_container("C3", "st-mary-hospital")
        .with_container("L1", "northside-lab")
        .with_driver(DriverAccount {
            account_id: "drv-1".to_string(),
            name: "Dana Driver".to_string(),
            phone: Some("+15550100".to_string()),
        })
        .with_driver(DriverAccount {
            account_id: "drv-2".to_string(),
            name: "Lee Driver".to_string(),
            phone: None,
        })
}

pub fn supervisor() -> Caller {
    Caller::new("sup-1", Role::Supervisor, "Sam Supervisor")
}

pub fn driver() -> Caller {
    Caller::new("drv-1", Role::Driver, "Dana Driver")
}

pub fn facility_staff() -> Caller {
    Caller::new("staff-1", Role::FacilityStaff, "Kim Staff")
}

/// Facility → driver request with the two-container scenario payload
pub fn step1_request(session_id: &str) -> CreateHandoff {
    CreateHandoff {
        session_id: Some(session_id.to_string()),
        handoff_type: HandoffType::FacilityToDriver,
        containers: vec![ContainerLine::new("C1").with_weight(5.0), ContainerLine::new("C2")],
        receiver: ReceiverSpec {
            account_id: Some("drv-1".to_string()),
            name: None,
            phone: None,
        },
        company: None,
        channel: None,
    }
}

/// Driver → incinerator request with a phone-only receiver
pub fn step2_request(session_id: &str) -> CreateHandoff {
    CreateHandoff {
        session_id: Some(session_id.to_string()),
        handoff_type: HandoffType::DriverToIncinerator,
        containers: vec![ContainerLine::new("C1").with_weight(5.0), ContainerLine::new("C2")],
        receiver: ReceiverSpec {
            account_id: None,
            name: Some("Incinerator gate".to_string()),
            phone: Some("+15550199".to_string()),
        },
        company: Some("st-mary-hospital".to_string()),
        channel: None,
    }
}

/// Raw capability token of a handoff
pub fn token_of(handoff: &Handoff) -> String {
    handoff
        .confirmation_token
        .as_ref()
        .expect("handoff has no live token")
        .as_str()
        .to_string()
}
