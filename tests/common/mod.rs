#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use asset_tracker_api::{
    auth::{Actor, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER, ORG_ID_HEADER},
    config::AppConfig,
    db,
    events::{self, EventSender},
    handlers::AppServices,
    logging,
    models::{category, location, room, user, vendor_registration},
    services::{
        procurement::ProcurementService,
        reference::{
            DbReferenceData, DbRegistrationRegistry, InMemoryReferenceData,
            InMemoryRegistrationRegistry,
        },
    },
    AppState,
};
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const ORG: i32 = 1;
pub const OTHER_ORG: i32 = 2;
pub const CATEGORY: i32 = 3;
pub const LOCATION: i32 = 7;
pub const ROOM: i32 = 11;

/// Everyone the seeded database knows about.
#[derive(Debug, Clone, Copy)]
pub struct Parties {
    pub supervisor: Actor,
    pub other_supervisor: Actor,
    pub admin: Actor,
    pub other_admin: Actor,
    pub vendor_a: Actor,
    pub vendor_b: Actor,
    /// Known user, not registered with [`ORG`].
    pub outsider_vendor: Actor,
}

impl Parties {
    pub fn all(&self) -> [Actor; 7] {
        [
            self.supervisor,
            self.other_supervisor,
            self.admin,
            self.other_admin,
            self.vendor_a,
            self.vendor_b,
            self.outsider_vendor,
        ]
    }

    fn generate() -> Self {
        Self {
            supervisor: Actor::supervisor(Uuid::new_v4(), ORG),
            other_supervisor: Actor::supervisor(Uuid::new_v4(), ORG),
            admin: Actor::admin(Uuid::new_v4(), ORG),
            other_admin: Actor::admin(Uuid::new_v4(), OTHER_ORG),
            vendor_a: Actor::vendor(Uuid::new_v4(), ORG),
            vendor_b: Actor::vendor(Uuid::new_v4(), ORG),
            outsider_vendor: Actor::vendor(Uuid::new_v4(), OTHER_ORG),
        }
    }
}

/// Reference data and registry the app consults when built with
/// [`TestApp::with_in_memory_collaborators`]; tests flip them offline.
pub struct InMemoryCollaborators {
    pub reference: Arc<InMemoryReferenceData>,
    pub registry: Arc<InMemoryRegistrationRegistry>,
}

impl InMemoryCollaborators {
    fn seeded(parties: &Parties) -> Self {
        let reference = InMemoryReferenceData::new()
            .with_category(CATEGORY)
            .with_location(LOCATION)
            .with_room(ROOM);
        for actor in parties.all() {
            reference.add_user(actor.id);
        }

        let registry = InMemoryRegistrationRegistry::new();
        registry.register(parties.vendor_a.id, ORG);
        registry.register(parties.vendor_b.id, ORG);

        Self {
            reference: Arc::new(reference),
            registry: Arc::new(registry),
        }
    }
}

/// Helper harness for spinning up an application backed by a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub parties: Parties,
    collaborators: Option<InMemoryCollaborators>,
    _dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh, seeded database state.
    pub async fn new() -> Self {
        Self::build(false).await
    }

    /// Like [`TestApp::new`], but reference data and vendor registrations come
    /// from in-memory collaborators instead of the database.
    pub async fn with_in_memory_collaborators() -> Self {
        Self::build(true).await
    }

    async fn build(in_memory: bool) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("asset_tracker_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.cors_allow_any_origin = true;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let parties = Parties::generate();
        seed(&pool, &parties).await;

        let db_arc = Arc::new(pool);
        let (event_sender, event_rx) = EventSender::channel(256);
        let event_sender = Arc::new(event_sender);
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            logging::discard_logger(),
        ));

        let collaborators = in_memory.then(|| InMemoryCollaborators::seeded(&parties));
        let services = match &collaborators {
            Some(c) => AppServices::with_collaborators(
                db_arc.clone(),
                c.reference.clone(),
                c.registry.clone(),
                event_sender.clone(),
                cfg.transaction_timeout(),
            ),
            None => AppServices::new(
                db_arc.clone(),
                event_sender.clone(),
                cfg.transaction_timeout(),
            ),
        };

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = asset_tracker_api::build_router(state.clone()).expect("router builds");

        Self {
            router,
            state,
            parties,
            collaborators,
            _dir: dir,
            _event_task: event_task,
        }
    }

    pub fn procurement(&self) -> Arc<ProcurementService> {
        self.state.services.procurement.clone()
    }

    /// A procurement service over the same database and event channel whose
    /// transactions must finish within `timeout`.
    pub fn procurement_with_timeout(&self, timeout: Duration) -> ProcurementService {
        let db = self.state.db.clone();
        ProcurementService::new(
            db.clone(),
            Arc::new(DbReferenceData::new(db.clone())),
            Arc::new(DbRegistrationRegistry::new(db)),
            self.state.event_sender.clone(),
            timeout,
        )
    }

    pub fn collaborators(&self) -> &InMemoryCollaborators {
        self.collaborators
            .as_ref()
            .expect("app was built with TestApp::with_in_memory_collaborators")
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub fn database_url(&self) -> &str {
        &self.state.config.database_url
    }

    /// Send a request against the router, identifying as `actor` when given.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        actor: Option<&Actor>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(actor) = actor {
            builder = builder
                .header(ACTOR_ID_HEADER, actor.id.to_string())
                .header(ACTOR_ROLE_HEADER, actor.role.to_string())
                .header(ORG_ID_HEADER, actor.org_id.to_string());
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

/// Reads a response body as JSON, returning the status alongside.
pub async fn json_body(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body is json")
    };
    (status, value)
}

async fn seed(db: &DatabaseConnection, parties: &Parties) {
    let people = [
        (parties.supervisor, "Sam Supervisor"),
        (parties.other_supervisor, "Sasha Supervisor"),
        (parties.admin, "Ada Admin"),
        (parties.other_admin, "Otto Admin"),
        (parties.vendor_a, "Acme Supplies"),
        (parties.vendor_b, "Bolt Hardware"),
        (parties.outsider_vendor, "Outer Traders"),
    ];
    for (actor, name) in people {
        user::ActiveModel {
            id: Set(actor.id),
            org_id: Set(actor.org_id),
            name: Set(name.to_string()),
            role: Set(actor.role.to_string()),
        }
        .insert(db)
        .await
        .expect("seed user");
    }

    for vendor in [parties.vendor_a, parties.vendor_b] {
        vendor_registration::ActiveModel {
            vendor_id: Set(vendor.id),
            org_id: Set(ORG),
            registered_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .expect("seed vendor registration");
    }

    category::ActiveModel {
        id: Set(CATEGORY),
        name: Set("Computers".to_string()),
    }
    .insert(db)
    .await
    .expect("seed category");

    location::ActiveModel {
        id: Set(LOCATION),
        name: Set("Head Office".to_string()),
    }
    .insert(db)
    .await
    .expect("seed location");

    room::ActiveModel {
        id: Set(ROOM),
        location_id: Set(LOCATION),
        name: Set("Server Room".to_string()),
    }
    .insert(db)
    .await
    .expect("seed room");
}
