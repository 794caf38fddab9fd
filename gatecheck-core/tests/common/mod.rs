//! Fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use gatecheck_core::core_device::{TransportError, VerifyTransport};
use gatecheck_core::core_ledger::{EventId, LedgerSqlStore, NamespaceId, ParticipantCode, TenantId};
use gatecheck_core::core_verify::http::{AppState, StaticTokenAuthenticator};
use gatecheck_core::core_verify::{Envelope, ErrorCode, ServerReply, VerificationService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const ACME_TOKEN: &str = "acme-token";
pub const GLOBEX_TOKEN: &str = "globex-token";

/// Ledger with two tenants:
///
/// - `acme`: active `evt-1` (ID001 John Doe, ID002 Jane Roe) and archived `evt-old`
/// - `globex`: active `evt-1` with an empty roster
pub struct Fixture {
    pub store: LedgerSqlStore,
    pub acme: NamespaceId,
    pub globex: NamespaceId,
    pub dir: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerSqlStore::open(dir.path().join("ledger.db"), 8).unwrap();
        let acme = NamespaceId::new("ns_acme");
        let globex = NamespaceId::new("ns_globex");

        store.register_tenant(&TenantId::new("acme"), &acme).await.unwrap();
        store.register_tenant(&TenantId::new("globex"), &globex).await.unwrap();

        let gala = EventId::new("evt-1");
        store.create_event(&acme, &gala, "Annual Gala").await.unwrap();
        store.add_attendee(&acme, &gala, &code("ID001"), "John Doe").await.unwrap();
        store.add_attendee(&acme, &gala, &code("ID002"), "Jane Roe").await.unwrap();

        let old = EventId::new("evt-old");
        store.create_event(&acme, &old, "Last Year").await.unwrap();
        store.add_attendee(&acme, &old, &code("ID001"), "John Doe").await.unwrap();
        store.archive_event(&acme, &old).await.unwrap();

        store.create_event(&globex, &gala, "Globex Offsite").await.unwrap();

        Self { store, acme, globex, dir }
    }

    pub fn service(&self) -> VerificationService {
        VerificationService::new(Arc::new(self.store.clone()))
    }

    pub fn app_state(&self) -> Arc<AppState> {
        let authenticator = StaticTokenAuthenticator::default()
            .with_token(ACME_TOKEN, TenantId::new("acme"))
            .with_token(GLOBEX_TOKEN, TenantId::new("globex"));
        Arc::new(AppState::new(self.service(), Arc::new(authenticator)))
    }
}

pub fn code(raw: &str) -> ParticipantCode {
    ParticipantCode::parse(raw).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    /// Never answers
    Hang,
    Refuse,
    /// Envelope with `INTERNAL_ERROR`
    Internal,
    /// 5xx without an envelope, as from a proxy
    BadGateway,
}

/// In-process transport speaking the wire envelope to a real service
pub struct LoopbackTransport {
    service: VerificationService,
    tenant: TenantId,
    mode: Mutex<Mode>,
    calls: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new(fixture: &Fixture) -> Arc<Self> {
        Arc::new(Self {
            service: fixture.service(),
            tenant: TenantId::new("acme"),
            mode: Mutex::new(Mode::Serve),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerifyTransport for LoopbackTransport {
    async fn verify(
        &self,
        event_id: &EventId,
        code: &ParticipantCode,
        _timeout: Duration,
    ) -> Result<ServerReply, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            Mode::Serve => {}
            Mode::Hang => std::future::pending::<()>().await,
            Mode::Refuse => return Err(TransportError::Connect("connection refused".into())),
            Mode::Internal => {
                return Ok(Envelope::error(ErrorCode::InternalError, "ledger unavailable").into_reply())
            }
            Mode::BadGateway => {
                return Err(TransportError::Server { status: 502, message: "bad gateway".into() })
            }
        }

        let outcome = self
            .service
            .verify(&self.tenant, event_id, code)
            .await
            .map_err(|e| TransportError::Server { status: 500, message: e.to_string() })?;
        Ok(Envelope::from(&outcome).into_reply())
    }
}
