//! Per-case sync execution
//!
//! One job = one case = one pass over the portal. The fast path presents the
//! stored encrypted case number under the binding WMONID and never sees a
//! captcha; when the stored number has gone stale the executor falls back to
//! a captcha-gated search, stores the fresh number, and retries once.
//!
//! Portal access sits behind [`CasePortal`] so the whole flow is testable
//! against a stub.

use crate::captcha::{self, CaptchaSolver};
use crate::fragments;
use crate::pool::{profiles, wmonid};
use crate::portal::codes::court_code;
use crate::portal::types::CaseQuery;
use crate::portal::{PortalClient, PortalConfig};
use crate::queue::store::{JOB_FULL, JOB_GENERAL, JOB_PROGRESS, JOB_WMONID_RENEWAL};
use crate::queue::worker::{JobExecutor, JobOutcome};
use crate::reconcile::{self, changes, SnapshotData};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scourt_common::db::models::{CaseLink, LegalCase, SyncJob};
use scourt_common::settings::SyncSettings;
use scourt_common::{case_number, Error, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Portal operations one case sync needs.
#[async_trait]
pub trait CasePortal: Send + Sync {
    /// Establish a session, replaying the stored identity when given.
    /// Returns the WMONID the session ended up bound to.
    async fn open_session(&mut self, stored_wmonid: Option<&str>) -> Result<String>;
    /// Captcha-gated search; yields the encrypted case number.
    async fn search(&mut self, query: &CaseQuery) -> Result<String>;
    async fn fetch_general(&self, query: &CaseQuery, enc_cs_no: &str) -> Result<Value>;
    async fn fetch_progress(&self, query: &CaseQuery, enc_cs_no: &str) -> Result<Value>;
    /// Download a UI fragment referenced by a detail document.
    async fn fetch_fragment(&self, xml_path: &str) -> Result<String>;
    /// Expiry the portal put on the session's identity cookie, if any.
    fn wmonid_expiry(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Live implementation over the HTTP client and the configured solver.
pub struct LivePortal {
    client: PortalClient,
    solver: Box<dyn CaptchaSolver>,
    settings: SyncSettings,
}

impl LivePortal {
    pub fn new(settings: &SyncSettings) -> Result<Self> {
        Ok(Self {
            client: PortalClient::new(PortalConfig::default())?,
            solver: captcha::solver_from_settings(&settings.captcha)?,
            settings: settings.clone(),
        })
    }
}

#[async_trait]
impl CasePortal for LivePortal {
    async fn open_session(&mut self, stored_wmonid: Option<&str>) -> Result<String> {
        if self.client.is_stale(self.settings.session_max_age_minutes as i64) {
            self.client.init_session(stored_wmonid).await?;
        }
        self.client
            .session()
            .map(|s| s.wmonid.clone())
            .ok_or_else(|| Error::SessionInitFailed("no session after init".to_string()))
    }

    async fn search(&mut self, query: &CaseQuery) -> Result<String> {
        let mut exchange = SearchExchange {
            client: &self.client,
            query,
        };
        captcha::solve_with_retries(&mut exchange, self.solver.as_ref(), &self.settings.captcha)
            .await
    }

    async fn fetch_general(&self, query: &CaseQuery, enc_cs_no: &str) -> Result<Value> {
        // under a bound identity the encrypted number substitutes for the answer
        self.client.fetch_detail(query, enc_cs_no, "").await
    }

    async fn fetch_progress(&self, query: &CaseQuery, enc_cs_no: &str) -> Result<Value> {
        self.client.fetch_progress(query, enc_cs_no).await
    }

    async fn fetch_fragment(&self, xml_path: &str) -> Result<String> {
        self.client.fetch_fragment_xml(xml_path).await
    }

    fn wmonid_expiry(&self) -> Option<DateTime<Utc>> {
        self.client.session().and_then(|s| s.wmonid_expires_at)
    }
}

fn query_display(query: &CaseQuery) -> String {
    format!("{}{}{}", query.year, query.case_type, query.serial)
}

/// Binds the captcha retry loop to one case search. Every attempt fetches a
/// fresh challenge from the portal.
struct SearchExchange<'a> {
    client: &'a PortalClient,
    query: &'a CaseQuery,
}

#[async_trait]
impl captcha::CaptchaExchange for SearchExchange<'_> {
    async fn fresh_challenge(&mut self) -> Result<(Vec<u8>, String)> {
        let challenge = self.client.fetch_captcha().await?;
        Ok((challenge.image, challenge.token))
    }

    async fn submit(&mut self, answer: &str) -> Result<String> {
        let outcome = self.client.search_case(self.query, answer).await?;
        outcome
            .enc_cs_no
            .ok_or_else(|| Error::CaseNotFound(query_display(self.query)))
    }
}

/// Builds a portal handle per job; tests substitute stub portals.
pub trait PortalFactory: Send + Sync {
    fn create(&self, settings: &SyncSettings) -> Result<Box<dyn CasePortal>>;
}

pub struct LivePortalFactory;

impl PortalFactory for LivePortalFactory {
    fn create(&self, settings: &SyncSettings) -> Result<Box<dyn CasePortal>> {
        Ok(Box::new(LivePortal::new(settings)?))
    }
}

/// The production job executor: drives case syncs and identity renewals.
pub struct CaseSyncExecutor {
    db: SqlitePool,
    factory: Box<dyn PortalFactory>,
}

impl CaseSyncExecutor {
    pub fn new(db: SqlitePool, factory: Box<dyn PortalFactory>) -> Self {
        Self { db, factory }
    }

    pub fn live(db: SqlitePool) -> Self {
        Self::new(db, Box::new(LivePortalFactory))
    }
}

#[async_trait]
impl JobExecutor for CaseSyncExecutor {
    async fn execute(&self, job: &SyncJob) -> Result<JobOutcome> {
        let settings = SyncSettings::load(&self.db).await?;

        if job.job_type == JOB_WMONID_RENEWAL {
            return renew_identity(&self.db, self.factory.as_ref(), &settings, job).await;
        }

        let case_id = job
            .legal_case_id
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("case job without a case id".to_string()))?;
        let case = sqlx::query_as::<_, LegalCase>("SELECT * FROM legal_cases WHERE id = ?")
            .bind(case_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("unknown case: {case_id}")))?;

        let mut portal = self.factory.create(&settings)?;
        let outcome = sync_case(&self.db, portal.as_mut(), &settings, &case, &job.job_type).await;

        match &outcome {
            Ok(o) => {
                record_sync_result(&self.db, &case.id, "succeeded", None).await?;
                tracing::info!(
                    case = %case.case_number,
                    job_type = %job.job_type,
                    changed = o.changed,
                    "Case sync complete"
                );
            }
            Err(e) => {
                record_sync_result(&self.db, &case.id, "failed", Some(&e.to_string())).await?;
            }
        }

        outcome
    }
}

/// Build the portal query for a case. The court name goes through the code
/// table later; here it just travels with the parsed number components.
pub fn build_query(case: &LegalCase) -> Result<CaseQuery> {
    let parsed = case_number::parse_case_number(&case.case_number).ok_or_else(|| {
        Error::InvalidInput(format!("unparseable case number: {}", case.case_number))
    })?;
    Ok(CaseQuery {
        court: court_code(&case.court_name),
        year: parsed.year,
        case_type: parsed.case_type,
        serial: parsed.serial,
        party_name: case.party_name.clone(),
    })
}

/// One sync pass for one case.
async fn sync_case(
    db: &SqlitePool,
    portal: &mut dyn CasePortal,
    settings: &SyncSettings,
    case: &LegalCase,
    job_type: &str,
) -> Result<JobOutcome> {
    let query = build_query(case)?;

    let link = profiles::find_link(db, &case.case_number).await?;
    let stored_wmonid = link.as_ref().and_then(|(_, w)| w.clone());
    let session_wmonid = portal.open_session(stored_wmonid.as_deref()).await?;

    let (link, enc_cs_no) = match link {
        Some((link, Some(_))) if link.enc_cs_no.is_some() => {
            let enc = link.enc_cs_no.clone().unwrap_or_default();
            (link, enc)
        }
        existing => {
            // no usable binding; a captcha search establishes one
            let enc = portal.search(&query).await?;
            let link = bind_case(
                db,
                settings,
                case,
                existing.map(|(l, _)| l),
                &enc,
                &session_wmonid,
                portal.wmonid_expiry(),
            )
            .await?;
            (link, enc)
        }
    };

    let documents =
        fetch_documents(db, portal, settings, &query, &link, &enc_cs_no, job_type).await?;

    let previous = changes::load_latest_snapshot(db, &case.id).await?;
    let snapshot = build_snapshot(&documents, previous.as_ref(), job_type);
    let updates = reconcile::detect_changes(previous.as_ref(), &snapshot);

    reconcile::sync_hearings(db, &case.id, &snapshot.hearings).await?;
    reconcile::register_deadlines(db, &case.id, &case.case_number, &updates).await?;

    if job_type != JOB_PROGRESS {
        if let Some(general) = &documents.general {
            prefetch_fragments(db, &*portal, general).await;

            let parties = fragments::extract_parties(general);
            let representatives = fragments::extract_representatives(general);
            reconcile::sync_parties(db, &case.id, &parties, &representatives).await?;

            let related = fragments::extract_related_cases(general);
            reconcile::sync_related_cases(db, &case.id, &related).await?;

            apply_basic_info(db, case, &snapshot.basic_info).await?;
        }
        sqlx::query(
            "UPDATE legal_cases SET last_general_sync_at = ?, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(&case.id)
        .execute(db)
        .await?;
    }

    changes::save_snapshot(db, &case.id, &snapshot).await?;
    profiles::record_access(db, &link.id).await?;

    let changed = !updates.is_empty();
    let summary = if changed {
        updates
            .iter()
            .map(|u| u.summary.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    } else {
        "no changes".to_string()
    };

    Ok(JobOutcome { changed, summary })
}

struct FetchedDocuments {
    general: Option<Value>,
    progress: Option<Value>,
}

/// Fetch the documents a job type needs, refreshing the encrypted number via
/// one search retry when the stored one has gone stale.
async fn fetch_documents(
    db: &SqlitePool,
    portal: &mut dyn CasePortal,
    settings: &SyncSettings,
    query: &CaseQuery,
    link: &CaseLink,
    enc_cs_no: &str,
    job_type: &str,
) -> Result<FetchedDocuments> {
    let mut enc = enc_cs_no.to_string();

    let progress = match portal.fetch_progress(query, &enc).await {
        Ok(doc) => Some(doc),
        Err(e) if is_stale_binding(&e) && settings.allow_full_fallback => {
            tracing::info!(
                case = %link.case_number,
                error = %e,
                "Stored encrypted number stale, re-searching"
            );
            enc = portal.search(query).await?;
            profiles::update_enc_cs_no(db, &link.id, &enc).await?;
            Some(portal.fetch_progress(query, &enc).await?)
        }
        Err(e) => return Err(e),
    };

    let general = if job_type == JOB_GENERAL || job_type == JOB_FULL {
        Some(portal.fetch_general(query, &enc).await?)
    } else {
        None
    };

    Ok(FetchedDocuments { general, progress })
}

/// Cache any UI fragments the detail document references. Failures cost
/// only the cache entry, never the sync.
async fn prefetch_fragments(db: &SqlitePool, portal: &dyn CasePortal, general: &Value) {
    let raw = general.to_string();
    let source = PortalFragmentSource { portal };
    for (data_list_id, xml_path) in fragments::resolve_fragment_paths(&raw) {
        if let Err(e) = fragments::fetch_fragment(db, &source, &xml_path, false).await {
            tracing::debug!(%data_list_id, %xml_path, error = %e, "Fragment prefetch failed");
        }
    }
}

struct PortalFragmentSource<'a> {
    portal: &'a dyn CasePortal,
}

#[async_trait]
impl fragments::FragmentSource for PortalFragmentSource<'_> {
    async fn download(&self, xml_path: &str) -> Result<String> {
        self.portal.fetch_fragment(xml_path).await
    }
}

fn is_stale_binding(error: &Error) -> bool {
    matches!(
        error,
        Error::AccessTokenExpired(_) | Error::CaseNotFound(_) | Error::Parse { .. }
    )
}

/// Create or refresh the case's profile binding after a successful search,
/// recording the session identity when the profile has no live token yet.
async fn bind_case(
    db: &SqlitePool,
    settings: &SyncSettings,
    case: &LegalCase,
    existing: Option<CaseLink>,
    enc_cs_no: &str,
    session_wmonid: &str,
    wmonid_expires_at: Option<DateTime<Utc>>,
) -> Result<CaseLink> {
    let profile_id = match existing {
        Some(link) => link.profile_id,
        None => profiles::acquire_profile(db, &settings.pool).await?.id,
    };

    let link = profiles::link_case(
        db,
        &profile_id,
        &case.case_number,
        &case.court_name,
        Some(enc_cs_no),
        &settings.pool,
    )
    .await?;

    let has_live_token: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM scourt_wmonid_tokens
         WHERE profile_id = ? AND status IN ('active', 'expiring')",
    )
    .bind(&profile_id)
    .fetch_one(db)
    .await?;
    if has_live_token == 0 {
        wmonid::record_issued(db, &profile_id, session_wmonid, wmonid_expires_at).await?;
    }

    Ok(link)
}

/// Assemble the snapshot for this sync. A progress-only pass carries the
/// previous basic info and hearings forward so change detection sees only
/// what this pass could actually observe.
fn build_snapshot(
    documents: &FetchedDocuments,
    previous: Option<&SnapshotData>,
    job_type: &str,
) -> SnapshotData {
    let mut snapshot = SnapshotData::default();

    if let Some(general) = &documents.general {
        snapshot.basic_info = basic_info_map(general);
        snapshot.hearings = fragments::extract_hearings(general);
        snapshot.documents = fragments::extract_documents(general);
        snapshot.related_cases = fragments::extract_related_cases(general);
    } else if let Some(previous) = previous {
        snapshot.basic_info = previous.basic_info.clone();
        snapshot.hearings = previous.hearings.clone();
        snapshot.documents = previous.documents.clone();
        snapshot.related_cases = previous.related_cases.clone();
    }

    if let Some(progress) = &documents.progress {
        snapshot.progress = fragments::extract_progress(progress);
    }
    if snapshot.progress.is_empty() {
        if let Some(general) = &documents.general {
            snapshot.progress = fragments::extract_embedded_progress(general);
        }
    }
    if snapshot.progress.is_empty() && job_type == JOB_PROGRESS {
        if let Some(previous) = previous {
            snapshot.progress = previous.progress.clone();
        }
    }

    snapshot
}

fn basic_info_map(general: &Value) -> BTreeMap<String, String> {
    let info = fragments::extract_basic_info(general);
    let mut map = BTreeMap::new();
    let fields = [
        ("사건번호", info.case_no),
        ("사건명", info.case_name),
        ("법원", info.court_name),
        ("재판부", info.panel),
        ("접수일", info.received_date),
        ("종국결과", info.final_result),
        ("종국일자", info.final_result_date),
        ("확정일자", info.confirmed_date),
        ("판결송달일", info.judgment_served_date),
    ];
    for (key, value) in fields {
        if !value.is_empty() {
            map.insert(key.to_string(), value);
        }
    }
    map
}

/// Apply basic-info fields to the case row. A non-empty final result parks
/// the case; the scheduler stops considering it from the next pass.
async fn apply_basic_info(
    db: &SqlitePool,
    case: &LegalCase,
    basic_info: &BTreeMap<String, String>,
) -> Result<()> {
    let title = basic_info.get("사건명").cloned();
    let final_result = basic_info.get("종국결과").cloned();
    let final_result_date = basic_info
        .get("종국일자")
        .and_then(|d| scourt_common::kst::parse_portal_date(d).ok())
        .map(scourt_common::kst::to_iso_date);

    sqlx::query(
        "UPDATE legal_cases
         SET case_title = COALESCE(?, case_title),
             final_result = COALESCE(?, final_result),
             final_result_date = COALESCE(?, final_result_date),
             updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(title)
    .bind(final_result)
    .bind(final_result_date)
    .bind(&case.id)
    .execute(db)
    .await?;
    Ok(())
}

async fn record_sync_result(
    db: &SqlitePool,
    case_id: &str,
    status: &str,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE legal_cases
         SET last_synced_at = ?, last_sync_status = ?, last_sync_error = ?,
             updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(status)
    .bind(error)
    .bind(case_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Handle a `wmonid_renewal` job: open a fresh session with no replayed
/// identity to mint a new WMONID, then migrate the profile's links to it.
async fn renew_identity(
    db: &SqlitePool,
    factory: &dyn PortalFactory,
    settings: &SyncSettings,
    job: &SyncJob,
) -> Result<JobOutcome> {
    let payload: Value = job
        .payload
        .as_deref()
        .and_then(|p| serde_json::from_str(p).ok())
        .ok_or_else(|| Error::InvalidInput("renewal job without payload".to_string()))?;
    let token_id = payload["tokenId"]
        .as_str()
        .ok_or_else(|| Error::InvalidInput("renewal job without tokenId".to_string()))?;

    let mut portal = factory.create(settings)?;
    let new_wmonid = portal.open_session(None).await?;
    let new_expires_at = portal.wmonid_expiry();

    let relinker = SearchRelinker {
        db: db.clone(),
        portal: Mutex::new(portal),
    };
    let outcome = wmonid::rotate_token(db, token_id, &new_wmonid, new_expires_at, &relinker).await?;

    Ok(JobOutcome {
        changed: outcome.links_migrated > 0,
        summary: format!(
            "rotated {}: {}/{} links migrated{}",
            token_id,
            outcome.links_migrated,
            outcome.links_total,
            if outcome.completed { "" } else { " (partial)" }
        ),
    })
}

/// Re-derives encrypted numbers under a new identity by re-running the
/// captcha search for each migrating link.
struct SearchRelinker {
    db: SqlitePool,
    portal: Mutex<Box<dyn CasePortal>>,
}

#[async_trait]
impl wmonid::CaseRelinker for SearchRelinker {
    async fn relink(&self, link: &CaseLink, _new_wmonid: &str) -> Result<String> {
        let case = sqlx::query_as::<_, LegalCase>(
            "SELECT * FROM legal_cases WHERE case_number = ? LIMIT 1",
        )
        .bind(&link.case_number)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| {
            Error::InvalidInput(format!("link without a case row: {}", link.case_number))
        })?;

        let query = build_query(&case)?;
        let mut portal = self.portal.lock().await;
        portal.search(&query).await
    }
}
