use std::path::Path;

use lumen_core::error::LumenError;
use lumen_core::model::{
    App, AppPermission, Payment, RequestEvent, RequestEventState, ResponseEvent,
    ResponseEventState,
};
use lumen_core::types::{EventId, Pubkey, Timestamp};

/// Current tree layout version. Migrations are forward-only: an older store
/// is upgraded in place, a newer one aborts startup.
const LAYOUT_VERSION: u64 = 1;

/// Persistent state database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   apps            — pubkey bytes               → bincode(App)
///   permissions     — app_id be ‖ method bytes   → bincode(AppPermission)
///   request_events  — nostr_id bytes             → bincode(RequestEvent)
///   response_events — nostr_id bytes             → bincode(ResponseEvent)
///   payments        — app_id be ‖ payment_id be  → bincode(Payment)
///   meta            — utf8 key bytes             → raw bytes
pub struct Store {
    db: sled::Db,
    apps: sled::Tree,
    permissions: sled::Tree,
    request_events: sled::Tree,
    response_events: sled::Tree,
    payments: sled::Tree,
    meta: sled::Tree,
}

fn storage_err(e: sled::Error) -> LumenError {
    LumenError::Storage(e.to_string())
}

fn ser_err(e: bincode::Error) -> LumenError {
    LumenError::Serialization(e.to_string())
}

fn permission_key(app_id: u64, method: &str) -> Vec<u8> {
    let mut key = app_id.to_be_bytes().to_vec();
    key.extend_from_slice(method.as_bytes());
    key
}

fn payment_key(app_id: u64, payment_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&app_id.to_be_bytes());
    key[8..].copy_from_slice(&payment_id.to_be_bytes());
    key
}

impl Store {
    /// Open or create the database at `path` and apply forward-only layout
    /// migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LumenError> {
        let db = sled::open(path).map_err(storage_err)?;
        let apps = db.open_tree("apps").map_err(storage_err)?;
        let permissions = db.open_tree("permissions").map_err(storage_err)?;
        let request_events = db.open_tree("request_events").map_err(storage_err)?;
        let response_events = db.open_tree("response_events").map_err(storage_err)?;
        let payments = db.open_tree("payments").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;

        let store = Self {
            db,
            apps,
            permissions,
            request_events,
            response_events,
            payments,
            meta,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), LumenError> {
        let found = self
            .get_meta("layout_version")?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b[..8]);
                u64::from_be_bytes(arr)
            })
            .unwrap_or(0);
        if found > LAYOUT_VERSION {
            return Err(LumenError::LayoutVersion {
                found,
                supported: LAYOUT_VERSION,
            });
        }
        if found < LAYOUT_VERSION {
            tracing::info!(from = found, to = LAYOUT_VERSION, "migrating store layout");
            self.put_meta("layout_version", &LAYOUT_VERSION.to_be_bytes())?;
        }
        Ok(())
    }

    // ── Apps ─────────────────────────────────────────────────────────────────

    /// Register a new app for `pubkey`. Allocates the app id.
    /// Fails if an app already exists for the pubkey.
    pub fn create_app(&self, pubkey: &Pubkey, name: &str, now: Timestamp) -> Result<App, LumenError> {
        if self.apps.contains_key(pubkey.as_bytes()).map_err(storage_err)? {
            return Err(LumenError::Other(format!(
                "app already registered for pubkey {pubkey}"
            )));
        }
        let app = App {
            id: self.next_id("next_app_id")?,
            nostr_pubkey: *pubkey,
            name: name.to_string(),
            created_at: now,
        };
        let bytes = bincode::serialize(&app).map_err(ser_err)?;
        self.apps
            .insert(pubkey.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(app)
    }

    pub fn find_app_by_pubkey(&self, pubkey: &Pubkey) -> Result<Option<App>, LumenError> {
        match self.apps.get(pubkey.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    // ── Permissions ──────────────────────────────────────────────────────────

    pub fn put_permission(&self, perm: &AppPermission) -> Result<(), LumenError> {
        let bytes = bincode::serialize(perm).map_err(ser_err)?;
        self.permissions
            .insert(permission_key(perm.app_id, &perm.request_method), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn find_permission(
        &self,
        app_id: u64,
        method: &str,
    ) -> Result<Option<AppPermission>, LumenError> {
        match self
            .permissions
            .get(permission_key(app_id, method))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    // ── Request events ───────────────────────────────────────────────────────

    pub fn find_request_event_by_nostr_id(
        &self,
        nostr_id: &EventId,
    ) -> Result<Option<RequestEvent>, LumenError> {
        match self
            .request_events
            .get(nostr_id.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn insert_request_event(&self, event: &RequestEvent) -> Result<(), LumenError> {
        let bytes = bincode::serialize(event).map_err(ser_err)?;
        self.request_events
            .insert(event.nostr_id.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Flip a request row to `processed` once dispatch has run to completion.
    pub fn mark_request_processed(&self, nostr_id: &EventId) -> Result<(), LumenError> {
        if let Some(mut row) = self.find_request_event_by_nostr_id(nostr_id)? {
            row.state = RequestEventState::Processed;
            self.insert_request_event(&row)?;
        }
        Ok(())
    }

    /// Set `replied_at` on a request row, keeping the stored state otherwise.
    pub fn mark_request_replied(
        &self,
        nostr_id: &EventId,
        replied_at: Timestamp,
    ) -> Result<(), LumenError> {
        if let Some(mut row) = self.find_request_event_by_nostr_id(nostr_id)? {
            if row.replied_at.is_none() {
                row.replied_at = Some(replied_at);
                self.insert_request_event(&row)?;
            }
        }
        Ok(())
    }

    // ── Response events ──────────────────────────────────────────────────────

    pub fn insert_response_event(&self, event: &ResponseEvent) -> Result<(), LumenError> {
        let bytes = bincode::serialize(event).map_err(ser_err)?;
        self.response_events
            .insert(event.nostr_id.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn find_response_event_by_nostr_id(
        &self,
        nostr_id: &EventId,
    ) -> Result<Option<ResponseEvent>, LumenError> {
        match self
            .response_events
            .get(nostr_id.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn update_response_event_state(
        &self,
        nostr_id: &EventId,
        state: ResponseEventState,
        replied_at: Option<Timestamp>,
    ) -> Result<(), LumenError> {
        let Some(mut row) = self.find_response_event_by_nostr_id(nostr_id)? else {
            return Err(LumenError::Storage(format!(
                "response event not found: {nostr_id}"
            )));
        };
        row.state = state;
        if replied_at.is_some() {
            row.replied_at = replied_at;
        }
        self.insert_response_event(&row)
    }

    /// All responses recorded for one request, in insertion-key order.
    pub fn responses_for_request(
        &self,
        request_nostr_id: &EventId,
    ) -> Result<Vec<ResponseEvent>, LumenError> {
        let mut out = Vec::new();
        for item in self.response_events.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let row: ResponseEvent = bincode::deserialize(&bytes).map_err(ser_err)?;
            if row.request_event_id == *request_nostr_id {
                out.push(row);
            }
        }
        Ok(out)
    }

    // ── Payments ─────────────────────────────────────────────────────────────

    /// Insert a payment row, allocating its id.
    pub fn insert_payment(
        &self,
        app_id: u64,
        request_event_id: &EventId,
        amount: u64,
        payment_request: Option<String>,
        now: Timestamp,
    ) -> Result<Payment, LumenError> {
        let payment = Payment {
            id: self.next_id("next_payment_id")?,
            app_id,
            request_event_id: *request_event_id,
            amount,
            preimage: None,
            payment_request,
            created_at: now,
        };
        let bytes = bincode::serialize(&payment).map_err(ser_err)?;
        self.payments
            .insert(payment_key(app_id, payment.id), bytes)
            .map_err(storage_err)?;
        Ok(payment)
    }

    /// Record the preimage on a payment row, marking it successful.
    pub fn update_payment_preimage(
        &self,
        payment: &Payment,
        preimage: &str,
    ) -> Result<(), LumenError> {
        let mut row = payment.clone();
        row.preimage = Some(preimage.to_string());
        let bytes = bincode::serialize(&row).map_err(ser_err)?;
        self.payments
            .insert(payment_key(row.app_id, row.id), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Sum of successful payment amounts (preimage set) for `app_id` with
    /// `created_at` strictly after `cutoff`. Units: satoshis.
    pub fn sum_payments_since(&self, app_id: u64, cutoff: Timestamp) -> Result<u64, LumenError> {
        let mut total: u64 = 0;
        for item in self.payments.scan_prefix(app_id.to_be_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            let p: Payment = bincode::deserialize(&bytes).map_err(ser_err)?;
            if p.preimage.is_some() && p.created_at > cutoff {
                total = total.saturating_add(p.amount);
            }
        }
        Ok(total)
    }

    /// All payment rows for an app, oldest id first.
    pub fn payments_for_app(&self, app_id: u64) -> Result<Vec<Payment>, LumenError> {
        let mut out = Vec::new();
        for item in self.payments.scan_prefix(app_id.to_be_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), LumenError> {
        self.meta
            .insert(key.as_bytes(), value)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, LumenError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage_err)
    }

    /// Allocate the next sequential id under `key` (stored in the meta tree).
    fn next_id(&self, key: &str) -> Result<u64, LumenError> {
        let current = self
            .get_meta(key)?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b[..8]);
                u64::from_be_bytes(arr)
            })
            .unwrap_or(1);
        self.put_meta(key, &(current + 1).to_be_bytes())?;
        Ok(current)
    }

    /// Last relay timestamp this service has fully consumed, for the
    /// subscription `since` filter.
    pub fn last_seen_timestamp(&self) -> Result<Option<Timestamp>, LumenError> {
        Ok(self.get_meta("last_seen")?.map(|b| {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&b[..8]);
            i64::from_be_bytes(arr)
        }))
    }

    pub fn set_last_seen_timestamp(&self, ts: Timestamp) -> Result<(), LumenError> {
        self.put_meta("last_seen", &ts.to_be_bytes())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), LumenError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::model::{BudgetRenewal, RequestEventState};

    struct TempStore {
        store: Store,
        path: std::path::PathBuf,
    }

    impl Drop for TempStore {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    fn temp_store(tag: &str) -> TempStore {
        let path = std::env::temp_dir().join(format!(
            "lumen-store-test-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        TempStore {
            store: Store::open(&path).unwrap(),
            path,
        }
    }

    #[test]
    fn app_pubkey_is_unique() {
        let t = temp_store("unique");
        let pk = Pubkey::from_bytes([3u8; 32]);
        let app = t.store.create_app(&pk, "alpha", 100).unwrap();
        assert_eq!(app.id, 1);
        assert!(t.store.create_app(&pk, "beta", 200).is_err());
        let found = t.store.find_app_by_pubkey(&pk).unwrap().unwrap();
        assert_eq!(found.name, "alpha");
    }

    #[test]
    fn permission_lookup_by_app_and_method() {
        let t = temp_store("perm");
        let perm = AppPermission {
            app_id: 7,
            request_method: "pay_invoice".to_string(),
            max_amount: 1000,
            budget_renewal: BudgetRenewal::Daily,
            expires_at: None,
        };
        t.store.put_permission(&perm).unwrap();
        assert_eq!(
            t.store.find_permission(7, "pay_invoice").unwrap().unwrap(),
            perm
        );
        assert!(t.store.find_permission(7, "get_info").unwrap().is_none());
        assert!(t.store.find_permission(8, "pay_invoice").unwrap().is_none());
    }

    #[test]
    fn request_event_dedup_probe() {
        let t = temp_store("dedup");
        let id = EventId::from_bytes([9u8; 32]);
        assert!(t.store.find_request_event_by_nostr_id(&id).unwrap().is_none());
        t.store
            .insert_request_event(&RequestEvent {
                app_id: Some(1),
                nostr_id: id,
                content: "ct".to_string(),
                state: RequestEventState::Received,
                replied_at: None,
            })
            .unwrap();
        assert!(t.store.find_request_event_by_nostr_id(&id).unwrap().is_some());
    }

    #[test]
    fn payment_sum_counts_only_settled_in_window() {
        let t = temp_store("budget");
        let req = EventId::from_bytes([1u8; 32]);

        // Settled inside the window.
        let p1 = t.store.insert_payment(1, &req, 500, None, 1000).unwrap();
        t.store.update_payment_preimage(&p1, "aa").unwrap();
        // Unsettled: no preimage.
        t.store.insert_payment(1, &req, 300, None, 1000).unwrap();
        // Settled but at the cutoff exactly — excluded (strictly after).
        let p3 = t.store.insert_payment(1, &req, 200, None, 900).unwrap();
        t.store.update_payment_preimage(&p3, "bb").unwrap();
        // Another app entirely.
        let p4 = t.store.insert_payment(2, &req, 999, None, 1000).unwrap();
        t.store.update_payment_preimage(&p4, "cc").unwrap();

        assert_eq!(t.store.sum_payments_since(1, 900).unwrap(), 500);
        assert_eq!(t.store.sum_payments_since(1, 0).unwrap(), 700);
        assert_eq!(t.store.sum_payments_since(2, 0).unwrap(), 999);
    }

    #[test]
    fn response_state_transitions() {
        let t = temp_store("resp");
        let req = EventId::from_bytes([4u8; 32]);
        let resp_id = EventId::from_bytes([5u8; 32]);
        t.store
            .insert_response_event(&ResponseEvent {
                app_id: Some(1),
                request_event_id: req,
                nostr_id: resp_id,
                content: "ct".to_string(),
                state: ResponseEventState::Received,
                replied_at: None,
            })
            .unwrap();
        t.store
            .update_response_event_state(&resp_id, ResponseEventState::Confirmed, Some(123))
            .unwrap();
        let row = t
            .store
            .find_response_event_by_nostr_id(&resp_id)
            .unwrap()
            .unwrap();
        assert_eq!(row.state, ResponseEventState::Confirmed);
        assert_eq!(row.replied_at, Some(123));

        let listed = t.store.responses_for_request(&req).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn future_layout_version_aborts_open() {
        let path = std::env::temp_dir().join(format!("lumen-store-test-layout-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        {
            let store = Store::open(&path).unwrap();
            store.put_meta("layout_version", &99u64.to_be_bytes()).unwrap();
            store.flush().unwrap();
        }
        assert!(matches!(
            Store::open(&path),
            Err(LumenError::LayoutVersion { found: 99, .. })
        ));
        let _ = std::fs::remove_dir_all(&path);
    }
}
