//! Permission lookup, expiry checks and sliding-window budget accounting.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use lumen_core::constants::MSATS_PER_SAT;
use lumen_core::model::{App, BudgetRenewal};
use lumen_core::payload::{ErrorCode, Method};
use lumen_core::{LumenError, Timestamp};
use lumen_store::Store;

/// Outcome of an authorization check. Denials carry the wire error code.
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyDecision {
    Allow,
    Deny { code: ErrorCode, message: String },
}

fn deny(code: ErrorCode, message: impl Into<String>) -> PolicyDecision {
    PolicyDecision::Deny {
        code,
        message: message.into(),
    }
}

/// Authorize `method` for `app`. Payment methods additionally charge
/// `amount_msat` against the permission's sliding budget window.
pub fn authorize(
    store: &Store,
    app: &App,
    method: Method,
    amount_msat: u64,
    now: Timestamp,
) -> Result<PolicyDecision, LumenError> {
    let Some(permission) = store.find_permission(app.id, method.as_str())? else {
        return Ok(deny(
            ErrorCode::Restricted,
            format!("this app has no {method} permission"),
        ));
    };

    if let Some(expires_at) = permission.expires_at {
        if expires_at != 0 && expires_at < now {
            return Ok(deny(ErrorCode::Expired, "this app's permission has expired"));
        }
    }

    if method.is_payment() && permission.max_amount > 0 {
        let cutoff = window_start(permission.budget_renewal, app.created_at, now);
        let used = store.sum_payments_since(app.id, cutoff)?;
        if used + amount_msat / MSATS_PER_SAT > permission.max_amount {
            return Ok(deny(
                ErrorCode::QuotaExceeded,
                "payment would exceed the app's budget",
            ));
        }
    }

    Ok(PolicyDecision::Allow)
}

/// Start of the current budget window, UTC.
///
/// `never` anchors at app creation; the calendar cadences reset at day,
/// Monday, month and year boundaries respectively.
pub fn window_start(renewal: BudgetRenewal, anchor: Timestamp, now: Timestamp) -> Timestamp {
    let Some(dt) = DateTime::<Utc>::from_timestamp(now, 0) else {
        return anchor;
    };
    let date = dt.date_naive();
    let start = match renewal {
        BudgetRenewal::Never => return anchor,
        BudgetRenewal::Daily => date,
        BudgetRenewal::Weekly => {
            date - Duration::days(date.weekday().num_days_from_monday() as i64)
        }
        BudgetRenewal::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .unwrap_or(date),
        BudgetRenewal::Yearly => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
    };
    start
        .and_hms_opt(0, 0, 0)
        .map(|ndt| ndt.and_utc().timestamp())
        .unwrap_or(anchor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::model::AppPermission;
    use lumen_core::types::{EventId, Pubkey};

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
            "lumen-policy-test-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        TempStore {
            store: Store::open(&path).unwrap(),
            path,
        }
    }

    fn app_with_permission(
        store: &Store,
        max_amount: u64,
        renewal: BudgetRenewal,
        expires_at: Option<Timestamp>,
    ) -> App {
        let app = store
            .create_app(&Pubkey::from_bytes([9u8; 32]), "test-app", 0)
            .unwrap();
        store
            .put_permission(&AppPermission {
                app_id: app.id,
                request_method: Method::PayInvoice.as_str().to_string(),
                max_amount,
                budget_renewal: renewal,
                expires_at,
            })
            .unwrap();
        app
    }

    // 2021-03-10 was a Wednesday.
    const WEDNESDAY_NOON: Timestamp = 1_615_377_600; // 2021-03-10 12:00:00 UTC

    #[test]
    fn window_start_boundaries() {
        assert_eq!(window_start(BudgetRenewal::Never, 42, WEDNESDAY_NOON), 42);
        // 2021-03-10 00:00 UTC
        assert_eq!(
            window_start(BudgetRenewal::Daily, 0, WEDNESDAY_NOON),
            1_615_334_400
        );
        // Monday 2021-03-08 00:00 UTC
        assert_eq!(
            window_start(BudgetRenewal::Weekly, 0, WEDNESDAY_NOON),
            1_615_161_600
        );
        // 2021-03-01 00:00 UTC
        assert_eq!(
            window_start(BudgetRenewal::Monthly, 0, WEDNESDAY_NOON),
            1_614_556_800
        );
        // 2021-01-01 00:00 UTC
        assert_eq!(
            window_start(BudgetRenewal::Yearly, 0, WEDNESDAY_NOON),
            1_609_459_200
        );
    }

    #[test]
    fn missing_permission_is_restricted() {
        let t = temp_store("restricted");
        let app = t
            .store
            .create_app(&Pubkey::from_bytes([9u8; 32]), "bare", 0)
            .unwrap();
        let decision = authorize(&t.store, &app, Method::PayInvoice, 1000, 100).unwrap();
        assert!(matches!(
            decision,
            PolicyDecision::Deny {
                code: ErrorCode::Restricted,
                ..
            }
        ));
    }

    #[test]
    fn expired_permission_is_denied() {
        let t = temp_store("expired");
        let app = app_with_permission(&t.store, 0, BudgetRenewal::Never, Some(99));
        let decision = authorize(&t.store, &app, Method::PayInvoice, 1000, 100).unwrap();
        assert!(matches!(
            decision,
            PolicyDecision::Deny {
                code: ErrorCode::Expired,
                ..
            }
        ));
    }

    #[test]
    fn zero_expiry_never_expires() {
        let t = temp_store("zeroexp");
        let app = app_with_permission(&t.store, 0, BudgetRenewal::Never, Some(0));
        let decision = authorize(&t.store, &app, Method::PayInvoice, 1000, 100).unwrap();
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn budget_is_enforced_in_sats() {
        let t = temp_store("budget");
        let app = app_with_permission(&t.store, 1000, BudgetRenewal::Never, None);

        // 900 sats already settled inside the window.
        let req = EventId::from_bytes([1u8; 32]);
        let p = t.store.insert_payment(app.id, &req, 900, None, 50).unwrap();
        t.store.update_payment_preimage(&p, "aa").unwrap();

        // 200_000 msat = 200 sat → 1100 > 1000.
        let decision = authorize(&t.store, &app, Method::PayInvoice, 200_000, 100).unwrap();
        assert!(matches!(
            decision,
            PolicyDecision::Deny {
                code: ErrorCode::QuotaExceeded,
                ..
            }
        ));

        // Exactly filling the budget is allowed.
        let decision = authorize(&t.store, &app, Method::PayInvoice, 100_000, 100).unwrap();
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn zero_max_amount_is_unlimited() {
        let t = temp_store("unlimited");
        let app = app_with_permission(&t.store, 0, BudgetRenewal::Never, None);
        let decision =
            authorize(&t.store, &app, Method::PayInvoice, u64::MAX / 2, 100).unwrap();
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn non_payment_methods_skip_budget() {
        let t = temp_store("nonpay");
        let app = t
            .store
            .create_app(&Pubkey::from_bytes([9u8; 32]), "reader", 0)
            .unwrap();
        t.store
            .put_permission(&AppPermission {
                app_id: app.id,
                request_method: Method::GetBalance.as_str().to_string(),
                max_amount: 1,
                budget_renewal: BudgetRenewal::Never,
                expires_at: None,
            })
            .unwrap();
        let decision = authorize(&t.store, &app, Method::GetBalance, 0, 100).unwrap();
        assert_eq!(decision, PolicyDecision::Allow);
    }
}
