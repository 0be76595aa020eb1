//! Pool naming — the canonical string identity of a physical pool.
//!
//! Callers presenting the same identity and connection key must compute the
//! same name, otherwise pool reuse silently stops working.

use querygrid_core::{ConnectionKey, Identity};

const POOL_PREFIX: &str = "DBPool_";
const SEPARATOR: &str = "_";

/// Derive the pool name for `identity` connecting through `key`.
///
/// Format: `DBPool_<short_id>__<principal>_<credential>`, where the
/// credential segment is empty for identities without one.
///
/// Segments are not escaped. A principal or credential containing `_` can
/// produce the same name as a different split of the same characters
/// (`a_b` without a credential and `a` with credential `b_`), so principals
/// are expected not to contain `_`.
pub fn pool_name_for(identity: &Identity, key: &ConnectionKey) -> String {
    assert!(!key.host.is_empty(), "connection key must name a host");
    let principal = if identity.name.is_empty() {
        "unknown"
    } else {
        identity.name.as_str()
    };
    let credential = identity.credential.as_deref().unwrap_or("");
    format!(
        "{POOL_PREFIX}{}{SEPARATOR}{SEPARATOR}{principal}{SEPARATOR}{credential}",
        key.short_id()
    )
}
