/// Event kind for encrypted client → service requests.
pub const REQUEST_KIND: u32 = 23194;

/// Event kind for encrypted service → client responses.
pub const RESPONSE_KIND: u32 = 23195;

/// Event kind for the plaintext capability advertisement.
pub const INFO_KIND: u32 = 13194;

/// Wire amounts are millisatoshis; budgets are satoshis.
pub const MSATS_PER_SAT: u64 = 1000;

/// Default width of the per-event handler semaphore.
pub const DEFAULT_HANDLER_CONCURRENCY: usize = 16;

/// Invoice expiry applied when a make_invoice request does not set one.
pub const DEFAULT_INVOICE_EXPIRY_SECS: u64 = 86_400;
