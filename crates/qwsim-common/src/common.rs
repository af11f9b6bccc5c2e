// common.rs -- misc functions used in client and server

use parking_lot::Mutex;

// ============================================================
// Redirect buffer for Com_Printf
// ============================================================

static RD_BUFFER: Mutex<Option<String>> = Mutex::new(None);

/// Begin redirecting printf output into a buffer.
pub fn com_begin_redirect() {
    *RD_BUFFER.lock() = Some(String::new());
}

/// End redirect and return the captured output.
pub fn com_end_redirect() -> Option<String> {
    RD_BUFFER.lock().take()
}

fn redirect(msg: &str) -> bool {
    let mut buf = RD_BUFFER.lock();
    match buf.as_mut() {
        Some(s) => {
            s.push_str(msg);
            true
        }
        None => false,
    }
}

// ============================================================
// Com_Printf / Com_DPrintf
// ============================================================

/// General-purpose print. Goes to the redirect buffer when one is active,
/// otherwise to the `log` facade at info level.
pub fn com_printf(msg: &str) {
    if redirect(msg) {
        return;
    }
    log::info!("{}", msg.trim_end());
}

/// Warning-level print for degraded-but-continuing conditions.
pub fn com_wprintf(msg: &str) {
    if redirect(msg) {
        return;
    }
    log::warn!("{}", msg.trim_end());
}

/// Developer-only print. Never redirected.
pub fn com_dprintf(msg: &str) {
    log::debug!("{}", msg.trim_end());
}
