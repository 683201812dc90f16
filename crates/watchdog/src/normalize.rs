//! Executable identity as the OS process listing reports it.

/// Longest process name the host listing reports before truncating.
#[cfg(windows)]
pub const PROCESS_NAME_LIMIT: usize = 25;
#[cfg(target_os = "linux")]
pub const PROCESS_NAME_LIMIT: usize = 15;
#[cfg(not(any(windows, target_os = "linux")))]
pub const PROCESS_NAME_LIMIT: usize = 16;

/// Process names compare case-insensitively on Windows only.
pub const FOLD_CASE: bool = cfg!(windows);

/// Bare file name, truncated to the host's process-name limit.
pub fn normalize_executable(raw: &str) -> String {
    normalize_with(raw, PROCESS_NAME_LIMIT, FOLD_CASE)
}

pub fn normalize_with(raw: &str, limit: usize, fold_case: bool) -> String {
    let name = raw
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let truncated: String = name.chars().take(limit).collect();
    if fold_case {
        truncated.to_lowercase()
    } else {
        truncated
    }
}
