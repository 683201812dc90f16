//! Best-effort lookup of the app id the Steam client reports as running.
//! Every failure resolves to `None`.

#[cfg(any(windows, target_os = "linux"))]
use tracing::debug;

/// Currently running store app id, if any.
pub async fn running_app_id() -> Option<String> {
    #[cfg(windows)]
    {
        windows_registry().await
    }
    #[cfg(target_os = "linux")]
    {
        linux_registry_file().await
    }
    #[cfg(not(any(windows, target_os = "linux")))]
    {
        None
    }
}

#[cfg(windows)]
async fn windows_registry() -> Option<String> {
    let output = tokio::process::Command::new("reg")
        .args(["query", r"HKCU\Software\Valve\Steam", "/v", "RunningAppID"])
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => parse_reg_query(&String::from_utf8_lossy(&out.stdout)),
        Ok(out) => {
            debug!(status = %out.status, "steam registry key not available");
            None
        },
        Err(e) => {
            debug!(error = %e, "failed to query steam registry key");
            None
        },
    }
}

#[cfg(target_os = "linux")]
async fn linux_registry_file() -> Option<String> {
    let path = directories::BaseDirs::new()?
        .home_dir()
        .join(".steam")
        .join("registry.vdf");
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => parse_registry_vdf(&text),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "steam registry file not readable");
            None
        },
    }
}

/// Parse `reg query` output such as
/// `    RunningAppID    REG_DWORD    0x1b8`.
pub fn parse_reg_query(stdout: &str) -> Option<String> {
    let line = stdout
        .lines()
        .find(|l| l.trim_start().to_ascii_lowercase().starts_with("runningappid"))?;
    let raw = line.split_whitespace().last()?;
    let value = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => raw.parse().ok()?,
    };
    non_zero(value)
}

/// Parse the `"RunningAppID" "440"` entry of Steam's `registry.vdf`.
pub fn parse_registry_vdf(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let mut quoted = line.split('"').skip(1).step_by(2);
        let key = quoted.next()?;
        if !key.eq_ignore_ascii_case("RunningAppID") {
            return None;
        }
        non_zero(quoted.next()?.trim().parse().ok()?)
    })
}

fn non_zero(value: u64) -> Option<String> {
    (value != 0).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reg_query_hex_value() {
        let out = "\r\nHKEY_CURRENT_USER\\Software\\Valve\\Steam\r\n    RunningAppID    REG_DWORD    0x1b8\r\n\r\n";
        assert_eq!(parse_reg_query(out).as_deref(), Some("440"));
    }

    #[test]
    fn reg_query_zero_means_none() {
        let out = "HKEY_CURRENT_USER\\Software\\Valve\\Steam\n    RunningAppID    REG_DWORD    0x0\n";
        assert_eq!(parse_reg_query(out), None);
        assert_eq!(parse_reg_query("ERROR: The system was unable to find"), None);
    }

    #[test]
    fn registry_vdf_value() {
        let text = r#""Registry"
{
	"HKCU"
	{
		"Software"
		{
			"Valve"
			{
				"Steam"
				{
					"language"		"english"
					"RunningAppID"		"570"
				}
			}
		}
	}
}"#;
        assert_eq!(parse_registry_vdf(text).as_deref(), Some("570"));
        assert_eq!(parse_registry_vdf(&text.replace("\"570\"", "\"0\"")), None);
        assert_eq!(parse_registry_vdf("\"Registry\" {}"), None);
    }
}
