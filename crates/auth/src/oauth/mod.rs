pub mod copilot;
pub mod cursor;
pub mod refresh;

pub fn supports_oauth(provider: &str) -> bool {
    nyzhi_config::find_provider_def(provider)
        .map(|d| d.supports_oauth)
        .unwrap_or(false)
}
