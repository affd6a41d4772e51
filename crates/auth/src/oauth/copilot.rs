use anyhow::Result;
use serde::Deserialize;

const COPILOT_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";

pub const COPILOT_USER_AGENT: &str = "GitHubCopilotChat/0.26.7";
pub const COPILOT_EDITOR_VERSION: &str = "vscode/1.99.3";
pub const COPILOT_PLUGIN_VERSION: &str = "copilot-chat/0.26.7";
pub const COPILOT_INTEGRATION_ID: &str = "vscode-chat";
pub const COPILOT_API_VERSION: &str = "2025-04-01";
pub const DEFAULT_COPILOT_ENDPOINT: &str = "https://api.githubcopilot.com";

#[derive(Debug, Clone, Deserialize)]
pub struct CopilotTokenResponse {
    pub token: String,
    pub expires_at: i64,
    #[allow(dead_code)]
    pub refresh_in: Option<i64>,
    #[serde(default)]
    pub endpoints: CopilotEndpoints,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CopilotEndpoints {
    #[serde(default = "default_api_endpoint")]
    pub api: String,
}

fn default_api_endpoint() -> String {
    DEFAULT_COPILOT_ENDPOINT.to_string()
}

fn copilot_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("User-Agent", COPILOT_USER_AGENT),
        ("Editor-Version", COPILOT_EDITOR_VERSION),
        ("Editor-Plugin-Version", COPILOT_PLUGIN_VERSION),
        ("Accept", "application/json"),
    ]
}

/// Exchanges a stored GitHub token for a short-lived Copilot API token.
pub async fn exchange_copilot_token(github_token: &str) -> Result<CopilotTokenResponse> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_default();

    let mut req = client
        .get(COPILOT_TOKEN_URL)
        .header("Authorization", format!("token {github_token}"));
    for (k, v) in copilot_headers() {
        req = req.header(k, v);
    }

    let resp = req.send().await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if status == 401 || status == 403 {
            anyhow::bail!(
                "GitHub Copilot token exchange failed ({status}): Your GitHub account may not \
                 have an active Copilot subscription. Check github.com/settings/copilot"
            );
        }
        anyhow::bail!("GitHub Copilot token exchange failed ({status}): {body}");
    }

    let mut token_resp: CopilotTokenResponse = resp.json().await?;
    if token_resp.endpoints.api.is_empty() {
        token_resp.endpoints.api = DEFAULT_COPILOT_ENDPOINT.to_string();
    }
    Ok(token_resp)
}
