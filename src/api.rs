//! HTTP сторона сервера: ICE конфигурация, жалобы и статистика.

use crate::config::api_endpoint;
use crate::error::Result;
use crate::peer::ice::{IceConfigSource, IceConfiguration};
use crate::peer::types::{ClientIdentity, IceServerConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Куда уходят жалобы на собеседника
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn submit_report(
        &self,
        reporter: &ClientIdentity,
        reported: &ClientIdentity,
        reason: &str,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct IceConfigResponse {
    #[serde(rename = "iceServers", default)]
    ice_servers: Vec<IceServerConfig>,
}

#[derive(Debug, Serialize)]
struct ReportBody<'a> {
    reported_id: &'a ClientIdentity,
    reason: &'a str,
}

/// Счётчики сервера для стартового экрана
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct ServerStats {
    #[serde(default)]
    pub online_users: u64,
    #[serde(default)]
    pub waiting_users: u64,
    #[serde(default)]
    pub active_rooms: u64,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    server: Url,
}

impl ApiClient {
    pub fn new(server: Url, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http, server })
    }

    pub async fn fetch_stats(&self) -> Result<ServerStats> {
        let url = api_endpoint(&self.server, "stats")?;
        let stats = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<ServerStats>()
            .await?;
        debug!(
            "Stats: {} online, {} waiting, {} rooms",
            stats.online_users, stats.waiting_users, stats.active_rooms
        );
        Ok(stats)
    }
}

#[async_trait]
impl IceConfigSource for ApiClient {
    async fn fetch_ice_config(&self) -> Result<IceConfiguration> {
        let url = api_endpoint(&self.server, "config")?;
        debug!("Fetching ICE config from {url}");
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<IceConfigResponse>()
            .await?;
        IceConfiguration::new(body.ice_servers)
    }
}

#[async_trait]
impl ReportSink for ApiClient {
    async fn submit_report(
        &self,
        reporter: &ClientIdentity,
        reported: &ClientIdentity,
        reason: &str,
    ) -> Result<()> {
        let mut url = api_endpoint(&self.server, "reports")?;
        url.query_pairs_mut()
            .append_pair("reporter_id", reporter.as_str());

        self.http
            .post(url)
            .json(&ReportBody {
                reported_id: reported,
                reason,
            })
            .send()
            .await?
            .error_for_status()?;
        info!("Report on {} submitted", reported);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_response_accepts_string_and_list_urls() {
        let body: IceConfigResponse = serde_json::from_str(
            r#"{"iceServers":[
                {"urls":"stun:stun.example.org:3478"},
                {"urls":["turn.example.org:3478"],"username":"u","credential":"p"}
            ]}"#,
        )
        .unwrap();
        let config = IceConfiguration::new(body.ice_servers).unwrap();
        assert_eq!(config.servers()[0].urls, vec!["stun:stun.example.org:3478"]);
        assert_eq!(config.servers()[1].urls, vec!["turn:turn.example.org:3478"]);
    }

    #[test]
    fn empty_config_response_is_an_error() {
        let body: IceConfigResponse = serde_json::from_str(r#"{"iceServers":[]}"#).unwrap();
        assert!(IceConfiguration::new(body.ice_servers).is_err());
    }

    #[test]
    fn report_body_uses_server_field_names() {
        let reported = ClientIdentity::new("client_2");
        let body = serde_json::to_value(ReportBody {
            reported_id: &reported,
            reason: "spam: links",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"reported_id": "client_2", "reason": "spam: links"})
        );
    }

    #[test]
    fn stats_tolerate_missing_counters() {
        let stats: ServerStats = serde_json::from_str(r#"{"online_users": 12}"#).unwrap();
        assert_eq!(stats.online_users, 12);
        assert_eq!(stats.active_rooms, 0);
    }
}
