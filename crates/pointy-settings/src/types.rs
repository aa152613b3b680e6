//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section has `#[serde(default)]`
//! so a settings file only needs the values it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointySettings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub coordination: CoordinationSettings,
    pub gateway: GatewaySettings,
    pub logging: LoggingSettings,
}

/// Websocket listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per client before sends start to block.
    pub client_queue_size: usize,
    /// How long a push waits on a full client queue.
    pub push_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            client_queue_size: 64,
            push_timeout_ms: 500,
            heartbeat_interval_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// SQLite file. `:memory:` keeps everything in process.
    pub db_path: String,
    pub session_table: String,
    pub lock_table: String,
    pub watcher_table: String,
    pub sweep_interval_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "pointy.db".to_string(),
            session_table: "sessions".to_string(),
            lock_table: "locks".to_string(),
            watcher_table: "watchers".to_string(),
            sweep_interval_secs: 60,
        }
    }
}

/// Lock and expiry timings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinationSettings {
    pub lock_wait_ms: u64,
    pub lock_timeout_ms: u64,
    pub lock_expiration_ms: u64,
    pub session_timeout_secs: u64,
    pub broadcast_concurrency: usize,
}

impl Default for CoordinationSettings {
    fn default() -> Self {
        Self {
            lock_wait_ms: 5,
            lock_timeout_ms: 1_000,
            lock_expiration_ms: 1_000,
            session_timeout_secs: 3_600,
            broadcast_concurrency: 16,
        }
    }
}

impl CoordinationSettings {
    pub fn lock_wait_time(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_expiration(&self) -> Duration {
        Duration::from_millis(self.lock_expiration_ms)
    }

    /// Cut-off for one broadcast round: three quarters of the lease, leaving
    /// the rest for the load and save around it.
    pub fn broadcast_deadline(&self) -> Duration {
        self.lock_expiration() * 3 / 4
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

/// HTTP callback delivery. When `endpoint` is unset, pushes go to the
/// websocket clients connected to this process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_ms: 500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

/// True for names SQLite accepts unquoted: a letter or underscore followed by
/// letters, digits or underscores.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl PointySettings {
    /// Rejects values the rest of the system cannot run with.
    pub fn validate(&self) -> Result<()> {
        let tables = [
            ("store.sessionTable", &self.store.session_table),
            ("store.lockTable", &self.store.lock_table),
            ("store.watcherTable", &self.store.watcher_table),
        ];
        for (field, name) in tables {
            if !is_sql_identifier(name) {
                return Err(SettingsError::InvalidValue(format!(
                    "{field}: {name:?} is not a valid table name"
                )));
            }
        }
        if self.store.session_table == self.store.lock_table
            || self.store.session_table == self.store.watcher_table
            || self.store.lock_table == self.store.watcher_table
        {
            return Err(SettingsError::InvalidValue(
                "store: table names must be distinct".to_string(),
            ));
        }

        let durations = [
            ("coordination.lockWaitMs", self.coordination.lock_wait_ms),
            ("coordination.lockTimeoutMs", self.coordination.lock_timeout_ms),
            ("coordination.lockExpirationMs", self.coordination.lock_expiration_ms),
            ("coordination.sessionTimeoutSecs", self.coordination.session_timeout_secs),
            ("server.pushTimeoutMs", self.server.push_timeout_ms),
            ("gateway.requestTimeoutMs", self.gateway.request_timeout_ms),
            ("store.sweepIntervalSecs", self.store.sweep_interval_secs),
        ];
        for (field, value) in durations {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{field} must be non-zero")));
            }
        }

        // A single delivery must fit inside the lease held around it.
        let deadlines = [
            ("server.pushTimeoutMs", self.server.push_timeout_ms),
            ("gateway.requestTimeoutMs", self.gateway.request_timeout_ms),
        ];
        for (field, value) in deadlines {
            if value >= self.coordination.lock_expiration_ms {
                return Err(SettingsError::InvalidValue(format!(
                    "{field} ({value}) must be below coordination.lockExpirationMs ({})",
                    self.coordination.lock_expiration_ms
                )));
            }
        }

        if self.coordination.broadcast_concurrency == 0 {
            return Err(SettingsError::InvalidValue(
                "coordination.broadcastConcurrency must be non-zero".to_string(),
            ));
        }
        if self.server.client_queue_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.clientQueueSize must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_constants() {
        let s = PointySettings::default();
        assert_eq!(s.coordination.lock_wait_time(), Duration::from_millis(5));
        assert_eq!(s.coordination.lock_timeout(), Duration::from_secs(1));
        assert_eq!(s.coordination.lock_expiration(), Duration::from_secs(1));
        assert_eq!(s.coordination.session_timeout(), Duration::from_secs(3600));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(PointySettings::default()).unwrap();
        assert_eq!(json["coordination"]["lockWaitMs"], 5);
        assert_eq!(json["store"]["sessionTable"], "sessions");
        assert!(json["gateway"].get("endpoint").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: PointySettings =
            serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.store.lock_table, "locks");
    }

    #[test]
    fn identifier_rules() {
        assert!(is_sql_identifier("sessions"));
        assert!(is_sql_identifier("_t2"));
        assert!(!is_sql_identifier(""));
        assert!(!is_sql_identifier("2t"));
        assert!(!is_sql_identifier("locks; DROP TABLE x"));
        assert!(!is_sql_identifier("my-table"));
    }

    #[test]
    fn rejects_bad_table_name() {
        let mut s = PointySettings::default();
        s.store.lock_table = "lock table".into();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("store.lockTable"));
    }

    #[test]
    fn rejects_shared_table_names() {
        let mut s = PointySettings::default();
        s.store.watcher_table = "sessions".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn broadcast_deadline_leaves_room_in_the_lease() {
        let s = PointySettings::default();
        assert_eq!(s.coordination.broadcast_deadline(), Duration::from_millis(750));
        assert!(s.coordination.broadcast_deadline() < s.coordination.lock_expiration());
        assert!(s.server.push_timeout_ms < s.coordination.lock_expiration_ms);
        assert!(s.gateway.request_timeout_ms < s.coordination.lock_expiration_ms);
    }

    #[test]
    fn rejects_push_timeout_longer_than_lease() {
        let mut s = PointySettings::default();
        s.server.push_timeout_ms = 2_000;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("server.pushTimeoutMs"));

        let mut s = PointySettings::default();
        s.coordination.lock_expiration_ms = 400;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("lockExpirationMs"));
    }

    #[test]
    fn rejects_gateway_timeout_equal_to_lease() {
        let mut s = PointySettings::default();
        s.gateway.request_timeout_ms = s.coordination.lock_expiration_ms;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("gateway.requestTimeoutMs"));
    }

    #[test]
    fn rejects_zero_durations() {
        let mut s = PointySettings::default();
        s.coordination.lock_timeout_ms = 0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("lockTimeoutMs"));
    }
}
