//! Blocking HTTP client for the Ariston remote API.
//!
//! - Uses `ureq` through [`crate::transport::UreqBackend`] (no async).
//! - Uses the wire models in `crate::models::ariston` and `crate::store`.
//! - Covers login, discovery, features, Galevo items and write endpoints, the
//!   single-tank plant data endpoints (MED, Evo, SE) and the energy reports.
//!
//! Authentication
//! - Logs in with username/password and sends the token in the `ar.authToken`
//!   header. A 405 reply means the token went stale: the client logs in again
//!   once and retries the request once. A second 405 is an authentication error.
//! - 404 is not an error; the call yields `None`.

use http::{Method, StatusCode};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::ariston::*;
use crate::store::{ItemsPayload, PropertyId, PropertyItem, PropertyValue};
use crate::transport::{HttpBackend, HttpRequest, UreqBackend};

pub const BASE_URL: &str = "https://www.ariston-net.remotethermo.com/api/v2/";
pub const USER_AGENT: &str = "RestSharp/106.11.7.0";
pub const AUTH_HEADER: &str = "ar.authToken";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const LOGIN: &str = "accounts/login";

#[derive(Debug)]
pub enum ClientError {
    /// Credentials rejected, or the token was rejected again right after a fresh login.
    Authentication(String),
    Transport(String),
    Server { status: u16, message: String },
    Json(serde_json::Error),
    Decode { path: String, message: String },
}

impl core::fmt::Display for ClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ClientError::Authentication(s) => write!(f, "authentication failed: {}", s),
            ClientError::Transport(s) => write!(f, "transport error: {}", s),
            ClientError::Server { status, message } => write!(f, "http {}: {}", status, message),
            ClientError::Json(e) => write!(f, "json error: {}", e),
            ClientError::Decode { path, message } => write!(f, "unexpected payload at {}: {}", path, message),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        ClientError::Json(value)
    }
}

/// Decodes a JSON value, reporting the path of the first mismatch.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_path_to_error::deserialize(value).map_err(|e| ClientError::Decode {
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })
}

#[derive(Debug)]
struct Session {
    username: String,
    password: String,
    token: Option<String>,
}

/// Single-tank plant data families and their path segment under `velis/`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlantDataLine {
    Med,
    Evo,
    Se,
}

impl PlantDataLine {
    fn segment(self) -> &'static str {
        match self {
            PlantDataLine::Med => "medPlantData",
            PlantDataLine::Evo => "evoPlantData",
            PlantDataLine::Se => "sePlantData",
        }
    }
}

pub struct AristonClient {
    backend: Box<dyn HttpBackend>,
    base_url: String,
    session: Mutex<Session>,
}

impl core::fmt::Debug for AristonClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AristonClient").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl AristonClient {
    /// Builds a client against the production API and logs in.
    pub fn connect(username: impl Into<String>, password: impl Into<String>) -> Result<Self, ClientError> {
        let client = Self::with_backend(
            UreqBackend::new(DEFAULT_TIMEOUT),
            BASE_URL,
            username.into(),
            password.into(),
        );
        client.login()?;
        Ok(client)
    }

    /// Builds a client without logging in. The first request logs in lazily
    /// when the server rejects the missing token.
    pub fn with_backend(
        backend: impl HttpBackend + 'static,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        AristonClient {
            backend: Box::new(backend),
            base_url,
            session: Mutex::new(Session {
                username: username.into(),
                password: password.into(),
                token: None,
            }),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    fn current_token(&self) -> Result<String, ClientError> {
        let s = self
            .session
            .lock()
            .map_err(|_| ClientError::Authentication("session lock poisoned".into()))?;
        Ok(s.token.clone().unwrap_or_default())
    }

    /// Logs in with the stored credentials and replaces the session token.
    pub fn login(&self) -> Result<(), ClientError> {
        let (username, password) = {
            let s = self
                .session
                .lock()
                .map_err(|_| ClientError::Authentication("session lock poisoned".into()))?;
            (s.username.clone(), s.password.clone())
        };

        let request = HttpRequest {
            method: Method::POST,
            url: self.url(LOGIN),
            query: Vec::new(),
            headers: vec![("User-Agent".into(), USER_AGENT.into())],
            body: Some(serde_json::to_value(LoginRequest {
                usr: &username,
                pwd: &password,
            })?),
        };
        let response = self.backend.execute(&request)?;
        if !response.status.is_success() {
            return Err(ClientError::Authentication(format!(
                "login rejected with http {}",
                response.status.as_u16()
            )));
        }
        let login: LoginResponse = serde_json::from_str(&response.body)
            .map_err(|_| ClientError::Authentication("login response carried no token".into()))?;

        let mut s = self
            .session
            .lock()
            .map_err(|_| ClientError::Authentication("session lock poisoned".into()))?;
        s.token = Some(login.token);
        debug!("Logged in as {}", s.username);
        Ok(())
    }

    /// Sends one API request, recovering once from a stale token.
    pub fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Option<Value>, ClientError> {
        let mut is_retry = false;
        loop {
            let request = HttpRequest {
                method: method.clone(),
                url: self.url(path),
                query: query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                headers: vec![
                    (AUTH_HEADER.into(), self.current_token()?),
                    ("User-Agent".into(), USER_AGENT.into()),
                ],
                body: body.clone(),
            };
            debug!("{} {}", method, path);
            let response = self.backend.execute(&request)?;

            match response.status {
                s if s.is_success() => {
                    if response.body.trim().is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(serde_json::from_str(&response.body)?));
                }
                StatusCode::METHOD_NOT_ALLOWED if !is_retry => {
                    info!("Session token rejected on {}; logging in again", path);
                    self.login().map_err(|e| match e {
                        ClientError::Authentication(msg) => {
                            ClientError::Authentication(format!("re-login failed (password changed?): {msg}"))
                        }
                        other => other,
                    })?;
                    is_retry = true;
                }
                StatusCode::METHOD_NOT_ALLOWED => {
                    warn!("Session token rejected again on {} after a fresh login", path);
                    return Err(ClientError::Authentication(
                        "token rejected after re-authentication".into(),
                    ));
                }
                StatusCode::NOT_FOUND => {
                    debug!("{} {} -> not found", method, path);
                    return Ok(None);
                }
                status => {
                    return Err(ClientError::Server {
                        status: status.as_u16(),
                        message: response.body,
                    });
                }
            }
        }
    }

    pub fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Option<Value>, ClientError> {
        self.request(Method::GET, path, query, None)
    }

    pub fn post(&self, path: &str, body: Value) -> Result<Option<Value>, ClientError> {
        self.request(Method::POST, path, &[], Some(body))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>, ClientError> {
        self.get(path, query)?.map(decode).transpose()
    }

    fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: Value,
    ) -> Result<Option<T>, ClientError> {
        self.request(Method::POST, path, query, Some(body))?.map(decode).transpose()
    }

    // =====================
    // Discovery and features
    // =====================

    pub fn get_remote_plants(&self) -> Result<Vec<RemotePlant>, ClientError> {
        Ok(self.get_json("remote/plants", &[])?.unwrap_or_default())
    }

    pub fn get_velis_plants(&self) -> Result<Vec<VelisPlant>, ClientError> {
        Ok(self.get_json("velis/plants", &[])?.unwrap_or_default())
    }

    /// Capability map of a gateway; `None` when the server has none for it.
    pub fn get_features(&self, gw: &GatewayId) -> Result<Option<Features>, ClientError> {
        self.get_json(&format!("remote/plants/{}/features", gw), &[])
    }

    // =====================
    // Galevo items
    // =====================

    pub fn get_items(
        &self,
        gw: &GatewayId,
        requested: &[(PropertyId, ZoneNumber)],
        features: &Features,
        culture: &str,
    ) -> Result<Option<Vec<PropertyItem>>, ClientError> {
        let items: Vec<Value> = requested
            .iter()
            .map(|(id, zone)| json!({"id": id.as_str(), "zn": zone}))
            .collect();
        let body = json!({
            "items": items,
            "features": features,
            "culture": culture,
        });
        let payload: Option<ItemsPayload> =
            self.post_json(&format!("remote/dataItems/{}/get", gw), &[("umsys", "si".into())], body)?;
        Ok(payload.map(ItemsPayload::into_items))
    }

    pub fn set_item(
        &self,
        gw: &GatewayId,
        id: PropertyId,
        zone: ZoneNumber,
        new: &PropertyValue,
        old: Option<&PropertyValue>,
        features: &Features,
    ) -> Result<(), ClientError> {
        let body = json!({
            "items": [{"id": id.as_str(), "zn": zone, "new": new, "old": old}],
            "features": features,
        });
        self.request(
            Method::POST,
            &format!("remote/dataItems/{}/set", gw),
            &[("umsys", "si".into())],
            Some(body),
        )?;
        Ok(())
    }

    pub fn set_comfort_temperature(
        &self,
        gw: &GatewayId,
        zone: ZoneNumber,
        new: f64,
        old: Option<f64>,
    ) -> Result<(), ClientError> {
        self.post(
            &format!("remote/zones/{}/{}/temperatures", gw, zone),
            json!({"new": {"comf": new}, "old": {"comf": old}}),
        )?;
        Ok(())
    }

    pub fn set_zone_mode(&self, gw: &GatewayId, zone: ZoneNumber, new: ZoneMode, old: Option<i64>) -> Result<(), ClientError> {
        self.post(&format!("remote/zones/{}/{}/mode", gw, zone), json!({"new": new, "old": old}))?;
        Ok(())
    }

    pub fn set_plant_mode(&self, gw: &GatewayId, new: PlantMode, old: Option<i64>) -> Result<(), ClientError> {
        self.post(&format!("remote/plantData/{}/mode", gw), json!({"new": new, "old": old}))?;
        Ok(())
    }

    pub fn set_dhw_temperature(&self, gw: &GatewayId, new: f64, old: Option<f64>) -> Result<(), ClientError> {
        self.post(&format!("remote/plantData/{}/dhwTemp", gw), json!({"new": new, "old": old}))?;
        Ok(())
    }

    /// Holiday end as `YYYY-MM-DDTHH:MM:SS`; `None` cancels.
    pub fn set_holiday(&self, gw: &GatewayId, new: Option<&str>, old: Option<&str>) -> Result<(), ClientError> {
        self.post(&format!("remote/plantData/{}/holiday", gw), json!({"new": new, "old": old}))?;
        Ok(())
    }

    // =====================
    // Single-tank plant data
    // =====================

    pub fn get_plant_data(&self, line: PlantDataLine, gw: &GatewayId) -> Result<Option<Value>, ClientError> {
        self.get(&format!("velis/{}/{}", line.segment(), gw), &[])
    }

    pub fn get_plant_settings(&self, line: PlantDataLine, gw: &GatewayId) -> Result<Option<Value>, ClientError> {
        self.get(&format!("velis/{}/{}/plantSettings", line.segment(), gw), &[])
    }

    /// Writes to `velis/{line}/{gw}/{action}`; `body` already carries `new`/`old`.
    pub fn post_plant_data(
        &self,
        line: PlantDataLine,
        gw: &GatewayId,
        action: &str,
        body: Value,
    ) -> Result<(), ClientError> {
        self.post(&format!("velis/{}/{}/{}", line.segment(), gw, action), body)?;
        Ok(())
    }

    pub fn set_plant_setting(
        &self,
        line: PlantDataLine,
        gw: &GatewayId,
        setting: PropertyId,
        new: f64,
        old: Option<f64>,
    ) -> Result<(), ClientError> {
        let mut body = serde_json::Map::new();
        body.insert(setting.as_str().to_string(), json!({"new": new, "old": old}));
        self.post_plant_data(line, gw, "plantSettings", Value::Object(body))
    }

    // =====================
    // Energy reports
    // =====================

    pub fn get_consumption_sequences(
        &self,
        gw: &GatewayId,
        usages: &str,
        has_slp: bool,
    ) -> Result<Vec<ConsumptionSequence>, ClientError> {
        let query = [("usages", usages.to_string()), ("hasSlp", has_slp.to_string())];
        Ok(self
            .get_json(&format!("remote/reports/{}/consSequencesApi8", gw), &query)?
            .unwrap_or_default())
    }

    pub fn get_energy_account(&self, gw: &GatewayId) -> Result<Option<EnergyAccount>, ClientError> {
        self.get_json(&format!("remote/reports/{}/energyAccount", gw), &[])
    }

    pub fn get_consumptions_settings(&self, gw: &GatewayId) -> Result<Option<ConsumptionsSettings>, ClientError> {
        self.post_json(&format!("remote/plants/{}/getConsumptionsSettings", gw), &[], json!({}))
    }

    pub fn set_consumptions_settings(
        &self,
        gw: &GatewayId,
        new: &ConsumptionsSettings,
        old: &ConsumptionsSettings,
    ) -> Result<(), ClientError> {
        self.post(
            &format!("remote/plants/{}/consumptionsSettings", gw),
            json!({"new": new, "old": old}),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{ScriptedBackend, TEST_BASE_URL};
    use std::sync::Arc;

    fn client_with(backend: &Arc<ScriptedBackend>) -> AristonClient {
        AristonClient::with_backend(backend.clone(), TEST_BASE_URL, "user@example.com", "secret")
    }

    #[test]
    fn login_stores_token_and_sends_credentials() {
        let backend = ScriptedBackend::new();
        backend.reply(Method::POST, LOGIN, 200, json!({"token": "tok-1"}));
        backend.reply(Method::GET, "remote/plants", 200, json!([]));
        let client = client_with(&backend);

        client.login().unwrap();
        client.get_remote_plants().unwrap();

        let body = backend.last_body(LOGIN).unwrap();
        assert_eq!(body, json!({"usr": "user@example.com", "pwd": "secret"}));
        let listed = backend.requests_to("remote/plants");
        assert_eq!(listed[0].header(AUTH_HEADER), Some("tok-1"));
    }

    #[test]
    fn stale_token_is_recovered_with_exactly_one_login() {
        let backend = ScriptedBackend::new();
        backend.reply(Method::POST, LOGIN, 200, json!({"token": "tok-1"}));
        backend.reply(Method::POST, LOGIN, 200, json!({"token": "tok-2"}));
        backend.reply(Method::GET, "remote/plants", 405, Value::Null);
        backend.reply(Method::GET, "remote/plants", 200, json!([{"gwId": "GW1", "plantName": "Home"}]));
        let client = client_with(&backend);
        client.login().unwrap();

        let plants = client.get_remote_plants().unwrap();

        assert_eq!(plants.len(), 1);
        assert_eq!(plants[0].gw_id, GatewayId("GW1".into()));
        // one login at start, one for recovery
        assert_eq!(backend.requests_to(LOGIN).len(), 2);
        let calls = backend.requests_to("remote/plants");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].header(AUTH_HEADER), Some("tok-1"));
        assert_eq!(calls[1].header(AUTH_HEADER), Some("tok-2"));
    }

    #[test]
    fn token_rejected_twice_fails_after_a_single_retry() {
        let backend = ScriptedBackend::new();
        backend.reply(Method::POST, LOGIN, 200, json!({"token": "tok"}));
        backend.reply(Method::GET, "remote/plants", 405, Value::Null);
        let client = client_with(&backend);

        let err = client.get_remote_plants().unwrap_err();

        assert!(matches!(err, ClientError::Authentication(_)), "{err}");
        assert_eq!(backend.requests_to("remote/plants").len(), 2);
        assert_eq!(backend.requests_to(LOGIN).len(), 1);
    }

    #[test]
    fn rejected_credentials_during_recovery_are_an_authentication_error() {
        let backend = ScriptedBackend::new();
        backend.reply(Method::POST, LOGIN, 401, Value::Null);
        backend.reply(Method::GET, "velis/plants", 405, Value::Null);
        let client = client_with(&backend);

        let err = client.get_velis_plants().unwrap_err();

        assert!(matches!(err, ClientError::Authentication(ref m) if m.contains("password")), "{err}");
        assert_eq!(backend.requests_to("velis/plants").len(), 1);
    }

    #[test]
    fn not_found_is_an_empty_result() {
        let backend = ScriptedBackend::new();
        let client = client_with(&backend);
        let gw = GatewayId("GW1".into());

        assert_eq!(client.get_features(&gw).unwrap(), None);
        assert!(client.get("remote/anything", &[]).unwrap().is_none());
    }

    #[test]
    fn poisoned_session_fails_before_sending() {
        let backend = ScriptedBackend::new();
        backend.reply(Method::GET, "remote/plants", 200, json!([]));
        let client = Arc::new(client_with(&backend));
        let holder = client.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.session.lock().unwrap();
            panic!("poison the session lock");
        })
        .join();

        assert!(matches!(client.get_remote_plants(), Err(ClientError::Authentication(_))));
        assert!(backend.requests().is_empty());
    }

    #[test]
    fn other_statuses_surface_as_server_errors() {
        let backend = ScriptedBackend::new();
        backend.reply_raw(Method::GET, "remote/plants", 503, "maintenance".into());
        let client = client_with(&backend);

        match client.get_remote_plants().unwrap_err() {
            ClientError::Server { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(backend.requests_to("remote/plants").len(), 1);
    }

    #[test]
    fn empty_success_body_is_none() {
        let backend = ScriptedBackend::new();
        backend.reply(Method::POST, "remote/plantData/GW1/dhwTemp", 200, Value::Null);
        let client = client_with(&backend);

        let out = client.post("remote/plantData/GW1/dhwTemp", json!({"new": 50, "old": 45})).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn decode_errors_name_the_failing_path() {
        let backend = ScriptedBackend::new();
        backend.reply(Method::GET, "remote/plants", 200, json!([{"gwId": "GW1"}, {"plantName": "x"}]));
        let client = client_with(&backend);

        match client.get_remote_plants().unwrap_err() {
            ClientError::Decode { path, .. } => assert!(path.starts_with("[1]"), "{path}"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn item_requests_are_batched_with_features_and_culture() {
        let backend = ScriptedBackend::new();
        backend.reply(
            Method::POST,
            "remote/dataItems/GW1/get",
            200,
            json!({"items": [{"id": "ZoneComfortTemp", "zn": 1, "value": 20.5}]}),
        );
        let client = client_with(&backend);
        let features = Features {
            has_boiler: Some(true),
            ..Features::default()
        };

        let items = client
            .get_items(
                &GatewayId("GW1".into()),
                &[(PropertyId::ZoneComfortTemp, 1), (PropertyId::PlantMode, 0)],
                &features,
                "en-US",
            )
            .unwrap()
            .unwrap();

        assert_eq!(items.len(), 1);
        let req = &backend.requests_to("remote/dataItems/GW1/get")[0];
        assert_eq!(req.query, vec![("umsys".to_string(), "si".to_string())]);
        let body = req.body.as_ref().unwrap();
        assert_eq!(body["items"][1], json!({"id": "PlantMode", "zn": 0}));
        assert_eq!(body["features"]["hasBoiler"], json!(true));
        assert_eq!(body["culture"], json!("en-US"));
    }
}
