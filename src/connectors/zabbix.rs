//! Zabbix problems, either polled over JSON-RPC or pushed by a media-type
//! webhook.
//!
//! Raw problems carry ids only; both modes ask the API for the trigger's
//! host and its agent interface and add them as `hosts`, `extra` and
//! `extra_target` (the Zabbix server itself) before conversion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::IDMEFV2_VERSION;
use crate::converter::Converter;
use crate::driver::poll::PollSource;
use crate::driver::Enricher;
use crate::error::CompileError;
use crate::sighting::SightingConfig;
use crate::template::{Template, Transform};
use crate::transforms::{as_i64, epoch_to_iso, listify_port, local_ip, to_int, uuid};

static OUTAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)unreachable|down").unwrap());
static FAILURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)load|cpu").unwrap());

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Trigger name to IDMEFv2 category.
pub fn category() -> Transform {
    Transform::unary("zabbix_category", |v| {
        let name = v.as_str().unwrap_or_default();
        let cat = if OUTAGE.is_match(name) {
            "Availability.Outage"
        } else if FAILURE.is_match(name) {
            "Availability.Failure"
        } else {
            "Other.Uncategorised"
        };
        Ok(json!([cat]))
    })
}

/// Zabbix severity 0..5.
pub fn severity() -> Transform {
    Transform::lookup(
        "zabbix_severity",
        ["Unknown", "Info", "Low", "Medium", "High", "Critical"]
            .into_iter()
            .enumerate()
            .map(|(i, p)| (json!(i), json!(p))),
        Some(json!("Unknown")),
    )
}

/// `polling` and `push` both mean the analyzer is monitoring; anything else
/// is taken as an IDMEFv2 method name.
fn analyzer_methods(modes: &[&str]) -> Vec<String> {
    if modes.is_empty() {
        return vec!["Monitor".into(), "Threshold".into()];
    }
    let mut methods: Vec<String> = Vec::new();
    for &m in modes {
        let method = if m.eq_ignore_ascii_case("polling") || m.eq_ignore_ascii_case("push") {
            "Monitor"
        } else {
            m
        };
        if !methods.iter().any(|x| x == method) {
            methods.push(method.to_string());
        }
    }
    methods
}

pub fn template(modes: &[&str]) -> Template {
    Template::map([
        ("Version", Template::lit(IDMEFV2_VERSION)),
        ("ID", uuid().into()),
        ("CreateTime", Template::call(epoch_to_iso(), ["$.clock".into()])),
        ("Category", Template::call(category(), ["$.name".into()])),
        (
            "Priority",
            Template::call(severity(), [Template::call(to_int(), ["$.severity".into()])]),
        ),
        ("Description", "$.name".into()),
        (
            "Analyzer",
            Template::map([
                ("IP", local_ip().into()),
                ("Name", "zabbix".into()),
                ("Model", "Zabbix Monitoring".into()),
                ("Type", "Availability".into()),
                ("Category", Template::lit(json!(["NMS"]))),
                ("Data", Template::lit(json!(["System"]))),
                ("Method", Template::lit(analyzer_methods(modes))),
            ]),
        ),
        (
            "Source",
            Template::seq([Template::map([
                ("Hostname", "$.hosts[0].name".into()),
                ("IP", "$.extra.ip".into()),
                ("Port", Template::call(listify_port(), ["$.extra.port".into()])),
            ])]),
        ),
        (
            "Target",
            Template::seq([Template::map([
                ("Hostname", "$.extra_target.hostname".into()),
                ("IP", "$.extra_target.ip".into()),
                ("Port", Template::call(listify_port(), ["$.extra_target.port".into()])),
            ])]),
        ),
    ])
}

pub fn filter(src: &Value) -> bool {
    src.get("clock").is_some() && src.get("severity").is_some()
}

pub fn converter(modes: &[&str]) -> Result<Converter, CompileError> {
    Ok(Converter::new(&template(modes))?.with_filter(filter))
}

pub fn sighting() -> SightingConfig {
    SightingConfig::new(["$.eventid"])
}

/// The Zabbix server, reported as the alert target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub hostname: String,
    pub ip: String,
    pub port: u16,
}

impl ServerInfo {
    /// Host and port from the API URL; the host is resolved, or kept as is
    /// when resolution fails.
    pub async fn resolve(url: &str) -> Result<Self> {
        let parsed = Url::parse(url.trim_end_matches('/'))
            .with_context(|| format!("invalid Zabbix URL {url}"))?;
        let hostname = parsed.host_str().unwrap_or("unknown").to_string();
        let port = parsed.port_or_known_default().unwrap_or(80);
        let ip = match tokio::net::lookup_host((hostname.as_str(), port)).await {
            Ok(mut addrs) => addrs
                .next()
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| hostname.clone()),
            Err(e) => {
                tracing::debug!(host = %hostname, error = %e, "cannot resolve Zabbix host");
                hostname.clone()
            }
        };
        Ok(Self { hostname, ip, port })
    }

    fn to_json(&self) -> Value {
        json!({"hostname": self.hostname, "ip": self.ip, "port": self.port})
    }
}

#[derive(Default)]
struct ApiState {
    token: Option<String>,
    /// trigger id -> (host id, host name)
    trigger_hosts: HashMap<String, (String, String)>,
    /// host id -> (ip or dns, port)
    host_ifaces: HashMap<String, (String, u16)>,
}

/// Minimal JSON-RPC client for the Zabbix API (bearer-token auth, 7.2+).
pub struct ZabbixApi {
    url: String,
    user: String,
    password: String,
    client: Client,
    server: ServerInfo,
    state: Mutex<ApiState>,
}

impl ZabbixApi {
    pub async fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let url = url.into().trim_end_matches('/').to_string();
        let server = ServerInfo::resolve(&url).await?;
        Ok(Self {
            url,
            user: user.into(),
            password: password.into(),
            client: Client::new(),
            server,
            state: Mutex::new(ApiState::default()),
        })
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    async fn call(&self, method: &str, params: Value, token: Option<&str>) -> Result<Value> {
        let mut req = self
            .client
            .post(&self.url)
            .timeout(RPC_TIMEOUT)
            .json(&json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let mut body: Value = req
            .send()
            .await
            .with_context(|| format!("Zabbix {method}"))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("decoding Zabbix {method} response"))?;
        if let Some(err) = body.get("error") {
            bail!("Zabbix {method} failed: {err}");
        }
        body.get_mut("result")
            .map(Value::take)
            .ok_or_else(|| anyhow!("Zabbix {method}: response without result"))
    }

    pub async fn login(&self) -> Result<()> {
        let result = self
            .call(
                "user.login",
                json!({"username": self.user, "password": self.password}),
                None,
            )
            .await?;
        let token = result
            .as_str()
            .ok_or_else(|| anyhow!("user.login returned {result}"))?
            .to_string();
        tracing::info!(token = %token.chars().take(8).collect::<String>(), "authenticated to Zabbix API");
        self.state.lock().await.token = Some(token);
        Ok(())
    }

    /// Authenticated call; logs in first when there is no token yet.
    pub async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let token = self.state.lock().await.token.clone();
        let token = match token {
            Some(t) => t,
            None => {
                self.login().await?;
                self.state.lock().await.token.clone().unwrap_or_default()
            }
        };
        self.call(method, params, Some(&token)).await
    }

    /// Host (id, name) a trigger belongs to.
    pub async fn trigger_host(&self, trigger_id: &str) -> Result<(String, String)> {
        if let Some(h) = self.state.lock().await.trigger_hosts.get(trigger_id) {
            return Ok(h.clone());
        }
        let res = self
            .rpc(
                "trigger.get",
                json!({
                    "triggerids": [trigger_id],
                    "output": ["triggerid"],
                    "selectHosts": ["hostid", "name"],
                }),
            )
            .await?;
        let host = res
            .pointer("/0/hosts/0")
            .ok_or_else(|| anyhow!("trigger {trigger_id} has no host"))?;
        let entry = (text(&host["hostid"]), text(&host["name"]));
        self.state
            .lock()
            .await
            .trigger_hosts
            .insert(trigger_id.to_string(), entry.clone());
        Ok(entry)
    }

    /// Address and port of a host's agent interface (type 1), or of its
    /// first interface.
    pub async fn host_interface(&self, host_id: &str) -> Result<(String, u16)> {
        if let Some(i) = self.state.lock().await.host_ifaces.get(host_id) {
            return Ok(i.clone());
        }
        let res = self
            .rpc(
                "host.get",
                json!({
                    "hostids": [host_id],
                    "output": ["hostid"],
                    "selectInterfaces": ["type", "ip", "dns", "port"],
                }),
            )
            .await?;
        let ifaces = res
            .pointer("/0/interfaces")
            .and_then(Value::as_array)
            .filter(|i| !i.is_empty())
            .ok_or_else(|| anyhow!("host {host_id} has no interface"))?;
        let iface = ifaces
            .iter()
            .find(|i| as_i64(&i["type"]) == Some(1))
            .unwrap_or(&ifaces[0]);
        let ip = match text(&iface["ip"]) {
            ip if ip.is_empty() => text(&iface["dns"]),
            ip => ip,
        };
        let port = as_i64(&iface["port"])
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(0);
        self.state
            .lock()
            .await
            .host_ifaces
            .insert(host_id.to_string(), (ip.clone(), port));
        Ok((ip, port))
    }

    /// Source and target details of the problem raised by `trigger_id`.
    async fn locate(&self, trigger_id: &str) -> Result<(String, String, u16)> {
        let (host_id, host_name) = self.trigger_host(trigger_id).await?;
        let (ip, port) = self.host_interface(&host_id).await?;
        Ok((host_name, ip, port))
    }
}

/// String ids may come back as JSON strings or numbers.
fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Polls `problem.get` for recent problems.
#[derive(Clone)]
pub struct ZabbixPoller {
    api: Arc<ZabbixApi>,
}

impl ZabbixPoller {
    pub fn new(api: Arc<ZabbixApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PollSource for ZabbixPoller {
    async fn fetch(&self) -> Result<Vec<Value>> {
        let res = self
            .api
            .rpc(
                "problem.get",
                json!({
                    "output": "extend",
                    "sortfield": "eventid",
                    "sortorder": "ASC",
                    "recent": true,
                }),
            )
            .await?;
        match res {
            Value::Array(items) => Ok(items),
            other => bail!("problem.get returned {}", crate::error::excerpt(&other)),
        }
    }

    fn name(&self) -> &'static str {
        "zabbix"
    }
}

#[async_trait]
impl Enricher for ZabbixPoller {
    async fn enrich(&self, mut item: Value) -> Result<Value> {
        let trigger = text(&item["objectid"]);
        if trigger.is_empty() {
            bail!("problem without objectid");
        }
        let (host, ip, port) = self.api.locate(&trigger).await?;
        item["hosts"] = json!([{"name": host}]);
        item["extra"] = json!({"ip": ip, "port": port});
        item["extra_target"] = self.api.server().to_json();
        Ok(item)
    }
}

/// Completes a webhook payload (`eventid` at least) from the API.
#[derive(Clone)]
pub struct ZabbixPush {
    api: Arc<ZabbixApi>,
}

impl ZabbixPush {
    pub fn new(api: Arc<ZabbixApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Enricher for ZabbixPush {
    async fn enrich(&self, mut item: Value) -> Result<Value> {
        let eid = match item.get("eventid") {
            Some(v) => text(v),
            None => String::new(),
        };
        if eid.is_empty() {
            bail!("missing eventid field");
        }

        let prob = self
            .api
            .rpc(
                "problem.get",
                json!({"eventids": [eid], "output": ["clock", "objectid"]}),
            )
            .await?;
        let prob = prob
            .get(0)
            .ok_or_else(|| anyhow!("eventid {eid} not found"))?;
        item["clock"] = prob["clock"].clone();
        let trigger = text(&prob["objectid"]);

        let (host, ip, port) = self.api.locate(&trigger).await?;

        let trg = self
            .api
            .rpc(
                "trigger.get",
                json!({"triggerids": [trigger], "output": ["description", "priority"]}),
            )
            .await?;
        if let Some(desc) = trg.pointer("/0/description") {
            item["name"] = desc.clone();
        } else if item.get("name").is_none() {
            item["name"] = json!("");
        }
        if let Some(prio) = trg.pointer("/0/priority") {
            item["severity"] = json!(text(prio));
        } else if item.get("severity").is_none() {
            item["severity"] = json!("0");
        }

        if item.get("hosts").is_none() {
            item["hosts"] = json!([{"name": host}]);
        }
        if !item.get("extra").is_some_and(Value::is_object) {
            item["extra"] = json!({});
        }
        item["extra"]["ip"] = json!(if ip.is_empty() { "0.0.0.0" } else { ip.as_str() });
        item["extra"]["port"] = json!(port);
        item["extra_target"] = self.api.server().to_json();
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Json, Router};
    use std::sync::Mutex as StdMutex;

    fn problem() -> Value {
        serde_json::from_str(include_str!("../../tests/fixtures/zabbix_problem.json")).unwrap()
    }

    #[test]
    fn enriched_problem_converts() {
        let (ok, out) = converter(&["polling"]).unwrap().convert(&problem()).unwrap();
        assert!(ok);
        assert_eq!(out["CreateTime"], "1970-01-01T00:00:00+00:00");
        assert_eq!(out["Category"], json!(["Availability.Outage"]));
        assert_eq!(out["Priority"], "High");
        assert_eq!(out["Analyzer"]["Method"], json!(["Monitor"]));
        assert_eq!(out["Source"][0]["Hostname"], "my-host");
        assert_eq!(out["Source"][0]["Port"], json!([10050]));
        assert_eq!(out["Target"][0]["IP"], "127.0.0.1");
        assert_eq!(out["Target"][0]["Port"], json!([9090]));
    }

    #[test]
    fn problem_without_clock_is_filtered() {
        let mut p = problem();
        p.as_object_mut().unwrap().remove("clock");
        let (ok, _) = converter(&[]).unwrap().convert(&p).unwrap();
        assert!(!ok);
    }

    #[test]
    fn analyzer_method_defaults() {
        assert_eq!(analyzer_methods(&[]), vec!["Monitor", "Threshold"]);
        assert_eq!(analyzer_methods(&["push", "polling"]), vec!["Monitor"]);
        assert_eq!(analyzer_methods(&["Correlation"]), vec!["Correlation"]);
    }

    #[test]
    fn category_and_severity() {
        let c = category();
        assert_eq!(c.call(&[json!("High CPU load")]).unwrap(), json!(["Availability.Failure"]));
        assert_eq!(c.call(&[json!("Disk full")]).unwrap(), json!(["Other.Uncategorised"]));
        let s = severity();
        assert_eq!(s.call(&[json!(5)]).unwrap(), json!("Critical"));
        assert_eq!(s.call(&[json!(9)]).unwrap(), json!("Unknown"));
    }

    type Calls = Arc<StdMutex<Vec<String>>>;

    async fn fake_rpc(State(calls): State<Calls>, Json(req): Json<Value>) -> Json<Value> {
        let method = req["method"].as_str().unwrap_or_default().to_string();
        calls.lock().unwrap().push(method.clone());
        let result = match method.as_str() {
            "user.login" => json!("0123456789abcdef"),
            "problem.get" => json!([{"clock": "1700000000", "objectid": "42"}]),
            "trigger.get" if req["params"]["selectHosts"].is_array() => {
                json!([{"hosts": [{"hostid": "7", "name": "web-1"}]}])
            }
            "trigger.get" => json!([{"description": "web-1 is unreachable", "priority": "4"}]),
            "host.get" => json!([{"interfaces": [
                {"type": "2", "ip": "10.9.9.9", "dns": "", "port": "161"},
                {"type": "1", "ip": "", "dns": "web-1.lan", "port": "10050"},
            ]}]),
            _ => return Json(json!({"jsonrpc": "2.0", "error": {"message": "unknown"}})),
        };
        Json(json!({"jsonrpc": "2.0", "result": result, "id": 1}))
    }

    async fn spawn_fake() -> (String, Calls) {
        let calls: Calls = Arc::default();
        let app = Router::new()
            .route("/api_jsonrpc.php", post(fake_rpc))
            .with_state(calls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/api_jsonrpc.php"), calls)
    }

    #[tokio::test]
    async fn push_payload_is_completed_from_the_api() {
        let (url, calls) = spawn_fake().await;
        let api = Arc::new(ZabbixApi::new(url, "Admin", "zabbix").await.unwrap());
        assert_eq!(api.server().ip, "127.0.0.1");

        let push = ZabbixPush::new(api.clone());
        let item = push.enrich(json!({"eventid": 1001})).await.unwrap();
        assert_eq!(item["clock"], "1700000000");
        assert_eq!(item["name"], "web-1 is unreachable");
        assert_eq!(item["severity"], "4");
        assert_eq!(item["hosts"][0]["name"], "web-1");
        assert_eq!(item["extra"], json!({"ip": "web-1.lan", "port": 10050}));
        assert_eq!(item["extra_target"]["hostname"], "127.0.0.1");

        let (ok, out) = converter(&["push"]).unwrap().convert(&item).unwrap();
        assert!(ok);
        assert_eq!(out["Priority"], "High");

        // host lookups are cached
        push.enrich(json!({"eventid": "1002"})).await.unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|m| *m == "user.login").count(), 1);
        assert_eq!(calls.iter().filter(|m| *m == "host.get").count(), 1);
    }

    #[tokio::test]
    async fn push_without_eventid_fails() {
        let (url, _) = spawn_fake().await;
        let api = Arc::new(ZabbixApi::new(url, "Admin", "zabbix").await.unwrap());
        let err = ZabbixPush::new(api).enrich(json!({"name": "x"})).await.unwrap_err();
        assert!(err.to_string().contains("eventid"));
    }

    #[tokio::test]
    async fn poller_fetches_and_enriches() {
        let (url, _) = spawn_fake().await;
        let api = Arc::new(ZabbixApi::new(url, "Admin", "zabbix").await.unwrap());
        let poller = ZabbixPoller::new(api);
        let items = poller.fetch().await.unwrap();
        assert_eq!(items.len(), 1);
        let item = poller.enrich(items[0].clone()).await.unwrap();
        assert_eq!(item["hosts"][0]["name"], "web-1");
        assert_eq!(item["extra"]["port"], 10050);
    }
}
