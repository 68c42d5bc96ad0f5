//! Network diagnostic tools used by the connectivity agent
//!
//! - `ping_ip`: ICMP reachability through the system `ping` binary
//! - `check_port`: TCP connect test
//! - `query_dns_record`: DNS lookup through `dig`
//! - `get_domain_metadata`: WHOIS over TCP port 43

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

use crate::core::config::ToolsConfig;
use crate::tools::registry::{json_schema, require_port, require_str, Tool, ToolError, ToolRegistry};

/// Registry holding the four diagnostic tools
pub fn network_tools(config: &ToolsConfig) -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(PingTool::new(config)))
        .with(Arc::new(CheckPortTool::new(config)))
        .with(Arc::new(DnsQueryTool))
        .with(Arc::new(DomainMetadataTool::new(config)))
}

/// Reject values that would be read as command-line flags
fn safe_arg<'a>(value: &'a str, name: &str) -> Result<&'a str, ToolError> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('-') || value.chars().any(char::is_whitespace) {
        return Err(ToolError::InvalidParameters(format!(
            "'{}' is not a valid {}",
            value, name
        )));
    }
    Ok(value)
}

pub struct PingTool {
    count: u32,
    timeout_secs: u64,
}

impl PingTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            count: config.ping_count,
            timeout_secs: config.ping_timeout_secs,
        }
    }

    fn command(&self, address: &str) -> Command {
        let mut cmd = Command::new("ping");
        if cfg!(windows) {
            cmd.arg("-n")
                .arg(self.count.to_string())
                .arg("-w")
                .arg((self.timeout_secs * 1000).to_string());
        } else {
            cmd.arg("-c")
                .arg(self.count.to_string())
                .arg("-W")
                .arg(self.timeout_secs.to_string());
        }
        cmd.arg(address).kill_on_drop(true);
        cmd
    }
}

/// `dig` printing the header comments and the answer section only
fn dig_command(domain: &str, record_type: &str) -> Command {
    let mut cmd = Command::new("dig");
    cmd.args(["+noall", "+comments", "+answer"])
        .arg(domain)
        .arg(record_type)
        .kill_on_drop(true);
    cmd
}

/// Whether ping output shows at least one reply
pub fn ping_succeeded(output: &str) -> bool {
    let output = output.to_lowercase();
    output.contains("ttl=") || output.contains("bytes from")
}

#[async_trait]
impl Tool for PingTool {
    fn name(&self) -> &str {
        "ping_ip"
    }

    fn description(&self) -> &str {
        "Pings an IP address using the system's ping command. Returns true if the host is reachable, otherwise false."
    }

    fn parameters_schema(&self) -> Value {
        json_schema(
            json!({
                "ip_address": {
                    "type": "string",
                    "description": "The IP address to ping."
                }
            }),
            &["ip_address"],
        )
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let address = safe_arg(require_str(&params, "ip_address")?, "IP address")?;

        let output = self
            .command(address)
            .output()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to run ping: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(address, status = ?output.status.code(), "ping finished");
        Ok(Value::Bool(ping_succeeded(&stdout)))
    }
}

pub struct CheckPortTool {
    timeout: Duration,
}

impl CheckPortTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.port_timeout_ms),
        }
    }
}

#[async_trait]
impl Tool for CheckPortTool {
    fn name(&self) -> &str {
        "check_port"
    }

    fn description(&self) -> &str {
        "Checks if a specific port on a host is open by attempting to connect to it. Returns true if the port is open, otherwise false."
    }

    fn parameters_schema(&self) -> Value {
        json_schema(
            json!({
                "host": {
                    "type": "string",
                    "description": "The hostname or IP address to check."
                },
                "port": {
                    "type": "integer",
                    "description": "The port number to check."
                }
            }),
            &["host", "port"],
        )
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let host = safe_arg(require_str(&params, "host")?, "host")?;
        let port = require_port(&params, "port")?;

        let open = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        );
        debug!(host, port, open, "port check finished");
        Ok(Value::Bool(open))
    }
}

const RECORD_TYPES: &[&str] = &[
    "A", "AAAA", "CAA", "CNAME", "DNSKEY", "DS", "MX", "NS", "PTR", "SOA", "SRV", "TXT",
];

pub struct DnsQueryTool;

/// Turn `dig +noall +comments +answer` output into record strings.
///
/// Mirrors the resolver outcomes: the answers, or a single explanatory entry.
pub fn parse_dig_output(output: &str, record_type: &str) -> Vec<String> {
    if output.contains("status: NXDOMAIN") {
        return vec!["Domain does not exist.".to_string()];
    }

    let records: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(';'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // name ttl class type rdata...
            if fields.len() >= 5 && fields[3].eq_ignore_ascii_case(record_type) {
                Some(fields[4..].join(" "))
            } else {
                None
            }
        })
        .collect();

    if records.is_empty() {
        vec![format!("No {} records found.", record_type)]
    } else {
        records
    }
}

#[async_trait]
impl Tool for DnsQueryTool {
    fn name(&self) -> &str {
        "query_dns_record"
    }

    fn description(&self) -> &str {
        "Queries DNS records of a specified type for a given domain. Returns a list of record data, or a single entry explaining why no records were returned."
    }

    fn parameters_schema(&self) -> Value {
        json_schema(
            json!({
                "domain_name": {
                    "type": "string",
                    "description": "The domain to query"
                },
                "record_type": {
                    "type": "string",
                    "description": "The DNS record type to query (e.g., 'A', 'MX', 'NS', 'TXT', etc.)"
                }
            }),
            &["domain_name", "record_type"],
        )
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let domain = safe_arg(require_str(&params, "domain_name")?, "domain")?;
        let record_type = require_str(&params, "record_type")?.trim().to_uppercase();

        if !RECORD_TYPES.contains(&record_type.as_str()) {
            return Ok(json!([format!("Unknown record type: {}", record_type)]));
        }

        let output = match dig_command(domain, &record_type).output().await {
            Ok(output) => output,
            Err(e) => return Ok(json!([format!("DNS query failed: {}", e)])),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(json!([format!("DNS query failed: {}", stderr.trim())]));
        }

        Ok(json!(parse_dig_output(&stdout, &record_type)))
    }
}

/// Parsed WHOIS record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhoisRecord {
    pub domain_name: String,
    pub registrar: String,
    pub whois_server: String,
    pub updated_date: Option<String>,
    pub creation_date: Option<String>,
    pub expiration_date: Option<String>,
    pub name_servers: Vec<String>,
    pub status: Vec<String>,
    pub emails: Vec<String>,
    pub dnssec: String,
    pub name: String,
    pub org: String,
    pub country: String,
}

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

fn push_unique(list: &mut Vec<String>, value: String) {
    if !value.is_empty() && !list.contains(&value) {
        list.push(value);
    }
}

fn set_once(field: &mut String, value: &str) {
    if field.is_empty() {
        *field = value.to_string();
    }
}

fn set_once_opt(field: &mut Option<String>, value: &str) {
    if field.is_none() && !value.is_empty() {
        *field = Some(value.to_string());
    }
}

impl WhoisRecord {
    /// Parse the `key: value` text returned by WHOIS servers
    pub fn parse(text: &str) -> Self {
        let mut record = WhoisRecord::default();

        for line in text.lines() {
            let line = line.trim();
            if line.starts_with('%') || line.starts_with('#') || line.starts_with(">>>") {
                continue;
            }
            for email in EMAIL.find_iter(line) {
                push_unique(&mut record.emails, email.as_str().to_lowercase());
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            match key.as_str() {
                "domain name" | "domain" => set_once(&mut record.domain_name, &value.to_lowercase()),
                "registrar" => set_once(&mut record.registrar, value),
                "registrar whois server" | "whois server" | "whois" => {
                    set_once(&mut record.whois_server, value)
                }
                "updated date" | "last-modified" | "changed" => {
                    set_once_opt(&mut record.updated_date, value)
                }
                "creation date" | "created" => set_once_opt(&mut record.creation_date, value),
                "registry expiry date"
                | "registrar registration expiration date"
                | "expiration date"
                | "expires" => set_once_opt(&mut record.expiration_date, value),
                "name server" | "nserver" => {
                    if let Some(ns) = value.split_whitespace().next() {
                        push_unique(&mut record.name_servers, ns.to_lowercase());
                    }
                }
                "domain status" | "status" => {
                    if let Some(status) = value.split_whitespace().next() {
                        push_unique(&mut record.status, status.to_string());
                    }
                }
                "dnssec" => set_once(&mut record.dnssec, value),
                "registrant name" => set_once(&mut record.name, value),
                "registrant organization" | "organisation" | "org" => {
                    set_once(&mut record.org, value)
                }
                "registrant country" | "country" => set_once(&mut record.country, value),
                _ => {}
            }
        }

        record
    }
}

/// Referral target announced by a root WHOIS server
pub fn whois_referral(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if (key == "refer" || key == "whois") && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

pub struct DomainMetadataTool {
    root_server: String,
    timeout: Duration,
}

impl DomainMetadataTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            root_server: config.whois_server.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn query(&self, server: &str, domain: &str) -> Result<String, ToolError> {
        let exchange = async {
            let mut stream = TcpStream::connect((server, 43)).await?;
            stream.write_all(format!("{}\r\n", domain).as_bytes()).await?;
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(buf)) => Ok(String::from_utf8_lossy(&buf).into_owned()),
            Ok(Err(e)) => Err(ToolError::ExternalService(format!(
                "WHOIS query to {} failed: {}",
                server, e
            ))),
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl Tool for DomainMetadataTool {
    fn name(&self) -> &str {
        "get_domain_metadata"
    }

    fn description(&self) -> &str {
        "Useful for retrieving general information about a domain name, such as its registrar, creation date, expiration date, and more."
    }

    fn parameters_schema(&self) -> Value {
        json_schema(
            json!({
                "domain": {
                    "type": "string",
                    "description": "The domain name to query (e.g., 'example.com')"
                }
            }),
            &["domain"],
        )
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let domain = safe_arg(require_str(&params, "domain")?, "domain")?.to_lowercase();

        let root = self.query(&self.root_server, &domain).await?;
        let (server, text) = match whois_referral(&root) {
            Some(server) if !server.eq_ignore_ascii_case(&self.root_server) => {
                debug!(%domain, %server, "following WHOIS referral");
                let text = self.query(&server, &domain).await?;
                (server, text)
            }
            _ => (self.root_server.clone(), root),
        };

        let mut record = WhoisRecord::parse(&text);
        if record.domain_name.is_empty() {
            record.domain_name = domain;
        }
        if record.whois_server.is_empty() {
            record.whois_server = server;
        }

        serde_json::to_value(record).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}
