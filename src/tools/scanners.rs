//! Wrappers around external security scanners.
//!
//! Each scanner maps its normalized arguments to a fixed command line and
//! runs it through [`run_process`].

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::terminal::run_process;
use super::{optional_str, required_str, Tool, ToolContext};

/// Network scan for open ports and services.
pub struct Nmap;

#[async_trait]
impl Tool for Nmap {
    fn name(&self) -> &str {
        "nmap"
    }

    fn description(&self) -> &str {
        "Scan a host with nmap to discover open ports and services. Accepts an IP address, a domain, or a URL (the host part is extracted). Uses a TCP connect scan, so no root privileges are required."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "description": "Target IP address, domain or URL (e.g. https://example.com). For URLs only the host is scanned."
                },
                "ports": {
                    "type": "string",
                    "description": "Ports to scan, e.g. 1-1000 or 80,443,8080. Defaults to the common ports."
                }
            },
            "required": ["target"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let target = host_of(required_str(args, "target")?);
        let mut cmd_args = vec!["-sT".to_string(), "-sV".to_string()];
        if let Some(ports) = optional_str(args, "ports") {
            cmd_args.push("-p".to_string());
            cmd_args.push(ports.to_string());
        }
        cmd_args.push(target);
        run_process("nmap", &cmd_args, &ctx.workdir, ctx.timeout).await
    }
}

/// SQL injection probe.
pub struct Sqlmap;

#[async_trait]
impl Tool for Sqlmap {
    fn name(&self) -> &str {
        "sqlmap"
    }

    fn description(&self) -> &str {
        "Probe a URL for SQL injection vulnerabilities with sqlmap (non-interactive)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Target URL, including the query parameters to test"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let url = required_str(args, "url")?;
        let cmd_args = vec!["-u".to_string(), url.to_string(), "--batch".to_string()];
        run_process("sqlmap", &cmd_args, &ctx.workdir, ctx.timeout).await
    }
}

/// Web server vulnerability scan.
pub struct Nikto;

#[async_trait]
impl Tool for Nikto {
    fn name(&self) -> &str {
        "nikto"
    }

    fn description(&self) -> &str {
        "Scan a web server for known vulnerabilities and misconfigurations with nikto."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "description": "Target URL or host"
                }
            },
            "required": ["target"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let target = required_str(args, "target")?;
        let cmd_args = vec!["-h".to_string(), target.to_string()];
        run_process("nikto", &cmd_args, &ctx.workdir, ctx.timeout).await
    }
}

/// Directory and file enumeration.
pub struct Dirb;

#[async_trait]
impl Tool for Dirb {
    fn name(&self) -> &str {
        "dirb"
    }

    fn description(&self) -> &str {
        "Enumerate web directories and files with dirb."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Base URL to enumerate"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let url = required_str(args, "url")?;
        let cmd_args = vec![url.to_string(), "-S".to_string()];
        run_process("dirb", &cmd_args, &ctx.workdir, ctx.timeout).await
    }
}

/// Host part of a URL; anything that is not a URL is returned unchanged.
fn host_of(target: &str) -> String {
    if target.contains("://") {
        if let Some(host) = reqwest::Url::parse(target)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
        {
            return host.trim_start_matches('[').trim_end_matches(']').to_string();
        }
    }
    target.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_extracted_from_urls() {
        assert_eq!(host_of("https://example.com/login?x=1"), "example.com");
        assert_eq!(host_of("http://10.0.0.1:8080/"), "10.0.0.1");
        assert_eq!(host_of("http://[::1]:8080/"), "::1");
    }

    #[test]
    fn plain_targets_pass_through() {
        assert_eq!(host_of("10.0.0.1"), "10.0.0.1");
        assert_eq!(host_of("example.com"), "example.com");
    }

    #[tokio::test]
    async fn scanners_validate_arguments_before_spawning() {
        let ctx = ToolContext::default();
        let empty = Map::new();
        assert!(Nmap.execute(&empty, &ctx).await.is_err());
        assert!(Sqlmap.execute(&empty, &ctx).await.is_err());
        assert!(Nikto.execute(&empty, &ctx).await.is_err());
        assert!(Dirb.execute(&empty, &ctx).await.is_err());
    }
}
