use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use flowcontrol_comfyui::queue::DEFAULT_POLL_INTERVAL;

/// Runtime configuration loaded from environment variables.
///
/// All fields have defaults suitable for a ComfyUI instance on the same
/// machine. Override via environment variables or a `.env` file.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Address the OSC control socket binds to (default: `0.0.0.0`).
    pub osc_bind_addr: IpAddr,
    /// Inbound OSC control port (default: `9000`).
    pub osc_port_in: u16,
    /// Host that receives OSC status notifications (default: `127.0.0.1`).
    pub osc_host_out: String,
    /// Outbound OSC notification port (default: `9001`).
    pub osc_port_out: u16,
    /// ComfyUI `host:port` or base URL (default: `127.0.0.1:8188`).
    pub comfyui_server: String,
    /// Directory holding `<name>.json` workflow templates (default: `./workflows`).
    pub workflow_path: PathBuf,
    /// Delay between queue polls (default: 200 ms).
    pub poll_interval: Duration,
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            osc_bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            osc_port_in: 9000,
            osc_host_out: "127.0.0.1".into(),
            osc_port_out: 9001,
            comfyui_server: "127.0.0.1:8188".into(),
            workflow_path: PathBuf::from("./workflows"),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                  | Default          |
    /// |--------------------------|------------------|
    /// | `OSC_BIND_ADDR`          | `0.0.0.0`        |
    /// | `OSC_PORTIN`             | `9000`           |
    /// | `OSC_HOST_OUT`           | `127.0.0.1`      |
    /// | `OSC_PORTOUT`            | `9001`           |
    /// | `COMFYUI_SERVER`         | `127.0.0.1:8188` |
    /// | `WORKFLOW_PATH`          | `./workflows`    |
    /// | `QUEUE_POLL_INTERVAL_MS` | `200`            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let poll_interval_ms: u64 = parse_var(
            &lookup,
            "QUEUE_POLL_INTERVAL_MS",
            defaults.poll_interval.as_millis() as u64,
        )?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "QUEUE_POLL_INTERVAL_MS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            osc_bind_addr: parse_var(&lookup, "OSC_BIND_ADDR", defaults.osc_bind_addr)?,
            osc_port_in: parse_var(&lookup, "OSC_PORTIN", defaults.osc_port_in)?,
            osc_host_out: lookup("OSC_HOST_OUT").unwrap_or(defaults.osc_host_out),
            osc_port_out: parse_var(&lookup, "OSC_PORTOUT", defaults.osc_port_out)?,
            comfyui_server: lookup("COMFYUI_SERVER").unwrap_or(defaults.comfyui_server),
            workflow_path: lookup("WORKFLOW_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.workflow_path),
            poll_interval: Duration::from_millis(poll_interval_ms),
        })
    }

    /// Socket address the OSC control server listens on.
    pub fn osc_listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.osc_bind_addr, self.osc_port_in)
    }

    /// `host:port` that receives status notifications.
    pub fn osc_notify_target(&self) -> String {
        format!("{}:{}", self.osc_host_out, self.osc_port_out)
    }

    /// Base HTTP URL of the ComfyUI server.
    ///
    /// A bare `host:port` gets an `http://` scheme.
    pub fn comfyui_url(&self) -> String {
        if self.comfyui_server.contains("://") {
            self.comfyui_server.clone()
        } else {
            format!("http://{}", self.comfyui_server)
        }
    }
}

/// Parse `var` with [`FromStr`], falling back to `default` when unset.
fn parse_var<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
