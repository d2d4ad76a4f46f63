use crate::error::Error;
use crate::payload::PayloadSelection;
use clap::Parser;
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Region value that asks for instance-metadata detection.
pub const LOCAL_REGION: &str = "local";

const LONG_FLAGS: [&str; 3] = ["region", "command", "endpoint-url"];

/// Send a message to an SQS queue, identified by name or URL.
#[derive(Debug, Parser, Serialize)]
#[command(name = "sqs-send", version)]
pub struct Cli {
    /// File to send; "-" reads standard input. Omit to send a status record.
    #[arg(short = 'f', value_name = "PATH")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Send the message this many times.
    #[arg(short = 'c', value_name = "COUNT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// How long to wait between sends, e.g. "200ms", "1s 500ms" or "1.5s".
    #[arg(short = 'i', value_name = "DURATION")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// AWS region; "local" detects it from instance metadata.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Command to run for each status record.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Override the SQS endpoint, e.g. for a local queue service.
    #[arg(long, value_name = "URL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,

    /// Queue name or queue URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

impl Cli {
    /// Parses process arguments, accepting single-dash long flags.
    pub fn parse_args() -> Self {
        Cli::parse_from(normalize_args(std::env::args_os()))
    }
}

/// Rewrites `-region`, `-command` and `-endpoint-url` (with or without
/// `=value`) to their double-dash forms.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            let Some(flag) = text.strip_prefix('-').filter(|rest| !rest.starts_with('-')) else {
                return arg;
            };
            let name = flag.split('=').next().unwrap_or(flag);
            if LONG_FLAGS.contains(&name) {
                OsString::from(format!("--{}", flag))
            } else {
                arg
            }
        })
        .collect()
}

/// Raw settings after defaults, environment and flags are merged.
///
/// The env provider guesses value types, so `SQS_SEND_QUEUE=12345` or
/// `SQS_SEND_COMMAND=true` arrive as numbers and booleans. Text fields take
/// any scalar and keep its text.
#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    #[serde(deserialize_with = "scalar_string")]
    pub queue: String,
    pub count: u32,
    #[serde(deserialize_with = "scalar_string")]
    pub interval: String,
    #[serde(deserialize_with = "scalar_string")]
    pub region: String,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub file: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub command: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub endpoint_url: Option<String>,
}

struct ScalarString(String);

impl<'de> Deserialize<'de> for ScalarString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl<'de> Visitor<'de> for ScalarVisitor {
            type Value = ScalarString;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string, number or boolean")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(ScalarString(v))
            }

            fn visit_char<E: de::Error>(self, v: char) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_i128<E: de::Error>(self, v: i128) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    ScalarString::deserialize(deserializer).map(|s| s.0)
}

fn optional_scalar_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<ScalarString>::deserialize(deserializer).map(|s| s.map(|s| s.0))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue: String::new(),
            count: 1,
            interval: "200ms".to_string(),
            region: LOCAL_REGION.to_string(),
            file: None,
            command: None,
            endpoint_url: None,
        }
    }
}

impl Settings {
    pub fn figment(cli: &Cli) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Env::prefixed("SQS_SEND_"))
            .merge(Serialized::defaults(cli))
    }

    pub fn load(cli: &Cli) -> Result<Self, Error> {
        Ok(Settings::figment(cli).extract()?)
    }
}

/// Everything a run needs, validated once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub queue: String,
    pub count: u32,
    pub interval: Duration,
    pub region: Option<String>,
    pub endpoint_url: Option<Url>,
    pub payload: PayloadSelection,
}

impl RunConfig {
    pub fn load(cli: &Cli) -> Result<Self, Error> {
        RunConfig::try_from(Settings::load(cli)?)
    }
}

impl TryFrom<Settings> for RunConfig {
    type Error = Error;

    fn try_from(settings: Settings) -> Result<Self, Self::Error> {
        let file = settings.file.filter(|f| !f.is_empty());
        let command = settings.command.filter(|c| !c.is_empty());

        let payload = match (file, command) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidInput(
                    "cannot specify both -command and -f flags".to_string(),
                ))
            }
            (Some(file), None) if file == "-" => PayloadSelection::Stdin,
            (Some(file), None) => PayloadSelection::File(PathBuf::from(file)),
            (None, command) => PayloadSelection::Status { command },
        };

        let interval = parse_interval(&settings.interval)?;

        let endpoint_url = settings
            .endpoint_url
            .filter(|u| !u.is_empty())
            .map(|u| {
                Url::parse(&u)
                    .map_err(|e| Error::InvalidInput(format!("invalid endpoint URL '{}': {}", u, e)))
            })
            .transpose()?;

        let region = Some(settings.region).filter(|r| !r.is_empty() && r != LOCAL_REGION);

        Ok(RunConfig {
            queue: settings.queue,
            count: settings.count,
            interval,
            region,
            endpoint_url,
            payload,
        })
    }
}

/// Parses humantime durations, falling back to decimal amounts ("1.5s",
/// "0.5h") for intervals written the Go way.
pub fn parse_interval(text: &str) -> Result<Duration, Error> {
    humantime::parse_duration(text)
        .or_else(|e| parse_decimal_duration(text).ok_or(e))
        .map_err(|e| Error::InvalidInput(format!("invalid interval '{}': {}", text, e)))
}

fn parse_decimal_duration(text: &str) -> Option<Duration> {
    let is_amount = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = text.trim();
    if rest.is_empty() {
        return None;
    }

    let mut seconds = 0f64;
    while !rest.is_empty() {
        let amount_len = rest.find(|c: char| !is_amount(c)).unwrap_or(rest.len());
        let (amount, tail) = rest.split_at(amount_len);
        let (unit, tail) = tail.split_at(tail.find(is_amount).unwrap_or(tail.len()));
        let scale = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        seconds += amount.parse::<f64>().ok()? * scale;
        rest = tail;
    }

    Duration::try_from_secs_f64(seconds).ok()
}
