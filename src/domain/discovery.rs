//! Instance discovery through `aws ec2 describe-instances`.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::instance::InstanceRecord;
use crate::config::Credentials;
use crate::error::DiscoveryError;
use crate::tools;

const NOT_AVAILABLE: &str = "N/A";

/// Which running instances to list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub tags: Vec<(String, String)>,
    pub instance_type: Option<String>,
}

impl InstanceFilter {
    /// Build from `key:value` tag arguments. Splits on the first `:`.
    pub fn new(tags: &[String], instance_type: Option<String>) -> Result<Self, DiscoveryError> {
        let tags = tags
            .iter()
            .map(|raw| {
                raw.split_once(':')
                    .filter(|(key, _)| !key.is_empty())
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| DiscoveryError::InvalidTagFilter(raw.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            tags,
            instance_type,
        })
    }

    /// `--filters` arguments for the describe call.
    pub fn cli_filters(&self) -> Vec<String> {
        let mut filters = vec!["Name=instance-state-name,Values=running".to_string()];
        for (key, value) in &self.tags {
            filters.push(format!("Name=tag:{},Values={}", key, value));
        }
        if let Some(ty) = &self.instance_type {
            filters.push(format!("Name=instance-type,Values={}", ty));
        }
        filters
    }

    fn matches(&self, instance: &Ec2Instance) -> bool {
        if instance.state.as_ref().map(|s| s.name.as_str()) != Some("running") {
            return false;
        }
        if let Some(ty) = &self.instance_type {
            if instance.instance_type.as_deref() != Some(ty.as_str()) {
                return false;
            }
        }
        let tags: HashMap<&str, &str> = instance
            .tags
            .iter()
            .map(|t| (t.key.as_str(), t.value.as_str()))
            .collect();
        self.tags
            .iter()
            .all(|(k, v)| tags.get(k.as_str()) == Some(&v.as_str()))
    }
}

/// Source of running instances.
pub trait Discovery {
    fn discover(
        &self,
        filter: &InstanceFilter,
    ) -> impl Future<Output = Result<Vec<InstanceRecord>, DiscoveryError>> + Send;
}

/// Drives the `aws` CLI with the profile's credentials in its environment.
pub struct AwsCliDiscovery {
    aws: PathBuf,
    credentials: Credentials,
}

impl AwsCliDiscovery {
    pub fn new(credentials: Credentials) -> Result<Self, DiscoveryError> {
        let aws = tools::find("aws").ok_or(DiscoveryError::AwsCliMissing)?;
        Ok(Self { aws, credentials })
    }
}

impl Discovery for AwsCliDiscovery {
    async fn discover(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceRecord>, DiscoveryError> {
        let mut cmd = Command::new(&self.aws);
        cmd.args(["ec2", "describe-instances", "--output", "json", "--filters"])
            .args(filter.cli_filters())
            .env("AWS_ACCESS_KEY_ID", &self.credentials.access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", &self.credentials.secret_access_key)
            .env("AWS_DEFAULT_REGION", &self.credentials.region)
            .env_remove("AWS_PROFILE")
            .env_remove("AWS_SESSION_TOKEN");

        debug!(
            region = %self.credentials.region,
            filters = ?filter.cli_filters(),
            "describing instances"
        );
        let output = cmd.output().await?;

        if !output.status.success() {
            return Err(DiscoveryError::Command {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let instances = parse_describe_output(&String::from_utf8_lossy(&output.stdout), filter)?;
        info!(count = instances.len(), "discovered running instances");
        Ok(instances)
    }
}

// ── describe-instances response ─────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Instance {
    instance_id: String,
    private_ip_address: Option<String>,
    instance_type: Option<String>,
    state: Option<InstanceState>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceState {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

/// Flatten reservations into records, keeping only instances the filter admits.
pub fn parse_describe_output(
    json: &str,
    filter: &InstanceFilter,
) -> Result<Vec<InstanceRecord>, DiscoveryError> {
    let response: DescribeInstancesResponse = serde_json::from_str(json)?;

    Ok(response
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .filter(|i| filter.matches(i))
        .map(|i| {
            let name = i
                .tags
                .iter()
                .find(|t| t.key == "Name")
                .map(|t| t.value.clone())
                .unwrap_or_else(|| NOT_AVAILABLE.into());
            InstanceRecord::new(
                i.instance_id,
                i.private_ip_address,
                name,
                i.instance_type.unwrap_or_else(|| NOT_AVAILABLE.into()),
            )
        })
        .collect())
}
