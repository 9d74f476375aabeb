//! AWS lookups for k3d development clusters
//!
//! Backed by the `aws` CLI, which picks up the usual profile, region and
//! credential chain from the environment.

use crate::command::{CommandRunner, CommandWrapper};
use crate::streams::SharedBuffer;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;

/// Which instance addresses to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterExposure {
    Public,
    Private,
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub arn: String,
    #[serde(default)]
    pub user_id: String,
    /// Last path segment of the ARN
    #[serde(skip)]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIp {
    pub ip: String,
    pub reservation_id: String,
    pub instance_id: String,
    pub is_public: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedClusterIps {
    pub public_ips: Vec<ClusterIp>,
    pub private_ips: Vec<ClusterIp>,
}

#[async_trait]
pub trait AwsClient: Send + Sync {
    async fn get_identity(&self) -> Result<CallerIdentity>;

    /// Addresses of the running `{username}-dev` instances
    async fn get_cluster_ips(&self, username: &str, exposure: FilterExposure)
    -> Result<Vec<ClusterIp>>;

    async fn get_sorted_cluster_ips(
        &self,
        username: &str,
        exposure: FilterExposure,
    ) -> Result<SortedClusterIps> {
        let ips = self.get_cluster_ips(username, exposure).await?;
        let (public_ips, private_ips): (Vec<_>, Vec<_>) = ips
            .into_iter()
            .filter(|ip| !ip.ip.is_empty())
            .partition(|ip| ip.is_public);
        Ok(SortedClusterIps {
            public_ips,
            private_ips,
        })
    }
}

/// [`AwsClient`] that shells out to the `aws` CLI
pub struct CliAwsClient {
    program: String,
}

impl Default for CliAwsClient {
    fn default() -> Self {
        Self::new("aws")
    }
}

impl CliAwsClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run_json(&self, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string())
            .chain(["--output".to_string(), "json".to_string()])
            .collect();
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let mut cmd = CommandWrapper::new(&self.program, &args);
        cmd.set_stdout(out.writer());
        cmd.set_stderr(err.writer());
        cmd.run()
            .await
            .with_context(|| format!("{} {}", self.program, err.contents().trim()))?;
        Ok(out.contents())
    }
}

#[async_trait]
impl AwsClient for CliAwsClient {
    async fn get_identity(&self) -> Result<CallerIdentity> {
        let json = self
            .run_json(&["sts", "get-caller-identity"])
            .await
            .context("failed to get caller identity")?;
        parse_caller_identity(&json)
    }

    async fn get_cluster_ips(
        &self,
        username: &str,
        exposure: FilterExposure,
    ) -> Result<Vec<ClusterIp>> {
        let name_filter = format!("Name=tag:Name,Values={}-dev", username);
        let json = self
            .run_json(&[
                "ec2",
                "describe-instances",
                "--filters",
                &name_filter,
                "Name=instance-state-name,Values=running",
            ])
            .await
            .context("failed to describe instances")?;
        parse_cluster_ips(&json, username, exposure)
    }
}

pub fn parse_caller_identity(json: &str) -> Result<CallerIdentity> {
    let mut identity: CallerIdentity =
        serde_json::from_str(json).context("failed to parse caller identity")?;
    identity.username = identity
        .arn
        .split('/')
        .nth(1)
        .ok_or_else(|| anyhow!("unexpected caller ARN {:?}", identity.arn))?
        .to_string();
    Ok(identity)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstances {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    reservation_id: String,
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    #[serde(default)]
    instance_id: String,
    private_ip_address: Option<String>,
    public_ip_address: Option<String>,
}

/// Flatten `describe-instances` output into addresses, private before public
pub fn parse_cluster_ips(
    json: &str,
    username: &str,
    exposure: FilterExposure,
) -> Result<Vec<ClusterIp>> {
    let described: DescribeInstances =
        serde_json::from_str(json).context("failed to parse instances")?;
    if described.reservations.is_empty() {
        bail!("no reservations found for user {}", username);
    }

    let mut ips = Vec::new();
    for reservation in &described.reservations {
        for instance in &reservation.instances {
            let addresses = [
                (&instance.private_ip_address, false),
                (&instance.public_ip_address, true),
            ];
            for (address, is_public) in addresses {
                if let Some(ip) = address {
                    ips.push(ClusterIp {
                        ip: ip.clone(),
                        reservation_id: reservation.reservation_id.clone(),
                        instance_id: instance.instance_id.clone(),
                        is_public,
                    });
                }
            }
        }
    }
    if ips.is_empty() {
        bail!("no instances found for user {}", username);
    }

    ips.retain(|ip| match exposure {
        FilterExposure::Public => ip.is_public,
        FilterExposure::Private => !ip.is_public,
        FilterExposure::All => true,
    });
    if ips.is_empty() {
        bail!("no filtered cluster IPs found for user {}", username);
    }
    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTANCES: &str = r#"{"Reservations": [{
        "ReservationId": "r-1",
        "Instances": [
            {"InstanceId": "i-1", "PrivateIpAddress": "10.0.0.5", "PublicIpAddress": "54.1.2.3"},
            {"InstanceId": "i-2", "PrivateIpAddress": "10.0.0.6"}
        ]
    }]}"#;

    #[test]
    fn test_parse_caller_identity() {
        let identity = parse_caller_identity(
            r#"{"UserId": "AIDA", "Account": "123456789012", "Arn": "arn:aws:iam::123456789012:user/jdoe"}"#,
        )
        .unwrap();
        assert_eq!(identity.username, "jdoe");
        assert_eq!(identity.account, "123456789012");
        assert!(parse_caller_identity(r#"{"Arn": "root"}"#).is_err());
    }

    #[test]
    fn test_parse_cluster_ips_filters() {
        let all = parse_cluster_ips(INSTANCES, "jdoe", FilterExposure::All).unwrap();
        assert_eq!(all.len(), 3);
        let public = parse_cluster_ips(INSTANCES, "jdoe", FilterExposure::Public).unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].ip, "54.1.2.3");
        assert_eq!(public[0].instance_id, "i-1");
    }

    #[test]
    fn test_parse_cluster_ips_errors() {
        let err = parse_cluster_ips(r#"{"Reservations": []}"#, "jdoe", FilterExposure::All)
            .unwrap_err();
        assert_eq!(err.to_string(), "no reservations found for user jdoe");

        let err = parse_cluster_ips(
            r#"{"Reservations": [{"Instances": [{"InstanceId": "i-1", "PrivateIpAddress": "10.0.0.5"}]}]}"#,
            "jdoe",
            FilterExposure::Public,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "no filtered cluster IPs found for user jdoe");
    }

    struct Canned(Vec<ClusterIp>);

    #[async_trait]
    impl AwsClient for Canned {
        async fn get_identity(&self) -> Result<CallerIdentity> {
            Ok(CallerIdentity::default())
        }

        async fn get_cluster_ips(&self, _: &str, _: FilterExposure) -> Result<Vec<ClusterIp>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_sorted_cluster_ips() {
        let ips = parse_cluster_ips(INSTANCES, "jdoe", FilterExposure::All).unwrap();
        let sorted = Canned(ips)
            .get_sorted_cluster_ips("jdoe", FilterExposure::All)
            .await
            .unwrap();
        assert_eq!(sorted.public_ips.len(), 1);
        assert_eq!(sorted.private_ips.len(), 2);
        assert_eq!(sorted.private_ips[0].ip, "10.0.0.5");
    }
}
