//! `violations` command

use super::bind_switch;
use crate::factory::{self, Factory};
use crate::violations::list_violations;
use anyhow::Result;
use clap::Args;

#[derive(Args, Debug, Default)]
pub struct ViolationsArgs {
    /// List violations in audit mode
    #[arg(long)]
    pub audit: bool,

    /// Namespace to list violations for; all namespaces when omitted
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,
}

pub async fn run(factory: &dyn Factory, args: ViolationsArgs) -> Result<()> {
    let resolver = factory.get_viper()?;
    bind_switch(&resolver, "audit", args.audit);
    resolver.bind_flag("namespace", "", args.namespace.as_deref());

    let output = factory::output_client(factory)?;
    let violations = list_violations(factory).await?;
    output.output(&violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeFactory;

    #[tokio::test]
    async fn test_flags_reach_configuration() {
        let factory = FakeFactory::new();
        factory.fail("get_dynamic_client", "unreachable");
        let err = run(
            &factory,
            ViolationsArgs {
                audit: true,
                namespace: Some("monitoring".into()),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "unreachable");

        let config = factory::config_client(&factory)
            .unwrap()
            .get_config()
            .unwrap();
        assert!(config.violations.audit);
        assert_eq!(config.k8s.namespace, "monitoring");
    }
}
