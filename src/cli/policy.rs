//! `policy` command

use super::bind_switch;
use crate::factory::{self, Factory};
use crate::policy::list_policies;
use anyhow::Result;
use clap::Args;

#[derive(Args, Debug, Default)]
pub struct PolicyArgs {
    /// Print gatekeeper policy
    #[arg(long)]
    pub gatekeeper: bool,

    /// Print kyverno policy
    #[arg(long)]
    pub kyverno: bool,

    /// Constraint kind (Gatekeeper) or policy name (Kyverno)
    pub constraint_name: Option<String>,
}

pub async fn run(factory: &dyn Factory, args: PolicyArgs) -> Result<()> {
    let resolver = factory.get_viper()?;
    bind_switch(&resolver, "gatekeeper", args.gatekeeper);
    bind_switch(&resolver, "kyverno", args.kyverno);

    let output = factory::output_client(factory)?;
    let policies = list_policies(factory, args.constraint_name.as_deref()).await?;
    output.output(&policies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BbctlError, is_kind};
    use crate::fakes::FakeFactory;

    #[tokio::test]
    async fn test_requires_exactly_one_engine() {
        let factory = FakeFactory::new();
        let err = run(&factory, PolicyArgs::default()).await.unwrap_err();
        assert!(is_kind(&err, &BbctlError::AmbiguousPolicyEngine));

        let err = run(
            &factory,
            PolicyArgs {
                gatekeeper: true,
                kyverno: true,
                constraint_name: None,
            },
        )
        .await
        .unwrap_err();
        assert!(is_kind(&err, &BbctlError::AmbiguousPolicyEngine));
        assert!(factory.out().is_empty());
    }
}
