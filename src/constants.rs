//! Process-wide constants

/// Helm release name of the Big Bang umbrella chart
pub const BIG_BANG_HELM_RELEASE_NAME: &str = "bigbang";

/// Namespace the Big Bang umbrella chart is installed into
pub const BIG_BANG_NAMESPACE: &str = "bigbang";

/// Namespace the Flux controllers run in
pub const FLUX_NAMESPACE: &str = "flux-system";

/// Version of this CLI
pub const BIG_BANG_CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Registry every Big Bang image is pulled from
pub const REGISTRY1_HOST: &str = "registry1.dso.mil";

/// GitLab tags endpoint for bbctl releases
pub const BBCTL_TAGS_URL: &str = "https://repo1.dso.mil/api/v4/projects/11320/repository/tags";

/// GitLab project path of the Big Bang umbrella chart
pub const BIG_BANG_REPO_PATH: &str = "big-bang/bigbang";

/// GitLab group that holds the individual Big Bang packages
pub const BIG_BANG_PACKAGES_GROUP: &str = "big-bang/product/packages";
