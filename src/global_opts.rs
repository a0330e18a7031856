use clap::Args;

#[derive(Debug, Args)]
pub(crate) struct GlobalOpts {
    /// MobiScope license key
    ///
    /// Without a license key the server runs with the free tool set and
    /// free-tier limits. A validated key is cached locally, so steady-state
    /// operation does not require network access.
    #[arg(short = 'k', long, env = "MOBISCOPE_LICENSE_KEY", hide_env_values = true)]
    pub(crate) license_key: Option<String>,

    /// License validation endpoint
    ///
    /// Override when validating against a self-hosted license service
    /// (e.g. `https://license.internal:5732/v1/validate`).
    #[arg(long, env = "MOBISCOPE_VALIDATION_ENDPOINT")]
    pub(crate) validation_endpoint: Option<String>,

    /// Path to the adb executable
    #[arg(long, env = "MOBISCOPE_ADB_PATH", default_value = "adb")]
    pub(crate) adb_path: String,
}
