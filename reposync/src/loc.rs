//! Locations module

/// Locations for the user
pub mod user {
    use camino::Utf8PathBuf;

    pub fn config_dir() -> anyhow::Result<Utf8PathBuf> {
        let dir =
            dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Can't get config directory"))?;
        let dir = Utf8PathBuf::try_from(dir)?;
        Ok(dir.join("reposync"))
    }

    /// The configuration file used when none is given on the command line.
    pub fn config_file() -> anyhow::Result<Utf8PathBuf> {
        Ok(config_dir()?.join("config.json"))
    }
}
