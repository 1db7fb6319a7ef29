pub mod keygen;
pub mod migrate;
pub mod sweep;

use anyhow::Result;

#[derive(Debug)]
pub enum Action {
    Migrate(migrate::Args),
    Sweep(sweep::Args),
    Keygen(keygen::Args),
}

impl Action {
    /// Run the selected action to completion.
    ///
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Migrate(args) => migrate::execute(args).await,
            Self::Sweep(args) => sweep::execute(args).await,
            Self::Keygen(args) => keygen::execute(&args),
        }
    }
}
