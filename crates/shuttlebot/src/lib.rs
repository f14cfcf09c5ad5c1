mod config;
mod error;
mod fetch;
mod forward;
mod observability;
mod tg;

mod util;

use crate::prelude::*;
use itertools::Itertools;

pub use crate::error::*;
pub use config::*;
pub use observability::*;

#[allow(unused_imports)]
mod prelude {
    pub(crate) use crate::error::prelude::*;
    pub(crate) use crate::observability::logging::prelude::*;
    pub(crate) use crate::util::prelude::*;
}

/// Run the telegram bot processing loop
pub async fn run(config: Config) -> Result<()> {
    let rules = forward::RuleSet::from_config(&config.forward)?;

    info!(
        rules = rules.rules().len(),
        watched_sources = %rules.watched_sources().join(", "),
        "Loaded forwarding rules"
    );

    let opts = tg::RunBotOptions {
        tg_cfg: config.tg,
        rules,
        fetch_cfg: config.fetch,
    };

    tg::run_bot(opts).await
}
