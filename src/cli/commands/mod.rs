//! CLI command implementations

pub mod completions;
pub mod config;
pub mod devices;
pub mod inspect;
pub mod lock;
pub mod merge;
pub mod run;

pub use completions::execute as completions;
pub use config::execute as config;
pub use devices::execute as devices;
pub use inspect::execute as inspect;
pub use lock::execute as lock;
pub use merge::execute as merge;
pub use run::execute as run;
