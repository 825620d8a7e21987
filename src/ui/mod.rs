//! Terminal output for the CLI
//!
//! Uses `cliclack` for styled step output and spinners when attached to a
//! terminal, with plain line output in CI and when piped.
//!
//! # Example
//!
//! ```rust,ignore
//! use devfarm::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Waiting for device 0123456789ABCDEF...");
//! // ... acquire the lock ...
//! spinner.stop("Device locked");
//!
//! ui::step_ok_detail(&ctx, "Merged 42 records", "build/opencl/cache.bin");
//! ```

mod context;
mod output;
mod progress;
mod theme;

pub use context::UiContext;
pub use output::{key_value, section, step_info, step_ok, step_ok_detail, step_warn_hint};
pub use progress::TaskSpinner;
pub use theme::{init_theme, DevfarmTheme};
