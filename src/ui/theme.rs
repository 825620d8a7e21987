//! Theme for cliclack output

use cliclack::ThemeState;
use console::Style;

/// Blue-accented theme for step output and spinners
#[derive(Debug, Clone, Default)]
pub struct DevfarmTheme;

impl cliclack::Theme for DevfarmTheme {
    fn bar_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().blue(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().blue().dim(),
        }
    }

    fn state_symbol_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().blue(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().green(),
        }
    }
}

/// Install the theme globally
pub fn init_theme() {
    cliclack::set_theme(DevfarmTheme);
}
