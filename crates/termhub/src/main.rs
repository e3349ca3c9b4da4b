#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use termhub::app::Application;

fn main() -> anyhow::Result<()> {
    let app = Application::new();
    let exit_code = app.run()?;
    std::process::exit(exit_code);
}
