use anyhow::Result;
use askterm_core::Config;

mod app;
mod handler;
mod input;
mod logging;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, Tui};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(error) => (Config::new(), Some(error)),
    };

    logging::init(&config.log_file)?;
    if let Some(error) = config_error {
        tracing::warn!(error = %error, "using default configuration");
    }
    tracing::info!(
        engine = %config.engine_path.display(),
        timeout_secs = config.timeout_secs,
        mode = ?config.output_mode,
        "starting"
    );

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut app = App::new(&config);

    let result = run(&mut terminal, &mut app).await;

    app.shutdown();
    tui::restore()?;
    tracing::info!("exited");
    result
}

async fn run(terminal: &mut Tui, app: &mut App) -> Result<()> {
    let mut events = EventHandler::new();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        tokio::select! {
            event = events.next() => match event {
                Some(event) => handler::handle_event(app, event),
                None => break,
            },
            resolution = app.session.resolve() => app.on_resolution(resolution),
        }
    }

    Ok(())
}
