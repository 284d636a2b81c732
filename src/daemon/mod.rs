mod app;
pub mod coordinator;
mod dbus;
pub mod entities;
pub mod registry;

use anyhow::Result;

pub const DBUS_NAME: &str = "com.github.eatsbar.EatsBar";
pub const DBUS_PATH: &str = "/com/github/eatsbar/EatsBar";

pub async fn run() -> Result<()> {
    tracing::info!("Starting eats-bar daemon");
    app::run().await
}
