//! Built-in tool implementations for replybot.
//!
//! Tools give the agent the ability to act on the user's behalf:
//! look up the weather, read and add calendar events, and send the reply.

pub mod calendar;
pub mod event_create;
pub mod event_query;
pub mod reply;
pub mod weather;

pub use calendar::{Event, EventCalendar, EventFilter};
pub use event_create::CreateEventTool;
pub use event_query::QueryEventsTool;
pub use reply::ReplyTool;
pub use weather::{ForecastService, OpenMeteo, SyntheticForecast, WeatherForecastTool};

use replybot_config::{WeatherConfig, WeatherSource};
use replybot_core::channel::Messenger;
use replybot_core::error::RegistryError;
use replybot_core::tool::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Collaborators the built-in tools need.
pub struct ToolDeps {
    pub forecasts: Arc<dyn ForecastService>,
    pub calendar: Arc<EventCalendar>,
    pub messenger: Arc<dyn Messenger>,
}

/// Create the tool registry with every built-in tool.
pub fn default_registry(deps: ToolDeps) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(WeatherForecastTool::new(deps.forecasts))?;
    registry.register(QueryEventsTool::new(deps.calendar.clone()))?;
    registry.register(CreateEventTool::new(deps.calendar))?;
    registry.register(ReplyTool::new(deps.messenger))?;
    Ok(registry)
}

/// Build the forecast source selected by `config`.
pub fn forecast_service_from_config(
    config: &WeatherConfig,
    timeout: Duration,
) -> Result<Arc<dyn ForecastService>, weather::ForecastError> {
    match config.source {
        WeatherSource::OpenMeteo => Ok(Arc::new(OpenMeteo::new(config.timezone.clone(), timeout)?)),
        WeatherSource::Synthetic => Ok(Arc::new(SyntheticForecast)),
    }
}
