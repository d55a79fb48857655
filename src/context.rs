use crate::config::HindsightSettings;
use crate::price_fetcher::PriceSeriesFetcher;
use crate::price_source::{build_async_client, FallbackKlineSource};
use anyhow::Result;
use log::debug;
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct AppContext {
    settings: HindsightSettings,
}

impl AppContext {
    /// Builds the context from a settings map (usually the process environment).
    pub fn initialize(settings: &HashMap<String, String>) -> Result<Self> {
        let settings = HindsightSettings::from_settings_map(settings)?;
        debug!(
            "Price source {} (fallback {}), {}ms between requests",
            settings.primary_url,
            settings.fallback_url,
            settings.request_delay.as_millis()
        );
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &HindsightSettings {
        &self.settings
    }

    pub fn price_fetcher(&self) -> Result<PriceSeriesFetcher<FallbackKlineSource>> {
        let http = build_async_client(self.settings.request_timeout)?;
        let source = FallbackKlineSource::from_urls(
            http,
            &self.settings.primary_url,
            &self.settings.fallback_url,
        );
        Ok(PriceSeriesFetcher::new(source, self.settings.request_delay))
    }
}
